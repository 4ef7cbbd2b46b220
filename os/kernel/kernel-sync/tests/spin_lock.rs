use kernel_sync::SpinLock;
use kernel_sync::irq::interrupts_enabled;
use std::sync::Arc;
use std::{panic, thread};

/// Stand-ins for the two memory-management singletons.
struct Frames {
    bitmap: Vec<bool>,
}

struct Manager {
    mapped: Vec<u32>,
}

static FRAMES: SpinLock<Option<Frames>> = SpinLock::new(None);

#[test]
fn static_lock_starts_empty_and_is_filled_once() {
    assert!(FRAMES.lock().is_none());
    *FRAMES.lock() = Some(Frames {
        bitmap: vec![false; 64],
    });

    let mut g = FRAMES.lock();
    let frames = g.as_mut().unwrap();
    frames.bitmap[3] = true;
    assert_eq!(frames.bitmap.iter().filter(|b| **b).count(), 1);
}

#[test]
fn fault_path_sees_busy_while_either_lock_is_held() {
    let frames = SpinLock::new(Frames {
        bitmap: vec![false; 8],
    });
    let manager = SpinLock::new(Manager { mapped: Vec::new() });

    // Normal path: frame allocator first, then the manager.
    {
        let _f = frames.lock();
        let _m = manager.lock();
        assert!(frames.try_lock().is_none());
        assert!(manager.try_lock().is_none());
    }

    // Only the manager held: the first try succeeds, the second fails,
    // and the first guard is released again on the way out.
    {
        let _m = manager.lock();
        let outcome = frames
            .try_lock()
            .and_then(|f| manager.try_lock().map(|m| (f, m)));
        assert!(outcome.is_none());
        assert!(!frames.is_locked());
    }

    let mut f = frames.try_lock().unwrap();
    let mut m = manager.try_lock().unwrap();
    f.bitmap[0] = true;
    m.mapped.push(0x1000);
    drop((f, m));
    assert!(!frames.is_locked() && !manager.is_locked());
}

#[test]
fn irq_guard_is_dropped_after_the_lock() {
    let lock = SpinLock::new(0u32);
    let before = interrupts_enabled();
    {
        let mut g = lock.lock_irq();
        assert!(lock.is_locked());
        assert!(!interrupts_enabled());
        *g += 1;
    }
    assert!(!lock.is_locked());
    assert_eq!(interrupts_enabled(), before);
    assert_eq!(*lock.lock(), 1);
}

#[test]
fn nested_irq_locks_unwind_in_order() {
    let outer = SpinLock::new('a');
    let inner = SpinLock::new('b');
    let a = outer.lock_irq();
    let b = inner.lock_irq();
    assert_eq!((*a, *b), ('a', 'b'));
    drop(b);
    assert!(outer.is_locked());
    assert!(!inner.is_locked());
    drop(a);
    assert!(!outer.is_locked());
}

#[test]
fn with_lock_returns_the_closure_value() {
    let heap = SpinLock::new(vec![0u8; 16]);
    let free = heap.with_lock(|bytes| {
        bytes[..4].fill(1);
        bytes.iter().filter(|b| **b == 0).count()
    });
    assert_eq!(free, 12);
    assert!(!heap.is_locked());
}

#[test]
fn panic_under_with_lock_releases_it() {
    let heap = SpinLock::new(Vec::<u32>::new());
    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        heap.with_lock(|v| {
            v.push(7);
            panic!("allocator bug");
        })
    }));
    assert!(res.is_err());
    assert!(!heap.is_locked());
    assert_eq!(heap.with_lock(|v| v.clone()), [7]);
}

#[test]
fn threads_never_hand_out_the_same_frame() {
    const FRAME_COUNT: usize = 4096;
    const WORKERS: usize = 8;

    let frames = Arc::new(SpinLock::new(Frames {
        bitmap: vec![false; FRAME_COUNT],
    }));

    let workers: Vec<_> = (0..WORKERS)
        .map(|_| {
            let frames = Arc::clone(&frames);
            thread::spawn(move || {
                let mut mine = Vec::new();
                loop {
                    let next = frames.with_lock(|f| {
                        let i = f.bitmap.iter().position(|used| !used)?;
                        f.bitmap[i] = true;
                        Some(i)
                    });
                    match next {
                        Some(i) => mine.push(i),
                        None => break mine,
                    }
                    thread::yield_now();
                }
            })
        })
        .collect();

    let mut all: Vec<usize> = workers
        .into_iter()
        .flat_map(|w| w.join().unwrap())
        .collect();
    all.sort_unstable();
    assert_eq!(all, (0..FRAME_COUNT).collect::<Vec<_>>());
}

#[test]
fn debug_shows_lock_state_only() {
    let lock = SpinLock::new(Manager { mapped: vec![1] });
    assert_eq!(format!("{lock:?}"), "SpinLock { locked: false, .. }");
    let g = lock.lock();
    assert_eq!(format!("{lock:?}"), "SpinLock { locked: true, .. }");
    assert_eq!(g.mapped, [1]);
}
