use core::ptr::{self, null_mut};

/// Header in front of every block, free or allocated.
///
/// ```text
/// +----------------------+-------------------------+
/// | BlockHeader          |      payload (size)     |
/// +----------------------+-------------------------+
/// ^ block_addr           ^ block_addr + HEADER
/// ```
///
/// - `size` is the number of payload bytes **after** the header.
/// - `next` links free blocks in **address order**; it is unused while the
///   block is allocated.
#[repr(C)]
struct BlockHeader {
    size: usize,
    next: *mut BlockHeader,
}

const HEADER: usize = size_of::<BlockHeader>();

/// Granularity of every block boundary.
const UNIT: usize = align_of::<BlockHeader>();

impl BlockHeader {
    const fn new(size: usize) -> Self {
        Self {
            size,
            next: null_mut(),
        }
    }
}

/// Align `addr` upwards to `align` (must be a power of two).
#[inline]
const fn align_up(addr: usize, align: usize) -> usize {
    (addr + (align - 1)) & !(align - 1)
}

/// First-fit, split-and-coalesce free-list allocator.
///
/// # Invariants
/// - Free blocks are non-overlapping, address ordered, and never adjacent
///   (adjacent blocks are merged on insertion).
/// - Every block boundary is a multiple of [`UNIT`] and every block can hold
///   a header.
/// - `head` is a sentinel; the first real block is at `head.next`.
pub struct FreeListAllocator {
    head: BlockHeader,
    initialized: bool,
}

// Safety: always used under a lock; raw pointers are only followed while locked.
unsafe impl Send for FreeListAllocator {}

impl Default for FreeListAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeListAllocator {
    /// An allocator without memory.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: BlockHeader::new(0),
            initialized: false,
        }
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Manage `[heap_start, heap_start + heap_size)` as one free block.
    ///
    /// # Safety
    /// - The memory range must be **valid**, **writable**, and **exclusive** to the allocator.
    /// - Must be called **at most once** before any allocations on this instance.
    pub unsafe fn init(&mut self, heap_start: usize, heap_size: usize) {
        let start = align_up(heap_start, UNIT);
        let end = (heap_start + heap_size) & !(UNIT - 1);
        if end <= start + HEADER {
            return;
        }
        let node = start as *mut BlockHeader;
        unsafe {
            ptr::write(node, BlockHeader::new(end - start - HEADER));
        }
        self.head.next = node;
        self.initialized = true;
    }

    /// Carve `size` bytes aligned to `align` out of the first block that fits.
    ///
    /// Returns null if nothing fits.
    ///
    /// # Safety
    /// - The free-list invariants must hold.
    pub unsafe fn allocate(&mut self, size: usize, align: usize) -> *mut u8 {
        let size = align_up(size.max(1), UNIT);
        let align = align.max(UNIT);

        let mut prev = &raw mut self.head;
        let mut current = self.head.next;
        while !current.is_null() {
            let block = current as usize;
            let block_end = block + HEADER + unsafe { (*current).size };

            // The allocation's header sits right before the payload; the gap in
            // front of it must be empty or able to hold a free block.
            let mut payload = align_up(block + HEADER, align);
            while payload - HEADER != block && payload - HEADER - block < HEADER {
                payload += align;
            }

            if let Some(alloc_end) = payload.checked_add(size)
                && alloc_end <= block_end
            {
                unsafe {
                    (*prev).next = (*current).next;
                }

                let tail = block_end - alloc_end;
                let used = if tail >= HEADER { size } else { size + tail };
                unsafe {
                    ptr::write((payload - HEADER) as *mut BlockHeader, BlockHeader::new(used));
                }

                if tail >= HEADER {
                    unsafe { self.add_free_region(alloc_end, tail) };
                }
                let head = payload - HEADER - block;
                if head > 0 {
                    unsafe { self.add_free_region(block, head) };
                }
                return payload as *mut u8;
            }

            prev = current;
            current = unsafe { (*current).next };
        }
        null_mut()
    }

    /// Return a block obtained from [`allocate`](Self::allocate).
    ///
    /// # Safety
    /// - `ptr` must come from this allocator and not have been freed yet.
    pub unsafe fn deallocate(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let header = (ptr as usize) - HEADER;
        let size = unsafe { (*(header as *const BlockHeader)).size };
        unsafe { self.add_free_region(header, HEADER + size) };
    }

    /// Bytes available to future allocations (headers excluded).
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.blocks().map(|(_, size)| size).sum()
    }

    /// Payload size of the largest free block.
    #[must_use]
    pub fn largest_free_block(&self) -> usize {
        self.blocks().map(|(_, size)| size).max().unwrap_or(0)
    }

    /// Number of free blocks.
    #[must_use]
    pub fn free_block_count(&self) -> usize {
        self.blocks().count()
    }

    fn blocks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let mut current = self.head.next;
        core::iter::from_fn(move || {
            if current.is_null() {
                return None;
            }
            // SAFETY: free-list nodes stay valid while `self` is borrowed.
            let node = unsafe { &*current };
            let item = (current as usize, node.size);
            current = node.next;
            Some(item)
        })
    }

    /// Insert `[addr, addr + size)` in address order and merge with neighbours.
    ///
    /// # Safety
    /// - The range must be unused memory inside the heap, aligned to [`UNIT`].
    /// - `size >= HEADER`.
    unsafe fn add_free_region(&mut self, addr: usize, size: usize) {
        debug_assert!(size >= HEADER);
        let mut prev = &raw mut self.head;
        let mut current = self.head.next;
        while !current.is_null() && (current as usize) < addr {
            prev = current;
            current = unsafe { (*current).next };
        }
        let new = addr as *mut BlockHeader;
        unsafe {
            ptr::write(new, BlockHeader::new(size - HEADER));
            (*new).next = current;
            (*prev).next = new;
            self.coalesce(prev);
        }
    }

    /// Merge the block after `prev` with its successor, then with `prev`.
    ///
    /// # Safety
    /// - The list invariants must hold apart from the freshly inserted block.
    unsafe fn coalesce(&mut self, prev: *mut BlockHeader) {
        let curr = unsafe { (*prev).next };
        if curr.is_null() {
            return;
        }
        let next = unsafe { (*curr).next };
        if !next.is_null() {
            let curr_end = curr as usize + HEADER + unsafe { (*curr).size };
            if curr_end == next as usize {
                unsafe {
                    (*curr).size += HEADER + (*next).size;
                    (*curr).next = (*next).next;
                }
            }
        }
        if !ptr::eq(prev, &raw const self.head) {
            let prev_end = prev as usize + HEADER + unsafe { (*prev).size };
            if prev_end == curr as usize {
                unsafe {
                    (*prev).size += HEADER + (*curr).size;
                    (*prev).next = (*curr).next;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARENA: usize = 64 * 1024;

    #[repr(align(64))]
    struct Arena([u8; ARENA]);

    fn heap() -> (Box<Arena>, FreeListAllocator) {
        let mut arena = Box::new(Arena([0; ARENA]));
        let mut a = FreeListAllocator::new();
        unsafe { a.init(arena.0.as_mut_ptr() as usize, ARENA) };
        (arena, a)
    }

    #[test]
    fn fresh_heap_is_one_block() {
        let (_arena, a) = heap();
        assert!(a.is_initialized());
        assert_eq!(a.free_block_count(), 1);
        assert_eq!(a.free_bytes(), ARENA - HEADER);
    }

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let (_arena, mut a) = heap();
        let p = unsafe { a.allocate(24, 8) };
        let q = unsafe { a.allocate(100, 64) };
        let r = unsafe { a.allocate(1, 1) };
        assert!(!p.is_null() && !q.is_null() && !r.is_null());
        assert_eq!(q as usize % 64, 0);
        let spans = [(p as usize, 24), (q as usize, 100), (r as usize, 1)];
        for (i, &(s1, l1)) in spans.iter().enumerate() {
            for &(s2, l2) in &spans[i + 1..] {
                assert!(s1 + l1 <= s2 || s2 + l2 <= s1);
            }
        }
    }

    #[test]
    fn payload_writes_do_not_corrupt_the_free_list() {
        let (_arena, mut a) = heap();
        let p = unsafe { a.allocate(128, 16) };
        unsafe { ptr::write_bytes(p, 0xFF, 128) };
        let q = unsafe { a.allocate(128, 16) };
        assert!(!q.is_null());
        assert!(q as usize >= p as usize + 128);
        unsafe {
            a.deallocate(p);
            a.deallocate(q);
        }
        assert_eq!(a.free_block_count(), 1);
    }

    #[test]
    fn freeing_everything_coalesces_back_to_one_block() {
        let (_arena, mut a) = heap();
        let ptrs: Vec<_> = (1..20)
            .map(|i| unsafe { a.allocate(i * 16, 1 << (i % 7)) })
            .collect();
        assert!(ptrs.iter().all(|p| !p.is_null()));
        for p in ptrs.iter().step_by(2).chain(ptrs.iter().skip(1).step_by(2)) {
            unsafe { a.deallocate(*p) };
        }
        assert_eq!(a.free_block_count(), 1);
        assert_eq!(a.free_bytes(), ARENA - HEADER);
    }

    #[test]
    fn exhaustion_returns_null() {
        let (_arena, mut a) = heap();
        let big = unsafe { a.allocate(ARENA, 8) };
        assert!(big.is_null());
        let all = unsafe { a.allocate(ARENA - HEADER, UNIT) };
        assert!(!all.is_null());
        assert!(unsafe { a.allocate(1, 1) }.is_null());
        unsafe { a.deallocate(all) };
        assert_eq!(a.largest_free_block(), ARENA - HEADER);
    }

    #[test]
    fn freed_block_is_reused_first_fit() {
        let (_arena, mut a) = heap();
        let p = unsafe { a.allocate(256, 8) };
        let _q = unsafe { a.allocate(256, 8) };
        unsafe { a.deallocate(p) };
        let r = unsafe { a.allocate(200, 8) };
        assert_eq!(r, p);
    }
}
