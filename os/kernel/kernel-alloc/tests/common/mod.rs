#![allow(dead_code)]

use core::cell::UnsafeCell;
use kernel_alloc::{BitmapFrameAlloc, KernelLayout, MemoryManager, PhysRange, boot_reserved_ranges};
use kernel_info::boot::{BootInformation, KernelMemInfo, SectionInfo};
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// First simulated frame; everything below is reserved in the PMM.
pub const SIM_BASE: u32 = 24 << 20;
/// End of simulated RAM and of the firmware's available memory.
pub const SIM_END: u32 = 28 << 20;

const SIM_FRAMES: usize = ((SIM_END - SIM_BASE) >> 12) as usize;

#[repr(align(4096))]
struct Aligned4K(#[allow(dead_code)] [u8; 4096]);

/// Simulated RAM covering `[SIM_BASE, SIM_END)`.
pub struct TestPhys {
    frames: Vec<UnsafeCell<Aligned4K>>,
}

impl TestPhys {
    pub fn new() -> Self {
        let mut frames = Vec::with_capacity(SIM_FRAMES);
        for _ in 0..SIM_FRAMES {
            // Garbage, so missing zeroing is visible.
            frames.push(UnsafeCell::new(Aligned4K([0xA5; 4096])));
        }
        Self { frames }
    }

    pub fn frame_bytes(&self, pa: PhysicalAddress) -> &[u8; 4096] {
        unsafe { self.phys_to_mut::<[u8; 4096]>(pa) }
    }
}

impl PhysMapper for TestPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let rel = pa
            .as_u32()
            .checked_sub(SIM_BASE)
            .unwrap_or_else(|| panic!("{pa} is below simulated RAM"));
        let base = self.frames[(rel >> 12) as usize].get().cast::<u8>();
        unsafe { &mut *base.add((rel & 0xFFF) as usize).cast::<T>() }
    }
}

/// Synthetic Multiboot2 information block.
pub struct Mbi(Vec<u8>);

impl Mbi {
    pub fn new() -> Self {
        Self(vec![0; 8])
    }

    fn tag(mut self, tag_type: u32, payload: &[u8]) -> Self {
        let size = u32::try_from(8 + payload.len()).unwrap();
        self.0.extend_from_slice(&tag_type.to_le_bytes());
        self.0.extend_from_slice(&size.to_le_bytes());
        self.0.extend_from_slice(payload);
        while self.0.len() % 8 != 0 {
            self.0.push(0);
        }
        self
    }

    pub fn mmap(self, regions: &[(u64, u64, u32)]) -> Self {
        let mut p = Vec::new();
        p.extend_from_slice(&24u32.to_le_bytes());
        p.extend_from_slice(&0u32.to_le_bytes());
        for &(base, len, kind) in regions {
            p.extend_from_slice(&base.to_le_bytes());
            p.extend_from_slice(&len.to_le_bytes());
            p.extend_from_slice(&kind.to_le_bytes());
            p.extend_from_slice(&0u32.to_le_bytes());
        }
        self.tag(6, &p)
    }

    pub fn finish(self) -> Vec<u8> {
        let mut bytes = self.tag(0, &[]).0;
        let total = u32::try_from(bytes.len()).unwrap();
        bytes[0..4].copy_from_slice(&total.to_le_bytes());
        bytes
    }
}

/// A small linked image at 1 MiB.
pub fn image() -> KernelMemInfo {
    KernelMemInfo {
        text: SectionInfo::new(0xC010_0000, 0xC010_4000),
        rodata: SectionInfo::new(0xC010_4000, 0xC010_6000),
        data: SectionInfo::new(0xC010_6000, 0xC010_7000),
        bss: SectionInfo::new(0xC010_7000, 0xC010_A000),
    }
}

pub fn boot_info() -> Vec<u8> {
    Mbi::new()
        .mmap(&[
            (0, 0x9_F000, 1),
            (0x9_F000, 0x1000, 2),
            (0xF_0000, 0x1_0000, 2),
            (0x10_0000, u64::from(SIM_END) - 0x10_0000, 1),
            (0xFFFC_0000, 0x4_0000, 2),
        ])
        .finish()
}

/// Frame allocator initialised from the synthetic boot information, with
/// everything outside simulated RAM reserved.
pub fn pmm() -> (Box<BitmapFrameAlloc>, KernelLayout) {
    let bytes = boot_info();
    let info = BootInformation::parse(&bytes).unwrap();
    let mmap = info.memory_map().unwrap();

    let mut pmm = Box::new(BitmapFrameAlloc::new());
    pmm.init(boot_reserved_ranges(&image(), &mmap, None));
    pmm.reserve_range(PhysRange::new(0, u64::from(SIM_BASE)));

    let layout = KernelLayout::new(&image(), mmap.available_end()).unwrap();
    (pmm, layout)
}

pub fn boot<'m>(phys: &'m TestPhys, pmm: &mut BitmapFrameAlloc, layout: &KernelLayout) -> MemoryManager<'m, TestPhys> {
    MemoryManager::bootstrap(phys, pmm, layout).unwrap()
}
