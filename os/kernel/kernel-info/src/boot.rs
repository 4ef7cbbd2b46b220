//! # Boot Information
//!
//! The kernel is loaded by a Multiboot2 boot loader. On entry `EAX` holds
//! [`MULTIBOOT2_BOOTLOADER_MAGIC`] and `EBX` the physical address of the boot
//! information block. The block is copied into (or viewed as) a byte slice and
//! parsed here without any `unsafe`:
//!
//! ```text
//! +0   total_size u32
//! +4   reserved   u32
//! +8   tag        (type u32, size u32, payload ...), padded to 8 bytes
//! ...  tag ...
//!      end tag    (type 0, size 8)
//! ```
//!
//! Only the tags the memory manager needs are decoded: the memory map
//! ([`MemoryMap`]) and the framebuffer descriptor ([`FramebufferInfo`]).

use crate::memory::HIGHER_HALF_BASE;
use core::fmt;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Value in `EAX` when a Multiboot2 loader hands over control.
pub const MULTIBOOT2_BOOTLOADER_MAGIC: u32 = 0x36D7_6289;

/// Magic at the start of the Multiboot2 header embedded in the kernel image.
pub const MULTIBOOT2_HEADER_MAGIC: u32 = 0xE852_50D6;

/// Architecture field of the Multiboot2 header (i386 protected mode).
pub const MULTIBOOT2_ARCHITECTURE_I386: u32 = 0;

const TAG_END: u32 = 0;
const TAG_MEMORY_MAP: u32 = 6;
const TAG_FRAMEBUFFER: u32 = 8;

const TAG_HEADER_SIZE: usize = 8;
const MMAP_HEADER_SIZE: usize = 8;
const MMAP_ENTRY_MIN_SIZE: usize = 20;
const FRAMEBUFFER_PAYLOAD_SIZE: usize = 22;

/// Errors while reading the boot information block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BootInfoError {
    #[error("unexpected boot loader magic {0:#010x}")]
    BadMagic(u32),
    #[error("boot information truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("tag type {tag_type} at offset {offset} overruns the boot information")]
    TagOverrun { tag_type: u32, offset: usize },
    #[error("boot information has no end tag")]
    MissingEndTag,
    #[error("boot information has no memory map")]
    MissingMemoryMap,
    #[error("memory map entry size {0} is too small")]
    BadEntrySize(u32),
    #[error("framebuffer tag is too short ({0} bytes)")]
    BadFramebufferTag(usize),
}

/// Check the magic value passed in `EAX`.
///
/// # Errors
/// [`BootInfoError::BadMagic`] if the kernel was not started by a Multiboot2 loader.
pub const fn check_magic(magic: u32) -> Result<(), BootInfoError> {
    if magic == MULTIBOOT2_BOOTLOADER_MAGIC {
        Ok(())
    } else {
        Err(BootInfoError::BadMagic(magic))
    }
}

/// Read the `total_size` field of a boot information block.
///
/// Used by the entry code to size the slice it hands to [`BootInformation::parse`].
#[must_use]
pub fn total_size(header: &[u8; 8]) -> usize {
    u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize
}

/// A validated view over a Multiboot2 boot information block.
#[derive(Clone, Copy)]
pub struct BootInformation<'a> {
    bytes: &'a [u8],
}

/// One raw tag.
#[derive(Debug, Clone, Copy)]
pub struct Tag<'a> {
    pub tag_type: u32,
    pub payload: &'a [u8],
}

/// Iterator over the tags of a validated [`BootInformation`].
pub struct Tags<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> BootInformation<'a> {
    /// Validate the block: header size, every tag inside `total_size`, and a
    /// terminating end tag.
    ///
    /// # Errors
    /// [`BootInfoError::Truncated`], [`BootInfoError::TagOverrun`] or
    /// [`BootInfoError::MissingEndTag`] for malformed input.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, BootInfoError> {
        let total = read_u32(bytes, 0).ok_or(BootInfoError::Truncated {
            needed: 8,
            available: bytes.len(),
        })? as usize;
        if total < 8 || total > bytes.len() {
            return Err(BootInfoError::Truncated {
                needed: total.max(8),
                available: bytes.len(),
            });
        }
        let bytes = &bytes[..total];

        let mut offset = 8;
        loop {
            let (Some(tag_type), Some(size)) = (read_u32(bytes, offset), read_u32(bytes, offset + 4))
            else {
                return Err(BootInfoError::MissingEndTag);
            };
            let size = size as usize;
            if size < TAG_HEADER_SIZE || offset + size > total {
                return Err(BootInfoError::TagOverrun { tag_type, offset });
            }
            if tag_type == TAG_END {
                return Ok(Self { bytes });
            }
            offset = align8(offset + size);
        }
    }

    /// Total size of the block in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always `false` for a validated block; present for API symmetry with `len`.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Iterate all tags before the end tag.
    #[must_use]
    pub const fn tags(&self) -> Tags<'a> {
        Tags {
            bytes: self.bytes,
            offset: 8,
        }
    }

    /// The firmware memory map.
    ///
    /// # Errors
    /// [`BootInfoError::MissingMemoryMap`] if there is no memory-map tag, or
    /// [`BootInfoError::BadEntrySize`] if its entry size cannot hold an entry.
    pub fn memory_map(&self) -> Result<MemoryMap<'a>, BootInfoError> {
        let tag = self
            .tags()
            .find(|t| t.tag_type == TAG_MEMORY_MAP)
            .ok_or(BootInfoError::MissingMemoryMap)?;

        let entry_size = read_u32(tag.payload, 0).ok_or(BootInfoError::BadEntrySize(0))?;
        if (entry_size as usize) < MMAP_ENTRY_MIN_SIZE || tag.payload.len() < MMAP_HEADER_SIZE {
            return Err(BootInfoError::BadEntrySize(entry_size));
        }

        Ok(MemoryMap {
            entries: &tag.payload[MMAP_HEADER_SIZE..],
            entry_size: entry_size as usize,
        })
    }

    /// The framebuffer descriptor, if the loader set up a linear framebuffer.
    ///
    /// # Errors
    /// [`BootInfoError::BadFramebufferTag`] if the tag is too short to decode.
    pub fn framebuffer(&self) -> Result<Option<FramebufferInfo>, BootInfoError> {
        let Some(tag) = self.tags().find(|t| t.tag_type == TAG_FRAMEBUFFER) else {
            return Ok(None);
        };
        let p = tag.payload;
        if p.len() < FRAMEBUFFER_PAYLOAD_SIZE {
            return Err(BootInfoError::BadFramebufferTag(p.len()));
        }

        let field = |off| read_u32(p, off).ok_or(BootInfoError::BadFramebufferTag(p.len()));
        Ok(Some(FramebufferInfo {
            address: read_u64(p, 0).ok_or(BootInfoError::BadFramebufferTag(p.len()))?,
            pitch: field(8)?,
            width: field(12)?,
            height: field(16)?,
            bpp: p[20],
            kind: p[21],
        }))
    }
}

impl<'a> Iterator for Tags<'a> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let tag_type = read_u32(self.bytes, self.offset)?;
        let size = read_u32(self.bytes, self.offset + 4)? as usize;
        if tag_type == TAG_END || size < TAG_HEADER_SIZE {
            return None;
        }

        let payload = self
            .bytes
            .get(self.offset + TAG_HEADER_SIZE..self.offset + size)?;
        self.offset = align8(self.offset + size);
        Some(Tag { tag_type, payload })
    }
}

/// Firmware memory map (Multiboot2 tag type 6).
#[derive(Clone, Copy)]
pub struct MemoryMap<'a> {
    entries: &'a [u8],
    entry_size: usize,
}

impl<'a> MemoryMap<'a> {
    /// Iterate all regions in the order the firmware reported them.
    pub fn iter(&self) -> impl Iterator<Item = MemoryRegion> + 'a {
        self.entries
            .chunks_exact(self.entry_size)
            .filter_map(|e| {
                Some(MemoryRegion {
                    base: read_u64(e, 0)?,
                    length: read_u64(e, 8)?,
                    kind: MemoryRegionKind::from(read_u32(e, 16)?),
                })
            })
    }

    /// Exclusive end of the highest available region, clipped to 4 GiB.
    #[must_use]
    pub fn available_end(&self) -> u64 {
        self.iter()
            .filter(|r| r.kind == MemoryRegionKind::Available)
            .map(|r| r.end().min(1 << 32))
            .max()
            .unwrap_or(0)
    }
}

/// A physical memory region as reported by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }
}

/// Memory-map region type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionKind {
    Available,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadRam,
    /// A type this kernel does not know; treated as reserved.
    Unknown(u32),
}

impl MemoryRegionKind {
    /// Only [`MemoryRegionKind::Available`] RAM may be handed out.
    #[must_use]
    pub const fn is_usable(self) -> bool {
        matches!(self, Self::Available)
    }
}

impl From<u32> for MemoryRegionKind {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::Available,
            2 => Self::Reserved,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::BadRam,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for MemoryRegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => f.write_str("available"),
            Self::Reserved => f.write_str("reserved"),
            Self::AcpiReclaimable => f.write_str("ACPI reclaimable"),
            Self::AcpiNvs => f.write_str("ACPI NVS"),
            Self::BadRam => f.write_str("bad RAM"),
            Self::Unknown(t) => write!(f, "unknown ({t})"),
        }
    }
}

/// Linear framebuffer (Multiboot2 tag type 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferInfo {
    /// Physical address of the first pixel.
    pub address: u64,
    /// Bytes per scanline.
    pub pitch: u32,
    pub width: u32,
    pub height: u32,
    /// Bits per pixel.
    pub bpp: u8,
    /// 0 = indexed, 1 = direct RGB, 2 = EGA text.
    pub kind: u8,
}

impl FramebufferInfo {
    /// Bytes covered by the framebuffer.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.pitch as u64 * self.height as u64
    }
}

/// Virtual extent of one linked kernel section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionInfo {
    pub virtual_start: VirtualAddress,
    pub virtual_end: VirtualAddress,
}

impl SectionInfo {
    #[must_use]
    pub const fn new(virtual_start: u32, virtual_end: u32) -> Self {
        Self {
            virtual_start: VirtualAddress::new(virtual_start),
            virtual_end: VirtualAddress::new(virtual_end),
        }
    }

    /// Load address; the image is linked at `HIGHER_HALF_BASE + LMA`.
    #[must_use]
    pub const fn physical_start(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.virtual_start.as_u32().wrapping_sub(HIGHER_HALF_BASE))
    }

    #[must_use]
    pub const fn len(&self) -> u32 {
        self.virtual_end.as_u32().saturating_sub(self.virtual_start.as_u32())
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where the kernel image ended up, per section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelMemInfo {
    pub text: SectionInfo,
    pub rodata: SectionInfo,
    pub data: SectionInfo,
    pub bss: SectionInfo,
}

impl KernelMemInfo {
    #[must_use]
    pub const fn virtual_start(&self) -> VirtualAddress {
        self.text.virtual_start
    }

    #[must_use]
    pub const fn virtual_end(&self) -> VirtualAddress {
        self.bss.virtual_end
    }

    #[must_use]
    pub const fn physical_start(&self) -> PhysicalAddress {
        self.text.physical_start()
    }

    #[must_use]
    pub const fn physical_end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.bss.virtual_end.as_u32().wrapping_sub(HIGHER_HALF_BASE))
    }

    /// Sections in link order with their names.
    #[must_use]
    pub const fn sections(&self) -> [(&'static str, SectionInfo); 4] {
        [
            (".text", self.text),
            (".rodata", self.rodata),
            (".data", self.data),
            (".bss", self.bss),
        ]
    }
}

const fn align8(v: usize) -> usize {
    (v + 7) & !7
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let raw = bytes.get(offset..offset.checked_add(8)?)?;
    Some(u64::from_le_bytes(raw.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Little builder for synthetic boot information blocks.
    struct Mbi(Vec<u8>);

    impl Mbi {
        fn new() -> Self {
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

        fn mmap(self, regions: &[(u64, u64, u32)]) -> Self {
            let mut p = Vec::new();
            p.extend_from_slice(&24u32.to_le_bytes());
            p.extend_from_slice(&0u32.to_le_bytes());
            for &(base, len, kind) in regions {
                p.extend_from_slice(&base.to_le_bytes());
                p.extend_from_slice(&len.to_le_bytes());
                p.extend_from_slice(&kind.to_le_bytes());
                p.extend_from_slice(&0u32.to_le_bytes());
            }
            self.tag(TAG_MEMORY_MAP, &p)
        }

        fn finish(self) -> Vec<u8> {
            let mut bytes = self.tag(TAG_END, &[]).0;
            let total = u32::try_from(bytes.len()).unwrap();
            bytes[0..4].copy_from_slice(&total.to_le_bytes());
            bytes
        }
    }

    fn framebuffer_payload() -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&0xFD00_0000u64.to_le_bytes());
        p.extend_from_slice(&(1024u32 * 4).to_le_bytes());
        p.extend_from_slice(&1024u32.to_le_bytes());
        p.extend_from_slice(&768u32.to_le_bytes());
        p.push(32);
        p.push(1);
        p.extend_from_slice(&[0, 0]);
        p
    }

    #[test]
    fn magic_is_checked() {
        assert!(check_magic(MULTIBOOT2_BOOTLOADER_MAGIC).is_ok());
        assert_eq!(check_magic(0x2BAD_B002), Err(BootInfoError::BadMagic(0x2BAD_B002)));
    }

    #[test]
    fn parses_memory_map_regions_in_order() {
        let bytes = Mbi::new()
            .mmap(&[
                (0, 0x9_FC00, 1),
                (0x9_FC00, 0x400, 2),
                (0x10_0000, 0x7EE_0000, 1),
                (0x7FE_0000, 0x2_0000, 3),
                (0xFFFC_0000, 0x4_0000, 2),
            ])
            .finish();
        let info = BootInformation::parse(&bytes).unwrap();
        let mmap = info.memory_map().unwrap();

        let regions: Vec<_> = mmap.iter().collect();
        assert_eq!(regions.len(), 5);
        assert_eq!(regions[1].kind, MemoryRegionKind::Reserved);
        assert_eq!(regions[2].base, 0x10_0000);
        assert_eq!(regions[3].kind, MemoryRegionKind::AcpiReclaimable);
        assert_eq!(mmap.available_end(), 0x7FE_0000);
    }

    #[test]
    fn parses_framebuffer_and_computes_size_from_pitch() {
        let bytes = Mbi::new()
            .mmap(&[(0, 0x100_0000, 1)])
            .tag(TAG_FRAMEBUFFER, &framebuffer_payload())
            .finish();
        let info = BootInformation::parse(&bytes).unwrap();
        let fb = info.framebuffer().unwrap().unwrap();

        assert_eq!(fb.address, 0xFD00_0000);
        assert_eq!((fb.width, fb.height, fb.bpp), (1024, 768, 32));
        assert_eq!(fb.size_bytes(), 1024 * 4 * 768);
    }

    #[test]
    fn unknown_tags_are_skipped() {
        let bytes = Mbi::new()
            .tag(1, b"root=/dev/sda\0")
            .tag(2, b"grub\0")
            .mmap(&[(0, 0x100_0000, 1)])
            .finish();
        let info = BootInformation::parse(&bytes).unwrap();
        assert_eq!(info.tags().count(), 3);
        assert!(info.framebuffer().unwrap().is_none());
        assert_eq!(info.memory_map().unwrap().iter().count(), 1);
    }

    #[test]
    fn missing_memory_map_is_an_error() {
        let bytes = Mbi::new().tag(1, b"x\0").finish();
        let info = BootInformation::parse(&bytes).unwrap();
        assert_eq!(info.memory_map().err(), Some(BootInfoError::MissingMemoryMap));
    }

    #[test]
    fn truncated_block_is_rejected() {
        let bytes = Mbi::new().mmap(&[(0, 0x100_0000, 1)]).finish();
        let err = BootInformation::parse(&bytes[..bytes.len() - 8]).err();
        assert!(matches!(err, Some(BootInfoError::Truncated { .. })));
        assert!(matches!(
            BootInformation::parse(&[1, 2, 3]).err(),
            Some(BootInfoError::Truncated { .. })
        ));
    }

    #[test]
    fn overrunning_tag_is_rejected() {
        let mut bytes = Mbi::new().mmap(&[(0, 0x100_0000, 1)]).finish();
        bytes[12..16].copy_from_slice(&0x1000u32.to_le_bytes());
        assert_eq!(
            BootInformation::parse(&bytes).err(),
            Some(BootInfoError::TagOverrun {
                tag_type: TAG_MEMORY_MAP,
                offset: 8
            })
        );
    }

    #[test]
    fn unknown_region_kinds_are_not_usable() {
        assert!(MemoryRegionKind::from(1).is_usable());
        for raw in [2, 3, 4, 5, 42] {
            assert!(!MemoryRegionKind::from(raw).is_usable());
        }
    }

    #[test]
    fn section_physical_addresses_follow_the_link_offset() {
        let text = SectionInfo::new(0xC010_0000, 0xC010_8000);
        assert_eq!(text.physical_start(), PhysicalAddress::new(0x0010_0000));
        assert_eq!(text.len(), 0x8000);

        let info = KernelMemInfo {
            text,
            rodata: SectionInfo::new(0xC010_8000, 0xC010_A000),
            data: SectionInfo::new(0xC010_A000, 0xC010_B000),
            bss: SectionInfo::new(0xC010_B000, 0xC012_0000),
        };
        assert_eq!(info.physical_end(), PhysicalAddress::new(0x0012_0000));
        assert_eq!(info.sections()[3].0, ".bss");
    }
}
