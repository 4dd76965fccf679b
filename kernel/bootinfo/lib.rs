// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides a fixed-capacity snapshot of the boot information handed
//! over by a Multiboot2 loader.
//!
//! The Multiboot2 information structure lives in physical memory that
//! only stays mapped while the bootloader's provisional page tables
//! are active. The memory managers need to walk the memory map long
//! after those tables are gone (and repeatedly, in the boot
//! allocator's case), so the kernel copies the parts it needs into
//! the plain, owned types in this crate before it starts rebuilding
//! the address space:
//!
//! - [`MemoryMap`]: The physical memory regions, in the loader's order.
//! - [`KernelSections`]: The kernel's ELF sections, with their mapping-relevant attributes.
//!
//! Both types have fixed capacity and live happily in statics or on
//! the early boot stack; neither requires an allocator.

#![no_std]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![forbid(unsafe_code)]
#![deny(unused_crate_dependencies)]

use bitflags::bitflags;
use core::fmt;
use core::str;
use memory::constants::PAGE_SIZE;
use memory::{Frame, PhysAddr, VirtAddr};
use multiboot2::{BootInformation, ElfSection, MemoryAreaType, MemoryMapTag};

/// The maximum number of memory regions a [`MemoryMap`] can hold.
///
/// Real firmware rarely reports more than a couple of dozen regions.
///
pub const MAX_REGIONS: usize = 64;

/// The maximum number of ELF sections a [`KernelSections`] can hold.
///
pub const MAX_SECTIONS: usize = 64;

/// The number of section name bytes preserved for diagnostics.
///
const SECTION_NAME_LEN: usize = 32;

/// Classifies a region of physical memory reported by the loader.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemoryRegionKind {
    /// Memory that is free for the kernel to use.
    Available,
    /// Memory that must not be touched.
    Reserved,
    /// Memory holding ACPI tables, reclaimable once they have been
    /// parsed.
    AcpiReclaimable,
    /// Memory that must be preserved across hibernation.
    Nvs,
    /// Memory reported as defective.
    Defective,
}

/// A single contiguous region of physical memory.
///
/// The reported extent is not assumed to be page-aligned; use
/// [`frame_range`](MemoryRegion::frame_range) for the whole frames
/// the region contains.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MemoryRegion {
    /// The first physical address in the region.
    pub start: PhysAddr,
    /// The region's length in bytes.
    pub size: u64,
    /// What the region may be used for.
    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    const EMPTY: MemoryRegion = MemoryRegion {
        start: PhysAddr::zero(),
        size: 0,
        kind: MemoryRegionKind::Reserved,
    };

    /// Returns whether the region is available for allocation.
    ///
    pub fn is_available(&self) -> bool {
        self.kind == MemoryRegionKind::Available
    }

    /// Returns the whole frames contained in the region, as a
    /// half-open `[start, end)` pair: the start address is rounded
    /// up to a frame boundary and the end address down.
    ///
    /// Returns `None` for regions smaller than one page and for
    /// regions that contain no whole frame after rounding.
    ///
    pub fn frame_range(&self) -> Option<(Frame, Frame)> {
        if self.size < PAGE_SIZE as u64 {
            return None;
        }

        let start = Frame::containing_address(self.start.align_up(PAGE_SIZE as u64));
        let end = Frame::containing_address((self.start + self.size).align_down(PAGE_SIZE as u64));
        if start < end {
            Some((start, end))
        } else {
            None
        }
    }
}

/// The set of physical memory regions reported by the loader, in
/// the loader's order.
///
#[derive(Clone)]
pub struct MemoryMap {
    regions: [MemoryRegion; MAX_REGIONS],
    len: usize,
}

impl MemoryMap {
    /// Returns an empty memory map.
    ///
    pub const fn empty() -> Self {
        MemoryMap {
            regions: [MemoryRegion::EMPTY; MAX_REGIONS],
            len: 0,
        }
    }

    /// Copies the loader's memory map out of the Multiboot2
    /// information structure.
    ///
    /// Regions beyond [`MAX_REGIONS`] are dropped.
    ///
    pub fn from_multiboot(tag: &MemoryMapTag) -> Self {
        let mut map = MemoryMap::empty();
        for area in tag.memory_areas() {
            let kind = match MemoryAreaType::from(area.typ()) {
                MemoryAreaType::Available => MemoryRegionKind::Available,
                MemoryAreaType::AcpiAvailable => MemoryRegionKind::AcpiReclaimable,
                MemoryAreaType::ReservedHibernate => MemoryRegionKind::Nvs,
                MemoryAreaType::Defective => MemoryRegionKind::Defective,
                MemoryAreaType::Reserved => MemoryRegionKind::Reserved,
                MemoryAreaType::Custom(_) => MemoryRegionKind::Reserved,
            };

            let start = match PhysAddr::try_new(area.start_address()) {
                Ok(start) => start,
                Err(_) => continue,
            };

            map.push(MemoryRegion {
                start,
                size: area.size(),
                kind,
            });
        }

        map
    }

    /// Appends a region to the map. Regions beyond the map's fixed
    /// capacity are dropped.
    ///
    pub fn push(&mut self, region: MemoryRegion) {
        if self.len < MAX_REGIONS {
            self.regions[self.len] = region;
            self.len += 1;
        }
    }

    /// Returns the number of regions in the map.
    ///
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the map contains no regions.
    ///
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over the regions in the map, in the loader's order.
    ///
    pub fn iter(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions[..self.len].iter()
    }

    /// Iterates over the available regions in the map.
    ///
    pub fn available(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.iter().filter(|region| region.is_available())
    }
}

bitflags! {
    /// The mapping-relevant attributes of a kernel ELF section.
    ///
    pub struct SectionFlags: u64 {
        /// The section occupies memory at run time.
        const ALLOCATED = 1 << 0;

        /// The section's memory is written at run time.
        const WRITABLE = 1 << 1;

        /// The section contains executable code.
        const EXECUTABLE = 1 << 2;
    }
}

/// A kernel ELF section as reported by the loader.
///
#[derive(Clone, Copy)]
pub struct KernelSection {
    name: [u8; SECTION_NAME_LEN],
    name_len: usize,
    /// The virtual address the section was linked at.
    pub addr: VirtAddr,
    /// The section's size in bytes.
    pub size: u64,
    /// The section's attributes.
    pub flags: SectionFlags,
}

impl KernelSection {
    const EMPTY: KernelSection = KernelSection {
        name: [0; SECTION_NAME_LEN],
        name_len: 0,
        addr: VirtAddr::zero(),
        size: 0,
        flags: SectionFlags::empty(),
    };

    /// Creates a section description by hand.
    ///
    /// The name is truncated to the diagnostic buffer size.
    ///
    pub fn new(name: &str, addr: VirtAddr, size: u64, flags: SectionFlags) -> Self {
        let mut section = KernelSection {
            name: [0; SECTION_NAME_LEN],
            name_len: name.len().min(SECTION_NAME_LEN),
            addr,
            size,
            flags,
        };
        section.name[..section.name_len].copy_from_slice(&name.as_bytes()[..section.name_len]);

        section
    }

    /// Copies a section description out of the Multiboot2
    /// information structure.
    ///
    /// Returns `None` if the section's address is not a valid
    /// virtual address.
    ///
    pub fn from_multiboot(section: &ElfSection) -> Option<Self> {
        let addr = VirtAddr::try_new(section.start_address()).ok()?;

        let mut flags = SectionFlags::empty();
        let elf_flags = section.flags();
        if elf_flags.contains(multiboot2::ElfSectionFlags::ALLOCATED) {
            flags |= SectionFlags::ALLOCATED;
        }
        if elf_flags.contains(multiboot2::ElfSectionFlags::WRITABLE) {
            flags |= SectionFlags::WRITABLE;
        }
        if elf_flags.contains(multiboot2::ElfSectionFlags::EXECUTABLE) {
            flags |= SectionFlags::EXECUTABLE;
        }

        Some(KernelSection::new(
            section.name().unwrap_or("???"),
            addr,
            section.size(),
            flags,
        ))
    }

    /// Returns the section's name.
    ///
    pub fn name(&self) -> &str {
        str::from_utf8(&self.name[..self.name_len]).unwrap_or("???")
    }

    /// Returns whether the section's memory is written at run time.
    ///
    pub fn writable(&self) -> bool {
        self.flags.contains(SectionFlags::WRITABLE)
    }

    /// Returns whether the section contains executable code.
    ///
    pub fn executable(&self) -> bool {
        self.flags.contains(SectionFlags::EXECUTABLE)
    }
}

impl fmt::Debug for KernelSection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KernelSection")
            .field("name", &self.name())
            .field("addr", &self.addr)
            .field("size", &self.size)
            .field("flags", &self.flags)
            .finish()
    }
}

/// The kernel's ELF sections, as reported by the loader.
///
#[derive(Clone)]
pub struct KernelSections {
    sections: [KernelSection; MAX_SECTIONS],
    len: usize,
}

impl KernelSections {
    /// Returns an empty section list.
    ///
    pub const fn empty() -> Self {
        KernelSections {
            sections: [KernelSection::EMPTY; MAX_SECTIONS],
            len: 0,
        }
    }

    /// Copies the kernel's ELF sections out of the Multiboot2
    /// information structure.
    ///
    /// Sections beyond [`MAX_SECTIONS`] are dropped.
    ///
    pub fn from_multiboot(boot_info: &BootInformation) -> Self {
        let mut sections = KernelSections::empty();
        if let Some(iter) = boot_info.elf_sections() {
            for section in iter {
                if let Some(section) = KernelSection::from_multiboot(&section) {
                    sections.push(section);
                }
            }
        }

        sections
    }

    /// Appends a section. Sections beyond the fixed capacity are
    /// dropped.
    ///
    pub fn push(&mut self, section: KernelSection) {
        if self.len < MAX_SECTIONS {
            self.sections[self.len] = section;
            self.len += 1;
        }
    }

    /// Returns the number of sections.
    ///
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the list contains no sections.
    ///
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over the sections.
    ///
    pub fn iter(&self) -> impl Iterator<Item = &KernelSection> {
        self.sections[..self.len].iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_range_rounding() {
        // An unaligned available region: only whole frames count.
        let region = MemoryRegion {
            start: PhysAddr::zero(),
            size: 0x9fc00,
            kind: MemoryRegionKind::Available,
        };
        assert_eq!(
            region.frame_range(),
            Some((Frame::from_index(0), Frame::from_index(0x9f)))
        );

        // An aligned region maps exactly.
        let region = MemoryRegion {
            start: PhysAddr::new(0x10_0000),
            size: 0x7fe0000 - 0x10_0000,
            kind: MemoryRegionKind::Available,
        };
        assert_eq!(
            region.frame_range(),
            Some((Frame::from_index(0x100), Frame::from_index(0x7fe0)))
        );

        // Too small to hold a page.
        let region = MemoryRegion {
            start: PhysAddr::new(0x500),
            size: 0xfff,
            kind: MemoryRegionKind::Available,
        };
        assert_eq!(region.frame_range(), None);

        // Large enough, but straddling frames such that no whole
        // frame fits.
        let region = MemoryRegion {
            start: PhysAddr::new(0x800),
            size: 0x1000,
            kind: MemoryRegionKind::Available,
        };
        assert_eq!(region.frame_range(), None);
    }

    #[test]
    fn test_memory_map() {
        let mut map = MemoryMap::empty();
        assert!(map.is_empty());

        map.push(MemoryRegion {
            start: PhysAddr::zero(),
            size: 0x9fc00,
            kind: MemoryRegionKind::Available,
        });
        map.push(MemoryRegion {
            start: PhysAddr::new(0x9fc00),
            size: 0x400,
            kind: MemoryRegionKind::Reserved,
        });
        map.push(MemoryRegion {
            start: PhysAddr::new(0x10_0000),
            size: 0x100_0000,
            kind: MemoryRegionKind::Available,
        });

        assert_eq!(map.len(), 3);
        assert_eq!(map.available().count(), 2);
        assert_eq!(
            map.iter().nth(1).map(|region| region.kind),
            Some(MemoryRegionKind::Reserved)
        );
    }

    #[test]
    fn test_kernel_section_names() {
        let section = KernelSection::new(
            ".text",
            VirtAddr::new(0xffff_8000_0010_0000),
            0x2000,
            SectionFlags::ALLOCATED | SectionFlags::EXECUTABLE,
        );
        assert_eq!(section.name(), ".text");
        assert!(section.executable());
        assert!(!section.writable());

        // Over-long names are truncated, not rejected.
        let long = KernelSection::new(
            "a-section-name-well-beyond-the-buffer-size",
            VirtAddr::zero(),
            0,
            SectionFlags::empty(),
        );
        assert_eq!(long.name().len(), 32);
    }
}
