// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Builds the kernel's own page directory table, replacing the
//! loader's provisional mapping.

use crate::mapping;
use crate::pdt::PageDirectoryTable;
use crate::reserve;
use crate::InitError;
use bootinfo::KernelSections;
use memory::constants::{PAGE_SIZE, TEMP_MAPPING_ADDR};
use memory::{Frame, Page, PageTableFlags, VirtAddr};

/// Builds and activates a page directory table covering exactly
/// the kernel's ELF sections and the top-end early reservations.
///
/// Every section linked at or above `kernel_page_offset` is mapped
/// at its linked address to the physical frames at
/// `linked address - kernel_page_offset`, with flags derived from
/// its attributes: always present, executable only if the section
/// is, writable only if the section is. The pages between the
/// early-reserve cursor and the temporary mapping page keep the
/// physical translations they have under the current table.
///
/// On return the new table is active and the loader's identity
/// mapping is gone. The new table's frame is returned.
///
pub fn setup_pdt_for_kernel(
    kernel_page_offset: VirtAddr,
    sections: &KernelSections,
) -> Result<Frame, InitError> {
    let frame = crate::allocate_frame().map_err(|_| mapping::MapError::OutOfMemory)?;
    let pdt = PageDirectoryTable::new(frame)?;

    for section in sections.iter() {
        if section.addr < kernel_page_offset || section.size == 0 {
            continue;
        }

        let mut flags = PageTableFlags::PRESENT;
        if !section.executable() {
            flags |= PageTableFlags::NO_EXECUTE;
        }
        if section.writable() {
            flags |= PageTableFlags::WRITABLE;
        }

        let first = Page::containing_address(section.addr);
        let last = Page::containing_address(section.addr + (section.size - 1));
        let mut page = first;
        while page <= last {
            let section_frame =
                Frame::from_index((page.start_address() - kernel_page_offset) / PAGE_SIZE as u64);
            pdt.map(page, section_frame, flags)?;
            page += 1;
        }
    }

    // Keep the top-end reservations translating to the same
    // physical frames they do under the current table.
    let mut addr = reserve::cursor();
    while addr < TEMP_MAPPING_ADDR {
        let phys = mapping::translate(addr)?;
        pdt.map(
            Page::containing_address(addr),
            Frame::containing_address(phys),
            PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
        )?;
        addr += PAGE_SIZE as u64;
    }

    unsafe { pdt.activate() };

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{map, translate};
    use crate::{emu, register_frame_source, test_support};
    use bootinfo::{KernelSection, SectionFlags};
    use memory::recursive;

    const KERNEL_PAGE_OFFSET: VirtAddr = VirtAddr::new(0xffff_8000_0000_0000);

    fn section(name: &str, addr: u64, size: u64, flags: SectionFlags) -> KernelSection {
        KernelSection::new(
            name,
            VirtAddr::new(KERNEL_PAGE_OFFSET.as_u64() + addr),
            size,
            flags | SectionFlags::ALLOCATED,
        )
    }

    fn leaf_flags(page: Page) -> PageTableFlags {
        unsafe { crate::arch::pte(recursive::entry_addrs(page)[3]) }.flags()
    }

    #[test]
    fn test_kernel_sections_and_reservations() {
        let _guard = test_support::cursor_lock();
        emu::boot();
        register_frame_source(emu::frame_source);

        // A reservation mapped under the loader's table, which
        // must survive the switch. Any reservations made by
        // earlier tests must be backed too, so the copy loop can
        // look them all up.
        let reserved = crate::reserve::early_reserve_region(PAGE_SIZE as u64).unwrap();
        let mut backing = None;
        let mut addr = reserve::cursor();
        while addr < TEMP_MAPPING_ADDR {
            let frame = emu::alloc_frame();
            map(
                Page::containing_address(addr),
                frame,
                PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
            )
            .unwrap();
            if addr == reserved {
                backing = Some(frame);
            }
            addr += PAGE_SIZE as u64;
        }
        let backing = backing.unwrap();

        // A miniature kernel image: code, read-only data, and
        // data, the latter two sharing a page boundary oddity
        // (sizes that are not page multiples).
        let sections = {
            let mut sections = KernelSections::empty();
            sections.push(section(".text", 0x10_0000, 0x2000, SectionFlags::EXECUTABLE));
            sections.push(section(".rodata", 0x10_2000, 0x800, SectionFlags::empty()));
            sections.push(section(".data", 0x10_3000, 0x1801, SectionFlags::WRITABLE));

            // A section below the kernel offset is ignored.
            sections.push(KernelSection::new(
                ".boot",
                VirtAddr::new(0x10_0000),
                0x1000,
                SectionFlags::ALLOCATED,
            ));

            sections
        };

        let pdt_frame = setup_pdt_for_kernel(KERNEL_PAGE_OFFSET, &sections).unwrap();
        assert_eq!(crate::arch::active_pdt(), pdt_frame);

        // Each section's pages translate to "linked address minus
        // kernel offset", with flags matching its attributes.
        let cases = [
            // (virtual offset, frame index, executable, writable)
            (0x10_0000u64, 0x100u64, true, false),
            (0x10_1000, 0x101, true, false),
            (0x10_2000, 0x102, false, false),
            (0x10_3000, 0x103, false, true),
            (0x10_4000, 0x104, false, true),
        ];
        for &(offset, frame, executable, writable) in cases.iter() {
            let addr = VirtAddr::new(KERNEL_PAGE_OFFSET.as_u64() + offset);
            assert_eq!(
                translate(addr),
                Ok(Frame::from_index(frame).start_address()),
                "section page at offset {:#x}",
                offset
            );

            let flags = leaf_flags(Page::containing_address(addr));
            assert_eq!(flags.no_execute(), !executable, "NX at offset {:#x}", offset);
            assert_eq!(flags.writable(), writable, "RW at offset {:#x}", offset);
        }

        // The identity-style mapping below the kernel offset is
        // gone.
        assert!(translate(VirtAddr::new(0x10_0000)).is_err());

        // The reservation translates to the same frame as before.
        assert_eq!(translate(reserved), Ok(backing.start_address()));
    }
}
