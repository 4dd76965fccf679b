// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Builds and edits page directory tables that are not the active
//! one.
//!
//! The recursive scheme only reaches the tables below the active
//! top-level table. To operate on another table hierarchy, its
//! top-level frame is temporarily patched into the active table's
//! self-referential last entry, so the recursive addresses resolve
//! into the target hierarchy instead; afterwards the entry is
//! restored. The active table itself stays reachable throughout
//! via the temporary mapping.

use crate::arch;
use crate::mapping::{self, MapError, UnmapError};
use core::ptr;
use memory::constants::{PAGE_SIZE, RECURSIVE_INDEX};
use memory::{Frame, Page, PageTableEntry, PageTableFlags};

/// A page directory table, addressed by the frame holding its
/// top-level table.
///
pub struct PageDirectoryTable {
    frame: Frame,
}

impl PageDirectoryTable {
    /// Wraps `frame` as a page directory table.
    ///
    /// If `frame` is not the active table, it is initialised:
    /// zeroed through the temporary mapping and given the
    /// self-referential last entry that makes the recursive scheme
    /// work once the table is active. The active table is left
    /// untouched.
    ///
    pub fn new(frame: Frame) -> Result<Self, MapError> {
        if frame == arch::active_pdt() {
            return Ok(PageDirectoryTable { frame });
        }

        let page = mapping::map_temporary(frame)?;
        unsafe {
            let table = arch::page_ptr(page.start_address());
            ptr::write_bytes(table, 0, PAGE_SIZE);

            let last = &mut *(table as *mut PageTableEntry).add(RECURSIVE_INDEX);
            last.set_frame_and_flags(frame, PageTableFlags::PRESENT | PageTableFlags::WRITABLE);
        }

        // The temporary page was just mapped, so this cannot fail.
        let _ = mapping::unmap(page);

        Ok(PageDirectoryTable { frame })
    }

    /// Returns the frame holding the top-level table.
    ///
    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// Maps `page` to `frame` with the given flags in this table
    /// hierarchy.
    ///
    pub fn map(&self, page: Page, frame: Frame, flags: PageTableFlags) -> Result<(), MapError> {
        self.with_recursive(|| mapping::map(page, frame, flags))
    }

    /// Removes the mapping for `page` from this table hierarchy.
    ///
    pub fn unmap(&self, page: Page) -> Result<(), UnmapError> {
        self.with_recursive(|| mapping::unmap(page))
    }

    /// Loads this table as the active page directory table, which
    /// implicitly flushes the TLB.
    ///
    /// # Safety
    ///
    /// The table must map the currently executing code, the stack,
    /// and everything else the kernel is about to touch.
    ///
    pub unsafe fn activate(&self) {
        arch::set_active_pdt(self.frame);
    }

    // Runs `operation` with the recursive addresses resolving into
    // this table hierarchy.
    //
    // While the active table's last entry points at the target,
    // the active table can no longer be reached recursively, so
    // both the swap and its undo go through a temporary mapping of
    // the active table's frame. `operation` must therefore leave
    // the temporary mapping alone.
    //
    // # Panics
    //
    // Panics if the active table's frame cannot be temporarily
    // mapped, which would mean the frame source is exhausted this
    // early in boot.
    //
    fn with_recursive<Output>(&self, operation: impl FnOnce() -> Output) -> Output {
        let active = arch::active_pdt();
        if self.frame == active {
            return operation();
        }

        let temp = mapping::map_temporary(active)
            .expect("failed to map the active page directory table");
        let last = unsafe {
            &mut *(arch::page_ptr(temp.start_address()) as *mut PageTableEntry)
                .add(RECURSIVE_INDEX)
        };

        last.set_frame(self.frame);
        arch::flush_all();

        let result = operation();

        last.set_frame(active);
        arch::flush_all();

        // The temporary page was just mapped, so this cannot fail.
        let _ = mapping::unmap(temp);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{translate, TranslateError};
    use crate::{emu, register_frame_source};
    use memory::{recursive, VirtAddr};

    fn setup() {
        emu::boot();
        register_frame_source(emu::frame_source);
    }

    #[test]
    fn test_new_initialises_the_table() {
        setup();

        let frame = emu::alloc_frame();
        emu::fill_frame(frame, &[0xcc]);

        let pdt = PageDirectoryTable::new(frame).unwrap();
        assert_eq!(pdt.frame(), frame);

        // Every entry is cleared except the self-referential last
        // one.
        for index in 0..RECURSIVE_INDEX {
            let offset = index * 8;
            for byte in 0..8 {
                assert_eq!(emu::frame_byte(frame, offset + byte), 0, "entry {}", index);
            }
        }

        let expected =
            (frame.index() << 12) | (PageTableFlags::PRESENT | PageTableFlags::WRITABLE).bits();
        let mut last = 0u64;
        for byte in 0..8 {
            last |= (emu::frame_byte(frame, RECURSIVE_INDEX * 8 + byte) as u64) << (byte * 8);
        }
        assert_eq!(last, expected);
    }

    #[test]
    fn test_wrapping_the_active_table_is_a_no_op() {
        setup();

        let active = crate::arch::active_pdt();

        // Give the active table a mapping, then wrap it: the
        // mapping must survive.
        let page = Page::containing_address(VirtAddr::new(0x1234_5000));
        let frame = emu::alloc_frame();
        mapping::map(page, frame, PageTableFlags::PRESENT).unwrap();

        let pdt = PageDirectoryTable::new(active).unwrap();
        assert_eq!(translate(page.start_address()), Ok(frame.start_address()));

        // Mapping through the wrapper edits the active table
        // directly.
        let other = Page::containing_address(VirtAddr::new(0x2345_6000));
        let other_frame = emu::alloc_frame();
        pdt.map(other, other_frame, PageTableFlags::PRESENT).unwrap();
        assert_eq!(
            translate(other.start_address()),
            Ok(other_frame.start_address())
        );
    }

    #[test]
    fn test_mapping_an_inactive_table() {
        setup();

        let active = crate::arch::active_pdt();
        let pdt = PageDirectoryTable::new(emu::alloc_frame()).unwrap();

        let page = Page::containing_address(VirtAddr::new(0xffff_a000_0000_0000));
        let frame = emu::alloc_frame();
        pdt.map(page, frame, PageTableFlags::PRESENT | PageTableFlags::WRITABLE)
            .unwrap();

        // The mapping is not visible through the active table.
        assert_eq!(
            translate(page.start_address()),
            Err(TranslateError::InvalidMapping)
        );

        // The active table's self entry was restored.
        let last = unsafe { crate::arch::pte(recursive::entry_addrs(Page::containing_address(memory::constants::RECURSIVE_TABLE_BASE))[0]) };
        assert_eq!(last.frame(), active);

        // The target's self entry is intact, so activating it
        // brings the mapping (and the recursive scheme) live.
        unsafe { pdt.activate() };
        assert_eq!(crate::arch::active_pdt(), pdt.frame());
        assert_eq!(translate(page.start_address()), Ok(frame.start_address()));

        // And unmapping through the wrapper now works in place.
        pdt.unmap(page).unwrap();
        assert_eq!(
            translate(page.start_address()),
            Err(TranslateError::InvalidMapping)
        );
    }

    #[test]
    fn test_unmap_on_an_inactive_table() {
        setup();

        let pdt = PageDirectoryTable::new(emu::alloc_frame()).unwrap();
        let page = Page::containing_address(VirtAddr::new(0xffff_b000_0000_0000));
        let frame = emu::alloc_frame();

        pdt.map(page, frame, PageTableFlags::PRESENT).unwrap();
        pdt.unmap(page).unwrap();
        assert_eq!(pdt.unmap(page), Err(UnmapError::InvalidMapping));

        unsafe { pdt.activate() };
        assert_eq!(
            translate(page.start_address()),
            Err(TranslateError::InvalidMapping)
        );
    }
}
