// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Recovers from copy-on-write page faults.

use crate::arch;
use crate::mapping;
use core::ptr;
use memory::constants::{PAGE_SIZE, TABLE_LEVELS};
use memory::{recursive, Page, PageTableFlags, VirtAddr};

/// Attempts to recover from a page fault at `addr` by performing a
/// copy-on-write.
///
/// Recovery applies only when the faulting page has a live leaf
/// entry that is not writable and carries the copy-on-write flag.
/// The shared frame's contents are copied into a private frame
/// through the temporary mapping, the leaf entry is switched to
/// the copy and made writable, and the faulting instruction can be
/// resumed.
///
/// Returns whether the fault was recovered; any failure along the
/// way (including a failed frame allocation) demotes the fault to
/// unrecoverable.
///
pub fn recover_from_fault(addr: VirtAddr) -> bool {
    let page = Page::containing_address(addr);
    let addrs = recursive::entry_addrs(page);

    // The fault is only ours to fix if the whole translation path
    // exists.
    for level in 0..TABLE_LEVELS - 1 {
        let entry = unsafe { arch::pte(addrs[level]) };
        let flags = entry.flags();
        if flags.absent() || flags.huge() {
            return false;
        }
    }

    let leaf = unsafe { arch::pte(addrs[TABLE_LEVELS - 1]) };
    let flags = leaf.flags();
    if flags.absent() || flags.writable() || !flags.copy_on_write() {
        return false;
    }

    // Copy the shared frame into a private one via the temporary
    // mapping.
    let copy = match crate::allocate_frame() {
        Ok(frame) => frame,
        Err(_) => return false,
    };
    let temp = match mapping::map_temporary(copy) {
        Ok(page) => page,
        Err(_) => return false,
    };
    unsafe {
        ptr::copy_nonoverlapping(
            arch::page_ptr(page.start_address()) as *const u8,
            arch::page_ptr(temp.start_address()),
            PAGE_SIZE,
        );
    }
    if mapping::unmap(temp).is_err() {
        return false;
    }

    // Point the leaf at the private copy and make it writable.
    let leaf = unsafe { arch::pte(addrs[TABLE_LEVELS - 1]) };
    leaf.set_frame(copy);
    leaf.clear_flags(PageTableFlags::COPY_ON_WRITE);
    leaf.set_flags(PageTableFlags::PRESENT | PageTableFlags::WRITABLE);
    arch::flush_page(page.start_address());

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{map, translate};
    use crate::{emu, register_frame_source};
    use memory::Frame;

    fn setup() {
        emu::boot();
        register_frame_source(emu::frame_source);
    }

    fn leaf_flags(page: Page) -> PageTableFlags {
        unsafe { arch::pte(recursive::entry_addrs(page)[3]) }.flags()
    }

    fn leaf_frame(page: Page) -> Frame {
        unsafe { arch::pte(recursive::entry_addrs(page)[3]) }.frame()
    }

    #[test]
    fn test_cow_fault_recovery() {
        setup();

        // A copy-on-write page whose shared frame holds the byte
        // pattern i % 256.
        let page = Page::containing_address(VirtAddr::new(0xffff_8800_0000_0000));
        let shared = emu::alloc_frame();
        let pattern: std::vec::Vec<u8> = (0u32..256).map(|byte| byte as u8).collect();
        emu::fill_frame(shared, &pattern);
        map(
            page,
            shared,
            PageTableFlags::PRESENT | PageTableFlags::COPY_ON_WRITE,
        )
        .unwrap();

        assert!(recover_from_fault(page.start_address() + 0x123));

        // The leaf now points at a private, writable copy.
        let copy = leaf_frame(page);
        assert_ne!(copy, shared);
        let flags = leaf_flags(page);
        assert!(flags.present());
        assert!(flags.writable());
        assert!(!flags.copy_on_write());

        // The copy has the shared frame's contents.
        for i in 0..PAGE_SIZE {
            assert_eq!(emu::frame_byte(copy, i), (i % 256) as u8);
        }
        assert_eq!(
            translate(page.start_address()),
            Ok(copy.start_address())
        );

        // Writes now land in the copy; the shared frame is
        // untouched.
        unsafe { *arch::page_ptr(page.start_address()) = 0xff };
        assert_eq!(emu::frame_byte(copy, 0), 0xff);
        assert_eq!(emu::frame_byte(shared, 0), 0);
    }

    #[test]
    fn test_only_cow_faults_recover() {
        setup();

        // A writable page: its faults are not ours.
        let writable = Page::containing_address(VirtAddr::new(0x1_0000_0000));
        map(
            writable,
            emu::alloc_frame(),
            PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
        )
        .unwrap();
        assert!(!recover_from_fault(writable.start_address()));

        // A plain read-only page without the copy-on-write flag.
        let read_only = Page::containing_address(VirtAddr::new(0x2_0000_0000));
        map(read_only, emu::alloc_frame(), PageTableFlags::PRESENT).unwrap();
        assert!(!recover_from_fault(read_only.start_address()));

        // An address with no mapping at all.
        assert!(!recover_from_fault(VirtAddr::new(0x3_0000_0000)));

        // An unmapped leaf under live tables.
        let neighbour = Page::containing_address(VirtAddr::new(0x1_0000_1000));
        assert!(!recover_from_fault(neighbour.start_address()));
    }
}
