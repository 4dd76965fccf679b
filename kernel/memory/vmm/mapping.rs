// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Installs, removes and queries virtual memory mappings through
//! the recursive page table scheme.

use crate::arch;
use crate::reserve;
use crate::zero_frame;
use align::align_up_u64;
use core::ptr;
use memory::constants::{PAGE_SIZE, TABLE_LEVELS, TEMP_MAPPING_ADDR};
use memory::{recursive, Frame, Page, PageTableEntry, PageTableFlags, PhysAddr, VirtAddr};

/// Describes an error encountered while trying to make a new page
/// mapping.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MapError {
    /// The frame source could not provide a frame for a new page
    /// table.
    OutOfMemory,
    /// The walk encountered a huge-page mapping, which this kernel
    /// does not support.
    NoHugePageSupport,
    /// The caller asked for a writable mapping of the reserved
    /// zero frame.
    AttemptToRwMapReservedFrame,
    /// No virtual address space was left to reserve for the
    /// region.
    NoSpace,
}

/// Describes an error encountered while trying to remove a page
/// mapping.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnmapError {
    /// The page, or one of the tables above it, is not mapped.
    InvalidMapping,
    /// The walk encountered a huge-page mapping, which this kernel
    /// does not support.
    NoHugePageSupport,
}

/// Describes an error encountered while translating a virtual
/// address.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranslateError {
    /// The address, or one of the tables above it, is not mapped.
    InvalidMapping,
    /// The walk encountered a huge-page mapping, which this kernel
    /// does not support.
    NoHugePageSupport,
}

// Walks the page table entries for `page` from the top-level table
// to the leaf, visiting each entry in turn. The walk stops when
// the visitor returns false, and after visiting an entry that is
// absent or huge (whose lower levels cannot be reached through the
// recursive scheme).
//
// # Safety
//
// The active top-level table must carry its self-referential last
// entry.
//
pub(crate) unsafe fn walk<Visitor>(page: Page, mut visit: Visitor)
where
    Visitor: FnMut(usize, &mut PageTableEntry) -> bool,
{
    let addrs = recursive::entry_addrs(page);
    for (level, addr) in addrs.iter().enumerate() {
        let entry = arch::pte(*addr);
        if !visit(level, entry) {
            return;
        }

        let entry = arch::pte(*addr);
        if level + 1 < TABLE_LEVELS && (!entry.is_present() || entry.flags().huge()) {
            return;
        }
    }
}

/// Maps `page` to `frame` with the given flags.
///
/// Missing intermediate page tables are allocated from the
/// registered frame source and zero-filled. An existing leaf
/// mapping for `page` is replaced outright. On failure part-way
/// down, already-created intermediate tables are left in place;
/// they remain reachable by future mappings.
///
pub fn map(page: Page, frame: Frame, flags: PageTableFlags) -> Result<(), MapError> {
    if flags.contains(PageTableFlags::WRITABLE) && zero_frame::is_protected(frame) {
        return Err(MapError::AttemptToRwMapReservedFrame);
    }

    let addrs = recursive::entry_addrs(page);
    for level in 0..TABLE_LEVELS - 1 {
        let entry = unsafe { arch::pte(addrs[level]) };
        if entry.is_present() {
            if entry.flags().huge() {
                return Err(MapError::NoHugePageSupport);
            }

            continue;
        }

        let table = crate::allocate_frame().map_err(|_| MapError::OutOfMemory)?;
        entry.set_frame_and_flags(table, PageTableFlags::PRESENT | PageTableFlags::WRITABLE);

        // The new table is addressable through the recursive
        // scheme as soon as its entry is written; it must start
        // out empty.
        let table_addr = addrs[level + 1].align_down(PAGE_SIZE as u64);
        unsafe { ptr::write_bytes(arch::page_ptr(table_addr), 0, PAGE_SIZE) };
    }

    let leaf = unsafe { arch::pte(addrs[TABLE_LEVELS - 1]) };
    leaf.zero();
    leaf.set_frame(frame);
    leaf.set_flags(flags);
    arch::flush_page(page.start_address());

    Ok(())
}

/// Maps `frame` at the fixed temporary mapping page, returning the
/// page.
///
/// A second temporary mapping silently replaces the first; callers
/// must not rely on two temporary mappings existing at once.
///
pub fn map_temporary(frame: Frame) -> Result<Page, MapError> {
    let page = Page::containing_address(TEMP_MAPPING_ADDR);
    map(page, frame, PageTableFlags::PRESENT | PageTableFlags::WRITABLE)?;

    Ok(page)
}

/// Maps the `size` bytes of physical memory starting at `frame`
/// into freshly reserved virtual address space, returning the
/// first page.
///
/// `size` is rounded up to a whole number of pages.
///
pub fn map_region(frame: Frame, size: u64, flags: PageTableFlags) -> Result<Page, MapError> {
    let size = align_up_u64(size, PAGE_SIZE as u64);
    let base = reserve::early_reserve_region(size).map_err(|_| MapError::NoSpace)?;

    let first = Page::containing_address(base);
    for i in 0..size / PAGE_SIZE as u64 {
        map(first + i, frame + i, flags)?;
    }

    Ok(first)
}

/// Maps the `size` bytes of physical memory starting at `frame` at
/// the virtual addresses equal to their physical addresses,
/// returning the first page.
///
/// `size` is rounded up to a whole number of pages.
///
pub fn identity_map_region(frame: Frame, size: u64, flags: PageTableFlags) -> Result<Page, MapError> {
    let size = align_up_u64(size, PAGE_SIZE as u64);
    let first = Page::containing_address(VirtAddr::new(frame.start_address().as_u64()));
    for i in 0..size / PAGE_SIZE as u64 {
        map(first + i, frame + i, flags)?;
    }

    Ok(first)
}

/// Removes the mapping for `page`.
///
/// The leaf entry keeps the frame bits (with `PRESENT` cleared) to
/// assist post-mortem diagnostics.
///
pub fn unmap(page: Page) -> Result<(), UnmapError> {
    let mut result = Err(UnmapError::InvalidMapping);
    unsafe {
        walk(page, |level, entry| {
            if !entry.is_present() {
                result = Err(UnmapError::InvalidMapping);
                return false;
            }

            if level + 1 < TABLE_LEVELS {
                if entry.flags().huge() {
                    result = Err(UnmapError::NoHugePageSupport);
                    return false;
                }

                return true;
            }

            entry.clear_flags(PageTableFlags::PRESENT);
            result = Ok(());
            false
        });
    }

    if result.is_ok() {
        arch::flush_page(page.start_address());
    }

    result
}

/// Translates a virtual address to the physical address it is
/// mapped to.
///
pub fn translate(addr: VirtAddr) -> Result<PhysAddr, TranslateError> {
    let mut result = Err(TranslateError::InvalidMapping);
    unsafe {
        walk(Page::containing_address(addr), |level, entry| {
            if !entry.is_present() {
                result = Err(TranslateError::InvalidMapping);
                return false;
            }

            if level + 1 < TABLE_LEVELS {
                if entry.flags().huge() {
                    result = Err(TranslateError::NoHugePageSupport);
                    return false;
                }

                return true;
            }

            result = Ok(entry.frame().start_address() + (addr.as_u64() & 0xfff));
            false
        });
    }

    result
}
