// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Access to the paging hardware.
//!
//! Everything the mapping code needs from the CPU goes through the
//! handful of functions in this module: reading and loading the
//! page directory base, flushing the TLB, and dereferencing the
//! virtual addresses produced by the recursive page table
//! arithmetic. At test time the same functions are provided by the
//! software MMU in [`emu`](crate::emu) instead, so the mapping code
//! runs unmodified on the host.

#[cfg(not(test))]
pub(crate) use self::hardware::{active_pdt, flush_all, flush_page, page_ptr, pte, set_active_pdt};

#[cfg(test)]
pub(crate) use crate::emu::{active_pdt, flush_all, flush_page, page_ptr, pte, set_active_pdt};

#[cfg(not(test))]
mod hardware {
    use memory::{Frame, PageTableEntry, PhysAddr, VirtAddr};
    use x86_64::instructions::tlb;
    use x86_64::registers::control::{Cr3, Cr3Flags};
    use x86_64::structures::paging::PhysFrame;

    /// Returns the frame holding the active top-level page table.
    ///
    pub(crate) fn active_pdt() -> Frame {
        let (frame, _) = Cr3::read();
        Frame::containing_address(PhysAddr::from_x86_64(frame.start_address()))
    }

    /// Loads `frame` as the top-level page table, which implicitly
    /// flushes the TLB.
    ///
    /// # Safety
    ///
    /// The frame must hold a valid top-level table that maps the
    /// currently executing code.
    ///
    pub(crate) unsafe fn set_active_pdt(frame: Frame) {
        let frame = PhysFrame::containing_address(frame.start_address().as_x86_64());
        Cr3::write(frame, Cr3Flags::empty());
    }

    /// Invalidates the TLB entry for the page containing `addr`.
    ///
    pub(crate) fn flush_page(addr: VirtAddr) {
        tlb::flush(addr.as_x86_64());
    }

    /// Invalidates the whole TLB.
    ///
    pub(crate) fn flush_all() {
        tlb::flush_all();
    }

    /// Dereferences the virtual address of a page table entry.
    ///
    /// # Safety
    ///
    /// The sole precondition is that `addr` was produced by the
    /// recursive page table arithmetic while the active top-level
    /// table carries its self-referential last entry; the MMU then
    /// resolves `addr` to a live page table entry.
    ///
    pub(crate) unsafe fn pte(addr: VirtAddr) -> &'static mut PageTableEntry {
        &mut *addr.as_mut_ptr::<PageTableEntry>()
    }

    /// Returns a raw pointer to the byte at the given mapped
    /// virtual address.
    ///
    /// # Safety
    ///
    /// The address must be mapped, writable, and not concurrently
    /// in use through another reference.
    ///
    pub(crate) unsafe fn page_ptr(addr: VirtAddr) -> *mut u8 {
        addr.as_mut_ptr()
    }
}
