// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

use crate::constants::PTE_FRAME_MASK;
use crate::Frame;
use bitflags::bitflags;
use core::fmt;

/// Represents a single entry in a page table.
///
/// An entry encodes a physical [`Frame`] in bits 12–51 and a set of
/// [`PageTableFlags`] in the low 12 bits plus bit 63. The frame and
/// the flags can be updated independently.
///
#[derive(Clone)]
#[repr(transparent)]
pub struct PageTableEntry {
    entry: u64,
}

impl PageTableEntry {
    /// Returns a new, empty page table entry.
    ///
    #[inline]
    pub const fn new() -> Self {
        PageTableEntry { entry: 0 }
    }

    /// Clears this entry, removing the frame and all flags.
    ///
    #[inline]
    pub fn zero(&mut self) {
        self.entry = 0;
    }

    /// Returns whether the entry is marked as present.
    ///
    #[inline]
    pub const fn is_present(&self) -> bool {
        self.flags().contains(PageTableFlags::PRESENT)
    }

    /// Returns the flags for this entry.
    ///
    #[inline]
    pub const fn flags(&self) -> PageTableFlags {
        PageTableFlags::from_bits_truncate(self.entry)
    }

    /// Returns whether all of the given flags are set.
    ///
    #[inline]
    pub const fn has(&self, flags: PageTableFlags) -> bool {
        self.flags().contains(flags)
    }

    /// Returns whether any of the given flags is set.
    ///
    #[inline]
    pub fn has_any(&self, flags: PageTableFlags) -> bool {
        self.flags().intersects(flags)
    }

    /// Sets the given flags, leaving other flags and the frame
    /// untouched.
    ///
    #[inline]
    pub fn set_flags(&mut self, flags: PageTableFlags) {
        self.entry |= flags.bits();
    }

    /// Clears the given flags, leaving other flags and the frame
    /// untouched.
    ///
    #[inline]
    pub fn clear_flags(&mut self, flags: PageTableFlags) {
        self.entry &= !flags.bits();
    }

    /// Returns the physical frame encoded in this entry.
    ///
    /// The frame bits are meaningful only while the entry has been
    /// given a frame; an empty entry returns frame zero.
    ///
    #[inline]
    pub const fn frame(&self) -> Frame {
        Frame::from_index((self.entry & PTE_FRAME_MASK) >> 12)
    }

    /// Sets the entry's frame, preserving the existing flag bits.
    ///
    #[inline]
    pub fn set_frame(&mut self, frame: Frame) {
        self.entry = (self.entry & !PTE_FRAME_MASK) | (frame.start_address().as_u64() & PTE_FRAME_MASK);
    }

    /// Sets the entry's frame and flags in one store.
    ///
    #[inline]
    pub fn set_frame_and_flags(&mut self, frame: Frame, flags: PageTableFlags) {
        self.entry = (frame.start_address().as_u64() & PTE_FRAME_MASK) | flags.bits();
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("frame", &self.frame())
            .field("flags", &self.flags())
            .finish()
    }
}

bitflags! {
    /// The flags in a page table entry.
    ///
    pub struct PageTableFlags: u64 {
        /// Indicates that the referenced page table or physical
        /// frame is mapped and usable.
        const PRESENT = 1 << 0;

        /// Indicates that the referenced page table or physical
        /// frame is writable. If this bit is unset on an entry
        /// referencing a page table, none of the memory referenced
        /// through that table is writable, irrespective of the
        /// lower tables' flags.
        const WRITABLE = 1 << 1;

        /// Indicates that accesses from ring 3 are allowed.
        const USER_ACCESSIBLE = 1 << 2;

        /// Indicates that the caching behaviour for this memory is
        /// write-through, rather than write-back.
        const WRITE_THROUGH = 1 << 3;

        /// Indicates that the memory should not be cached.
        const NO_CACHE = 1 << 4;

        /// Indicates that the referenced page table or physical
        /// frame has been read since this bit was last unset.
        const ACCESSED = 1 << 5;

        /// Indicates that the referenced page table or physical
        /// frame has been written since this bit was last unset.
        const DIRTY = 1 << 6;

        /// Indicates that this entry references a huge physical
        /// frame, rather than a page table. This kernel never
        /// produces huge mappings; observing one is an error.
        const HUGE_PAGE = 1 << 7;

        /// Indicates that this mapping is not flushed from the TLB
        /// when an address space change takes place.
        const GLOBAL = 1 << 8;

        /// Indicates that the referenced frame is shared and must
        /// be copied by the page fault handler before the first
        /// write. Never set together with `WRITABLE` at rest.
        const COPY_ON_WRITE = 1 << 9;

        /// Indicates that the referenced memory cannot be used for
        /// instruction fetches.
        const NO_EXECUTE = 1 << 63;
    }
}

impl PageTableFlags {
    /// Returns whether the `PRESENT` flag is set.
    ///
    pub const fn present(&self) -> bool {
        self.contains(Self::PRESENT)
    }

    /// Returns whether the `PRESENT` flag is unset.
    ///
    pub const fn absent(&self) -> bool {
        !self.contains(Self::PRESENT)
    }

    /// Returns whether the `WRITABLE` flag is set.
    ///
    pub const fn writable(&self) -> bool {
        self.contains(Self::WRITABLE)
    }

    /// Returns whether the `HUGE_PAGE` flag is set.
    ///
    pub const fn huge(&self) -> bool {
        self.contains(Self::HUGE_PAGE)
    }

    /// Returns whether the `COPY_ON_WRITE` flag is set.
    ///
    pub const fn copy_on_write(&self) -> bool {
        self.contains(Self::COPY_ON_WRITE)
    }

    /// Returns whether the `NO_EXECUTE` flag is set.
    ///
    pub const fn no_execute(&self) -> bool {
        self.contains(Self::NO_EXECUTE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PhysAddr;

    #[test]
    fn test_empty_entry() {
        let entry = PageTableEntry::new();
        assert!(!entry.is_present());
        assert_eq!(entry.flags(), PageTableFlags::empty());
        assert_eq!(entry.frame(), Frame::from_index(0));
    }

    #[test]
    fn test_frame_and_flags_are_independent() {
        let frame = Frame::containing_address(PhysAddr::new(0x7ffd_5000));
        let mut entry = PageTableEntry::new();

        entry.set_flags(PageTableFlags::PRESENT | PageTableFlags::NO_EXECUTE);
        entry.set_frame(frame);
        assert_eq!(entry.frame(), frame);
        assert_eq!(
            entry.flags(),
            PageTableFlags::PRESENT | PageTableFlags::NO_EXECUTE
        );

        // Setting the frame again is idempotent and preserves flags.
        entry.set_frame(frame);
        assert_eq!(entry.frame(), frame);
        assert!(entry.has(PageTableFlags::PRESENT | PageTableFlags::NO_EXECUTE));

        // Clearing one flag leaves the frame and other flags.
        entry.clear_flags(PageTableFlags::NO_EXECUTE);
        assert_eq!(entry.frame(), frame);
        assert_eq!(entry.flags(), PageTableFlags::PRESENT);

        // Replacing the frame preserves flags.
        let other = Frame::from_index(42);
        entry.set_frame(other);
        assert_eq!(entry.frame(), other);
        assert_eq!(entry.flags(), PageTableFlags::PRESENT);
    }

    #[test]
    fn test_has_any() {
        let mut entry = PageTableEntry::new();
        entry.set_flags(PageTableFlags::PRESENT | PageTableFlags::COPY_ON_WRITE);
        assert!(entry.has_any(PageTableFlags::WRITABLE | PageTableFlags::COPY_ON_WRITE));
        assert!(!entry.has(PageTableFlags::WRITABLE | PageTableFlags::COPY_ON_WRITE));
        assert!(!entry.has_any(PageTableFlags::WRITABLE | PageTableFlags::HUGE_PAGE));
    }

    #[test]
    fn test_set_frame_and_flags() {
        let frame = Frame::from_index(0x1234);
        let mut entry = PageTableEntry::new();
        entry.set_flags(PageTableFlags::GLOBAL);
        entry.set_frame_and_flags(frame, PageTableFlags::PRESENT | PageTableFlags::WRITABLE);

        // The single store replaces both halves of the entry.
        assert_eq!(entry.frame(), frame);
        assert_eq!(
            entry.flags(),
            PageTableFlags::PRESENT | PageTableFlags::WRITABLE
        );

        entry.zero();
        assert_eq!(entry.flags(), PageTableFlags::empty());
        assert_eq!(entry.frame(), Frame::from_index(0));
    }
}
