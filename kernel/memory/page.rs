// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

use crate::constants::{INDEX_BITS, PAGE_SIZE, TABLE_LEVELS, TOP_INDEX_SHIFT};
use crate::VirtAddr;
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// A 4 KiB page of virtual memory.
///
/// A `Page` is indexed by its starting address divided by the page
/// size. The index keeps the sign-extension bits of the address, so
/// the page's start address round-trips exactly.
///
#[repr(transparent)]
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Page(u64);

impl Page {
    /// Returns the page containing the given virtual address.
    ///
    #[inline]
    pub const fn containing_address(addr: VirtAddr) -> Self {
        Page(addr.as_u64() / PAGE_SIZE as u64)
    }

    /// Returns the page starting at the given virtual address, or
    /// `None` if the address is not page-aligned.
    ///
    #[inline]
    pub const fn from_start_address(addr: VirtAddr) -> Option<Self> {
        if addr.is_aligned(PAGE_SIZE as u64) {
            Some(Page(addr.as_u64() / PAGE_SIZE as u64))
        } else {
            None
        }
    }

    /// Returns the page's index into the virtual address space.
    ///
    #[inline]
    pub const fn index(self) -> u64 {
        self.0
    }

    /// Returns the first virtual address in the page.
    ///
    #[inline]
    pub const fn start_address(self) -> VirtAddr {
        VirtAddr::new(self.0 * PAGE_SIZE as u64)
    }

    /// Returns the page's index into the page table at the given
    /// level, where level 0 is the top-level table.
    ///
    /// # Panics
    ///
    /// `table_index` will panic if `level` is not a valid table
    /// level.
    ///
    #[inline]
    #[track_caller]
    pub const fn table_index(self, level: usize) -> usize {
        assert!(level < TABLE_LEVELS);
        let shift = TOP_INDEX_SHIFT - level * INDEX_BITS;
        ((self.start_address().as_u64() >> shift) & 0x1ff) as usize
    }
}

impl Add<u64> for Page {
    type Output = Page;

    fn add(self, other: u64) -> Self {
        Page(self.0 + other)
    }
}

impl AddAssign<u64> for Page {
    fn add_assign(&mut self, other: u64) {
        self.0 += other;
    }
}

impl Sub<Page> for Page {
    type Output = u64;

    fn sub(self, other: Page) -> u64 {
        self.0 - other.0
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Page({:p})", self.start_address())
    }
}
