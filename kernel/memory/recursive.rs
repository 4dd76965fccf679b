// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Contains the address arithmetic for the recursive page table
//! mapping.
//!
//! The last entry of the top-level page directory table points back
//! at the table's own frame. As a result, a virtual address whose
//! table indices are all 511 resolves (through the MMU) to the
//! top-level table itself, and replacing trailing 511s with the
//! indices of an ordinary address resolves to the lower-level tables
//! and entries along that address's translation path.
//!
//! The functions here are pure: they compute the virtual addresses
//! at which each level's entry can be read, but never dereference
//! them. Dereferencing is only meaningful on a CPU whose active
//! top-level table carries the self-referential last entry, and is
//! owned by the virtual memory manager.
//!
//! The arithmetic, per level: `entry_addr = table_addr + (index <<
//! 3)`, and the next level's table is at `entry_addr << 9`,
//! sign-extended back into canonical form. Shifting an entry address
//! left by the 9 index bits converts "the address of the entry" into
//! "the base of the table that entry describes" under the recursive
//! scheme.

use crate::constants::{RECURSIVE_TABLE_BASE, TABLE_LEVELS};
use crate::{Page, VirtAddr};

/// Returns the virtual address of the page table entry for `page` at
/// the given level, where level 0 is the top-level table and level 3
/// is the leaf.
///
/// # Panics
///
/// `entry_addr` will panic if `level` is not a valid table level.
///
#[track_caller]
pub fn entry_addr(page: Page, level: usize) -> VirtAddr {
    entry_addrs(page)[level]
}

/// Returns the virtual addresses of the page table entries for
/// `page` at all four levels, from the top-level table down to the
/// leaf.
///
pub fn entry_addrs(page: Page) -> [VirtAddr; TABLE_LEVELS] {
    let mut addrs = [VirtAddr::zero(); TABLE_LEVELS];
    let mut table = RECURSIVE_TABLE_BASE.as_u64();
    for (level, addr) in addrs.iter_mut().enumerate() {
        let entry = table + ((page.table_index(level) as u64) << 3);
        *addr = VirtAddr::new_canonical(entry);

        // Shift the entry address up by one level's index bits to
        // obtain the next table's base address.
        table = VirtAddr::new_canonical(entry.wrapping_shl(9)).as_u64();
    }

    addrs
}

/// Returns the virtual address of the page table containing the
/// entry for `page` at the given level.
///
/// # Panics
///
/// `table_addr` will panic if `level` is not a valid table level.
///
#[track_caller]
pub fn table_addr(page: Page, level: usize) -> VirtAddr {
    entry_addr(page, level).align_down(4096)
}
