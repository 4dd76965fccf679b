// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Contains constants describing the architectural memory layout.
//!
//! These are fixed by the amd64 paging structure and by the kernel's
//! choice of recursive page table mapping:
//!
//! - [`PAGE_SIZE`]: The size of a page or frame of memory.
//! - [`TABLE_LEVELS`], [`ENTRIES_PER_TABLE`], [`INDEX_BITS`], [`TOP_INDEX_SHIFT`]: The shape of the 4-level page table hierarchy.
//! - [`RECURSIVE_INDEX`]: The table entry that points back at its own table.
//! - [`RECURSIVE_TABLE_BASE`]: The virtual address at which the top-level table addresses itself.
//! - [`TEMP_MAPPING_ADDR`]: The fixed page used for short-lived mappings of arbitrary frames.
//! - [`EARLY_RESERVE_TOP`]: Where the downward-growing early address-space reservations begin.

use crate::VirtAddr;

/// The size in bytes of a page of virtual memory or a frame of
/// physical memory.
///
pub const PAGE_SIZE: usize = 4096;

/// The number of levels in the page table hierarchy.
///
pub const TABLE_LEVELS: usize = 4;

/// The number of entries in a page table at every level.
///
pub const ENTRIES_PER_TABLE: usize = 512;

/// The number of virtual address bits translated per table level.
///
pub const INDEX_BITS: usize = 9;

/// The shift of the top-level table index within a virtual address.
///
pub const TOP_INDEX_SHIFT: usize = 39;

/// The table entry in every page directory table that points back at
/// the table's own frame, establishing the recursive mapping.
///
pub const RECURSIVE_INDEX: usize = 511;

/// The mask selecting the physical frame bits (12–51) of a page
/// table entry.
///
pub const PTE_FRAME_MASK: u64 = 0x000f_ffff_ffff_f000;

/// The offset at which the kernel image is linked: physical frame
/// `i` of the image appears at `KERNEL_PAGE_OFFSET + i * 4096`.
///
pub const KERNEL_PAGE_OFFSET: VirtAddr = VirtAddr::new(0xffff_8000_0000_0000);

/// The virtual address at which the active top-level page directory
/// table addresses itself: the address whose table indices are all
/// [`RECURSIVE_INDEX`], so every level of the hardware walk lands
/// back on the top-level table.
///
pub const RECURSIVE_TABLE_BASE: VirtAddr = VirtAddr::new(0xffff_ffff_ffff_f000);

/// The fixed virtual page used for temporary mappings of arbitrary
/// physical frames, chosen so its table indices are
/// (510, 511, 511, 511): the last page below the recursive region.
///
pub const TEMP_MAPPING_ADDR: VirtAddr = VirtAddr::new(0xffff_ff7f_ffff_f000);

/// The top of the early address-space reservation region, which
/// grows downward from the temporary mapping page.
///
pub const EARLY_RESERVE_TOP: VirtAddr = TEMP_MAPPING_ADDR;
