// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Virtual memory management through the recursive page table
//! mapping.
//!
//! This crate owns the kernel's page tables. The active top-level
//! table's last entry points back at the table itself, so every
//! page table at every level can be read and written through fixed
//! virtual addresses (see [`memory::recursive`]); no identity
//! mapping of physical memory is needed once the kernel's own
//! tables are live.
//!
//! The public surface:
//!
//! - [`map`], [`unmap`], [`translate`]: Install, remove and query individual mappings.
//! - [`map_temporary`]: Map an arbitrary frame at the fixed temporary page.
//! - [`map_region`], [`identity_map_region`]: Map a contiguous frame range into freshly reserved or identity address space.
//! - [`early_reserve_region`]: Carve virtual address space from the top of the kernel half downward.
//! - [`PageDirectoryTable`]: Build and edit a page directory table that is not the active one.
//! - [`init`]: Replace the loader's provisional tables with a granular kernel mapping, set up the shared zero frame, and install the page fault recovery hook.
//!
//! Physical frames for new page tables come from whichever
//! allocator was last passed to [`register_frame_source`]; the
//! physical memory manager registers the boot allocator first and
//! the bitmap allocator once it takes over.
//!
//! At test time the paging hardware is replaced by a software MMU
//! (see `emu`), so everything above runs unmodified on the host.

#![no_std]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]

#[cfg(test)]
extern crate std;

// The paging intrinsics are only referenced by the hardware build;
// the test build swaps in the software MMU.
#[cfg(test)]
use x86_64 as _;

mod arch;
mod bootstrap;
mod cow;
mod mapping;
mod pdt;
mod reserve;
mod zero_frame;

#[cfg(test)]
mod emu;
#[cfg(test)]
pub(crate) mod test_support;

pub use crate::bootstrap::setup_pdt_for_kernel;
pub use crate::cow::recover_from_fault;
pub use crate::mapping::{
    identity_map_region, map, map_region, map_temporary, translate, unmap, MapError,
    TranslateError, UnmapError,
};
pub use crate::pdt::PageDirectoryTable;
pub use crate::reserve::{early_reserve_region, ReserveError};
pub use crate::zero_frame::zero_frame;

use bootinfo::KernelSections;
use core::sync::atomic::{AtomicU64, Ordering};
use memory::{Frame, FrameAllocError, FrameSource, VirtAddr};
use spinlock::{lock, Mutex};

/// The registered source of physical frames, set once per
/// allocator stage during kernel initialisation and consulted
/// whenever a mapping needs a new page table.
///
static FRAME_SOURCE: Mutex<Option<FrameSource>> = Mutex::new(None);

/// The frame holding the kernel's page directory table, once
/// [`init`] has built it. The all-ones value means "not yet".
///
static KERNEL_PDT: AtomicU64 = AtomicU64::new(u64::MAX);

/// Describes a failure to initialise the virtual memory manager.
///
#[derive(Debug)]
pub enum InitError {
    /// A mapping could not be installed.
    MapFailed(MapError),
    /// A mapping could not be removed.
    UnmapFailed(UnmapError),
    /// An existing mapping could not be looked up while copying
    /// the top-end reservations.
    TranslateFailed(TranslateError),
}

impl From<MapError> for InitError {
    fn from(err: MapError) -> Self {
        InitError::MapFailed(err)
    }
}

impl From<UnmapError> for InitError {
    fn from(err: UnmapError) -> Self {
        InitError::UnmapFailed(err)
    }
}

impl From<TranslateError> for InitError {
    fn from(err: TranslateError) -> Self {
        InitError::TranslateFailed(err)
    }
}

/// Registers the source of physical frames used for new page
/// tables and the copy-on-write recovery path.
///
pub fn register_frame_source(source: FrameSource) {
    *lock!(FRAME_SOURCE) = Some(source);
}

// Fetches a frame from the registered source. The source is
// called outside the registry lock, so a source is free to map
// memory of its own.
//
pub(crate) fn allocate_frame() -> Result<Frame, FrameAllocError> {
    let source = *lock!(FRAME_SOURCE);
    match source {
        Some(source) => source(),
        None => Err(FrameAllocError::OutOfMemory),
    }
}

/// Initialises the virtual memory manager.
///
/// This builds a fresh page directory table with a granular
/// mapping for every kernel ELF section (honouring each section's
/// writable and executable attributes), copies the top-end early
/// reservations across, and activates it, discarding the loader's
/// identity mapping. It then allocates and zeroes the shared zero
/// frame, engages its write protection, and installs the
/// copy-on-write recovery hook for page faults.
///
pub fn init(kernel_page_offset: VirtAddr, sections: &KernelSections) -> Result<(), InitError> {
    let pdt = bootstrap::setup_pdt_for_kernel(kernel_page_offset, sections)?;
    KERNEL_PDT.store(pdt.index(), Ordering::SeqCst);

    zero_frame::init()?;
    interrupts::set_page_fault_recovery(cow::recover_from_fault);

    Ok(())
}

/// Returns the frame holding the kernel's page directory table,
/// once [`init`] has built it.
///
pub fn kernel_pdt() -> Option<Frame> {
    match KERNEL_PDT.load(Ordering::SeqCst) {
        u64::MAX => None,
        index => Some(Frame::from_index(index)),
    }
}
