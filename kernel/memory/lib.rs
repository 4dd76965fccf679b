// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Contains types and functionality to represent physical and virtual memory.
//!
//! This crate provides the core types for representing physical and
//! virtual memory, plus the page table entry encoding and the recursive
//! page table address arithmetic that maps the two together. From most
//! basic to most sophisticated:
//!
//! - [`PhysAddr`]: An address in the 52-bit physical address space.
//! - [`VirtAddr`]: A canonical address in the 48-bit virtual address space.
//! - [`Frame`]: A 4 KiB frame of physical memory, indexed by its start address divided by the page size.
//! - [`Page`]: A 4 KiB page of virtual memory, with the same index semantics.
//! - [`PageTableEntry`]: A 64-bit page table entry, encoding a [`Frame`] and a set of [`PageTableFlags`].
//!
//! The [`recursive`] module contains the pure address arithmetic for
//! walking page tables through the recursive mapping, in which the last
//! entry of the top-level table points back at the table itself. The
//! [`constants`] module pins down the architectural layout: the page
//! size, the recursive base address and the temporary mapping address.
//!
//! Physical frames are handed out by whichever allocator is currently
//! registered as the [`FrameSource`]; the allocator is a plain function
//! pointer so the virtual memory manager need not know which stage of
//! allocator is behind it.

#![no_std]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]

pub mod constants;
pub mod recursive;
mod frame;
mod page;
mod page_table;
mod phys_addr;
mod virt_addr;

pub use frame::Frame;
pub use page::Page;
pub use page_table::{PageTableEntry, PageTableFlags};
pub use phys_addr::{InvalidPhysAddr, PhysAddr};
pub use virt_addr::{InvalidVirtAddr, VirtAddr};

/// Describes a failure to provide a frame of physical memory.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameAllocError {
    /// No remaining physical memory satisfies the request.
    OutOfMemory,
}

/// A source of free physical memory frames.
///
/// The source is a plain function pointer, registered once per
/// allocator stage during kernel initialisation: first the boot-memory
/// allocator, then the bitmap allocator once it has taken over.
///
pub type FrameSource = fn() -> Result<Frame, FrameAllocError>;
