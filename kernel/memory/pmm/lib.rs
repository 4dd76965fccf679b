// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Physical memory management and allocation.
//!
//! This crate consists of two physical memory allocators:
//!
//! 1. [`BootMemAllocator`], a deterministic bump allocator over the
//!    loader's memory map, used while the kernel has nothing else.
//! 2. [`BitmapAllocator`], which takes over from the boot allocator
//!    and supports freeing frames.
//!
//! The boot allocator (brought up by [`bootstrap`]) walks the
//! loader's memory map and hands out usable frames in ascending
//! order, skipping the kernel image. It cannot free anything and is
//! only intended for the kernel's first moments.
//!
//! Once the virtual memory manager is running, [`init`] builds the
//! bitmap allocator: it sizes one bitmap pool per usable memory
//! region, carves virtual address space for that metadata, backs it
//! with frames from the boot allocator, marks the kernel image as
//! reserved, and finally replays the boot allocator's (deterministic)
//! allocation sequence so every frame already handed out is reserved
//! too. From that point the bitmap allocator is the registered frame
//! source and the boot allocator's counters are history.
//!
//! [`alloc_frame`] and [`free_frame`] are the everyday interface;
//! [`debug`] prints the allocator's state.

#![no_std]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]

mod bitmap;
mod boot_alloc;

pub use crate::bitmap::{BitmapAllocator, FramePool, MetadataLayout};
pub use crate::boot_alloc::BootMemAllocator;

use align::align_up_usize;
use bootinfo::MemoryMap;
use core::ptr;
use memory::constants::PAGE_SIZE;
use memory::{Frame, FrameAllocError, Page, PageTableFlags, PhysAddr};
use pretty::Bytes;
use serial::println;
use spinlock::{lock, Mutex};

/// The first-phase physical memory allocator.
///
/// Brought up by [`bootstrap`] and retired by [`init`], after which
/// only its historical allocation count matters.
///
static BOOT_ALLOCATOR: Mutex<Option<BootMemAllocator>> = Mutex::new(None);

/// The second-phase physical memory allocator, in place once
/// [`init`] has run.
///
static ALLOCATOR: Mutex<Option<BitmapAllocator>> = Mutex::new(None);

/// Describes a failure to return a frame to the allocator.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameFreeError {
    /// The frame was already free.
    DoubleFree,
    /// The frame is not tracked by any pool.
    NotManaged,
    /// The frame's bitmap index was out of range.
    InvalidParameter,
}

/// Describes a failure to bring up the bitmap allocator.
///
#[derive(Debug)]
pub enum InitError {
    /// [`bootstrap`] has not been called.
    NoBootAllocator,
    /// The boot allocator could not back the metadata region.
    OutOfMemory,
    /// No address space was left for the allocator's metadata.
    ReserveFailed(vmm::ReserveError),
    /// The metadata region could not be mapped.
    MapFailed(vmm::MapError),
    /// The allocator's pools do not match the memory map.
    BuildFailed,
    /// A frame handed out by the boot allocator is not tracked by
    /// any pool.
    HandoverFailed(Frame),
}

/// Sets up the boot-memory allocator over the loader's memory map
/// and registers it as the kernel's frame source.
///
/// The kernel image, described by `kernel_start..kernel_end`, is
/// never handed out.
///
pub fn bootstrap(memory_map: MemoryMap, kernel_start: PhysAddr, kernel_end: PhysAddr) {
    *lock!(BOOT_ALLOCATOR) = Some(BootMemAllocator::new(memory_map, kernel_start, kernel_end));
    vmm::register_frame_source(boot_alloc_frame);
}

/// Sets up the second-phase physical memory manager, taking over
/// from the boot allocator.
///
/// This walks the memory map a second time to size the bitmap
/// pools, reserves virtual address space for the metadata, backs it
/// with boot-allocator frames (the last thing the boot allocator
/// does), marks the kernel image and every previously handed-out
/// frame as reserved, and registers the bitmap allocator as the
/// kernel's frame source.
///
pub fn init() -> Result<(), InitError> {
    let map = match &*lock!(BOOT_ALLOCATOR) {
        Some(boot) => boot.memory_map().clone(),
        None => return Err(InitError::NoBootAllocator),
    };

    // Pass 1: size the metadata.
    let layout = MetadataLayout::for_map(&map);

    // Carve address space for the metadata and back it with frames
    // from the boot allocator.
    let base = vmm::early_reserve_region(layout.total_bytes as u64)
        .map_err(InitError::ReserveFailed)?;
    let pages = align_up_usize(layout.total_bytes, PAGE_SIZE) / PAGE_SIZE;
    let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::NO_EXECUTE;
    for i in 0..pages {
        let frame = boot_alloc_frame().map_err(|_| InitError::OutOfMemory)?;
        let page = Page::containing_address(base + (i * PAGE_SIZE) as u64);
        vmm::map(page, frame, flags).map_err(InitError::MapFailed)?;
    }

    // Pass 2: write the pool headers and bitmaps into the zeroed
    // metadata region.
    unsafe {
        ptr::write_bytes(base.as_mut_ptr::<u8>(), 0, pages * PAGE_SIZE);
    }
    let mut alloc =
        unsafe { BitmapAllocator::build_in(base.as_mut_ptr(), &map) }.ok_or(InitError::BuildFailed)?;

    {
        let guard = lock!(BOOT_ALLOCATOR);
        let boot = match &*guard {
            Some(boot) => boot,
            None => return Err(InitError::NoBootAllocator),
        };

        // Reserve the kernel image. An empty image, or one placed
        // in a reserved hole, has no tracked frames to mark.
        let (kernel_start, kernel_end) = boot.kernel_frames();
        let mut frame = kernel_start;
        while frame < kernel_end {
            alloc.mark_reserved(frame);
            frame += 1;
        }

        // Replay the boot allocator's deterministic allocation
        // sequence, which includes the metadata frames above.
        for used in boot.used_frames() {
            if !alloc.mark_reserved(used) {
                return Err(InitError::HandoverFailed(used));
            }
        }
    }

    *lock!(ALLOCATOR) = Some(alloc);
    vmm::register_frame_source(bitmap_alloc_frame);

    Ok(())
}

/// Returns the next free physical frame.
///
/// Until [`init`] has run, frames come from the boot allocator and
/// cannot be freed again.
///
pub fn alloc_frame() -> Result<Frame, FrameAllocError> {
    if let Some(alloc) = &mut *lock!(ALLOCATOR) {
        return alloc.allocate();
    }

    boot_alloc_frame()
}

/// Returns the given frame to the allocator.
///
pub fn free_frame(frame: Frame) -> Result<(), FrameFreeError> {
    match &mut *lock!(ALLOCATOR) {
        Some(alloc) => alloc.deallocate(frame),
        None => Err(FrameFreeError::NotManaged),
    }
}

// The frame source registered with the virtual memory manager
// while the boot allocator is in charge.
//
fn boot_alloc_frame() -> Result<Frame, FrameAllocError> {
    match &mut *lock!(BOOT_ALLOCATOR) {
        Some(boot) => boot.allocate(),
        None => Err(FrameAllocError::OutOfMemory),
    }
}

// The frame source registered with the virtual memory manager
// once the bitmap allocator has taken over.
//
fn bitmap_alloc_frame() -> Result<Frame, FrameAllocError> {
    match &mut *lock!(ALLOCATOR) {
        Some(alloc) => alloc.allocate(),
        None => Err(FrameAllocError::OutOfMemory),
    }
}

/// Prints debug information about the physical memory manager.
///
pub fn debug() {
    let guard = lock!(ALLOCATOR);
    let alloc = match &*guard {
        Some(alloc) => alloc,
        None => {
            println!("bitmap_alloc: not initialised");
            return;
        }
    };

    println!(
        "bitmap_alloc: {}/{} frames available.",
        alloc.free_pages(),
        alloc.total_pages()
    );
    println!(
        "{} used, {} free, {} total",
        Bytes::from_usize(alloc.reserved_pages() * PAGE_SIZE),
        Bytes::from_usize(alloc.free_pages() * PAGE_SIZE),
        Bytes::from_usize(alloc.total_pages() * PAGE_SIZE)
    );
    for pool in alloc.pools() {
        let last = pool.start() + (pool.len() as u64 - 1);
        println!(
            "{:#011x}-{:#011x} {:6} frames, {:6} free ({:7})",
            pool.start().start_address().as_u64(),
            last.end_address().as_u64(),
            pool.len(),
            pool.free(),
            Bytes::from_usize(pool.free() * PAGE_SIZE)
        );
    }
}
