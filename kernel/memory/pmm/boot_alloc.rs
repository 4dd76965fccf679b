// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides the boot-memory frame allocator, a linear bump allocator
//! over the loader's memory map.

use bootinfo::MemoryMap;
use memory::constants::PAGE_SIZE;
use memory::{Frame, FrameAllocError, PhysAddr};

/// A linear physical memory allocator for early boot.
///
/// `BootMemAllocator` hands out the usable frames of the loader's
/// memory map in ascending order, skipping the kernel image. It
/// cannot de-allocate frames.
///
/// The allocator is deterministic: given the same memory map and
/// kernel extents, the n-th call to [`allocate`](Self::allocate)
/// always returns the n-th frame of the same sequence. The bitmap
/// allocator relies on this when it takes over, replaying the
/// sequence through [`used_frames`](Self::used_frames) to learn
/// which frames are already spoken for.
///
pub struct BootMemAllocator {
    memory_map: MemoryMap,

    // The frames occupied by the kernel image, as a half-open
    // range: the image's start address rounded down to a frame
    // boundary, and its end address rounded up.
    kernel_start: Frame,
    kernel_end: Frame,

    // The most recently returned frame, meaningful once
    // alloc_count is nonzero.
    last_alloc: Frame,
    alloc_count: u64,
}

impl BootMemAllocator {
    /// Creates an allocator over the given memory map, never
    /// yielding a frame inside the kernel image described by
    /// `kernel_start..kernel_end` (exclusive end, in bytes).
    ///
    pub fn new(memory_map: MemoryMap, kernel_start: PhysAddr, kernel_end: PhysAddr) -> Self {
        BootMemAllocator {
            memory_map,
            kernel_start: Frame::containing_address(kernel_start),
            kernel_end: Frame::containing_address(kernel_end.align_up(PAGE_SIZE as u64)),
            last_alloc: Frame::from_index(0),
            alloc_count: 0,
        }
    }

    /// Returns the next free frame, or an error once every usable
    /// frame outside the kernel image has been handed out.
    ///
    pub fn allocate(&mut self) -> Result<Frame, FrameAllocError> {
        let next = self.next_frame()?;
        self.last_alloc = next;
        self.alloc_count += 1;

        Ok(next)
    }

    // Finds the next frame to hand out without updating the
    // allocator's state.
    //
    fn next_frame(&self) -> Result<Frame, FrameAllocError> {
        for region in self.memory_map.iter() {
            if !region.is_available() {
                continue;
            }

            let (start, end) = match region.frame_range() {
                Some(range) => range,
                None => continue,
            };

            // A region whose last frame we have already returned.
            if self.alloc_count > 0 && self.last_alloc.index() + 1 >= end.index() {
                continue;
            }

            // Take the region's first frame on the first ever
            // allocation and when crossing into a new region;
            // otherwise continue from the last frame handed out.
            let mut candidate = if self.alloc_count == 0 || self.last_alloc < start {
                start
            } else {
                self.last_alloc + 1
            };

            // Jump over the kernel image.
            if self.in_kernel(candidate) {
                candidate = self.kernel_end;
            }

            if candidate >= end {
                continue;
            }

            return Ok(candidate);
        }

        Err(FrameAllocError::OutOfMemory)
    }

    // Returns whether the frame lies inside the kernel image.
    //
    fn in_kernel(&self, frame: Frame) -> bool {
        self.kernel_start <= frame && frame < self.kernel_end
    }

    /// Returns the number of frames handed out so far.
    ///
    pub fn alloc_count(&self) -> u64 {
        self.alloc_count
    }

    /// Returns the memory map the allocator works from.
    ///
    pub fn memory_map(&self) -> &MemoryMap {
        &self.memory_map
    }

    /// Returns the frames occupied by the kernel image, as a
    /// half-open `[start, end)` pair. The range is empty for an
    /// empty image.
    ///
    pub fn kernel_frames(&self) -> (Frame, Frame) {
        (self.kernel_start, self.kernel_end)
    }

    /// Returns an iterator over the frames this allocator has
    /// already handed out, in allocation order.
    ///
    /// The iterator replays the allocation sequence from a rewound
    /// copy of the allocator, which is possible because the
    /// sequence is deterministic.
    ///
    /// # Panics
    ///
    /// Panics if the allocator's state was corrupted such that the
    /// replay runs out of memory before reaching the recorded
    /// allocation count. This cannot happen through this type's
    /// public interface.
    ///
    pub fn used_frames(&self) -> impl Iterator<Item = Frame> {
        let mut rewound = BootMemAllocator {
            memory_map: self.memory_map.clone(),
            kernel_start: self.kernel_start,
            kernel_end: self.kernel_end,
            last_alloc: Frame::from_index(0),
            alloc_count: 0,
        };

        (0..self.alloc_count).map(move |_| {
            rewound
                .allocate()
                .expect("boot allocator replay diverged from its recorded state")
        })
    }
}
