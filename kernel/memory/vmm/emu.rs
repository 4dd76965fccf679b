// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! A software model of the paging hardware, used to exercise the
//! mapping code on the host.
//!
//! The model is a page-walking MMU over a set of 4 KiB frame
//! buffers: resolving a virtual address performs the same four-level
//! walk the CPU would, reading entries out of the emulated frames.
//! Because the walk is faithful, the recursive mapping works here
//! exactly as it does on hardware, and the mapping code above runs
//! without modification.
//!
//! Each test thread gets its own machine, and each machine hands
//! out frames from a distinct index range, so tests can run
//! concurrently even where they share the crate's process-wide
//! state (the registered frame source and the reservation cursor).

use core::sync::atomic::{AtomicU64, Ordering};
use memory::constants::{PAGE_SIZE, PTE_FRAME_MASK, RECURSIVE_INDEX};
use memory::{Frame, FrameAllocError, PageTableEntry, PageTableFlags, VirtAddr};
use std::boxed::Box;
use std::cell::RefCell;
use std::collections::HashMap;

// Frame index ranges are spaced widely enough that no two test
// threads can ever name each other's frames.
static NEXT_FRAME_BASE: AtomicU64 = AtomicU64::new(0x1_0000);

struct Machine {
    frames: HashMap<u64, Box<[u8; PAGE_SIZE]>>,
    cr3: Option<u64>,
    next_frame: u64,
}

impl Machine {
    fn new() -> Self {
        Machine {
            frames: HashMap::new(),
            cr3: None,
            next_frame: NEXT_FRAME_BASE.fetch_add(0x10_0000, Ordering::Relaxed),
        }
    }

    fn alloc(&mut self) -> u64 {
        let index = self.next_frame;
        self.next_frame += 1;
        self.frames.insert(index, Box::new([0u8; PAGE_SIZE]));

        index
    }

    fn frame_ptr(&mut self, frame: u64) -> *mut u8 {
        self.frames
            .get_mut(&frame)
            .expect("emulated MMU: access to an unallocated frame")
            .as_mut_ptr()
    }

    // Performs the four-level hardware walk for `virt` and returns
    // a pointer to the backing byte.
    //
    fn resolve(&mut self, virt: VirtAddr) -> *mut u8 {
        let addr = virt.as_u64();
        let mut table = self.cr3.expect("emulated MMU: no active page directory");
        for level in 0..4 {
            let shift = 39 - level * 9;
            let index = ((addr >> shift) & 0x1ff) as usize;
            let entry = unsafe { *(self.frame_ptr(table) as *const u64).add(index) };
            assert!(
                entry & 1 != 0,
                "emulated MMU: absent entry at level {} translating {:#x}",
                level,
                addr
            );
            table = (entry & PTE_FRAME_MASK) >> 12;
        }

        unsafe { self.frame_ptr(table).add((addr & 0xfff) as usize) }
    }
}

std::thread_local! {
    static MACHINE: RefCell<Machine> = RefCell::new(Machine::new());
}

/// Creates a fresh top-level table with its self-referential last
/// entry in place and makes it active, returning its frame.
///
pub(crate) fn boot() -> Frame {
    MACHINE.with(|machine| {
        let mut machine = machine.borrow_mut();
        let pdt = machine.alloc();
        let entry = (pdt << 12) | (PageTableFlags::PRESENT | PageTableFlags::WRITABLE).bits();
        unsafe {
            *(machine.frame_ptr(pdt) as *mut u64).add(RECURSIVE_INDEX) = entry;
        }
        machine.cr3 = Some(pdt);

        Frame::from_index(pdt)
    })
}

/// Allocates a zeroed frame in the emulated physical memory.
///
pub(crate) fn alloc_frame() -> Frame {
    MACHINE.with(|machine| Frame::from_index(machine.borrow_mut().alloc()))
}

/// The frame source tests register with the crate.
///
pub(crate) fn frame_source() -> Result<Frame, FrameAllocError> {
    Ok(alloc_frame())
}

/// Fills the given emulated frame with the given byte pattern,
/// repeated to the frame size.
///
pub(crate) fn fill_frame(frame: Frame, pattern: &[u8]) {
    MACHINE.with(|machine| {
        let mut machine = machine.borrow_mut();
        let ptr = machine.frame_ptr(frame.index());
        for i in 0..PAGE_SIZE {
            unsafe { *ptr.add(i) = pattern[i % pattern.len()] };
        }
    });
}

/// Reads a byte out of the given emulated frame.
///
pub(crate) fn frame_byte(frame: Frame, offset: usize) -> u8 {
    MACHINE.with(|machine| unsafe { *machine.borrow_mut().frame_ptr(frame.index()).add(offset) })
}

pub(crate) fn active_pdt() -> Frame {
    MACHINE.with(|machine| {
        Frame::from_index(
            machine
                .borrow()
                .cr3
                .expect("emulated MMU: no active page directory"),
        )
    })
}

pub(crate) unsafe fn set_active_pdt(frame: Frame) {
    MACHINE.with(|machine| {
        machine.borrow_mut().cr3 = Some(frame.index());
    });
}

pub(crate) fn flush_page(_addr: VirtAddr) {}

pub(crate) fn flush_all() {}

pub(crate) unsafe fn pte(addr: VirtAddr) -> &'static mut PageTableEntry {
    MACHINE.with(|machine| {
        let entry = machine.borrow_mut().resolve(addr) as *mut PageTableEntry;
        unsafe { &mut *entry }
    })
}

pub(crate) unsafe fn page_ptr(addr: VirtAddr) -> *mut u8 {
    MACHINE.with(|machine| machine.borrow_mut().resolve(addr))
}
