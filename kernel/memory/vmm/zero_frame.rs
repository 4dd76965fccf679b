// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Manages the reserved zero frame: a single shared frame of
//! zeroes used as the copy-on-write backing for lazily allocated
//! pages.
//!
//! Once the frame has been zeroed and published, mapping it
//! writable is a defined error; the only way to write "through" it
//! is the copy-on-write fault path, which replaces the mapping
//! with a private copy.

use crate::arch;
use crate::mapping;
use crate::InitError;
use core::ptr;
use core::sync::atomic::{AtomicU64, Ordering};
use memory::constants::PAGE_SIZE;
use memory::Frame;

// The reserved zero frame's index, or the all-ones value before
// initialisation. Published exactly once, after the frame's
// contents have been zeroed.
//
static ZERO_FRAME: AtomicU64 = AtomicU64::new(u64::MAX);

/// Allocates the zero frame, zero-fills it through the temporary
/// mapping, and engages its write protection.
///
pub(crate) fn init() -> Result<(), InitError> {
    let frame = crate::allocate_frame().map_err(|_| mapping::MapError::OutOfMemory)?;

    let page = mapping::map_temporary(frame)?;
    unsafe {
        ptr::write_bytes(arch::page_ptr(page.start_address()), 0, PAGE_SIZE);
    }
    mapping::unmap(page)?;

    ZERO_FRAME.store(frame.index(), Ordering::SeqCst);

    Ok(())
}

/// Returns the reserved zero frame, once it has been set up.
///
pub fn zero_frame() -> Option<Frame> {
    match ZERO_FRAME.load(Ordering::SeqCst) {
        u64::MAX => None,
        index => Some(Frame::from_index(index)),
    }
}

/// Returns whether `frame` is the protected zero frame, which must
/// not be mapped writable.
///
pub(crate) fn is_protected(frame: Frame) -> bool {
    zero_frame() == Some(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{map, map_temporary, translate, MapError};
    use crate::{emu, register_frame_source};
    use memory::{Page, PageTableFlags, VirtAddr};

    // This is the only test that publishes a zero frame: the frame
    // registry is process-wide, while every other test works with
    // thread-local frames.
    //
    #[test]
    fn test_zero_frame_protection() {
        emu::boot();
        register_frame_source(emu::frame_source);

        init().unwrap();
        let frame = zero_frame().expect("zero frame not set up");

        // The frame is full of zeroes.
        for offset in [0usize, 1, 2048, 4095].iter() {
            assert_eq!(emu::frame_byte(frame, *offset), 0);
        }

        // Writable mappings of the zero frame are rejected, both
        // directly and through the temporary mapping.
        let page = Page::containing_address(VirtAddr::new(0x6000_0000));
        assert_eq!(
            map(page, frame, PageTableFlags::PRESENT | PageTableFlags::WRITABLE),
            Err(MapError::AttemptToRwMapReservedFrame)
        );
        assert_eq!(
            map_temporary(frame),
            Err(MapError::AttemptToRwMapReservedFrame)
        );

        // Read-only and copy-on-write mappings are fine.
        map(
            page,
            frame,
            PageTableFlags::PRESENT | PageTableFlags::COPY_ON_WRITE | PageTableFlags::NO_EXECUTE,
        )
        .unwrap();
        assert_eq!(
            translate(page.start_address()),
            Ok(frame.start_address())
        );

        // Other frames are unaffected by the protection.
        let other = emu::alloc_frame();
        map(page, other, PageTableFlags::PRESENT | PageTableFlags::WRITABLE).unwrap();
    }
}
