// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

use crate::constants::PAGE_SIZE;
use crate::PhysAddr;
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// A 4 KiB frame of physical memory.
///
/// A `Frame` is indexed by its starting address divided by the page
/// size, so frame `i` covers physical addresses `[i * 4096, (i + 1) *
/// 4096)`. Absence of a frame is expressed with `Option<Frame>`; no
/// sentinel frame value exists outside the bitmap word scans.
///
#[repr(transparent)]
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Frame(u64);

impl Frame {
    /// Returns the frame with the given index.
    ///
    #[inline]
    pub const fn from_index(index: u64) -> Self {
        Frame(index)
    }

    /// Returns the frame containing the given physical address.
    ///
    #[inline]
    pub const fn containing_address(addr: PhysAddr) -> Self {
        Frame(addr.as_u64() / PAGE_SIZE as u64)
    }

    /// Returns the frame's index into physical memory.
    ///
    #[inline]
    pub const fn index(self) -> u64 {
        self.0
    }

    /// Returns the first physical address in the frame.
    ///
    #[inline]
    pub const fn start_address(self) -> PhysAddr {
        PhysAddr::new(self.0 * PAGE_SIZE as u64)
    }

    /// Returns the last physical address in the frame.
    ///
    #[inline]
    pub const fn end_address(self) -> PhysAddr {
        PhysAddr::new(self.0 * PAGE_SIZE as u64 + (PAGE_SIZE as u64 - 1))
    }
}

impl Add<u64> for Frame {
    type Output = Frame;

    fn add(self, other: u64) -> Self {
        Frame(self.0 + other)
    }
}

impl AddAssign<u64> for Frame {
    fn add_assign(&mut self, other: u64) {
        self.0 += other;
    }
}

impl Sub<Frame> for Frame {
    type Output = u64;

    fn sub(self, other: Frame) -> u64 {
        self.0 - other.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Frame({}, at {:p})", self.0, self.start_address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexing() {
        assert_eq!(Frame::from_index(0).start_address(), PhysAddr::zero());
        assert_eq!(
            Frame::from_index(256).start_address(),
            PhysAddr::new(0x10_0000)
        );
        assert_eq!(
            Frame::from_index(1).end_address(),
            PhysAddr::new(0x1fff)
        );

        assert_eq!(
            Frame::containing_address(PhysAddr::new(0x9fc00)),
            Frame::from_index(0x9f)
        );
        assert_eq!(
            Frame::containing_address(PhysAddr::new(0x9f000)),
            Frame::from_index(0x9f)
        );
    }

    #[test]
    fn test_arithmetic() {
        let frame = Frame::from_index(10);
        assert_eq!(frame + 5, Frame::from_index(15));
        assert_eq!(Frame::from_index(15) - frame, 5);
    }
}
