// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

use align::{align_down_u64, align_up_u64};
use core::fmt;
use core::ops::{Add, AddAssign, Sub, SubAssign};

/// A virtual memory address.
///
/// A `VirtAddr` is always a 48-bit canonical x86-64 address, with the
/// top 16 bits equal to bit 47.
///
#[repr(transparent)]
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VirtAddr(u64);

/// An invalid virtual memory address.
///
/// If an attempt is made to create a [`VirtAddr`] from a value that
/// is not valid on the target platform, then `InvalidVirtAddr` is
/// returned, containing the attempted value.
///
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InvalidVirtAddr(pub u64);

impl VirtAddr {
    /// Creates a new virtual memory address.
    ///
    /// # Panics
    ///
    /// `new` will panic if `addr` is not valid for the target
    /// platform.
    ///
    #[inline]
    #[track_caller]
    pub const fn new(addr: u64) -> Self {
        match Self::try_new(addr) {
            Ok(addr) => addr,
            Err(_) => panic!("invalid address passed to VirtAddr::new"),
        }
    }

    /// Tries to create a new virtual memory address.
    ///
    /// If the passed value is invalid for the target platform, then
    /// an error is returned.
    ///
    #[inline]
    pub const fn try_new(addr: u64) -> Result<Self, InvalidVirtAddr> {
        // Check that the address is a 48-bit canonical address,
        // either a low half address (starting 0x00007 or below) or
        // a high half address (starting 0xffff8 or above).
        match addr >> 47 {
            0 | 0x1ffff => Ok(VirtAddr(addr)),
            _ => Err(InvalidVirtAddr(addr)),
        }
    }

    /// Creates a new virtual memory address, sign-extending bit 47
    /// into the top 16 bits.
    ///
    /// This is used by the recursive page table arithmetic, where an
    /// address is built up by shifting table indices in from below
    /// and the top bits carry whatever fell off the end.
    ///
    #[inline]
    pub const fn new_canonical(addr: u64) -> Self {
        // Shift the 48 interesting bits all the way up, then use an
        // arithmetic shift to copy bit 47 into the top 16 bits.
        VirtAddr(((addr << 16) as i64 >> 16) as u64)
    }

    /// Returns the address's numerical value.
    ///
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the address as a raw pointer.
    ///
    #[inline]
    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// Returns the address as a raw mutable pointer.
    ///
    #[inline]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Returns the zero virtual memory address.
    ///
    #[inline]
    pub const fn zero() -> Self {
        VirtAddr(0)
    }

    /// Returns whether this is the zero address.
    ///
    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Aligns the virtual address downwards to the largest exact
    /// multiple of `align` that is no larger than the address.
    ///
    /// `align` must be an exact power of two.
    ///
    #[inline]
    #[must_use]
    pub const fn align_down(self, align: u64) -> Self {
        // A change of alignment cannot make a canonical address
        // non-canonical, so we can skip the constructor checks.
        VirtAddr(align_down_u64(self.0, align))
    }

    /// Aligns the virtual address upwards to the smallest exact
    /// multiple of `align` that is no smaller than the address.
    ///
    /// `align` must be an exact power of two.
    ///
    #[inline]
    #[must_use]
    pub const fn align_up(self, align: u64) -> Self {
        VirtAddr(align_up_u64(self.0, align))
    }

    /// Returns whether the address is an exact multiple of `align`,
    /// which must be an exact power of two.
    ///
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        align_down_u64(self.0, align) == self.0
    }

    /// Returns the address described by the [`x86_64::VirtAddr`].
    ///
    #[inline]
    pub fn from_x86_64(addr: x86_64::VirtAddr) -> Self {
        VirtAddr::new(addr.as_u64())
    }

    /// Returns the address as a [`x86_64::VirtAddr`], for use with
    /// the CPU intrinsics.
    ///
    #[inline]
    #[must_use]
    pub fn as_x86_64(self) -> x86_64::VirtAddr {
        x86_64::VirtAddr::new(self.0)
    }

    /// Adds `offset` to the address, returning `None` if the result
    /// would not be canonical.
    ///
    #[inline]
    pub const fn checked_add(self, offset: u64) -> Option<Self> {
        match self.0.checked_add(offset) {
            None => None,
            Some(sum) => match Self::try_new(sum) {
                Ok(addr) => Some(addr),
                Err(_) => None,
            },
        }
    }

    /// Subtracts `offset` from the address, returning `None` if the
    /// result would not be canonical.
    ///
    #[inline]
    pub const fn checked_sub(self, offset: u64) -> Option<Self> {
        match self.0.checked_sub(offset) {
            None => None,
            Some(diff) => match Self::try_new(diff) {
                Ok(addr) => Some(addr),
                Err(_) => None,
            },
        }
    }
}

impl Add<u64> for VirtAddr {
    type Output = VirtAddr;

    #[track_caller]
    fn add(self, other: u64) -> Self {
        VirtAddr::new(self.0 + other)
    }
}

impl AddAssign<u64> for VirtAddr {
    #[track_caller]
    fn add_assign(&mut self, other: u64) {
        *self = *self + other;
    }
}

impl Sub<u64> for VirtAddr {
    type Output = VirtAddr;

    #[track_caller]
    fn sub(self, other: u64) -> Self {
        VirtAddr::new(self.0 - other)
    }
}

impl SubAssign<u64> for VirtAddr {
    #[track_caller]
    fn sub_assign(&mut self, other: u64) {
        *self = *self - other;
    }
}

impl Sub<VirtAddr> for VirtAddr {
    type Output = u64;

    fn sub(self, other: VirtAddr) -> u64 {
        self.0 - other.0
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "VirtAddr({:#x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Pointer for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
