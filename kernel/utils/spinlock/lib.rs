// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements a test-and-set spinlock, which will panic if it
//! appears to be deadlocked.
//!
//! The kernel runs on a single CPU with interrupts disabled across
//! all paging manipulations, so a lock that cannot be acquired after
//! a large, bounded number of attempts can only mean a recursive
//! acquisition. Rather than hang silently, [`lock!`] panics with the
//! location where the lock was last taken.

#![no_std]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};
use core::{fmt, hint};

/// The maximum number of times a lock acquisition will spin
/// before the lock is assumed to be deadlocked and the kernel
/// panics.
///
/// This needs to be large enough that a legitimately contended
/// lock is never declared deadlocked, and small enough that a
/// recursive acquisition is reported promptly.
///
pub const MAX_LOCK_ATTEMPTS: usize = 500_000_000;

/// A spinlock providing mutually-exclusive access to data.
///
pub struct Mutex<T: ?Sized> {
    lock: AtomicBool,
    owner_file: UnsafeCell<&'static str>,
    owner_line: UnsafeCell<u32>,
    data: UnsafeCell<T>,
}

/// The mutex guard, which allows mutable access to the locked
/// data.
///
/// When the guard is dropped, the lock is released.
///
pub struct MutexGuard<'lock, T: ?Sized + 'lock> {
    lock: &'lock AtomicBool,
    data: &'lock mut T,
}

unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new unlocked mutex, containing the given data.
    ///
    #[inline(always)]
    pub const fn new(data: T) -> Self {
        Mutex {
            lock: AtomicBool::new(false),
            owner_file: UnsafeCell::new("???"),
            owner_line: UnsafeCell::new(0),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Returns whether the mutex is currently locked.
    ///
    /// # Safety
    ///
    /// There is no synchronisation of the return value, so
    /// it can become incorrect immediately. This should only
    /// be used as a hint.
    ///
    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Relaxed)
    }

    /// Attempts to lock the mutex without spinning.
    ///
    #[inline(always)]
    pub fn try_lock(&self) -> Option<MutexGuard<T>> {
        if self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(MutexGuard {
                lock: &self.lock,
                data: unsafe { &mut *self.data.get() },
            })
        } else {
            None
        }
    }
}

/// Locks the mutex, panicking with a deadlock report if the
/// mutex cannot be locked after [`MAX_LOCK_ATTEMPTS`] attempts.
///
#[macro_export]
macro_rules! lock {
    ($mutex:expr) => {{
        let file = file!();
        let line = line!();
        $crate::_lock(&$mutex, file, line)
    }};
}

/// Locks the mutex, returning a mutex guard, which will
/// unlock the mutex once dropped.
///
#[doc(hidden)]
pub fn _lock<'lock, T: ?Sized>(
    mutex: &'lock Mutex<T>,
    file: &'static str,
    line: u32,
) -> MutexGuard<'lock, T> {
    let mut attempts = 0_usize;
    while mutex
        .lock
        .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
        .is_err()
    {
        while mutex.is_locked() {
            attempts += 1;
            if attempts > MAX_LOCK_ATTEMPTS {
                let owner_file = unsafe { *mutex.owner_file.get() };
                let owner_line = unsafe { *mutex.owner_line.get() };
                panic!(
                    "DEADLOCK: failed to lock at {}:{}, after mutex was locked at {}:{}",
                    file, line, owner_file, owner_line
                );
            }

            hint::spin_loop();
        }
    }

    // Now that we hold the mutex, record where it was taken
    // so that a future deadlock report can name us.
    unsafe {
        *mutex.owner_file.get() = file;
        *mutex.owner_line.get() = line;
    }

    MutexGuard {
        lock: &mutex.lock,
        data: unsafe { &mut *mutex.data.get() },
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => write!(f, "Mutex {{ data: ")
                .and_then(|()| (*guard).fmt(f))
                .and_then(|()| write!(f, " }}")),
            None => write!(f, "Mutex {{ <locked> }}"),
        }
    }
}

impl<T: ?Sized + Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl<'lock, T: ?Sized> Deref for MutexGuard<'lock, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.data
    }
}

impl<'lock, T: ?Sized> DerefMut for MutexGuard<'lock, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data
    }
}

impl<'lock, T: ?Sized> Drop for MutexGuard<'lock, T> {
    fn drop(&mut self) {
        self.lock.store(false, Ordering::Release);
    }
}
