// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides the kernel's diagnostic output and implements the
//! `print` and `println` macros.
//!
//! All diagnostics go to the first serial port ([`COM1`]), which
//! is protected with a spin lock. The [`print`] and [`println`]
//! macros disable interrupts while holding the port, so a handler
//! that prints cannot deadlock against the code it interrupted.
//!
//! # Examples
//!
//! ```
//! println!("This is sent to COM{}.", 1);
//! ```

#![no_std]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]

use core::fmt::Write;
use spinlock::{lock, Mutex};
use uart_16550::SerialPort;
use x86_64::instructions::interrupts::without_interrupts;

/// COM1 is the serial port device carrying the kernel's
/// diagnostics.
///
pub static COM1: Mutex<SerialPort> = Mutex::new(unsafe { SerialPort::new(0x3f8) });

/// Initialises the diagnostic port.
///
pub fn init() {
    without_interrupts(|| lock!(COM1).init());
}

/// Writes raw bytes to the diagnostic port.
///
pub fn write_bytes(bytes: &[u8]) {
    without_interrupts(|| {
        let mut port = lock!(COM1);
        for byte in bytes.iter() {
            port.send(*byte);
        }
    });
}

/// _print writes text to the diagnostic port, taking the port's
/// spin lock with interrupts disabled.
///
#[doc(hidden)]
pub fn _print(args: ::core::fmt::Arguments) {
    without_interrupts(|| {
        // Writing to the UART cannot fail; the Err arm is for the
        // trait's sake.
        let _ = lock!(COM1).write_fmt(args);
    });
}

/// Print to the diagnostic serial port.
///
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::_print(format_args!($($arg)*)));
}

/// Print to the diagnostic serial port, with a trailing newline.
///
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
