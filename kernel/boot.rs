// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The Multiboot2 header.
//!
//! The loader scans the first 32 KiB of the kernel image for this
//! header; the linker script places its section at the front of
//! the image. The header requests nothing beyond the defaults, so
//! it consists of the fixed fields followed immediately by the end
//! tag.

use core::mem;

const MULTIBOOT2_HEADER_MAGIC: u32 = 0xe852_50d6;

// Architecture 0 is 32-bit protected mode i386, the mode every
// Multiboot2 loader hands over in; the boot stub does the switch
// to long mode.
const MULTIBOOT2_ARCHITECTURE_I386: u32 = 0;

#[repr(C, align(8))]
struct Multiboot2Header {
    magic: u32,
    architecture: u32,
    header_length: u32,
    checksum: u32,

    // The end tag: type 0, flags 0, size 8.
    end_tag_type: u16,
    end_tag_flags: u16,
    end_tag_size: u32,
}

#[used]
#[link_section = ".multiboot2_header"]
static MULTIBOOT2_HEADER: Multiboot2Header = Multiboot2Header {
    magic: MULTIBOOT2_HEADER_MAGIC,
    architecture: MULTIBOOT2_ARCHITECTURE_I386,
    header_length: mem::size_of::<Multiboot2Header>() as u32,
    checksum: 0u32
        .wrapping_sub(MULTIBOOT2_HEADER_MAGIC)
        .wrapping_sub(MULTIBOOT2_ARCHITECTURE_I386)
        .wrapping_sub(mem::size_of::<Multiboot2Header>() as u32),
    end_tag_type: 0,
    end_tag_flags: 0,
    end_tag_size: 8,
};
