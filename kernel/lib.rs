// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! kernel implements the Mayfly kernel.
//!
//! This module covers the initialisation that must always happen
//! when the kernel starts: wiring the exception handlers, taking
//! over physical memory from the loader, and replacing the
//! loader's provisional page tables with the kernel's own.
//!
//! # Kernel subsystems
//!
//! Several parts of kernel functionality are provided in separate
//! crates:
//!
//! - [bootinfo](::bootinfo)
//! - [drivers/serial](::serial)
//! - [interrupts](::interrupts)
//! - [memory](::memory)
//! - [memory/pmm](::pmm)
//! - [memory/vmm](::vmm)

#![no_std]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]

use bootinfo::{KernelSections, MemoryMap};
use memory::constants::KERNEL_PAGE_OFFSET;
use memory::PhysAddr;
use multiboot2::BootInformation;
use pretty::Bytes;
use serial::println;
use x86_64::registers::control::{Cr4, Cr4Flags};
use x86_64::registers::model_specific::{Efer, EferFlags};

/// Initialises the kernel's subsystems.
///
/// The order matters: the exception handlers are loaded first, so
/// a fault during memory initialisation is at least reported; the
/// boot allocator takes over physical memory next; and with frames
/// available, the virtual memory manager replaces the loader's
/// page tables and the bitmap allocator replaces the boot
/// allocator.
///
/// Every failure here is fatal: there is no kernel to fall back
/// to.
///
pub fn init(boot_info: &BootInformation, kernel_start: PhysAddr, kernel_end: PhysAddr) {
    interrupts::init();

    let memory_map = match boot_info.memory_map_tag() {
        Some(tag) => MemoryMap::from_multiboot(tag),
        None => panic!("boot_mem_alloc: no memory map in the boot information"),
    };
    dump_memory_map(&memory_map);
    println!(
        "Kernel image at {:p}-{:p}.",
        kernel_start, kernel_end
    );

    pmm::bootstrap(memory_map, kernel_start, kernel_end);

    // The granular kernel mapping is about to use the no-execute
    // and global flags; the CPU rejects both until enabled.
    enable_paging_features();

    let sections = KernelSections::from_multiboot(boot_info);
    if let Err(err) = vmm::init(KERNEL_PAGE_OFFSET, &sections) {
        panic!("vmm: init failed: {:?}", err);
    }
    if let Some(pdt) = vmm::kernel_pdt() {
        println!("vmm: kernel page tables at {:p}.", pdt.start_address());
    }

    if let Err(err) = pmm::init() {
        panic!("bitmap_alloc: init failed: {:?}", err);
    }
    pmm::debug();
}

// Enables global pages (CR4.PGE) and the no-execute permission
// bit (EFER.NXE).
//
fn enable_paging_features() {
    let mut flags = Cr4::read();
    flags |= Cr4Flags::PAGE_GLOBAL;
    unsafe { Cr4::write(flags) };

    let mut flags = Efer::read();
    flags |= EferFlags::NO_EXECUTE_ENABLE;
    unsafe { Efer::write(flags) };
}

// Prints the loader's memory map.
//
fn dump_memory_map(map: &MemoryMap) {
    println!("Memory map ({} regions):", map.len());
    for region in map.iter() {
        println!(
            "  {:#013x}-{:#013x} {:9} {:?}",
            region.start.as_u64(),
            region.start.as_u64() + region.size.saturating_sub(1),
            Bytes::from_u64(region.size),
            region.kind
        );
    }
}

/// Halts the CPU in a low-power loop that never returns.
///
pub fn halt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}
