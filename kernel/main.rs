// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

// This is the entry point for the kernel, reached once the boot
// stub has switched the CPU into long mode. It parses the
// Multiboot2 boot information, runs the kernel's standard
// initialisation, performs a short self-check of the demand-paging
// machinery, and idles.

#![no_std]
#![no_main]

mod boot;

use core::panic::PanicInfo;
use memory::constants::{KERNEL_PAGE_OFFSET, PAGE_SIZE};
use memory::{Frame, Page, PageTableFlags, PhysAddr};
use multiboot2::{BootInformation, BootInformationHeader};
use serial::println;

/// The magic value a Multiboot2 loader leaves in EAX.
///
const MULTIBOOT2_BOOTLOADER_MAGIC: u32 = 0x36d7_6289;

// The bounds of the kernel image, provided by the linker script.
// The symbols' addresses are the image's virtual bounds; the
// image's physical placement follows from the kernel page offset.
extern "C" {
    static __kernel_start: u8;
    static __kernel_end: u8;
}

/// This function is called on panic.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial::write_bytes(b"\n*** kernel panic\n");
    println!("{}", info);

    kernel::halt_loop();
}

#[no_mangle]
pub extern "C" fn kmain(magic: u32, boot_info_addr: usize) -> ! {
    serial::init();
    println!("Kernel booting...");

    if magic != MULTIBOOT2_BOOTLOADER_MAGIC {
        panic!("kmain: not loaded by a Multiboot2 loader (magic {:#x})", magic);
    }

    let boot_info =
        match unsafe { BootInformation::load(boot_info_addr as *const BootInformationHeader) } {
            Ok(info) => info,
            Err(err) => panic!("kmain: cannot parse boot information: {:?}", err),
        };

    let (kernel_start, kernel_end) = kernel_extents();
    kernel::init(&boot_info, kernel_start, kernel_end);

    copy_on_write_self_check();

    println!("Kernel ready!");
    kernel::halt_loop()
}

// Computes the physical extent of the kernel image from the
// linker-provided bounds.
//
fn kernel_extents() -> (PhysAddr, PhysAddr) {
    let start = unsafe { &__kernel_start as *const u8 as u64 };
    let end = unsafe { &__kernel_end as *const u8 as u64 };

    (
        PhysAddr::new(start - KERNEL_PAGE_OFFSET.as_u64()),
        PhysAddr::new(end - KERNEL_PAGE_OFFSET.as_u64()),
    )
}

// Maps a fresh page copy-on-write onto the shared zero frame and
// writes through it: the write faults, the handler copies the page,
// and the instruction resumes. This exercises the demand-paging
// machinery end to end on every boot.
//
fn copy_on_write_self_check() {
    let zero = match vmm::zero_frame() {
        Some(frame) => frame,
        None => panic!("vmm: zero frame missing after init"),
    };

    let addr = match vmm::early_reserve_region(PAGE_SIZE as u64) {
        Ok(addr) => addr,
        Err(err) => panic!("vmm: cannot reserve self-check page: {:?}", err),
    };
    let page = Page::containing_address(addr);
    let flags =
        PageTableFlags::PRESENT | PageTableFlags::COPY_ON_WRITE | PageTableFlags::NO_EXECUTE;
    if let Err(err) = vmm::map(page, zero, flags) {
        panic!("vmm: cannot map self-check page: {:?}", err);
    }

    let ptr = addr.as_mut_ptr::<u8>();
    unsafe {
        if ptr.read_volatile() != 0 {
            panic!("vmm: zero frame is not zero");
        }

        ptr.write_volatile(0xa5);
        if ptr.read_volatile() != 0xa5 {
            panic!("vmm: copy-on-write lost a write");
        }
    }

    // The fault handler replaced the zero frame with a private
    // copy; give the copy back.
    let copy = match vmm::translate(addr) {
        Ok(phys) => Frame::containing_address(phys),
        Err(err) => panic!("vmm: self-check page vanished: {:?}", err),
    };
    if copy == zero {
        panic!("vmm: copy-on-write did not copy");
    }

    if let Err(err) = vmm::unmap(page) {
        panic!("vmm: cannot unmap self-check page: {:?}", err);
    }
    if let Err(err) = pmm::free_frame(copy) {
        panic!("bitmap_alloc: cannot free self-check frame: {:?}", err);
    }

    println!("copy-on-write self-check passed");
}
