// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Handles CPU exceptions.
//!
//! [`init`] loads the interrupt descriptor table, wiring up
//! handlers for the exceptions the kernel cares about. Most of
//! them print what they know and panic, halting the CPU; the page
//! fault handler first offers the fault to the recovery hook
//! installed with [`set_page_fault_recovery`], and only panics if
//! the hook declines or none is installed.
//!
//! The recovery hook is how the virtual memory manager's
//! copy-on-write machinery gets between a write to a shared page
//! and the panic path: it receives the faulting address read from
//! the fault-address register and returns whether the fault has
//! been fixed up, in which case the faulting instruction is
//! resumed.

#![no_std]
#![feature(abi_x86_interrupt)]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]

use lazy_static::lazy_static;
use memory::VirtAddr;
use serial::println;
use spinlock::{lock, Mutex};
use x86_64::registers::control::Cr2;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

/// A fault recovery hook: receives the faulting address and
/// returns whether the fault was fixed up and the faulting
/// instruction can be resumed.
///
pub type PageFaultRecovery = fn(VirtAddr) -> bool;

/// The installed page fault recovery hook, set once during kernel
/// initialisation.
///
static PAGE_FAULT_RECOVERY: Mutex<Option<PageFaultRecovery>> = Mutex::new(None);

/// Loads the interrupt descriptor table.
///
pub fn init() {
    IDT.load();
}

/// Installs the page fault recovery hook.
///
pub fn set_page_fault_recovery(handler: PageFaultRecovery) {
    *lock!(PAGE_FAULT_RECOVERY) = Some(handler);
}

lazy_static! {
    /// IDT is our interrupt descriptor table.
    ///
    /// We configure it with handlers for the CPU exceptions the
    /// kernel can say something useful about. Everything else gets
    /// the CPU's default treatment (a triple fault, eventually).
    ///
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.double_fault.set_handler_fn(double_fault_handler);
        idt.segment_not_present
            .set_handler_fn(segment_not_present_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);

        idt
    };
}

// CPU exception handlers.

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    println!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn invalid_opcode_handler(stack_frame: InterruptStackFrame) {
    panic!("EXCEPTION: INVALID OPCODE\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn segment_not_present_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!(
        "EXCEPTION: SEGMENT NOT PRESENT: index {}\n{:#?}",
        error_code, stack_frame
    );
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    if error_code != 0 {
        panic!(
            "EXCEPTION: GENERAL PROTECTION FAULT: segment index {}\n{:#?}",
            error_code, stack_frame
        );
    } else {
        panic!("EXCEPTION: GENERAL PROTECTION FAULT\n{:#?}", stack_frame);
    }
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    let addr = VirtAddr::from_x86_64(Cr2::read());

    // Offer the fault to the recovery hook. The hook is read with
    // try_lock: a fault taken while the registry itself is being
    // written cannot be a recoverable one.
    let recovery = PAGE_FAULT_RECOVERY
        .try_lock()
        .and_then(|hook| *hook);
    if let Some(recover) = recovery {
        if recover(addr) {
            return;
        }
    }

    println!("EXCEPTION: PAGE FAULT");
    println!("Accessed address: {:p}", addr);
    println!(
        "Cause: {} on {} from {} mode{}{}",
        if error_code.contains(PageFaultErrorCode::PROTECTION_VIOLATION) {
            "protection violation"
        } else {
            "page not present"
        },
        if error_code.contains(PageFaultErrorCode::CAUSED_BY_WRITE) {
            "write"
        } else {
            "read"
        },
        if error_code.contains(PageFaultErrorCode::USER_MODE) {
            "user"
        } else {
            "kernel"
        },
        if error_code.contains(PageFaultErrorCode::MALFORMED_TABLE) {
            ", reserved bit set"
        } else {
            ""
        },
        if error_code.contains(PageFaultErrorCode::INSTRUCTION_FETCH) {
            ", instruction fetch"
        } else {
            ""
        },
    );
    println!("{:#?}", stack_frame);
    panic!("vmm: unrecoverable page fault");
}
