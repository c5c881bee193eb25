//! Interrupt entry
//!
//! The IDT carries: handlers for every architectural exception the
//! kernel cares about, the scheduler tick, the fifteen deliverable
//! legacy IRQ lines, and the syscall gate at vector 0x80 (DPL 3).
//!
//! Policy: a user-mode exception logs, terminates the offending
//! process with exit code −1, and reschedules; a kernel-mode exception
//! is fatal: interrupts off, panic, halt.

#[cfg(target_os = "none")]
mod idt {
    use graphene_arch::{mmu, trap};
    use graphene_pal::intc::{self, IRQ_TIMER, IRQ_VECTOR_BASE};
    use graphene_pal::timer;
    use spin::Once;
    use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
    use x86_64::PrivilegeLevel;

    use crate::objects;
    use crate::sched;
    use crate::task;
    use crate::vm::fault::{handle_page_fault, FaultInfo};

    static IDT: Once<InterruptDescriptorTable> = Once::new();

    /// Whether the interrupted context was ring 3.
    fn from_user(frame: &InterruptStackFrame) -> bool {
        frame.code_segment.0 & 3 == 3
    }

    /// Kill the faulting process and hand the CPU to someone else.
    fn terminate_current(what: &str) -> ! {
        let proc = sched::current_process();
        let pid = objects::with_process(proc, |p| p.pid).unwrap_or(0);
        log::error!("{} in pid {}: terminating process", what, pid);
        task::destroy_process(proc, -1);
        sched::schedule();
        unreachable!("thread of a terminated process resumed");
    }

    macro_rules! exception {
        ($name:ident, $label:expr) => {
            extern "x86-interrupt" fn $name(frame: InterruptStackFrame) {
                if from_user(&frame) {
                    terminate_current($label);
                }
                panic!("{} in kernel mode at {:#x}", $label, frame.instruction_pointer.as_u64());
            }
        };
    }

    macro_rules! exception_with_code {
        ($name:ident, $label:expr) => {
            extern "x86-interrupt" fn $name(frame: InterruptStackFrame, code: u64) {
                if from_user(&frame) {
                    terminate_current($label);
                }
                panic!(
                    "{} (code {:#x}) in kernel mode at {:#x}",
                    $label,
                    code,
                    frame.instruction_pointer.as_u64()
                );
            }
        };
    }

    exception!(divide_error, "divide error");
    exception!(debug_exception, "debug exception");
    exception!(overflow, "overflow");
    exception!(bound_range, "bound range exceeded");
    exception!(invalid_opcode, "invalid opcode");
    exception!(device_not_available, "device not available");
    exception!(simd_error, "SIMD floating-point exception");
    exception!(virtualization, "virtualization exception");
    exception_with_code!(invalid_tss, "invalid TSS");
    exception_with_code!(segment_not_present, "segment not present");
    exception_with_code!(stack_fault, "stack-segment fault");
    exception_with_code!(general_protection, "general protection fault");
    exception_with_code!(alignment_check, "alignment check");
    exception_with_code!(control_protection, "control protection exception");

    extern "x86-interrupt" fn breakpoint(frame: InterruptStackFrame) {
        // Non-fatal in both modes; just note it.
        log::warn!("breakpoint at {:#x}", frame.instruction_pointer.as_u64());
    }

    extern "x86-interrupt" fn non_maskable(_frame: InterruptStackFrame) {
        log::error!("non-maskable interrupt");
    }

    extern "x86-interrupt" fn double_fault(frame: InterruptStackFrame, code: u64) -> ! {
        panic!(
            "double fault (code {:#x}) at {:#x}",
            code,
            frame.instruction_pointer.as_u64()
        );
    }

    extern "x86-interrupt" fn machine_check(frame: InterruptStackFrame) -> ! {
        panic!(
            "machine check at {:#x}",
            frame.instruction_pointer.as_u64()
        );
    }

    extern "x86-interrupt" fn page_fault(frame: InterruptStackFrame, code: PageFaultErrorCode) {
        let vaddr = mmu::fault_address();
        let info = FaultInfo::from_error_code(code.bits());

        if from_user(&frame) {
            let proc = sched::current_process();
            let handled = objects::with_process(proc, |p| {
                handle_page_fault(&p.aspace, vaddr, info)
            })
            .unwrap_or(false);
            if handled {
                return;
            }
            let pid = objects::with_process(proc, |p| p.pid).unwrap_or(0);
            log::error!(
                "page fault in pid {}: addr {:#x} (write={} fetch={}): terminating",
                pid,
                vaddr,
                info.write,
                info.instruction_fetch
            );
            task::destroy_process(proc, -1);
            sched::schedule();
            unreachable!("thread of a terminated process resumed");
        }

        panic!(
            "kernel page fault: addr {:#x} rip {:#x} (present={} write={})",
            vaddr,
            frame.instruction_pointer.as_u64(),
            info.present,
            info.write
        );
    }

    /// Scheduler tick.
    extern "x86-interrupt" fn timer_interrupt(_frame: InterruptStackFrame) {
        timer::on_tick();
        let preempt = sched::tick();
        intc::active_controller().eoi(IRQ_TIMER);
        if preempt {
            sched::schedule();
        }
    }

    macro_rules! hw_irq {
        ($name:ident, $line:expr) => {
            extern "x86-interrupt" fn $name(_frame: InterruptStackFrame) {
                crate::irq::handle_hw_irq($line);
            }
        };
    }

    hw_irq!(hw_irq_1, 1);
    hw_irq!(hw_irq_2, 2);
    hw_irq!(hw_irq_3, 3);
    hw_irq!(hw_irq_4, 4);
    hw_irq!(hw_irq_5, 5);
    hw_irq!(hw_irq_6, 6);
    hw_irq!(hw_irq_7, 7);
    hw_irq!(hw_irq_8, 8);
    hw_irq!(hw_irq_9, 9);
    hw_irq!(hw_irq_10, 10);
    hw_irq!(hw_irq_11, 11);
    hw_irq!(hw_irq_12, 12);
    hw_irq!(hw_irq_13, 13);
    hw_irq!(hw_irq_14, 14);
    hw_irq!(hw_irq_15, 15);

    /// Build and load the IDT.
    pub fn init() {
        let idt = IDT.call_once(|| {
            let mut idt = InterruptDescriptorTable::new();

            idt.divide_error.set_handler_fn(divide_error);
            idt.debug.set_handler_fn(debug_exception);
            idt.non_maskable_interrupt.set_handler_fn(non_maskable);
            idt.breakpoint.set_handler_fn(breakpoint);
            idt.overflow.set_handler_fn(overflow);
            idt.bound_range_exceeded.set_handler_fn(bound_range);
            idt.invalid_opcode.set_handler_fn(invalid_opcode);
            idt.device_not_available.set_handler_fn(device_not_available);
            idt.invalid_tss.set_handler_fn(invalid_tss);
            idt.segment_not_present.set_handler_fn(segment_not_present);
            idt.stack_segment_fault.set_handler_fn(stack_fault);
            idt.general_protection_fault.set_handler_fn(general_protection);
            idt.page_fault.set_handler_fn(page_fault);
            idt.alignment_check.set_handler_fn(alignment_check);
            idt.machine_check.set_handler_fn(machine_check);
            idt.simd_floating_point.set_handler_fn(simd_error);
            idt.virtualization.set_handler_fn(virtualization);
            idt.cp_protection_exception.set_handler_fn(control_protection);

            // Double fault runs on its own IST stack.
            unsafe {
                idt.double_fault
                    .set_handler_fn(double_fault)
                    .set_stack_index(0);
            }

            // Timer and the fifteen deliverable lines.
            idt[IRQ_VECTOR_BASE].set_handler_fn(timer_interrupt);
            idt[IRQ_VECTOR_BASE + 1].set_handler_fn(hw_irq_1);
            idt[IRQ_VECTOR_BASE + 2].set_handler_fn(hw_irq_2);
            idt[IRQ_VECTOR_BASE + 3].set_handler_fn(hw_irq_3);
            idt[IRQ_VECTOR_BASE + 4].set_handler_fn(hw_irq_4);
            idt[IRQ_VECTOR_BASE + 5].set_handler_fn(hw_irq_5);
            idt[IRQ_VECTOR_BASE + 6].set_handler_fn(hw_irq_6);
            idt[IRQ_VECTOR_BASE + 7].set_handler_fn(hw_irq_7);
            idt[IRQ_VECTOR_BASE + 8].set_handler_fn(hw_irq_8);
            idt[IRQ_VECTOR_BASE + 9].set_handler_fn(hw_irq_9);
            idt[IRQ_VECTOR_BASE + 10].set_handler_fn(hw_irq_10);
            idt[IRQ_VECTOR_BASE + 11].set_handler_fn(hw_irq_11);
            idt[IRQ_VECTOR_BASE + 12].set_handler_fn(hw_irq_12);
            idt[IRQ_VECTOR_BASE + 13].set_handler_fn(hw_irq_13);
            idt[IRQ_VECTOR_BASE + 14].set_handler_fn(hw_irq_14);
            idt[IRQ_VECTOR_BASE + 15].set_handler_fn(hw_irq_15);

            // Syscall gate: naked trap-frame stub, callable from ring 3.
            unsafe {
                idt[graphene_syscall::SYSCALL_VECTOR]
                    .set_handler_addr(x86_64::VirtAddr::new(trap::syscall_entry as usize as u64))
                    .set_privilege_level(PrivilegeLevel::Ring3);
            }

            idt
        });

        idt.load();
        log::info!("IDT loaded ({} exception vectors, 16 IRQ lines, syscall gate)", 19);
    }
}

#[cfg(target_os = "none")]
pub use idt::init;

/// Hosted builds have no IDT; kernel logic is tested without it.
#[cfg(not(target_os = "none"))]
pub fn init() {}
