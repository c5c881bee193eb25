//! GDT, TSS, and segment selectors
//!
//! One GDT with kernel and user code/data segments plus a TSS. The TSS
//! ring-0 stack pointer ([`set_kernel_stack`]) is switched to the
//! incoming thread's kernel stack on every context switch, so ring-3 to
//! ring-0 transitions always land on the running thread's own stack.

use core::sync::atomic::{AtomicU16, Ordering};

use spin::Once;
use x86_64::instructions::tables::load_tss;
use x86_64::registers::segmentation::{Segment, CS, DS, ES, SS};
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

use crate::sync::IrqSpinMutex;

/// Boot stack used before the first thread runs (also the double-fault
/// IST stack).
const BOOT_STACK_SIZE: usize = 0x10000;

#[repr(align(0x1000))]
struct BootStack([u8; BOOT_STACK_SIZE]);

static BOOT_STACK: BootStack = BootStack([0; BOOT_STACK_SIZE]);

static TSS: IrqSpinMutex<TaskStateSegment> = IrqSpinMutex::new(TaskStateSegment::new());
static GDT: Once<GlobalDescriptorTable> = Once::new();

static KERNEL_CS: AtomicU16 = AtomicU16::new(0);
static KERNEL_DS: AtomicU16 = AtomicU16::new(0);
static USER_CS: AtomicU16 = AtomicU16::new(0);
static USER_DS: AtomicU16 = AtomicU16::new(0);

/// Kernel code selector. Valid after [`init`].
#[must_use]
pub fn kernel_code_selector() -> SegmentSelector {
    SegmentSelector(KERNEL_CS.load(Ordering::Relaxed))
}

/// Kernel data selector. Valid after [`init`].
#[must_use]
pub fn kernel_data_selector() -> SegmentSelector {
    SegmentSelector(KERNEL_DS.load(Ordering::Relaxed))
}

/// User code selector (RPL 3). Valid after [`init`].
#[must_use]
pub fn user_code_selector() -> SegmentSelector {
    SegmentSelector(USER_CS.load(Ordering::Relaxed))
}

/// User data selector (RPL 3). Valid after [`init`].
#[must_use]
pub fn user_data_selector() -> SegmentSelector {
    SegmentSelector(USER_DS.load(Ordering::Relaxed))
}

/// Initialise the GDT and TSS and load both.
///
/// Must be called once, early, before interrupts are enabled.
#[cfg(target_os = "none")]
pub fn init() {
    let boot_stack_top =
        BOOT_STACK.0.as_ptr() as u64 + BOOT_STACK_SIZE as u64;

    {
        let mut tss = TSS.lock();
        // RSP0: stack the CPU switches to on ring 3 -> ring 0. Replaced
        // per-thread by set_kernel_stack().
        tss.privilege_stack_table[0] = VirtAddr::new(boot_stack_top);
        // IST1: dedicated double-fault stack.
        tss.interrupt_stack_table[0] = VirtAddr::new(boot_stack_top);
    }

    let gdt = GDT.call_once(|| {
        let mut gdt = GlobalDescriptorTable::new();
        let kernel_cs = gdt.append(Descriptor::kernel_code_segment());
        let kernel_ds = gdt.append(Descriptor::kernel_data_segment());
        // SAFETY: The TSS is 'static; the pointer stays valid.
        let tss_sel = gdt.append(Descriptor::tss_segment(unsafe { &*TSS.data_ptr() }));
        let user_ds = gdt.append(Descriptor::user_data_segment());
        let user_cs = gdt.append(Descriptor::user_code_segment());

        KERNEL_CS.store(kernel_cs.0, Ordering::Relaxed);
        KERNEL_DS.store(kernel_ds.0, Ordering::Relaxed);
        USER_CS.store(user_cs.0, Ordering::Relaxed);
        USER_DS.store(user_ds.0, Ordering::Relaxed);
        TSS_SELECTOR.store(tss_sel.0, Ordering::Relaxed);
        gdt
    });

    gdt.load();

    // SAFETY: The selectors were just placed in the loaded GDT.
    unsafe {
        CS::set_reg(kernel_code_selector());
        DS::set_reg(kernel_data_selector());
        ES::set_reg(kernel_data_selector());
        SS::set_reg(kernel_data_selector());
        load_tss(SegmentSelector(TSS_SELECTOR.load(Ordering::Relaxed)));
    }

    log::debug!(
        "GDT loaded: kcs={:#x} kds={:#x} ucs={:#x} uds={:#x}",
        KERNEL_CS.load(Ordering::Relaxed),
        KERNEL_DS.load(Ordering::Relaxed),
        USER_CS.load(Ordering::Relaxed),
        USER_DS.load(Ordering::Relaxed),
    );
}

#[cfg(not(target_os = "none"))]
pub fn init() {}

static TSS_SELECTOR: AtomicU16 = AtomicU16::new(0);

/// Point the TSS ring-0 stack at `stack_top`.
///
/// Called on every context switch with the incoming thread's kernel
/// stack top.
#[inline]
pub fn set_kernel_stack(stack_top: u64) {
    let mut tss = TSS.lock();
    tss.privilege_stack_table[0] = VirtAddr::new(stack_top);
}
