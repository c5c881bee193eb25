//! Interrupt controllers
//!
//! Two EOI-capable controllers behind one trait: the legacy 8259 PIC
//! pair (the default) and the local APIC reached through the direct
//! map. The kernel talks only to [`InterruptController`]; which one is
//! active is decided once at boot.
//!
//! IRQ lines are numbered 0..16 the PC way; vectors are remapped to
//! 0x20..0x30 so they never collide with CPU exceptions.

use graphene_arch::port::{in_port, out_port, PortWidth};
use graphene_arch::IrqSpinMutex;

/// First vector the hardware lines are remapped to.
pub const IRQ_VECTOR_BASE: u8 = 0x20;

/// Number of legacy IRQ lines.
pub const IRQ_LINES: usize = 16;

/// The timer line (owned by the scheduler, never user-deliverable).
pub const IRQ_TIMER: u8 = 0;

/// An EOI-capable interrupt controller.
pub trait InterruptController: Send + Sync {
    /// Disable delivery of one line.
    fn mask(&self, irq: u8);
    /// Enable delivery of one line.
    fn unmask(&self, irq: u8);
    /// Signal end-of-interrupt for one line.
    fn eoi(&self, irq: u8);
}

// -- Legacy 8259 PIC pair

const PIC1_CMD: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_CMD: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;
const PIC_EOI: u32 = 0x20;

/// The chained 8259 pair.
pub struct LegacyPic {
    masks: IrqSpinMutex<[u8; 2]>,
}

impl LegacyPic {
    /// Create the driver with every line masked.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            masks: IrqSpinMutex::new([0xFF, 0xFF]),
        }
    }

    /// Remap both PICs to [`IRQ_VECTOR_BASE`] and mask every line.
    pub fn init(&self) {
        // SAFETY: Standard 8259 initialisation sequence.
        unsafe {
            // ICW1: init + ICW4 expected
            out_port(PIC1_CMD, 0x11, PortWidth::Byte);
            out_port(PIC2_CMD, 0x11, PortWidth::Byte);
            // ICW2: vector offsets
            out_port(PIC1_DATA, u32::from(IRQ_VECTOR_BASE), PortWidth::Byte);
            out_port(PIC2_DATA, u32::from(IRQ_VECTOR_BASE) + 8, PortWidth::Byte);
            // ICW3: cascade wiring
            out_port(PIC1_DATA, 0x04, PortWidth::Byte);
            out_port(PIC2_DATA, 0x02, PortWidth::Byte);
            // ICW4: 8086 mode
            out_port(PIC1_DATA, 0x01, PortWidth::Byte);
            out_port(PIC2_DATA, 0x01, PortWidth::Byte);
            // Mask everything; lines open individually via unmask().
            out_port(PIC1_DATA, 0xFB, PortWidth::Byte); // cascade stays open
            out_port(PIC2_DATA, 0xFF, PortWidth::Byte);
        }
        *self.masks.lock() = [0xFB, 0xFF];
    }

    fn write_mask(&self, irq: u8, set: bool) {
        if irq as usize >= IRQ_LINES {
            return;
        }
        let mut masks = self.masks.lock();
        let (chip, bit) = if irq < 8 { (0, irq) } else { (1, irq - 8) };
        if set {
            masks[chip] |= 1 << bit;
        } else {
            masks[chip] &= !(1 << bit);
        }
        let port = if chip == 0 { PIC1_DATA } else { PIC2_DATA };
        // SAFETY: Writing the interrupt-mask register.
        unsafe { out_port(port, u32::from(masks[chip]), PortWidth::Byte) };
    }
}

impl Default for LegacyPic {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController for LegacyPic {
    fn mask(&self, irq: u8) {
        self.write_mask(irq, true);
    }

    fn unmask(&self, irq: u8) {
        self.write_mask(irq, false);
    }

    fn eoi(&self, irq: u8) {
        // SAFETY: Non-specific EOI; slave first for lines ≥ 8.
        unsafe {
            if irq >= 8 {
                out_port(PIC2_CMD, PIC_EOI, PortWidth::Byte);
            }
            out_port(PIC1_CMD, PIC_EOI, PortWidth::Byte);
        }
    }
}

// -- Local APIC

/// EOI register offset in the local APIC MMIO window.
const LAPIC_EOI: usize = 0xB0;

/// Local APIC, reached through the higher-half direct map.
///
/// Line masking for APIC-routed interrupts lives in the I/O APIC
/// redirection table; this driver keeps the legacy PIC's mask interface
/// by deferring line masking to the PIC while owning EOI.
pub struct LocalApic {
    /// Virtual base of the APIC register window.
    base: u64,
    /// Legacy PIC used for line-level masking.
    pic: LegacyPic,
}

impl LocalApic {
    /// Create a driver over a mapped APIC register window.
    ///
    /// # Safety
    ///
    /// `virt_base` must map the local APIC registers, uncached, for the
    /// lifetime of the kernel.
    #[must_use]
    pub const unsafe fn new(virt_base: u64) -> Self {
        Self {
            base: virt_base,
            pic: LegacyPic::new(),
        }
    }

    fn write_reg(&self, offset: usize, value: u32) {
        // SAFETY: Offset within the APIC window per construction.
        unsafe {
            core::ptr::write_volatile((self.base as usize + offset) as *mut u32, value);
        }
    }
}

impl InterruptController for LocalApic {
    fn mask(&self, irq: u8) {
        self.pic.mask(irq);
    }

    fn unmask(&self, irq: u8) {
        self.pic.unmask(irq);
    }

    fn eoi(&self, _irq: u8) {
        self.write_reg(LAPIC_EOI, 0);
    }
}

// -- Active controller selection

static LEGACY: LegacyPic = LegacyPic::new();

/// Initialise the default (legacy PIC) controller.
pub fn init() {
    LEGACY.init();
    log::info!("interrupt controller: legacy 8259 pair, vectors {:#x}..", IRQ_VECTOR_BASE);
}

/// The controller the kernel drives.
#[must_use]
pub fn active_controller() -> &'static dyn InterruptController {
    &LEGACY
}
