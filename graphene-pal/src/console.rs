//! Serial console (16550 UART at COM1)
//!
//! Used for kernel logs and panic output only; user I/O goes through
//! drivers. The panic path calls [`puts`] directly, bypassing every
//! lock except the transmit-ready poll.

use core::fmt;

use graphene_arch::port::{in_port, out_port, PortWidth};

/// COM1 base port.
const COM1: u16 = 0x3F8;

/// Line-status register offset.
const LSR: u16 = 5;

/// LSR bit: transmit holding register empty.
const LSR_THRE: u32 = 1 << 5;

/// Initialise COM1: 115200 baud, 8N1, FIFOs on.
pub fn init() {
    // SAFETY: Standard 16550 programming sequence on the COM1 range.
    unsafe {
        out_port(COM1 + 1, 0x00, PortWidth::Byte); // disable interrupts
        out_port(COM1 + 3, 0x80, PortWidth::Byte); // DLAB on
        out_port(COM1, 0x01, PortWidth::Byte); // divisor low: 115200
        out_port(COM1 + 1, 0x00, PortWidth::Byte); // divisor high
        out_port(COM1 + 3, 0x03, PortWidth::Byte); // 8N1, DLAB off
        out_port(COM1 + 2, 0xC7, PortWidth::Byte); // FIFO on, clear, 14-byte
        out_port(COM1 + 4, 0x0B, PortWidth::Byte); // DTR | RTS | OUT2
    }
}

/// Write one byte, waiting for the transmitter.
pub fn putc(byte: u8) {
    // SAFETY: Polling LSR and writing THR on COM1.
    unsafe {
        while in_port(COM1 + LSR, PortWidth::Byte) & LSR_THRE == 0 {
            core::hint::spin_loop();
        }
        out_port(COM1, u32::from(byte), PortWidth::Byte);
    }
}

/// Write a string, expanding `\n` to `\r\n`.
pub fn puts(s: &str) {
    for byte in s.bytes() {
        if byte == b'\n' {
            putc(b'\r');
        }
        putc(byte);
    }
}

/// `core::fmt::Write` adapter for the console.
pub struct ConsoleWriter;

impl fmt::Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        puts(s);
        Ok(())
    }
}
