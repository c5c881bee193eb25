//! Boot Handoff Protocol
//!
//! The structure the bootloader passes to the kernel entry point. The
//! layout is fixed (`#[repr(C)]`) so bootloader and kernel can be built
//! separately.
//!
//! The kernel consumes: the memory map, the higher-half direct-map
//! (HHDM) offset, the framebuffer descriptor, and any loadable modules
//! (user ELF images with a command-line string taken as the module
//! name).

use crate::addr::PhysAddr;
use crate::memory::MemoryMap;

/// Magic number for boot info validation: "GRPHBOOT" as little-endian u64.
pub const BOOT_INFO_MAGIC: u64 = 0x544F_4F42_4850_5247;

/// Boot info version for compatibility checking.
pub const BOOT_INFO_VERSION: u32 = 3;

/// Maximum number of memory regions supported.
pub const MAX_MEMORY_REGIONS: usize = 64;

/// Maximum number of loadable modules.
pub const MAX_MODULES: usize = 16;

/// Maximum module command-line length, including the NUL terminator.
pub const MODULE_CMDLINE_LEN: usize = 64;

/// Framebuffer descriptor.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct FramebufferInfo {
    /// Physical base address of the framebuffer.
    pub base: u64,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per row.
    pub pitch: u32,
    /// Bits per pixel.
    pub bpp: u32,
}

impl FramebufferInfo {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            base: 0,
            width: 0,
            height: 0,
            pitch: 0,
            bpp: 0,
        }
    }

    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.base != 0 && self.width != 0 && self.height != 0
    }

    /// Total framebuffer size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.pitch as u64 * self.height as u64
    }
}

/// A loadable module: a file the bootloader placed in memory for the
/// kernel, with a NUL-terminated command line used as its name.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct BootModule {
    /// Physical address of the module data.
    pub base: PhysAddr,
    /// Size of the module in bytes.
    pub size: u64,
    /// NUL-terminated command line.
    pub cmdline: [u8; MODULE_CMDLINE_LEN],
}

impl BootModule {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            base: PhysAddr::new(0),
            size: 0,
            cmdline: [0; MODULE_CMDLINE_LEN],
        }
    }

    #[must_use]
    pub const fn is_valid(&self) -> bool {
        !self.base.is_null() && self.size != 0
    }

    /// The command line up to the first NUL, as a str if valid UTF-8.
    #[must_use]
    pub fn name(&self) -> &str {
        let len = self
            .cmdline
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MODULE_CMDLINE_LEN);
        core::str::from_utf8(&self.cmdline[..len]).unwrap_or("<module>")
    }
}

/// Boot information passed from the bootloader to the kernel.
#[derive(Debug)]
#[repr(C)]
pub struct BootInfo {
    /// Magic number (must be [`BOOT_INFO_MAGIC`]).
    pub magic: u64,
    /// Structure version (must be [`BOOT_INFO_VERSION`]).
    pub version: u32,
    /// Reserved for alignment.
    pub _reserved: u32,
    /// Higher-half direct-map offset: adding this to a physical address
    /// yields a kernel-reachable virtual address for all RAM.
    pub hhdm_offset: u64,
    /// Physical address of the active top-level page table.
    pub page_table_root: PhysAddr,
    /// Physical address where the kernel image was loaded.
    pub kernel_phys_base: PhysAddr,
    /// Kernel image size in bytes.
    pub kernel_size: u64,
    /// The memory map.
    pub memory_map: MemoryMap,
    /// Framebuffer descriptor (may be empty).
    pub framebuffer: FramebufferInfo,
    /// Number of valid modules.
    pub module_count: u32,
    /// Reserved for alignment.
    pub _reserved2: u32,
    /// Loadable modules.
    pub modules: [BootModule; MAX_MODULES],
}

impl BootInfo {
    /// Check magic and version.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.magic == BOOT_INFO_MAGIC && self.version == BOOT_INFO_VERSION
    }

    /// Iterate over the valid modules.
    pub fn modules(&self) -> impl Iterator<Item = &BootModule> {
        self.modules[..self.module_count as usize]
            .iter()
            .filter(|m| m.is_valid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_name() {
        let mut m = BootModule::empty();
        m.cmdline[..5].copy_from_slice(b"shell");
        assert_eq!(m.name(), "shell");
    }

    #[test]
    fn test_framebuffer_size() {
        let fb = FramebufferInfo {
            base: 0xE000_0000,
            width: 1024,
            height: 768,
            pitch: 4096,
            bpp: 32,
        };
        assert!(fb.is_valid());
        assert_eq!(fb.size(), 4096 * 768);
    }
}
