//! Graphene kernel entry
//!
//! `_start` receives the boot-info pointer from the bootloader with
//! paging live, the direct map in place, and interrupts disabled. It
//! brings the subsystems up in dependency order, turns every boot
//! module into a user process, and hands the CPU to the scheduler.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod kernel_entry {
    use core::panic::PanicInfo;
    use core::sync::atomic::{AtomicBool, Ordering};

    use graphene_common::{BootInfo, BootModule, PhysAddr};
    use graphene_kernel::memory::layout::{USER_STACK_SIZE, USER_STACK_TOP};
    use graphene_kernel::memory::translate::phys_to_virt;
    use graphene_kernel::objects::{self, MemFlags, MemoryObject, ObjectData};
    use graphene_kernel::task::process::ProcessFlags;
    use graphene_kernel::task::thread::ThreadFlags;
    use graphene_kernel::vm::RegionFlags;
    use graphene_kernel::{interrupts, loader, logging, memory, sched, syscall, task};
    use graphene_pal::intc::{self, IRQ_TIMER};
    use graphene_pal::{console, timer};

    /// Kernel entry point.
    ///
    /// # Safety
    ///
    /// Called exactly once by the bootloader with a valid `BootInfo`
    /// pointer reachable through the active page tables.
    #[no_mangle]
    pub unsafe extern "C" fn _start(boot_info: *const BootInfo) -> ! {
        console::init();
        logging::init();

        // SAFETY: The bootloader hands us a live pointer.
        let boot_info = unsafe { &*boot_info };
        if !boot_info.is_valid() {
            panic!("boot info failed validation (magic/version)");
        }
        log::info!(
            "graphene booting: {} memory regions, {} modules, hhdm {:#x}",
            boot_info.memory_map.entry_count,
            boot_info.module_count,
            boot_info.hhdm_offset
        );
        if boot_info.framebuffer.is_valid() {
            log::info!(
                "framebuffer: {}x{} @{}bpp, pitch {}",
                boot_info.framebuffer.width,
                boot_info.framebuffer.height,
                boot_info.framebuffer.bpp,
                boot_info.framebuffer.pitch
            );
        }

        graphene_arch::gdt::init();
        interrupts::init();

        // SAFETY: Called once, before any allocation.
        unsafe { memory::init(boot_info) };
        objects::init();

        task::init();
        sched::init();

        intc::init();
        timer::init();
        syscall::init();

        let mut spawned: [graphene_cap::ObjRef; 16] = [graphene_cap::ObjRef::NULL; 16];
        let mut spawned_count = 0;
        for module in boot_info.modules() {
            match spawn_boot_module(module) {
                Ok(proc) => {
                    spawned[spawned_count] = proc;
                    spawned_count += 1;
                }
                Err(e) => log::error!("module '{}' failed to start: {:?}", module.name(), e),
            }
        }
        provision_boot_caps(&spawned[..spawned_count], boot_info);

        // The tick starts the moment the line opens.
        intc::active_controller().unmask(IRQ_TIMER);

        sched::start()
    }

    /// Errors from module bring-up.
    #[derive(Debug)]
    #[allow(dead_code)] // carried in log output only
    enum SpawnError {
        Task(task::TaskError),
        Load(loader::ElfLoadError),
        Vm(graphene_kernel::vm::VmError),
    }

    /// Build a user process from one boot module.
    fn spawn_boot_module(module: &BootModule) -> Result<graphene_cap::ObjRef, SpawnError> {
        log::info!(
            "loading module '{}' ({} KiB at {:#x})",
            module.name(),
            module.size / 1024,
            module.base.as_u64()
        );

        // The module's bytes sit in physical memory under the direct map.
        // SAFETY: The bootloader reserved this range; the memory map
        // marks it executable-and-modules, so the frame allocator will
        // not reuse it.
        let image = unsafe {
            core::slice::from_raw_parts(
                phys_to_virt(module.base).as_ptr::<u8>(),
                module.size as usize,
            )
        };

        let proc = task::create_process(module.name(), task::kernel_process(), ProcessFlags::INIT)
            .map_err(SpawnError::Task)?;

        let loaded = objects::with_process(proc, |p| loader::load_elf(&mut p.aspace, image))
            .expect("freshly created process vanished")
            .map_err(|e| {
                task::destroy_process(proc, -1);
                SpawnError::Load(e)
            })?;

        // A capability to the module's own image, so the process can
        // hand its binary onward through process_create.
        let image_obj = ObjectData::Memory(MemoryObject {
            base: module.base,
            length: module.size,
            flags: MemFlags::SHARED.with(MemFlags::CONTIGUOUS),
            mapping_count: 0,
        });
        if let Err(e) = graphene_kernel::cap::install_new_object(
            proc,
            image_obj,
            graphene_cap::Rights::READ.union(graphene_cap::Rights::GRANT),
        ) {
            log::warn!("module '{}': no image capability: {}", module.name(), e);
        }

        // Default stack + main thread.
        let stack_base = USER_STACK_TOP - USER_STACK_SIZE;
        objects::with_process(proc, |p| {
            p.aspace.map_region_alloc(
                stack_base,
                USER_STACK_SIZE,
                RegionFlags::READ
                    .with(RegionFlags::WRITE)
                    .with(RegionFlags::USER),
            )
        })
        .expect("freshly created process vanished")
        .map_err(|e| {
            task::destroy_process(proc, -1);
            SpawnError::Vm(e)
        })?;

        task::create_thread(
            proc,
            "main",
            loaded.entry,
            0,
            USER_STACK_TOP,
            ThreadFlags::NONE,
        )
        .map_err(SpawnError::Task)?;

        Ok(proc)
    }

    /// Hand the boot processes their initial authority.
    ///
    /// Consecutive modules are joined by a channel (each side gets its
    /// endpoint with Send/Handle/Grant), and the first module (by
    /// convention the input driver) receives the keyboard IRQ line,
    /// the PS/2 controller port range, and the framebuffer as a
    /// mappable device-memory object.
    fn provision_boot_caps(procs: &[graphene_cap::ObjRef], boot_info: &BootInfo) {
        use graphene_cap::Rights;
        use graphene_kernel::{cap, ipc, irq};

        let ep_rights = Rights::SEND.union(Rights::HANDLE).union(Rights::GRANT);

        for pair in procs.windows(2) {
            match ipc::channel::create(false, graphene_cap::ObjRef::NULL) {
                Ok((_chan, a, b)) => {
                    let left = cap::install_existing(pair[0], a, ep_rights);
                    let right = cap::install_existing(pair[1], b, ep_rights);
                    if left.is_err() || right.is_err() {
                        log::warn!("boot channel capabilities incomplete");
                    }
                }
                Err(e) => log::warn!("boot channel creation failed: {}", e),
            }
        }

        let Some(&first) = procs.first() else {
            return;
        };

        // Keyboard line (IRQ 1) and the PS/2 controller ports.
        match irq::create_irq_object(1) {
            Ok(irq_obj) => {
                if cap::install_existing(first, irq_obj, Rights::HANDLE).is_err() {
                    log::warn!("keyboard IRQ capability not installed");
                }
            }
            Err(e) => log::warn!("keyboard IRQ object: {:?}", e),
        }
        let ports = ObjectData::IoPort(graphene_kernel::objects::IoPortObject {
            start: 0x60,
            count: 5,
        });
        if cap::install_new_object(first, ports, Rights::READ.union(Rights::WRITE)).is_err() {
            log::warn!("PS/2 port capability not installed");
        }

        // The framebuffer as mappable device memory.
        if boot_info.framebuffer.is_valid() {
            let fb = ObjectData::Memory(MemoryObject {
                base: PhysAddr::new(boot_info.framebuffer.base),
                length: boot_info.framebuffer.size(),
                flags: MemFlags::DEVICE
                    .with(MemFlags::SHARED)
                    .with(MemFlags::CONTIGUOUS),
                mapping_count: 0,
            });
            if cap::install_new_object(first, fb, Rights::READ.union(Rights::WRITE)).is_err() {
                log::warn!("framebuffer capability not installed");
            }
        }
    }

    static PANICKING: AtomicBool = AtomicBool::new(false);

    /// Kernel panic: interrupts off, raw serial output, halt.
    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        let _ = graphene_arch::cpu::disable_interrupts();

        // A panic inside the panic path gets the minimal treatment.
        if PANICKING.swap(true, Ordering::SeqCst) {
            graphene_arch::cpu::halt();
        }

        use core::fmt::Write;
        let mut console = console::ConsoleWriter;
        let _ = writeln!(console, "\n*** KERNEL PANIC ***");
        let _ = writeln!(console, "{}", info);
        let _ = writeln!(console, "system halted");

        graphene_arch::cpu::halt();
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    // The kernel only runs on bare metal; hosted builds exist for the
    // test harness.
}
