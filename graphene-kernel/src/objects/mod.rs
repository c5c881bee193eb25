//! Kernel object arena
//!
//! All kernel objects live in one fixed free-list arena indexed by
//! [`ObjRef`] (index 0 is null). Each slot carries the object header
//! {type, refcount, generation, destroyed}; the generation persists
//! across slot reuse, so a stale reference can never alias a new
//! object. The payload is a tagged sum: every lookup validates the
//! tag up front.
//!
//! # Access model
//!
//! The arena lock ([`IrqSpinMutex`]) guards slot allocation, release,
//! and header updates. Payload access goes through the `with_*`
//! helpers, which resolve the payload pointer under the lock and then
//! run the closure outside it, so helpers may nest. This is sound under
//! the kernel's concurrency model: one CPU, objects are only reclaimed
//! at refcount zero, and every reference count is held for as long as
//! the referencing structure lives.
//!
//! [`IrqSpinMutex`]: graphene_arch::IrqSpinMutex

use alloc::boxed::Box;

use graphene_arch::IrqSpinMutex;
use graphene_cap::{ObjRef, ObjectHeader, ObjectType};
use graphene_common::PhysAddr;
use spin::Once;

use crate::ipc::endpoint::Endpoint;
use crate::irq::IrqObject;
use crate::task::process::Process;
use crate::task::thread::Thread;

/// Arena capacity (slot 0 is reserved as null).
pub const MAX_OBJECTS: usize = 1024;

// -- Simple object payloads

/// Physical memory object.
#[derive(Clone, Copy, Debug)]
pub struct MemoryObject {
    /// Physical base address.
    pub base: PhysAddr,
    /// Length in bytes.
    pub length: u64,
    /// Attribute flags.
    pub flags: MemFlags,
    /// Number of address spaces currently mapping this object.
    pub mapping_count: u32,
}

/// Memory object attribute flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct MemFlags(u8);

impl MemFlags {
    /// No attributes.
    pub const NONE: Self = Self(0);
    /// Device memory (uncached mappings).
    pub const DEVICE: Self = Self(1 << 0);
    /// Shareable between address spaces.
    pub const SHARED: Self = Self(1 << 1);
    /// DMA-capable.
    pub const DMA: Self = Self(1 << 2);
    /// Physically contiguous.
    pub const CONTIGUOUS: Self = Self(1 << 3);

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[allow(missing_docs)]
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[allow(missing_docs)]
    #[inline]
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// I/O-port range object: ports `[start, start + count)`.
#[derive(Clone, Copy, Debug)]
pub struct IoPortObject {
    /// First port.
    pub start: u16,
    /// Number of ports.
    pub count: u16,
}

impl IoPortObject {
    /// Check a port against the range.
    #[inline]
    #[must_use]
    pub const fn covers(&self, port: u16) -> bool {
        port >= self.start && (port as u32) < self.start as u32 + self.count as u32
    }
}

/// Device MMIO window object.
#[derive(Clone, Copy, Debug)]
pub struct DeviceMmioObject {
    /// Physical base.
    pub base: PhysAddr,
    /// Window length in bytes.
    pub length: u64,
}

/// Channel object: two endpoints cross-referenced as partners.
#[derive(Clone, Copy, Debug)]
pub struct ChannelObject {
    /// First endpoint.
    pub a: ObjRef,
    /// Second endpoint.
    pub b: ObjRef,
    /// Optional shared memory object.
    pub shared_mem: ObjRef,
}

/// Tagged payload union of every kernel object kind.
pub enum ObjectData {
    Memory(MemoryObject),
    Thread(Box<Thread>),
    Process(Box<Process>),
    Endpoint(Box<Endpoint>),
    Channel(ChannelObject),
    Irq(IrqObject),
    IoPort(IoPortObject),
    DeviceMmio(DeviceMmioObject),
}

impl ObjectData {
    /// Type tag of this payload.
    #[must_use]
    pub const fn otype(&self) -> ObjectType {
        match self {
            Self::Memory(_) => ObjectType::Memory,
            Self::Thread(_) => ObjectType::Thread,
            Self::Process(_) => ObjectType::Process,
            Self::Endpoint(_) => ObjectType::IpcEndpoint,
            Self::Channel(_) => ObjectType::IpcChannel,
            Self::Irq(_) => ObjectType::Irq,
            Self::IoPort(_) => ObjectType::IoPort,
            Self::DeviceMmio(_) => ObjectType::DeviceMmio,
        }
    }
}

/// One arena slot.
struct ArenaSlot {
    header: ObjectHeader,
    data: Option<ObjectData>,
    next_free: u32,
}

impl ArenaSlot {
    fn empty() -> Self {
        Self {
            header: ObjectHeader::new(ObjectType::None, 0),
            data: None,
            next_free: 0,
        }
    }
}

/// The arena.
pub struct ObjectTable {
    slots: Box<[ArenaSlot]>,
    free_head: u32,
    allocated: u32,
}

impl ObjectTable {
    fn new() -> Self {
        let mut slots: Box<[ArenaSlot]> = (0..MAX_OBJECTS).map(|_| ArenaSlot::empty()).collect();
        for i in 1..MAX_OBJECTS - 1 {
            slots[i].next_free = (i + 1) as u32;
        }
        slots[MAX_OBJECTS - 1].next_free = 0;

        Self {
            slots,
            free_head: 1,
            allocated: 0,
        }
    }

    /// Allocate a slot for `data`. The slot's generation sequence
    /// continues from its previous life.
    pub fn alloc(&mut self, data: ObjectData) -> Option<ObjRef> {
        if self.free_head == 0 {
            return None;
        }
        let index = self.free_head;
        let otype = data.otype();
        let slot = &mut self.slots[index as usize];
        self.free_head = slot.next_free;

        let generation = slot.header.generation.wrapping_add(1);
        slot.header = ObjectHeader::new(otype, generation);
        slot.data = Some(data);
        self.allocated += 1;
        Some(ObjRef::from_index(index))
    }

    fn slot(&self, r: ObjRef) -> Option<&ArenaSlot> {
        let index = r.index() as usize;
        if index == 0 || index >= MAX_OBJECTS {
            return None;
        }
        let slot = &self.slots[index];
        slot.data.as_ref()?;
        Some(slot)
    }

    fn slot_mut(&mut self, r: ObjRef) -> Option<&mut ArenaSlot> {
        let index = r.index() as usize;
        if index == 0 || index >= MAX_OBJECTS {
            return None;
        }
        let slot = &mut self.slots[index];
        slot.data.as_ref()?;
        Some(slot)
    }

    /// Release a slot, dropping its payload. The generation stays, so
    /// stale references to the old object keep failing.
    fn release(&mut self, r: ObjRef) {
        let index = r.index() as usize;
        if index == 0 || index >= MAX_OBJECTS || self.slots[index].data.is_none() {
            return;
        }
        let old_head = self.free_head;
        let slot = &mut self.slots[index];
        slot.data = None;
        slot.header.otype = ObjectType::None;
        slot.next_free = old_head;
        self.free_head = index as u32;
        self.allocated -= 1;
    }

    /// Number of live objects.
    #[must_use]
    pub fn allocated(&self) -> u32 {
        self.allocated
    }
}

static OBJECT_TABLE: Once<IrqSpinMutex<ObjectTable>> = Once::new();

fn table() -> &'static IrqSpinMutex<ObjectTable> {
    OBJECT_TABLE.call_once(|| IrqSpinMutex::new(ObjectTable::new()))
}

/// Initialise the arena (idempotent).
pub fn init() {
    let _ = table();
    log::debug!("object arena initialised with {} slots", MAX_OBJECTS - 1);
}

/// Allocate a new kernel object. `None` when the arena is exhausted.
pub fn alloc(data: ObjectData) -> Option<ObjRef> {
    table().lock().alloc(data)
}

/// Copy of an object's header.
#[must_use]
pub fn header(r: ObjRef) -> Option<ObjectHeader> {
    table().lock().slot(r).map(|s| s.header)
}

/// An object's type tag.
#[must_use]
pub fn otype(r: ObjRef) -> Option<ObjectType> {
    header(r).map(|h| h.otype)
}

/// Check a capability generation against the object.
#[must_use]
pub fn is_live(r: ObjRef, cap_generation: u32) -> bool {
    header(r).is_some_and(|h| h.is_live_for(cap_generation) && h.refcount > 0)
}

/// Increment an object's refcount.
pub fn inc_ref(r: ObjRef) {
    if let Some(slot) = table().lock().slot_mut(r) {
        slot.header.refcount = slot.header.refcount.saturating_add(1);
    }
}

/// Decrement an object's refcount; release the slot when it reaches
/// zero. Returns `true` if the object was reclaimed.
pub fn unref(r: ObjRef) -> bool {
    let mut guard = table().lock();
    let Some(slot) = guard.slot_mut(r) else {
        return false;
    };
    slot.header.refcount = slot.header.refcount.saturating_sub(1);
    if slot.header.refcount == 0 {
        guard.release(r);
        return true;
    }
    false
}

/// Invalidate an object: bump its generation and mark it destroyed.
/// Every capability referencing it anywhere is now stale.
pub fn invalidate(r: ObjRef) {
    if let Some(slot) = table().lock().slot_mut(r) {
        slot.header.invalidate();
    }
}

/// Live objects in the arena.
#[must_use]
pub fn allocated_count() -> u32 {
    table().lock().allocated()
}

// -- Payload accessors
//
// Each helper resolves the payload pointer under the arena lock and
// runs the closure outside it. Sound on one CPU because a payload is
// only dropped at refcount zero, and callers hold (directly or through
// the structure they traversed from) a reference that keeps the count
// positive for the duration of the call.

macro_rules! accessor {
    ($name:ident, $variant:ident, $ty:ty, $deref:expr) => {
        #[doc = concat!("Run `f` against the `", stringify!($variant), "` payload of `r`.")]
        #[doc = ""]
        #[doc = "Returns `None` on a null/stale reference or a type mismatch."]
        pub fn $name<R>(r: ObjRef, f: impl FnOnce(&mut $ty) -> R) -> Option<R> {
            let ptr: *mut $ty = {
                let mut guard = table().lock();
                let slot = guard.slot_mut(r)?;
                match slot.data.as_mut()? {
                    ObjectData::$variant(inner) => $deref(inner),
                    _ => return None,
                }
            };
            // SAFETY: See the module-level access model.
            Some(f(unsafe { &mut *ptr }))
        }
    };
}

fn boxed_ptr<T>(b: &mut Box<T>) -> *mut T {
    core::ptr::from_mut::<T>(&mut **b)
}

fn inline_ptr<T>(v: &mut T) -> *mut T {
    core::ptr::from_mut::<T>(v)
}

accessor!(with_thread, Thread, Thread, boxed_ptr);
accessor!(with_process, Process, Process, boxed_ptr);
accessor!(with_endpoint, Endpoint, Endpoint, boxed_ptr);
accessor!(with_memory, Memory, MemoryObject, inline_ptr);
accessor!(with_channel, Channel, ChannelObject, inline_ptr);
accessor!(with_irq, Irq, IrqObject, inline_ptr);
accessor!(with_ioport, IoPort, IoPortObject, inline_ptr);
accessor!(with_mmio, DeviceMmio, DeviceMmioObject, inline_ptr);
