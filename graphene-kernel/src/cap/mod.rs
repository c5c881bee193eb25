//! Capability space operations
//!
//! The `graphene-cap` crate holds the pure slot-table model; this
//! module binds it to the live object arena: lookups validate the
//! referenced object's generation and destruction flag, insertions and
//! deletions maintain reference counts, and revocation invalidates the
//! object itself so every other table's capabilities die with it.

use graphene_cap::{CapError, CapSlot, ObjRef, ObjectType, Rights};
use graphene_syscall::SysError;

use crate::objects::{self, ObjectData};

/// Funnel a capability error into the stable syscall enumeration.
///
/// (A `From` impl is impossible here: both types live in other crates.)
#[must_use]
pub fn to_sys_error(e: CapError) -> SysError {
    match e {
        CapError::InvalidIndex | CapError::EmptySlot | CapError::Stale => {
            SysError::InvalidCapability
        }
        CapError::SlotOccupied => SysError::InvalidArgument,
        CapError::InsufficientRights => SysError::PermissionDenied,
        CapError::TypeMismatch => SysError::TypeMismatch,
        CapError::TableFull => SysError::TableFull,
        CapError::OutOfMemory => SysError::OutOfMemory,
    }
}

/// Look up a capability in `proc`'s table.
///
/// Enforces, in order: slot in range and used; the referenced object is
/// live (not destroyed, generations match, refcount positive); the type
/// matches `expected` when given; the slot carries every right in
/// `required`. Type mismatch and missing rights are distinct errors.
pub fn lookup(
    proc: ObjRef,
    slot_index: usize,
    expected: Option<ObjectType>,
    required: Rights,
) -> Result<CapSlot, CapError> {
    let slot = objects::with_process(proc, |p| p.cap_table.get(slot_index).copied())
        .ok_or(CapError::Stale)??;

    if !objects::is_live(slot.obj(), slot.generation()) {
        return Err(CapError::Stale);
    }
    if let Some(t) = expected {
        if slot.otype() != t {
            return Err(CapError::TypeMismatch);
        }
    }
    if !slot.has_rights(required) {
        return Err(CapError::InsufficientRights);
    }
    Ok(slot)
}

/// Allocate a new object and install a capability for it in the first
/// free slot of `proc`'s table.
///
/// Returns the chosen slot index.
pub fn install_new_object(
    proc: ObjRef,
    data: ObjectData,
    rights: Rights,
) -> Result<usize, CapError> {
    let obj = objects::alloc(data).ok_or(CapError::OutOfMemory)?;
    match install_existing(proc, obj, rights) {
        Ok(index) => Ok(index),
        Err(e) => {
            // Nothing references the fresh object; reclaim it.
            objects::inc_ref(obj);
            objects::unref(obj);
            Err(e)
        }
    }
}

/// Install a capability to an existing live object into the first free
/// slot, bumping its refcount.
pub fn install_existing(proc: ObjRef, obj: ObjRef, rights: Rights) -> Result<usize, CapError> {
    let header = objects::header(obj).ok_or(CapError::Stale)?;
    if header.destroyed {
        return Err(CapError::Stale);
    }
    let slot = CapSlot::new(obj, header.otype, rights, header.generation);

    let index = objects::with_process(proc, |p| p.cap_table.insert(slot))
        .ok_or(CapError::Stale)??;
    objects::inc_ref(obj);
    Ok(index)
}

/// Duplicate `src` into `dst` with rights reduced by `mask`.
///
/// The source must be live; the new capability references the same
/// object, so its refcount grows.
pub fn copy(proc: ObjRef, src: usize, dst: usize, mask: Rights) -> Result<(), CapError> {
    // Validate liveness first so a stale capability cannot be
    // propagated even with matching slots.
    let slot = lookup(proc, src, None, Rights::NONE)?;

    objects::with_process(proc, |p| p.cap_table.copy(src, dst, mask))
        .ok_or(CapError::Stale)??;
    objects::inc_ref(slot.obj());
    Ok(())
}

/// Remove the capability in `slot_index`, dropping its object
/// reference.
pub fn delete(proc: ObjRef, slot_index: usize) -> Result<(), CapError> {
    let slot = objects::with_process(proc, |p| p.cap_table.remove(slot_index))
        .ok_or(CapError::Stale)??;
    objects::unref(slot.obj());
    Ok(())
}

/// Revoke through `slot_index`: invalidate the object (generation bump
/// + destroyed), then clear the slot.
///
/// Every other capability referencing the object, in any table, now
/// fails lookup without being visited.
pub fn revoke(proc: ObjRef, slot_index: usize) -> Result<(), CapError> {
    let slot = objects::with_process(proc, |p| p.cap_table.remove(slot_index))
        .ok_or(CapError::Stale)??;
    objects::invalidate(slot.obj());
    objects::unref(slot.obj());
    Ok(())
}

/// Type tag and rights of the capability in `slot_index` (validated
/// against the live object).
pub fn info(proc: ObjRef, slot_index: usize) -> Result<(ObjectType, Rights), CapError> {
    let slot = lookup(proc, slot_index, None, Rights::NONE)?;
    Ok((slot.otype(), slot.rights()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::endpoint::Endpoint;
    use crate::task::process::{Process, ProcessFlags};
    use crate::vm::AddressSpace;
    use alloc::boxed::Box;

    fn make_process(name: &str) -> ObjRef {
        let p = Process::new(99, name, AddressSpace::kernel_space(), ObjRef::NULL, ProcessFlags::NONE);
        let r = objects::alloc(ObjectData::Process(Box::new(p))).expect("arena slot");
        objects::inc_ref(r);
        r
    }

    fn make_endpoint_cap(proc: ObjRef, rights: Rights) -> usize {
        install_new_object(
            proc,
            ObjectData::Endpoint(Box::new(Endpoint::new(false))),
            rights,
        )
        .expect("endpoint capability")
    }

    #[test]
    fn test_lookup_distinguishes_type_and_rights() {
        let p = make_process("lookup-test");
        let slot = make_endpoint_cap(p, Rights::SEND);

        // Wrong type is TypeMismatch, not a rights failure.
        assert_eq!(
            lookup(p, slot, Some(ObjectType::Memory), Rights::NONE),
            Err(CapError::TypeMismatch)
        );
        // Right type, missing right.
        assert_eq!(
            lookup(p, slot, Some(ObjectType::IpcEndpoint), Rights::HANDLE),
            Err(CapError::InsufficientRights)
        );
        // Right type, held right.
        assert!(lookup(p, slot, Some(ObjectType::IpcEndpoint), Rights::SEND).is_ok());
        // Out-of-range and empty slots are their own errors.
        assert_eq!(lookup(p, 100_000, None, Rights::NONE), Err(CapError::InvalidIndex));
        assert_eq!(lookup(p, slot + 1, None, Rights::NONE), Err(CapError::EmptySlot));
    }

    #[test]
    fn test_copy_attenuates_and_delete_restores_count() {
        let p = make_process("copy-test");
        let src = make_endpoint_cap(p, Rights::ALL);
        let used_before = objects::with_process(p, |pr| pr.cap_table.used_count()).unwrap();

        copy(p, src, 7, Rights::SEND).expect("copy");
        let copied = lookup(p, 7, None, Rights::NONE).expect("copied slot");
        assert_eq!(copied.rights(), Rights::SEND);

        delete(p, 7).expect("delete");
        let used_after = objects::with_process(p, |pr| pr.cap_table.used_count()).unwrap();
        assert_eq!(used_before, used_after);
        assert!(lookup(p, src, None, Rights::NONE).is_ok(), "source survives");
    }

    #[test]
    fn test_revoke_kills_every_copy_everywhere() {
        let p1 = make_process("revoker");
        let p2 = make_process("victim");

        let slot = make_endpoint_cap(p1, Rights::ALL);
        let obj = lookup(p1, slot, None, Rights::NONE).expect("slot").obj();

        // A copy in the same table and a capability in another table.
        copy(p1, slot, 4, Rights::ALL).expect("same-table copy");
        let foreign = install_existing(p2, obj, Rights::SEND).expect("foreign cap");

        revoke(p1, slot).expect("revoke");

        // Every other capability is now stale: without its table
        // having been touched.
        assert_eq!(lookup(p1, 4, None, Rights::NONE), Err(CapError::Stale));
        assert_eq!(lookup(p2, foreign, None, Rights::NONE), Err(CapError::Stale));
    }

    #[test]
    fn test_delete_to_zero_reclaims_object() {
        let p = make_process("reclaim-test");
        let slot = make_endpoint_cap(p, Rights::ALL);
        let obj = lookup(p, slot, None, Rights::NONE).expect("slot").obj();

        delete(p, slot).expect("delete");
        // The arena slot was released; the reference is dead.
        assert!(objects::header(obj).is_none());
    }
}
