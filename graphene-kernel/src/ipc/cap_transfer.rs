//! Capability transfer through IPC
//!
//! A message names up to four slots in the sender's table. At delivery
//! each is looked up, requiring the Grant right (a single failure
//! aborts the whole transfer), attenuated by the message's grant mask, and
//! inserted into the first free slot of the receiver's table. If the
//! receiver's table fills part-way, the slots already inserted are
//! rolled back.

use graphene_cap::{CapError, CapSlot, ObjRef, Rights};
use graphene_syscall::{Message, MSG_MAX_CAPS};

use crate::cap;
use crate::objects;

/// Transfer the capabilities named by `msg` from `sender_proc` to
/// `receiver_proc`.
///
/// On success returns the receiver-side slot indices (parallel to
/// `msg.cap_slots()`), for rewriting into the delivered message.
pub fn transfer(
    sender_proc: ObjRef,
    receiver_proc: ObjRef,
    msg: &Message,
) -> Result<[u32; MSG_MAX_CAPS], CapError> {
    let count = msg.cap_slots().len();
    let grant_mask = Rights::from_bits(msg.header.grant_mask);
    let mut new_slots = [0u32; MSG_MAX_CAPS];

    if count == 0 {
        return Ok(new_slots);
    }

    // Phase 1: validate every source slot before moving anything.
    let mut sources: [CapSlot; MSG_MAX_CAPS] = [CapSlot::empty(); MSG_MAX_CAPS];
    for (i, &src_index) in msg.cap_slots().iter().enumerate() {
        sources[i] = cap::lookup(sender_proc, src_index as usize, None, Rights::GRANT)?;
    }

    // Phase 2: insert attenuated copies, rolling back on failure.
    for i in 0..count {
        let attenuated = sources[i].attenuated(grant_mask);
        let inserted = objects::with_process(receiver_proc, |p| p.cap_table.insert(attenuated))
            .ok_or(CapError::Stale)
            .and_then(|r| r);

        match inserted {
            Ok(index) => {
                objects::inc_ref(attenuated.obj());
                new_slots[i] = index as u32;
            }
            Err(e) => {
                for &done in new_slots.iter().take(i) {
                    let removed = objects::with_process(receiver_proc, |p| {
                        p.cap_table.remove(done as usize)
                    });
                    if let Some(Ok(slot)) = removed {
                        objects::unref(slot.obj());
                    }
                }
                return Err(e);
            }
        }
    }

    Ok(new_slots)
}
