//! Channels
//!
//! A channel is a pair of endpoints cross-referenced as partners, with
//! an optional shared memory object. Creating one allocates both
//! endpoints and the channel object; the channel holds a reference on
//! each endpoint.

use alloc::boxed::Box;

use graphene_cap::{CapError, ObjRef};

use crate::objects::{self, ChannelObject, ObjectData};

use super::endpoint::Endpoint;

/// Create a channel: two partnered endpoints plus the channel object.
///
/// `shared_mem` may be null. Returns
/// `(channel, endpoint_a, endpoint_b)`.
pub fn create(
    async_mode: bool,
    shared_mem: ObjRef,
) -> Result<(ObjRef, ObjRef, ObjRef), CapError> {
    let a = objects::alloc(ObjectData::Endpoint(Box::new(Endpoint::new(async_mode))))
        .ok_or(CapError::OutOfMemory)?;
    let b = match objects::alloc(ObjectData::Endpoint(Box::new(Endpoint::new(async_mode)))) {
        Some(b) => b,
        None => {
            objects::inc_ref(a);
            objects::unref(a);
            return Err(CapError::OutOfMemory);
        }
    };

    objects::with_endpoint(a, |ep| ep.partner = b);
    objects::with_endpoint(b, |ep| ep.partner = a);

    let chan = match objects::alloc(ObjectData::Channel(ChannelObject {
        a,
        b,
        shared_mem,
    })) {
        Some(c) => c,
        None => {
            objects::inc_ref(a);
            objects::unref(a);
            objects::inc_ref(b);
            objects::unref(b);
            return Err(CapError::OutOfMemory);
        }
    };

    // The channel holds one reference on each endpoint.
    objects::inc_ref(a);
    objects::inc_ref(b);
    if shared_mem.is_valid() {
        objects::inc_ref(shared_mem);
    }

    Ok((chan, a, b))
}

/// Close both sides of a channel, waking every queued thread.
pub fn close(chan: ObjRef) {
    let Some(pair) = objects::with_channel(chan, |c| (c.a, c.b)) else {
        return;
    };
    super::endpoint::close(pair.0);
    super::endpoint::close(pair.1);
}
