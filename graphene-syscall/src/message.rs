//! IPC message wire format
//!
//! A message is a fixed-size structure: a header, up to four capability
//! slot references, and up to 256 bytes of inline payload. The kernel
//! copies messages between user buffers and kernel staging areas as raw
//! bytes; `zerocopy` provides the safe byte-level view.

use core::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Maximum inline payload, in bytes.
pub const MSG_MAX_PAYLOAD: usize = 256;

/// Maximum capability slot references per message.
pub const MSG_MAX_CAPS: usize = 4;

/// Message flag bits.
#[derive(Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(transparent)]
pub struct MessageFlags(u32);

impl MessageFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// This message is a reply to a pending call.
    pub const IS_REPLY: Self = Self(1 << 0);
    /// The sender expects a reply (call pattern).
    pub const WANTS_REPLY: Self = Self(1 << 1);
    /// Deliver ahead of non-urgent traffic (advisory).
    pub const URGENT: Self = Self(1 << 2);

    /// Create from raw bits (unknown bits are masked off).
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & 0x7)
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    #[must_use]
    pub const fn is_reply(self) -> bool {
        self.contains(Self::IS_REPLY)
    }

    #[inline]
    #[must_use]
    pub const fn wants_reply(self) -> bool {
        self.contains(Self::WANTS_REPLY)
    }
}

impl fmt::Debug for MessageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_set();
        if self.contains(Self::IS_REPLY) {
            list.entry(&"IsReply");
        }
        if self.contains(Self::WANTS_REPLY) {
            list.entry(&"WantsReply");
        }
        if self.contains(Self::URGENT) {
            list.entry(&"Urgent");
        }
        list.finish()
    }
}

/// Fixed message header.
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct MessageHeader {
    /// Payload bytes in use (≤ [`MSG_MAX_PAYLOAD`]).
    pub length: u16,
    /// Capability references in use (≤ [`MSG_MAX_CAPS`]).
    pub cap_count: u8,
    /// Rights mask applied to every transferred capability.
    pub grant_mask: u8,
    /// Application-defined tag.
    pub tag: u32,
    /// Message flags.
    pub flags: MessageFlags,
    /// Reserved; must be zero.
    pub _reserved: u32,
}

/// A complete IPC message as staged in kernel or user memory.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Message {
    /// Fixed header.
    pub header: MessageHeader,
    /// Capability slot references (first `cap_count` are valid).
    pub caps: [u32; MSG_MAX_CAPS],
    /// Inline payload (first `length` bytes are valid).
    pub payload: [u8; MSG_MAX_PAYLOAD],
}

// The wire size is ABI: 16-byte header + 16 bytes of cap refs + payload.
const _: () = assert!(core::mem::size_of::<MessageHeader>() == 16);
const _: () = assert!(core::mem::size_of::<Message>() == 16 + 16 + MSG_MAX_PAYLOAD);

impl Message {
    /// Create an empty message.
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            header: MessageHeader {
                length: 0,
                cap_count: 0,
                grant_mask: 0,
                tag: 0,
                flags: MessageFlags::NONE,
                _reserved: 0,
            },
            caps: [0; MSG_MAX_CAPS],
            payload: [0; MSG_MAX_PAYLOAD],
        }
    }

    /// Create a message carrying `data` (truncated to the payload limit).
    #[must_use]
    pub fn with_payload(tag: u32, data: &[u8]) -> Self {
        let mut msg = Self::empty();
        let len = data.len().min(MSG_MAX_PAYLOAD);
        msg.payload[..len].copy_from_slice(&data[..len]);
        msg.header.length = len as u16;
        msg.header.tag = tag;
        msg
    }

    /// Check the header's internal consistency.
    #[must_use]
    pub const fn is_well_formed(&self) -> bool {
        self.header.length as usize <= MSG_MAX_PAYLOAD
            && self.header.cap_count as usize <= MSG_MAX_CAPS
    }

    /// The valid portion of the payload.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        let len = (self.header.length as usize).min(MSG_MAX_PAYLOAD);
        &self.payload[..len]
    }

    /// The valid capability slot references.
    #[must_use]
    pub fn cap_slots(&self) -> &[u32] {
        let n = (self.header.cap_count as usize).min(MSG_MAX_CAPS);
        &self.caps[..n]
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("tag", &self.header.tag)
            .field("length", &self.header.length)
            .field("cap_count", &self.header.cap_count)
            .field("flags", &self.header.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_size() {
        assert_eq!(core::mem::size_of::<Message>(), 288);
    }

    #[test]
    fn test_payload_roundtrip() {
        let msg = Message::with_payload(7, b"PING");
        assert_eq!(msg.header.length, 4);
        assert_eq!(msg.data(), b"PING");
        assert_eq!(msg.header.tag, 7);
        assert!(msg.is_well_formed());
    }

    #[test]
    fn test_payload_truncation() {
        let big = [0xAAu8; MSG_MAX_PAYLOAD + 64];
        let msg = Message::with_payload(0, &big);
        assert_eq!(msg.header.length as usize, MSG_MAX_PAYLOAD);
    }

    #[test]
    fn test_malformed_header() {
        let mut msg = Message::empty();
        msg.header.cap_count = (MSG_MAX_CAPS + 1) as u8;
        assert!(!msg.is_well_formed());
    }

    #[test]
    fn test_flags() {
        let f = MessageFlags::WANTS_REPLY.with(MessageFlags::URGENT);
        assert!(f.wants_reply());
        assert!(!f.is_reply());
        assert_eq!(MessageFlags::from_bits(0xFFFF_FFFF).bits(), 0x7);
    }
}
