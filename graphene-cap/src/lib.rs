//! # graphene-cap
//!
//! The capability model: unforgeable slot-table entries tying an object
//! reference to a rights mask and a generation number.
//!
//! A capability is live if and only if the referenced object is not
//! destroyed and the capability's generation equals the object's.
//! Revoking an object bumps its generation, which invalidates every
//! capability referencing it, in every table, without visiting them.
//!
//! This crate holds the pure data model: [`Rights`], [`ObjectType`],
//! [`ObjRef`], [`ObjectHeader`], [`CapSlot`], and the 1024-slot
//! [`CapTable`] with its used bitmap and free-slot hint. Validation
//! against live objects, reference counting, and object storage are the
//! kernel's job; everything here runs unchanged on the host for tests.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

mod error;
mod object;
mod rights;
mod slot;
mod table;

pub use error::{CapError, CapResult};
pub use object::{ObjRef, ObjectHeader, ObjectType};
pub use rights::Rights;
pub use slot::CapSlot;
pub use table::{CapTable, CAP_TABLE_SLOTS};
