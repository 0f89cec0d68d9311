//! On-disk/wire representations.
//!
//! `chunk` is the outer self-delimiting container; `change` and `document`
//! are the two columnar payloads a chunk can carry.

pub(crate) mod change;
pub(crate) mod chunk;
pub(crate) mod document;
