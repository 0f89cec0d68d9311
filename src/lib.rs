//! A JSON-like CRDT document core: columnar change/document storage, causal
//! merge, and save/load.
//!
//! The crate exposes one mutable value type, [`Document`], and the types
//! needed to drive it: [`LocalChange`]/[`LocalOp`] to author a change,
//! [`Patch`]/[`patch::Edit`] to read back its effect, and [`AutomergeError`]
//! for the single error type every fallible operation returns.

mod block;
mod change_graph;
mod columnar;
mod doc;
mod error;
mod merge;
pub mod patch;
mod storage;
mod types;

pub use block::DEFAULT_MAX_OPS_PER_BLOCK;
pub use columnar::DecodeError;
pub use doc::{change_checksum, Document, LocalChange, LocalOp};
pub use error::AutomergeError;
pub use patch::Patch;
pub use types::{
    ActorId, ChangeHash, ElemId, Key, ObjId, ObjType, OpId, OpType, ScalarValue,
};
