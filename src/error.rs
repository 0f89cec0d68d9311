//! The single error type returned by every fallible public operation, with
//! lower-level decode failures folded in via `#[from]`.

use thiserror::Error;

use crate::types::{ActorId, ChangeHash, OpId};

#[derive(Error, Debug)]
pub enum AutomergeError {
    #[error("malformed data: {0}")]
    MalformedData(String),

    #[error(transparent)]
    Decode(#[from] crate::columnar::encoding::DecodeError),

    #[error("actor index {0} out of range for this change's actor table")]
    UnknownActor(usize),

    #[error("invalid actor id `{0}`")]
    InvalidActorId(String),

    #[error("mismatched reference: actor and counter must both be null or both be present")]
    MismatchedRef,

    #[error("reference not found: no element with id {0:?}")]
    ReferenceNotFound(OpId),

    #[error("dangling pred: op {0:?} claims to overwrite an op the merger could not find")]
    DanglingPred(OpId),

    #[error("duplicate op id {0:?} found in document")]
    DuplicateOpId(OpId),

    #[error("sequence gap for actor {actor}: expected {expected}, found {found}")]
    SeqGap {
        actor: ActorId,
        expected: u64,
        found: u64,
    },

    #[error("sequence {seq} reused for actor {actor} with a different hash")]
    SeqReuse { actor: ActorId, seq: u64 },

    #[error("local change with seq {seq} already applied for actor {actor}")]
    AlreadyApplied { actor: ActorId, seq: u64 },

    #[error("no change found for hash {0}")]
    UnknownHash(ChangeHash),

    #[error("invalid object id `{0}`")]
    InvalidObjId(String),
}

impl PartialEq for AutomergeError {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

pub type Result<T> = std::result::Result<T, AutomergeError>;
