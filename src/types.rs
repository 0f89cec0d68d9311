//! Core data model: actors, op ids, object ids, keys, values and op types.

use std::cmp::Ordering;
use std::convert::TryFrom;
use std::fmt;

use smol_str::SmolStr;

/// A replica identifier. Stored as raw bytes, printed/parsed as lowercase hex.
#[derive(Clone, Eq, PartialEq, Hash, Default)]
pub struct ActorId(Vec<u8>);

impl ActorId {
    pub fn from_hex(s: &str) -> Result<Self, crate::error::AutomergeError> {
        hex::decode(s)
            .map(ActorId)
            .map_err(|_| crate::error::AutomergeError::InvalidActorId(s.to_owned()))
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        ActorId(bytes.into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex_string(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorId({})", self.to_hex_string())
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_string())
    }
}

impl PartialOrd for ActorId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ActorId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

/// The SHA-256 hash of a change's canonical encoding.
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ChangeHash(pub [u8; 32]);

impl fmt::Debug for ChangeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Display for ChangeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl TryFrom<&[u8]> for ChangeHash {
    type Error = crate::error::AutomergeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != 32 {
            return Err(crate::error::AutomergeError::MalformedData(
                "change hash must be exactly 32 bytes".into(),
            ));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(ChangeHash(arr))
    }
}

/// An op id: a Lamport timestamp `(counter, actor)`.
///
/// `actor` is an index into whatever actor table is in scope (a change's
/// local table while decoding, or the document's global, sorted actor table
/// once merged). The document keeps its actor table sorted by `ActorId` so
/// that comparing indices here is equivalent to comparing the actor ids
/// themselves, which is what the Lamport order requires.
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord, Debug)]
pub struct OpId {
    pub counter: u64,
    pub actor: usize,
}

impl OpId {
    pub fn new(counter: u64, actor: usize) -> Self {
        OpId { counter, actor }
    }

    /// `true` if `other` is `self` advanced by `delta` on the same actor.
    /// Used to detect the consecutive-op-id runs that drive multi-insert
    /// coalescing.
    pub fn delta(&self, other: &Self, delta: u64) -> bool {
        self.actor == other.actor && self.counter + delta == other.counter
    }

    pub fn increment_by(&self, by: u64) -> Self {
        OpId::new(self.counter + by, self.actor)
    }
}

/// The id of an object: either the root map, or the op id of the `make*` op
/// that created it.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum ObjId {
    Root,
    Id(OpId),
}

impl ObjId {
    pub fn is_root(&self) -> bool {
        matches!(self, ObjId::Root)
    }

    pub fn opid(&self) -> Option<OpId> {
        match self {
            ObjId::Root => None,
            ObjId::Id(id) => Some(*id),
        }
    }
}

/// Ops are ordered first by the object they touch. `Root` sorts lowest, then
/// by `(counter, actor)` of the creating op — the ordering the block store's
/// `last_object` comparisons rely on.
impl PartialOrd for ObjId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ObjId::Root, ObjId::Root) => Ordering::Equal,
            (ObjId::Root, ObjId::Id(_)) => Ordering::Less,
            (ObjId::Id(_), ObjId::Root) => Ordering::Greater,
            (ObjId::Id(a), ObjId::Id(b)) => a.cmp(b),
        }
    }
}

/// An element id: either the `_head` sentinel or the op id of a list/text
/// element.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum ElemId {
    Head,
    Id(OpId),
}

impl ElemId {
    pub fn opid(&self) -> Option<OpId> {
        match self {
            ElemId::Head => None,
            ElemId::Id(id) => Some(*id),
        }
    }

    pub fn is_head(&self) -> bool {
        matches!(self, ElemId::Head)
    }
}

impl PartialOrd for ElemId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ElemId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ElemId::Head, ElemId::Head) => Ordering::Equal,
            (ElemId::Head, ElemId::Id(_)) => Ordering::Less,
            (ElemId::Id(_), ElemId::Head) => Ordering::Greater,
            (ElemId::Id(a), ElemId::Id(b)) => a.cmp(b),
        }
    }
}

/// The key an op targets: a map/table property name, or a list/text element
/// reference.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Key {
    Map(SmolStr),
    Seq(ElemId),
}

impl Key {
    pub fn head() -> Self {
        Key::Seq(ElemId::Head)
    }

    pub fn is_map_key(&self) -> bool {
        matches!(self, Key::Map(_))
    }

    pub fn as_map_key(&self) -> Option<&str> {
        match self {
            Key::Map(s) => Some(s.as_str()),
            Key::Seq(_) => None,
        }
    }

    pub fn as_elem_id(&self) -> Option<ElemId> {
        match self {
            Key::Map(_) => None,
            Key::Seq(eid) => Some(*eid),
        }
    }
}

/// The type of a container object.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum ObjType {
    Map,
    Table,
    List,
    Text,
}

impl ObjType {
    pub fn is_sequence(&self) -> bool {
        matches!(self, ObjType::List | ObjType::Text)
    }
}

impl fmt::Display for ObjType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjType::Map => "map",
            ObjType::Table => "table",
            ObjType::List => "list",
            ObjType::Text => "text",
        };
        write!(f, "{s}")
    }
}

/// A primitive value, tagged per the `valLen`/`valRaw` encoding used on the
/// wire. `Unknown` preserves forward-compatible reserved tags byte-for-byte.
#[derive(Clone, PartialEq, Debug)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    F64(f64),
    Str(SmolStr),
    Bytes(Vec<u8>),
    Counter(i64),
    Timestamp(i64),
    /// A reserved type tag (10-15) whose raw bytes we don't interpret.
    Unknown { type_tag: u8, bytes: Vec<u8> },
}

impl ScalarValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Int(i) => Some(*i),
            ScalarValue::Counter(i) => Some(*i),
            ScalarValue::Timestamp(i) => Some(*i),
            ScalarValue::Uint(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn is_counter(&self) -> bool {
        matches!(self, ScalarValue::Counter(_))
    }
}

/// The action an operation performs. Action codes are fixed by the wire
/// format, with make-operations occupying the even-numbered codes. `Link` is
/// schema-reserved: decoded/encoded/round-tripped but given no merge
/// semantics beyond ordinary overwrite.
#[derive(Clone, PartialEq, Debug)]
pub enum OpType {
    MakeMap,
    Set(ScalarValue),
    MakeList,
    Del,
    MakeText,
    Inc(i64),
    MakeTable,
    Link,
}

impl OpType {
    /// The action code written to the `action` column.
    pub fn action_code(&self) -> u64 {
        match self {
            OpType::MakeMap => 0,
            OpType::Set(_) => 1,
            OpType::MakeList => 2,
            OpType::Del => 3,
            OpType::MakeText => 4,
            OpType::Inc(_) => 5,
            OpType::MakeTable => 6,
            OpType::Link => 7,
        }
    }

    /// `true` for make-operations: their own op id becomes a fresh object id.
    pub fn is_make(&self) -> bool {
        self.action_code() % 2 == 0
    }

    pub fn obj_type(&self) -> Option<ObjType> {
        match self {
            OpType::MakeMap => Some(ObjType::Map),
            OpType::MakeList => Some(ObjType::List),
            OpType::MakeText => Some(ObjType::Text),
            OpType::MakeTable => Some(ObjType::Table),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&ScalarValue> {
        match self {
            OpType::Set(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opid_lamport_order() {
        let a = OpId::new(1, 0);
        let b = OpId::new(1, 1);
        let c = OpId::new(2, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn objid_root_sorts_first() {
        assert!(ObjId::Root < ObjId::Id(OpId::new(1, 0)));
    }

    #[test]
    fn actor_hex_round_trip() {
        let actor = ActorId::from_hex("01234567").unwrap();
        assert_eq!(actor.to_hex_string(), "01234567");
    }

    #[test]
    fn opid_delta_detects_consecutive_run() {
        let a = OpId::new(5, 2);
        let b = OpId::new(6, 2);
        assert!(a.delta(&b, 1));
        assert!(!a.delta(&b, 2));
    }
}
