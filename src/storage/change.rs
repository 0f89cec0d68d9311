//! Change body encode/decode and the change-op column schema: the
//! `pred`-bearing form ops take inside a single change, as opposed to the
//! `succ`-bearing doc-op form of `storage::document`.
//!
//! A change carries its own local actor table (author at index 0) and its
//! ops reference that table's indices, not the document's global one.

use smol_str::SmolStr;

use crate::columnar::column::{self, change_meta_cols, op_cols, RawColumn};
use crate::columnar::encoding::{
    BooleanDecoder, BooleanEncoder, DecodeError, Decoder, DeltaDecoder, DeltaEncoder, Decodable,
    Encodable, RleDecoder, RleEncoder,
};
use crate::columnar::value::{ValueReader, ValueWriter};
use crate::error::AutomergeError;
use crate::storage::chunk::{self, ChunkType};
use crate::types::{ActorId, ChangeHash, ElemId, Key, ObjId, OpId, OpType, ScalarValue};

/// One op as it appears inside a change: actor indices are local to this
/// change's `actors` table, and the op carries `pred` (ops it overwrites)
/// rather than `succ` (which is only known once merged into a document).
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ChangeOp {
    pub(crate) obj: ObjId,
    pub(crate) key: Key,
    pub(crate) insert: bool,
    pub(crate) action: OpType,
    pub(crate) pred: Vec<OpId>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Change {
    pub(crate) actors: Vec<ActorId>,
    pub(crate) seq: u64,
    pub(crate) start_op: u64,
    pub(crate) time: i64,
    pub(crate) message: Option<String>,
    pub(crate) deps: Vec<ChangeHash>,
    pub(crate) ops: Vec<ChangeOp>,
    pub(crate) extra_bytes: Vec<u8>,
}

impl Change {
    pub(crate) fn actor(&self) -> &ActorId {
        &self.actors[0]
    }

    pub(crate) fn max_op(&self) -> u64 {
        self.start_op + self.ops.len() as u64 - 1
    }

    /// Encodes the change body then wraps it in container framing, returning
    /// the bytes and the resulting hash.
    pub(crate) fn encode(&self) -> (Vec<u8>, ChangeHash) {
        let body = self.encode_body();
        let wire = chunk::write_chunk(ChunkType::Change, &body);
        let hash = chunk::hash(ChunkType::Change, &body);
        (wire, hash)
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_actor_id(&mut out, &self.actors[0]);
        write_uleb(&mut out, self.seq);
        write_uleb(&mut out, self.start_op);
        write_sleb(&mut out, self.time);
        write_string(&mut out, self.message.as_deref().unwrap_or(""));
        write_uleb(&mut out, (self.actors.len() - 1) as u64);
        for actor in &self.actors[1..] {
            write_actor_id(&mut out, actor);
        }
        let mut deps = self.deps.clone();
        deps.sort_by(|a, b| a.0.cmp(&b.0));
        write_uleb(&mut out, deps.len() as u64);
        for dep in &deps {
            out.extend_from_slice(&dep.0);
        }
        let cols = encode_change_ops(&self.ops);
        write_uleb(&mut out, cols.len() as u64);
        for col in &cols {
            write_uleb(&mut out, col.id as u64);
            write_bytes(&mut out, &col.data);
        }
        out.extend_from_slice(&self.extra_bytes);
        out
    }

    /// Parses a container chunk and, if it is a change chunk, its body.
    pub(crate) fn decode(wire: &[u8]) -> Result<(Self, ChangeHash), AutomergeError> {
        let parsed = chunk::parse_chunk(wire)?;
        if parsed.chunk_type != ChunkType::Change {
            return Err(AutomergeError::MalformedData(
                "expected a change chunk".to_string(),
            ));
        }
        let change = Self::decode_body(parsed.body)?;
        Ok((change, parsed.hash))
    }

    fn decode_body(body: &[u8]) -> Result<Self, AutomergeError> {
        let mut dec = Decoder::new(body);
        let author = read_actor_id(&mut dec)?;
        let seq: u64 = dec.read().map_err(AutomergeError::Decode)?;
        let start_op: u64 = dec.read().map_err(AutomergeError::Decode)?;
        let time: i64 = dec.read().map_err(AutomergeError::Decode)?;
        let message_bytes: Vec<u8> = dec.read().map_err(AutomergeError::Decode)?;
        let message = if message_bytes.is_empty() {
            None
        } else {
            Some(
                String::from_utf8(message_bytes)
                    .map_err(|_| AutomergeError::MalformedData("bad message utf8".to_string()))?,
            )
        };
        let num_actors: u64 = dec.read().map_err(AutomergeError::Decode)?;
        let mut actors = vec![author];
        for _ in 0..num_actors {
            actors.push(read_actor_id(&mut dec)?);
        }
        let num_deps: u64 = dec.read().map_err(AutomergeError::Decode)?;
        let mut deps = Vec::with_capacity(num_deps as usize);
        for _ in 0..num_deps {
            let raw = dec.read_bytes(32).map_err(AutomergeError::Decode)?;
            let mut arr = [0u8; 32];
            arr.copy_from_slice(raw);
            deps.push(ChangeHash(arr));
        }
        let num_cols: u64 = dec.read().map_err(AutomergeError::Decode)?;
        let mut cols = Vec::with_capacity(num_cols as usize);
        for _ in 0..num_cols {
            let id: u64 = dec.read().map_err(AutomergeError::Decode)?;
            let data: Vec<u8> = dec.read().map_err(AutomergeError::Decode)?;
            cols.push(RawColumn {
                id: id as u32,
                data,
            });
        }
        let cols = column::check_ascending(cols).map_err(AutomergeError::Decode)?;
        let ops = decode_change_ops(&cols)?;
        // Whatever's left after the declared columns is forward-compatible
        // padding a future writer might have appended, preserved byte-for-byte
        // so a round trip through an older reader doesn't silently drop it.
        let extra_bytes = dec.remaining().to_vec();
        Ok(Change {
            actors,
            seq,
            start_op,
            time,
            message,
            deps,
            ops,
            extra_bytes,
        })
    }
}

fn write_uleb(out: &mut Vec<u8>, v: u64) {
    v.encode(out).expect("write to Vec cannot fail");
}

fn write_sleb(out: &mut Vec<u8>, v: i64) {
    v.encode(out).expect("write to Vec cannot fail");
}

fn write_bytes(out: &mut Vec<u8>, v: &[u8]) {
    v.encode(out).expect("write to Vec cannot fail");
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    s.encode(out).expect("write to Vec cannot fail");
}

fn write_actor_id(out: &mut Vec<u8>, actor: &ActorId) {
    write_string(out, &actor.to_hex_string());
}

fn read_actor_id(dec: &mut Decoder<'_>) -> Result<ActorId, AutomergeError> {
    let s: String = dec.read().map_err(AutomergeError::Decode)?;
    ActorId::from_hex(&s)
}

/// Builds the change-op column set from a slice of ops, omitting any column
/// whose encoder produced nothing.
fn encode_change_ops(ops: &[ChangeOp]) -> Vec<RawColumn> {
    let mut obj_actor = RleEncoder::<u64>::new();
    let mut obj_ctr = RleEncoder::<u64>::new();
    let mut key_actor = RleEncoder::<u64>::new();
    let mut key_ctr = DeltaEncoder::new();
    let mut key_str = RleEncoder::<SmolStr>::new();
    let mut insert = BooleanEncoder::new();
    let mut action = RleEncoder::<u64>::new();
    let mut value = ValueWriter::new();
    let mut pred_num = RleEncoder::<u64>::new();
    let mut pred_actor = RleEncoder::<u64>::new();
    let mut pred_ctr = DeltaEncoder::new();

    for op in ops {
        match op.obj {
            ObjId::Root => {
                obj_actor.append_null();
                obj_ctr.append_null();
            }
            ObjId::Id(id) => {
                obj_actor.append_value(id.actor as u64);
                obj_ctr.append_value(id.counter);
            }
        }
        match &op.key {
            Key::Map(s) => {
                key_actor.append_null();
                key_ctr.append_null();
                key_str.append_value(s.clone());
            }
            Key::Seq(ElemId::Head) => {
                key_actor.append_null();
                key_ctr.append_null();
                key_str.append_null();
            }
            Key::Seq(ElemId::Id(id)) => {
                key_actor.append_value(id.actor as u64);
                key_ctr.append_value(id.counter as i64);
                key_str.append_null();
            }
        }
        insert.append(op.insert);
        action.append_value(op.action.action_code());
        let scalar = match &op.action {
            OpType::Set(v) => v.clone(),
            OpType::Inc(delta) => ScalarValue::Int(*delta),
            _ => ScalarValue::Null,
        };
        value.append(&scalar);
        pred_num.append_value(op.pred.len() as u64);
        for p in &op.pred {
            pred_actor.append_value(p.actor as u64);
            pred_ctr.append_value(p.counter as i64);
        }
    }

    let mut cols = Vec::new();
    push_col(&mut cols, op_cols::OBJ_ACTOR, obj_actor.finish());
    push_col(&mut cols, op_cols::OBJ_CTR, obj_ctr.finish());
    push_col(&mut cols, op_cols::KEY_ACTOR, key_actor.finish());
    push_col(&mut cols, op_cols::KEY_CTR, key_ctr.finish());
    push_col(&mut cols, op_cols::KEY_STR, key_str.finish());
    push_col(&mut cols, op_cols::INSERT, insert.finish());
    push_col(&mut cols, op_cols::ACTION, action.finish());
    let (val_len, val_raw) = value.finish();
    push_col(&mut cols, op_cols::VAL_LEN, val_len);
    push_col(&mut cols, op_cols::VAL_RAW, val_raw);
    push_col(&mut cols, op_cols::PRED_NUM, pred_num.finish());
    push_col(&mut cols, op_cols::PRED_ACTOR, pred_actor.finish());
    push_col(&mut cols, op_cols::PRED_CTR, pred_ctr.finish());
    cols.sort_by_key(|c| c.id);
    cols
}

/// Omits any column whose encoder produced nothing.
fn push_col(cols: &mut Vec<RawColumn>, id: u32, data: Vec<u8>) {
    if data.is_empty() {
        return;
    }
    cols.push(RawColumn { id, data });
}

fn decode_change_ops(cols: &[RawColumn]) -> Result<Vec<ChangeOp>, AutomergeError> {
    let action_col = column::find(cols, op_cols::ACTION);
    if action_col.is_empty() {
        return Ok(Vec::new());
    }
    let mut obj_actor = RleDecoder::<u64>::new(column::find(cols, op_cols::OBJ_ACTOR));
    let mut obj_ctr = RleDecoder::<u64>::new(column::find(cols, op_cols::OBJ_CTR));
    let mut key_actor = RleDecoder::<u64>::new(column::find(cols, op_cols::KEY_ACTOR));
    let mut key_ctr = DeltaDecoder::new(column::find(cols, op_cols::KEY_CTR));
    let mut key_str = RleDecoder::<SmolStr>::new(column::find(cols, op_cols::KEY_STR));
    let mut insert = BooleanDecoder::new(column::find(cols, op_cols::INSERT));
    let mut action = RleDecoder::<u64>::new(action_col);
    let mut value = ValueReader::new(
        column::find(cols, op_cols::VAL_LEN),
        column::find(cols, op_cols::VAL_RAW),
    );
    let mut pred_num = RleDecoder::<u64>::new(column::find(cols, op_cols::PRED_NUM));
    let mut pred_actor = RleDecoder::<u64>::new(column::find(cols, op_cols::PRED_ACTOR));
    let mut pred_ctr = DeltaDecoder::new(column::find(cols, op_cols::PRED_CTR));

    let mut ops = Vec::new();
    while let Some(action_code) = action.read_value().map_err(AutomergeError::Decode)? {
        let obj = match (
            obj_actor.read_value().map_err(AutomergeError::Decode)?,
            obj_ctr.read_value().map_err(AutomergeError::Decode)?,
        ) {
            (None, None) => ObjId::Root,
            (Some(a), Some(c)) => ObjId::Id(OpId::new(c, a as usize)),
            _ => return Err(AutomergeError::MismatchedRef),
        };
        let ka = key_actor.read_value().map_err(AutomergeError::Decode)?;
        let kc = key_ctr.read_value().map_err(AutomergeError::Decode)?;
        let ks = key_str.read_value().map_err(AutomergeError::Decode)?;
        let key = match (ka, kc, ks) {
            (None, None, Some(s)) => Key::Map(s),
            (None, None, None) => Key::head(),
            (Some(a), Some(c), None) => Key::Seq(ElemId::Id(OpId::new(c as u64, a as usize))),
            _ => return Err(AutomergeError::MismatchedRef),
        };
        let insert_flag = insert.read_value().map_err(AutomergeError::Decode)?;
        let value = value.read_value().map_err(AutomergeError::Decode)?;
        let num_pred = pred_num.read_value().map_err(AutomergeError::Decode)?.unwrap_or(0);
        let mut pred = Vec::with_capacity(num_pred as usize);
        for _ in 0..num_pred {
            let a = pred_actor
                .read_value()
                .map_err(AutomergeError::Decode)?
                .ok_or_else(|| AutomergeError::MalformedData("pred actor missing".to_string()))?;
            let c = pred_ctr
                .read_value()
                .map_err(AutomergeError::Decode)?
                .ok_or_else(|| AutomergeError::MalformedData("pred ctr missing".to_string()))?;
            pred.push(OpId::new(c as u64, a as usize));
        }
        let action = OpType::from_code(action_code, value)?;
        ops.push(ChangeOp {
            obj,
            key,
            insert: insert_flag,
            action,
            pred,
        });
    }
    Ok(ops)
}

impl OpType {
    /// Reconstructs an `OpType` from its decoded action code and value.
    pub(crate) fn from_code(code: u64, value: ScalarValue) -> Result<Self, AutomergeError> {
        Ok(match code {
            0 => OpType::MakeMap,
            1 => OpType::Set(value),
            2 => OpType::MakeList,
            3 => OpType::Del,
            4 => OpType::MakeText,
            5 => OpType::Inc(value.as_i64().ok_or_else(|| {
                AutomergeError::MalformedData("inc op with non-integer value".to_string())
            })?),
            6 => OpType::MakeTable,
            7 => OpType::Link,
            other => {
                return Err(AutomergeError::MalformedData(format!(
                    "unknown action code {other}"
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjId;

    fn actor(hex: &str) -> ActorId {
        ActorId::from_hex(hex).unwrap()
    }

    #[test]
    fn round_trips_a_simple_change() {
        let change = Change {
            actors: vec![actor("01234567")],
            seq: 1,
            start_op: 1,
            time: 1_700_000_000,
            message: Some("set x and y".to_string()),
            deps: vec![],
            ops: vec![
                ChangeOp {
                    obj: ObjId::Root,
                    key: Key::Map(SmolStr::from("x")),
                    insert: false,
                    action: OpType::Set(ScalarValue::Uint(3)),
                    pred: vec![],
                },
                ChangeOp {
                    obj: ObjId::Root,
                    key: Key::Map(SmolStr::from("y")),
                    insert: false,
                    action: OpType::Set(ScalarValue::Uint(4)),
                    pred: vec![],
                },
            ],
            extra_bytes: vec![],
        };
        let (wire, hash) = change.encode();
        let (decoded, decoded_hash) = Change::decode(&wire).unwrap();
        assert_eq!(decoded_hash, hash);
        assert_eq!(decoded.seq, 1);
        assert_eq!(decoded.start_op, 1);
        assert_eq!(decoded.message.as_deref(), Some("set x and y"));
        assert_eq!(decoded.ops.len(), 2);
        assert_eq!(decoded.ops[0].key, Key::Map(SmolStr::from("x")));
        assert_eq!(decoded.ops[0].action, OpType::Set(ScalarValue::Uint(3)));
    }

    #[test]
    fn round_trips_pred_and_object_refs() {
        let a = actor("01234567");
        let change = Change {
            actors: vec![a],
            seq: 2,
            start_op: 3,
            time: 0,
            message: None,
            deps: vec![],
            ops: vec![ChangeOp {
                obj: ObjId::Id(OpId::new(1, 0)),
                key: Key::Map(SmolStr::from("x")),
                insert: false,
                action: OpType::Set(ScalarValue::Uint(5)),
                pred: vec![OpId::new(1, 0)],
            }],
            extra_bytes: vec![],
        };
        let (wire, _) = change.encode();
        let (decoded, _) = Change::decode(&wire).unwrap();
        assert_eq!(decoded.ops[0].obj, ObjId::Id(OpId::new(1, 0)));
        assert_eq!(decoded.ops[0].pred, vec![OpId::new(1, 0)]);
    }

    #[test]
    fn extra_bytes_round_trip_for_forward_compatibility() {
        let change = Change {
            actors: vec![actor("01234567")],
            seq: 1,
            start_op: 1,
            time: 0,
            message: None,
            deps: vec![],
            ops: vec![ChangeOp {
                obj: ObjId::Root,
                key: Key::Map(SmolStr::from("x")),
                insert: false,
                action: OpType::Set(ScalarValue::Uint(1)),
                pred: vec![],
            }],
            extra_bytes: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let (wire, _) = change.encode();
        let (decoded, _) = Change::decode(&wire).unwrap();
        assert_eq!(decoded.extra_bytes, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(decoded.ops.len(), 1);
    }

    #[test]
    fn rejects_truncated_body() {
        let change = Change {
            actors: vec![actor("01234567")],
            seq: 1,
            start_op: 1,
            time: 0,
            message: None,
            deps: vec![],
            ops: vec![],
            extra_bytes: vec![],
        };
        let (mut wire, _) = change.encode();
        wire.truncate(wire.len() - 2);
        assert!(Change::decode(&wire).is_err());
    }
}
