//! Document body encode/decode and the doc-op column schema: the
//! `succ`-bearing form ops take once merged into a document, as opposed to
//! the `pred`-bearing change-op form of `storage::change`.

use smol_str::SmolStr;

use crate::columnar::column::{self, op_cols, RawColumn};
use crate::columnar::encoding::{
    BooleanDecoder, BooleanEncoder, Decoder, DeltaDecoder, DeltaEncoder, Encodable, RleDecoder,
    RleEncoder,
};
use crate::columnar::value::{ValueReader, ValueWriter};
use crate::error::AutomergeError;
use crate::storage::chunk::{self, ChunkType};
use crate::types::{ActorId, ChangeHash, ElemId, Key, ObjId, OpId, OpType, ScalarValue};

/// One op as it's stored inside the document's block store: it carries its
/// own id and the set of `succ` ops that have overwritten it, rather than
/// the `pred` list a change-op carries.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct DocOp {
    pub(crate) id: OpId,
    pub(crate) obj: ObjId,
    pub(crate) key: Key,
    pub(crate) insert: bool,
    pub(crate) action: OpType,
    pub(crate) succ: Vec<OpId>,
}

/// Per-change metadata kept in a document body: enough to reconstruct a
/// change's header without re-decoding its ops.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ChangeMeta {
    pub(crate) actor: usize,
    pub(crate) seq: u64,
    pub(crate) max_op: u64,
    pub(crate) time: i64,
    pub(crate) message: Option<String>,
    pub(crate) deps: Vec<usize>,
    pub(crate) extra_bytes: Vec<u8>,
}

pub(crate) struct DocumentBody {
    pub(crate) actors: Vec<ActorId>,
    pub(crate) heads: Vec<ChangeHash>,
    pub(crate) changes: Vec<ChangeMeta>,
    pub(crate) ops: Vec<DocOp>,
}

impl DocumentBody {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.actors.len() as u64).encode_to_vec());
        for actor in &self.actors {
            out.extend_from_slice(&actor.to_hex_string().encode_to_vec());
        }
        out.extend_from_slice(&(self.heads.len() as u64).encode_to_vec());
        let mut heads = self.heads.clone();
        heads.sort_by(|a, b| a.0.cmp(&b.0));
        for h in &heads {
            out.extend_from_slice(&h.0);
        }
        let change_cols = encode_change_metas(&self.changes);
        out.extend_from_slice(&(change_cols.len() as u64).encode_to_vec());
        for col in &change_cols {
            out.extend_from_slice(&(col.id as u64).encode_to_vec());
            out.extend_from_slice(&col.data.encode_to_vec());
        }
        let ops_cols = encode_doc_ops(&self.ops);
        for col in &ops_cols {
            out.extend_from_slice(&(col.id as u64).encode_to_vec());
            out.extend_from_slice(&col.data.encode_to_vec());
        }
        out
    }

    pub(crate) fn encode_chunk(&self) -> Vec<u8> {
        chunk::write_chunk(ChunkType::Document, &self.encode())
    }

    pub(crate) fn decode(wire: &[u8]) -> Result<Self, AutomergeError> {
        let parsed = chunk::parse_chunk(wire)?;
        if parsed.chunk_type != ChunkType::Document {
            return Err(AutomergeError::MalformedData(
                "expected a document chunk".to_string(),
            ));
        }
        Self::decode_body(parsed.body)
    }

    fn decode_body(body: &[u8]) -> Result<Self, AutomergeError> {
        let mut dec = Decoder::new(body);
        let num_actors: u64 = dec.read().map_err(AutomergeError::Decode)?;
        let mut actors = Vec::with_capacity(num_actors as usize);
        for _ in 0..num_actors {
            let s: String = dec.read().map_err(AutomergeError::Decode)?;
            actors.push(ActorId::from_hex(&s)?);
        }
        let num_heads: u64 = dec.read().map_err(AutomergeError::Decode)?;
        let mut heads = Vec::with_capacity(num_heads as usize);
        for _ in 0..num_heads {
            let raw = dec.read_bytes(32).map_err(AutomergeError::Decode)?;
            let mut arr = [0u8; 32];
            arr.copy_from_slice(raw);
            heads.push(ChangeHash(arr));
        }
        let num_change_cols: u64 = dec.read().map_err(AutomergeError::Decode)?;
        let mut change_cols = Vec::with_capacity(num_change_cols as usize);
        for _ in 0..num_change_cols {
            let id: u64 = dec.read().map_err(AutomergeError::Decode)?;
            let data: Vec<u8> = dec.read().map_err(AutomergeError::Decode)?;
            change_cols.push(RawColumn {
                id: id as u32,
                data,
            });
        }
        let change_cols = column::check_ascending(change_cols).map_err(AutomergeError::Decode)?;
        let changes = decode_change_metas(&change_cols)?;

        let mut op_cols_raw = Vec::new();
        while !dec.done() {
            let id: u64 = dec.read().map_err(AutomergeError::Decode)?;
            let data: Vec<u8> = dec.read().map_err(AutomergeError::Decode)?;
            op_cols_raw.push(RawColumn {
                id: id as u32,
                data,
            });
        }
        let op_cols_raw = column::check_ascending(op_cols_raw).map_err(AutomergeError::Decode)?;
        let ops = decode_doc_ops(&op_cols_raw)?;

        Ok(DocumentBody {
            actors,
            heads,
            changes,
            ops,
        })
    }
}

trait EncodeToVec {
    fn encode_to_vec(&self) -> Vec<u8>;
}

impl EncodeToVec for u64 {
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut v = Vec::new();
        self.encode(&mut v).expect("write to Vec cannot fail");
        v
    }
}

impl EncodeToVec for str {
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut v = Vec::new();
        self.encode(&mut v).expect("write to Vec cannot fail");
        v
    }
}

impl EncodeToVec for String {
    fn encode_to_vec(&self) -> Vec<u8> {
        self.as_str().encode_to_vec()
    }
}

impl EncodeToVec for Vec<u8> {
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut v = Vec::new();
        self.encode(&mut v).expect("write to Vec cannot fail");
        v
    }
}

mod change_meta_codec {
    pub(crate) use crate::columnar::column::change_meta_cols::*;
}

fn encode_change_metas(changes: &[ChangeMeta]) -> Vec<RawColumn> {
    use change_meta_codec::*;
    let mut actor = RleEncoder::<u64>::new();
    let mut seq = DeltaEncoder::new();
    let mut max_op = DeltaEncoder::new();
    let mut time = DeltaEncoder::new();
    let mut message = RleEncoder::<SmolStr>::new();
    let mut deps_num = RleEncoder::<u64>::new();
    let mut deps_index = DeltaEncoder::new();
    let mut extra = ValueWriter::new();

    for c in changes {
        actor.append_value(c.actor as u64);
        seq.append_value(c.seq as i64);
        max_op.append_value(c.max_op as i64);
        time.append_value(c.time);
        match &c.message {
            Some(m) => message.append_value(SmolStr::from(m.as_str())),
            None => message.append_null(),
        }
        deps_num.append_value(c.deps.len() as u64);
        for d in &c.deps {
            deps_index.append_value(*d as i64);
        }
        extra.append(&ScalarValue::Bytes(c.extra_bytes.clone()));
    }

    let mut cols = Vec::new();
    push(&mut cols, ACTOR, actor.finish());
    push(&mut cols, SEQ, seq.finish());
    push(&mut cols, MAX_OP, max_op.finish());
    push(&mut cols, TIME, time.finish());
    push(&mut cols, MESSAGE, message.finish());
    push(&mut cols, DEPS_NUM, deps_num.finish());
    push(&mut cols, DEPS_INDEX, deps_index.finish());
    let (extra_len, extra_raw) = extra.finish();
    push(&mut cols, EXTRA_LEN, extra_len);
    push(&mut cols, EXTRA_RAW, extra_raw);
    cols.sort_by_key(|c| c.id);
    cols
}

fn decode_change_metas(cols: &[RawColumn]) -> Result<Vec<ChangeMeta>, AutomergeError> {
    use change_meta_codec::*;
    let seq_col = column::find(cols, SEQ);
    if seq_col.is_empty() {
        return Ok(Vec::new());
    }
    let mut actor = RleDecoder::<u64>::new(column::find(cols, ACTOR));
    let mut seq = DeltaDecoder::new(seq_col);
    let mut max_op = DeltaDecoder::new(column::find(cols, MAX_OP));
    let mut time = DeltaDecoder::new(column::find(cols, TIME));
    let mut message = RleDecoder::<SmolStr>::new(column::find(cols, MESSAGE));
    let mut deps_num = RleDecoder::<u64>::new(column::find(cols, DEPS_NUM));
    let mut deps_index = DeltaDecoder::new(column::find(cols, DEPS_INDEX));
    let mut extra = ValueReader::new(
        column::find(cols, EXTRA_LEN),
        column::find(cols, EXTRA_RAW),
    );

    let mut out = Vec::new();
    while let Some(s) = seq.read_value().map_err(AutomergeError::Decode)? {
        let a = actor
            .read_value()
            .map_err(AutomergeError::Decode)?
            .unwrap_or(0);
        let mo = max_op
            .read_value()
            .map_err(AutomergeError::Decode)?
            .unwrap_or(0);
        let t = time.read_value().map_err(AutomergeError::Decode)?.unwrap_or(0);
        let m = message.read_value().map_err(AutomergeError::Decode)?;
        let dn = deps_num
            .read_value()
            .map_err(AutomergeError::Decode)?
            .unwrap_or(0);
        let mut deps = Vec::with_capacity(dn as usize);
        for _ in 0..dn {
            let idx = deps_index
                .read_value()
                .map_err(AutomergeError::Decode)?
                .ok_or_else(|| AutomergeError::MalformedData("missing dep index".to_string()))?;
            deps.push(idx as usize);
        }
        let extra_bytes = match extra.read_value().map_err(AutomergeError::Decode)? {
            ScalarValue::Bytes(b) => b,
            ScalarValue::Null => Vec::new(),
            _ => Vec::new(),
        };
        out.push(ChangeMeta {
            actor: a as usize,
            seq: s as u64,
            max_op: mo as u64,
            time: t,
            message: m.map(|s: SmolStr| s.to_string()),
            deps,
            extra_bytes,
        });
    }
    Ok(out)
}

/// Builds the doc-op column set from a slice of ops, in document order.
pub(crate) fn encode_doc_ops(ops: &[DocOp]) -> Vec<RawColumn> {
    let mut obj_actor = RleEncoder::<u64>::new();
    let mut obj_ctr = RleEncoder::<u64>::new();
    let mut key_actor = RleEncoder::<u64>::new();
    let mut key_ctr = DeltaEncoder::new();
    let mut key_str = RleEncoder::<SmolStr>::new();
    let mut id_actor = RleEncoder::<u64>::new();
    let mut id_ctr = DeltaEncoder::new();
    let mut insert = BooleanEncoder::new();
    let mut action = RleEncoder::<u64>::new();
    let mut value = ValueWriter::new();
    let mut succ_num = RleEncoder::<u64>::new();
    let mut succ_actor = RleEncoder::<u64>::new();
    let mut succ_ctr = DeltaEncoder::new();

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
        id_actor.append_value(op.id.actor as u64);
        id_ctr.append_value(op.id.counter as i64);
        insert.append(op.insert);
        action.append_value(op.action.action_code());
        let scalar = match &op.action {
            OpType::Set(v) => v.clone(),
            OpType::Inc(delta) => ScalarValue::Int(*delta),
            _ => ScalarValue::Null,
        };
        value.append(&scalar);
        succ_num.append_value(op.succ.len() as u64);
        for s in &op.succ {
            succ_actor.append_value(s.actor as u64);
            succ_ctr.append_value(s.counter as i64);
        }
    }

    let mut cols = Vec::new();
    push(&mut cols, op_cols::OBJ_ACTOR, obj_actor.finish());
    push(&mut cols, op_cols::OBJ_CTR, obj_ctr.finish());
    push(&mut cols, op_cols::KEY_ACTOR, key_actor.finish());
    push(&mut cols, op_cols::KEY_CTR, key_ctr.finish());
    push(&mut cols, op_cols::KEY_STR, key_str.finish());
    push(&mut cols, op_cols::ID_ACTOR, id_actor.finish());
    push(&mut cols, op_cols::ID_CTR, id_ctr.finish());
    push(&mut cols, op_cols::INSERT, insert.finish());
    push(&mut cols, op_cols::ACTION, action.finish());
    let (val_len, val_raw) = value.finish();
    push(&mut cols, op_cols::VAL_LEN, val_len);
    push(&mut cols, op_cols::VAL_RAW, val_raw);
    push(&mut cols, op_cols::SUCC_NUM, succ_num.finish());
    push(&mut cols, op_cols::SUCC_ACTOR, succ_actor.finish());
    push(&mut cols, op_cols::SUCC_CTR, succ_ctr.finish());
    cols.sort_by_key(|c| c.id);
    cols
}

pub(crate) fn decode_doc_ops(cols: &[RawColumn]) -> Result<Vec<DocOp>, AutomergeError> {
    let action_col = column::find(cols, op_cols::ACTION);
    if action_col.is_empty() {
        return Ok(Vec::new());
    }
    let mut obj_actor = RleDecoder::<u64>::new(column::find(cols, op_cols::OBJ_ACTOR));
    let mut obj_ctr = RleDecoder::<u64>::new(column::find(cols, op_cols::OBJ_CTR));
    let mut key_actor = RleDecoder::<u64>::new(column::find(cols, op_cols::KEY_ACTOR));
    let mut key_ctr = DeltaDecoder::new(column::find(cols, op_cols::KEY_CTR));
    let mut key_str = RleDecoder::<SmolStr>::new(column::find(cols, op_cols::KEY_STR));
    let mut id_actor = RleDecoder::<u64>::new(column::find(cols, op_cols::ID_ACTOR));
    let mut id_ctr = DeltaDecoder::new(column::find(cols, op_cols::ID_CTR));
    let mut insert = BooleanDecoder::new(column::find(cols, op_cols::INSERT));
    let mut action = RleDecoder::<u64>::new(action_col);
    let mut value = ValueReader::new(
        column::find(cols, op_cols::VAL_LEN),
        column::find(cols, op_cols::VAL_RAW),
    );
    let mut succ_num = RleDecoder::<u64>::new(column::find(cols, op_cols::SUCC_NUM));
    let mut succ_actor = RleDecoder::<u64>::new(column::find(cols, op_cols::SUCC_ACTOR));
    let mut succ_ctr = DeltaDecoder::new(column::find(cols, op_cols::SUCC_CTR));

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
        let id_a = id_actor
            .read_value()
            .map_err(AutomergeError::Decode)?
            .ok_or_else(|| AutomergeError::MalformedData("doc op missing id actor".to_string()))?;
        let id_c = id_ctr
            .read_value()
            .map_err(AutomergeError::Decode)?
            .ok_or_else(|| AutomergeError::MalformedData("doc op missing id ctr".to_string()))?;
        let id = OpId::new(id_c as u64, id_a as usize);
        let insert_flag = insert.read_value().map_err(AutomergeError::Decode)?;
        let value = value.read_value().map_err(AutomergeError::Decode)?;
        let action_ty = OpType::from_code(action_code, value)?;
        let num_succ = succ_num
            .read_value()
            .map_err(AutomergeError::Decode)?
            .unwrap_or(0);
        let mut succ = Vec::with_capacity(num_succ as usize);
        for _ in 0..num_succ {
            let a = succ_actor
                .read_value()
                .map_err(AutomergeError::Decode)?
                .ok_or_else(|| AutomergeError::MalformedData("succ actor missing".to_string()))?;
            let c = succ_ctr
                .read_value()
                .map_err(AutomergeError::Decode)?
                .ok_or_else(|| AutomergeError::MalformedData("succ ctr missing".to_string()))?;
            succ.push(OpId::new(c as u64, a as usize));
        }
        ops.push(DocOp {
            id,
            obj,
            key,
            insert: insert_flag,
            action: action_ty,
            succ,
        });
    }
    Ok(ops)
}

fn push(cols: &mut Vec<RawColumn>, id: u32, data: Vec<u8>) {
    if data.is_empty() {
        return;
    }
    cols.push(RawColumn { id, data });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(hex: &str) -> ActorId {
        ActorId::from_hex(hex).unwrap()
    }

    #[test]
    fn round_trips_doc_ops() {
        let ops = vec![
            DocOp {
                id: OpId::new(1, 0),
                obj: ObjId::Root,
                key: Key::Map(SmolStr::from("x")),
                insert: false,
                action: OpType::Set(ScalarValue::Uint(3)),
                succ: vec![],
            },
            DocOp {
                id: OpId::new(2, 0),
                obj: ObjId::Root,
                key: Key::Map(SmolStr::from("x")),
                insert: false,
                action: OpType::Set(ScalarValue::Uint(5)),
                succ: vec![],
            },
        ];
        let cols = encode_doc_ops(&ops);
        let decoded = decode_doc_ops(&cols).unwrap();
        assert_eq!(decoded, ops);
    }

    #[test]
    fn round_trips_document_body() {
        let doc = DocumentBody {
            actors: vec![actor("01234567")],
            heads: vec![ChangeHash([1u8; 32])],
            changes: vec![ChangeMeta {
                actor: 0,
                seq: 1,
                max_op: 1,
                time: 0,
                message: None,
                deps: vec![],
                extra_bytes: vec![],
            }],
            ops: vec![DocOp {
                id: OpId::new(1, 0),
                obj: ObjId::Root,
                key: Key::Map(SmolStr::from("x")),
                insert: false,
                action: OpType::Set(ScalarValue::Uint(3)),
                succ: vec![],
            }],
        };
        let wire = doc.encode_chunk();
        let decoded = DocumentBody::decode(&wire).unwrap();
        assert_eq!(decoded.actors, doc.actors);
        assert_eq!(decoded.heads, doc.heads);
        assert_eq!(decoded.changes, doc.changes);
        assert_eq!(decoded.ops, doc.ops);
    }
}
