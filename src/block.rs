//! The block store: document ops are kept in doc-op order across
//! fixed-size blocks, each carrying derived metadata (including a Bloom
//! filter over the elem-ids it references) that lets the merge engine's
//! seek step skip whole blocks without decoding them.
//!
//! Each block is a plain `Vec<DocOp>` in memory rather than a columnar
//! representation — blocks are still saved/loaded in the columnar form of
//! `storage::document`.

use smol_str::SmolStr;

use crate::storage::document::DocOp;
use crate::types::{ElemId, Key, ObjId};

/// A block splits once it holds more than this many ops.
pub const DEFAULT_MAX_OPS_PER_BLOCK: usize = 600;

const BLOOM_BYTES: usize = 750;
const BLOOM_PROBES: usize = 7;

/// A Bloom filter over the elem-ids a block knows about: both list/text
/// elements it originates and elem-ids it references as an update/delete
/// target. Lets a search for a specific element skip the block outright
/// when it answers "definitely absent".
#[derive(Clone)]
pub(crate) struct Bloom {
    bits: Vec<u8>,
}

impl Bloom {
    fn empty() -> Self {
        Bloom {
            bits: vec![0; BLOOM_BYTES],
        }
    }

    fn probes(&self, elem: ElemId) -> [usize; BLOOM_PROBES] {
        let (actor, ctr) = match elem {
            ElemId::Head => (0u64, 0u64),
            ElemId::Id(id) => (id.actor as u64, id.counter),
        };
        let m = (8 * self.bits.len()) as u64;
        let mut x = ctr % m;
        let mut y = actor % m;
        let z = ((ctr ^ actor).wrapping_mul(16_777_619)) % m;
        let mut out = [0usize; BLOOM_PROBES];
        for slot in out.iter_mut() {
            *slot = x as usize;
            x = (x + y) % m;
            y = (y + z) % m;
        }
        out
    }

    fn set_bit(&mut self, bit: usize) {
        self.bits[bit / 8] |= 1 << (bit % 8);
    }

    fn get_bit(&self, bit: usize) -> bool {
        self.bits[bit / 8] & (1 << (bit % 8)) != 0
    }

    pub(crate) fn insert(&mut self, elem: ElemId) {
        for bit in self.probes(elem) {
            self.set_bit(bit);
        }
    }

    /// `true` means "maybe present"; `false` means "definitely absent" —
    /// the seeker relies on this to skip whole blocks without decoding them.
    pub(crate) fn contains(&self, elem: ElemId) -> bool {
        self.probes(elem).into_iter().all(|bit| self.get_bit(bit))
    }
}

#[derive(Clone)]
pub(crate) struct BlockMeta {
    pub(crate) num_ops: usize,
    pub(crate) last_object: ObjId,
    pub(crate) last_key: Option<SmolStr>,
    pub(crate) num_visible: usize,
    pub(crate) first_visible: Option<ElemId>,
    pub(crate) last_visible: Option<ElemId>,
    pub(crate) bloom: Bloom,
}

impl BlockMeta {
    fn recompute(ops: &[DocOp]) -> Self {
        let mut last_object = ObjId::Root;
        for op in ops {
            if op.obj > last_object {
                last_object = op.obj;
            }
        }
        let mut last_key: Option<SmolStr> = None;
        let mut num_visible = 0usize;
        let mut first_visible = None;
        let mut last_visible = None;
        let mut bloom = Bloom::empty();

        for op in ops {
            if let Key::Seq(ElemId::Id(_)) = op.key {
                if let Some(eid) = op.key.as_elem_id() {
                    bloom.insert(eid);
                }
            }
            if op.insert {
                if let Key::Seq(_) = op.key {
                    bloom.insert(ElemId::Id(op.id));
                }
            }
            if op.obj != last_object {
                continue;
            }
            match &op.key {
                Key::Map(s) => {
                    if last_key.as_ref().map(|k| s > k).unwrap_or(true) {
                        last_key = Some(s.clone());
                    }
                }
                Key::Seq(eid) => {
                    if op.succ.is_empty() {
                        num_visible += 1;
                        if first_visible.is_none() {
                            first_visible = Some(*eid);
                        }
                        last_visible = Some(*eid);
                    }
                }
            }
        }

        BlockMeta {
            num_ops: ops.len(),
            last_object,
            last_key,
            num_visible,
            first_visible,
            last_visible,
            bloom,
        }
    }
}

#[derive(Clone)]
pub(crate) struct Block {
    pub(crate) ops: Vec<DocOp>,
    pub(crate) meta: BlockMeta,
}

impl Block {
    fn new(ops: Vec<DocOp>) -> Self {
        let meta = BlockMeta::recompute(&ops);
        Block { ops, meta }
    }

    fn recompute_meta(&mut self) {
        self.meta = BlockMeta::recompute(&self.ops);
    }
}

/// The document's block store: an ordered list of blocks, never merged,
/// split on overflow. `Clone` backs the snapshot/restore the document uses
/// to keep a failed `apply_changes` call from being observed at all.
#[derive(Clone)]
pub(crate) struct Blocks {
    blocks: Vec<Block>,
    max_ops: usize,
}

impl Blocks {
    pub(crate) fn new() -> Self {
        Blocks {
            blocks: vec![Block::new(Vec::new())],
            max_ops: DEFAULT_MAX_OPS_PER_BLOCK,
        }
    }

    pub(crate) fn with_max_ops(max_ops: usize) -> Self {
        Blocks {
            blocks: vec![Block::new(Vec::new())],
            max_ops,
        }
    }

    /// Rebuilds the block store from a flat, already doc-ordered op list
    /// (used by `load`), splitting as needed.
    pub(crate) fn from_ops(ops: Vec<DocOp>, max_ops: usize) -> Self {
        let mut store = Blocks {
            blocks: vec![],
            max_ops,
        };
        if ops.is_empty() {
            store.blocks.push(Block::new(Vec::new()));
            return store;
        }
        for chunk in ops.chunks(max_ops) {
            store.blocks.push(Block::new(chunk.to_vec()));
        }
        store
    }

    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    pub(crate) fn block(&self, idx: usize) -> &Block {
        &self.blocks[idx]
    }

    pub(crate) fn row(&self, block_index: usize, row_index: usize) -> &DocOp {
        &self.blocks[block_index].ops[row_index]
    }

    pub(crate) fn total_ops(&self) -> usize {
        self.blocks.iter().map(|b| b.ops.len()).sum()
    }

    pub(crate) fn all_ops(&self) -> Vec<DocOp> {
        self.blocks.iter().flat_map(|b| b.ops.clone()).collect()
    }

    /// Inserts `op` at `(block_index, row_index)` (as located by the seek
    /// step) and splits the owning block if it now exceeds `max_ops`.
    pub(crate) fn insert_at(&mut self, block_index: usize, row_index: usize, op: DocOp) {
        let block = &mut self.blocks[block_index];
        block.ops.insert(row_index, op);
        block.recompute_meta();
        if block.ops.len() > self.max_ops {
            self.split_block(block_index);
        }
    }

    /// Overwrites an existing doc-op's `succ` list in place (used when a
    /// change op's `pred` matches it) and recomputes the block's metadata.
    pub(crate) fn update_succ(&mut self, block_index: usize, row_index: usize, succ: Vec<crate::types::OpId>) {
        let block = &mut self.blocks[block_index];
        block.ops[row_index].succ = succ;
        block.recompute_meta();
    }

    /// Shifts every actor index ≥ `threshold` up by one across every op
    /// (own id, object ref, key, and succ list) and recomputes metadata.
    /// Used when the document's sorted actor table grows with an insertion
    /// partway through (`doc::Document::resolve_actor`), which invalidates
    /// any index at or past the insertion point.
    pub(crate) fn remap_actor_indices(&mut self, threshold: usize) {
        for block in &mut self.blocks {
            for op in &mut block.ops {
                if op.id.actor >= threshold {
                    op.id.actor += 1;
                }
                if let ObjId::Id(id) = &mut op.obj {
                    if id.actor >= threshold {
                        id.actor += 1;
                    }
                }
                if let Key::Seq(ElemId::Id(id)) = &mut op.key {
                    if id.actor >= threshold {
                        id.actor += 1;
                    }
                }
                for s in &mut op.succ {
                    if s.actor >= threshold {
                        s.actor += 1;
                    }
                }
            }
            block.recompute_meta();
        }
    }

    fn split_block(&mut self, block_index: usize) {
        let block = &self.blocks[block_index];
        let num_ops = block.ops.len();
        let num_parts = ((num_ops as f64) / (0.8 * self.max_ops as f64)).ceil().max(1.0) as usize;
        let part_size = (num_ops + num_parts - 1) / num_parts;
        let ops = self.blocks.remove(block_index).ops;
        let mut new_blocks: Vec<Block> = ops
            .chunks(part_size.max(1))
            .map(|c| Block::new(c.to_vec()))
            .collect();
        if new_blocks.is_empty() {
            new_blocks.push(Block::new(Vec::new()));
        }
        for (offset, b) in new_blocks.into_iter().enumerate() {
            self.blocks.insert(block_index + offset, b);
        }
    }
}
