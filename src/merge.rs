//! The merge engine: seeking the right position for an incoming op and
//! applying it to the block store.
//!
//! Ops for one object cluster contiguously in doc-op order and are ordered
//! by key within that cluster, which is what lets the seek step narrow a
//! search to one block via its cached metadata before scanning rows.
//!
//! Patch generation recomputes each touched key's full visible set after
//! mutating the block store, rather than folding the patch incrementally
//! into the same pass — simpler to get right, at the cost of re-scanning a
//! key's conflict group once per op. Noted in `DESIGN.md`.

use std::collections::BTreeMap;

use fxhash::FxHashMap;
use smol_str::SmolStr;

use crate::block::Blocks;
use crate::error::AutomergeError;
use crate::patch::{Conflicts, Edit, Edits, MapPatch, ObjectPatchOwned, Patch, PatchValue};
use crate::storage::document::DocOp;
use crate::types::{ChangeHash, ElemId, Key, ObjId, OpId, OpType, ScalarValue};

/// One change op translated into absolute terms: a real `OpId` assigned and
/// every actor index resolved against the document's global actor table
/// (done by the caller, which owns that table).
#[derive(Clone, Debug)]
pub(crate) struct ResolvedOp {
    pub(crate) id: OpId,
    pub(crate) obj: ObjId,
    pub(crate) key: Key,
    pub(crate) insert: bool,
    pub(crate) action: OpType,
    pub(crate) pred: Vec<OpId>,
}

#[derive(Default)]
struct PatchBuilder {
    lists: FxHashMap<ObjId, Edits>,
    maps: FxHashMap<ObjId, BTreeMap<SmolStr, Conflicts>>,
}

impl PatchBuilder {
    fn list_edits(&mut self, obj: ObjId) -> &mut Edits {
        self.lists.entry(obj).or_insert_with(Edits::new)
    }

    fn record_map(&mut self, obj: ObjId, key: SmolStr, conflicts: Conflicts) {
        self.maps.entry(obj).or_default().insert(key, conflicts);
    }

    fn into_patch(self, deps: Vec<ChangeHash>) -> Patch {
        let mut objects = BTreeMap::new();
        for (obj, props) in self.maps {
            objects.insert(obj, ObjectPatchOwned::Map(MapPatch { props }));
        }
        for (obj, edits) in self.lists {
            objects.insert(obj, ObjectPatchOwned::Seq(edits.into_vec()));
        }
        Patch { objects, deps }
    }
}

/// Merges a change's already-translated ops into the block store one at a
/// time, returning the patch describing their effect. `deps` is carried
/// through unchanged into the returned `Patch`.
pub(crate) fn apply_ops(
    blocks: &mut Blocks,
    ops: Vec<ResolvedOp>,
    deps: Vec<ChangeHash>,
) -> Result<Patch, AutomergeError> {
    let mut builder = PatchBuilder::default();
    for op in ops {
        if find_op_by_id(blocks, op.id).is_some() {
            return Err(AutomergeError::DuplicateOpId(op.id));
        }
        if op.insert {
            apply_insert(blocks, &mut builder, op)?;
        } else {
            apply_update(blocks, &mut builder, op)?;
        }
    }
    Ok(builder.into_patch(deps))
}

// --- position arithmetic over the block store -----------------------------
//
// A "position" is (block_index, row_index); row_index may equal the block's
// length, meaning "just past its last row". `normalize` folds that into the
// next block's row 0 whenever a next block exists, so every other helper
// can treat positions uniformly without caring about block boundaries.

fn normalize(blocks: &Blocks, pos: (usize, usize)) -> (usize, usize) {
    let (mut bi, mut ri) = pos;
    while bi + 1 < blocks.len() && ri >= blocks.block(bi).ops.len() {
        bi += 1;
        ri = 0;
    }
    (bi, ri)
}

fn peek<'a>(blocks: &'a Blocks, pos: (usize, usize)) -> Option<&'a DocOp> {
    let (bi, ri) = normalize(blocks, pos);
    blocks.block(bi).ops.get(ri)
}

fn advance(blocks: &Blocks, pos: (usize, usize)) -> (usize, usize) {
    normalize(blocks, (pos.0, pos.1 + 1))
}

pub(crate) fn find_op_by_id(blocks: &Blocks, id: OpId) -> Option<(usize, usize)> {
    for (bi, block) in blocks.iter().enumerate() {
        for (ri, op) in block.ops.iter().enumerate() {
            if op.id == id {
                return Some((bi, ri));
            }
        }
    }
    None
}

/// Finds a list/text element's origin row by id, consulting each block's
/// Bloom filter first: a block whose filter answers "definitely absent" is
/// skipped without scanning its rows at all.
fn find_elem_origin(blocks: &Blocks, target: OpId) -> Option<(usize, usize)> {
    for (bi, block) in blocks.iter().enumerate() {
        if !block.meta.bloom.contains(ElemId::Id(target)) {
            continue;
        }
        for (ri, op) in block.ops.iter().enumerate() {
            if op.id == target {
                return Some((bi, ri));
            }
        }
    }
    None
}

/// All rows with the given `(obj, key)`, in document order. Used for map
/// conflict groups, where every member shares its key literally.
///
/// Rows are kept sorted by `(obj, key)`, so a block whose own highest
/// `(obj, key)` falls short of the target can't hold a match and is
/// skipped without scanning its rows.
fn key_group_positions(blocks: &Blocks, obj: ObjId, key: &Key) -> Vec<(usize, usize)> {
    let target_key = key.as_map_key();
    let mut out = Vec::new();
    for (bi, block) in blocks.iter().enumerate() {
        if block.meta.last_object < obj {
            continue;
        }
        if block.meta.last_object == obj {
            if let (Some(target), Some(last)) = (target_key, block.meta.last_key.as_deref()) {
                if target > last {
                    continue;
                }
            }
        }
        for (ri, op) in block.ops.iter().enumerate() {
            if op.obj == obj && &op.key == key {
                out.push((bi, ri));
            }
        }
    }
    out
}

/// A list/text element's conflict group: the row that originally inserted
/// it (found by id, since its own `key` is the insertion anchor, not its
/// own id) plus any update rows keyed by that id, which this module always
/// places immediately after it.
fn element_group(blocks: &Blocks, target: OpId) -> Option<Vec<(usize, usize)>> {
    let origin = find_elem_origin(blocks, target)?;
    let mut group = vec![origin];
    let target_key = Key::Seq(ElemId::Id(target));
    let mut pos = advance(blocks, origin);
    while let Some(op) = peek(blocks, pos) {
        if op.key == target_key {
            group.push(normalize(blocks, pos));
            pos = advance(blocks, pos);
        } else {
            break;
        }
    }
    Some(group)
}

fn insertion_point_for_new_map_key(blocks: &Blocks, obj: ObjId, s: &SmolStr) -> (usize, usize) {
    for (bi, block) in blocks.iter().enumerate() {
        if block.meta.last_object < obj {
            continue;
        }
        if block.meta.last_object == obj {
            if let Some(last) = &block.meta.last_key {
                if last < s {
                    continue;
                }
            }
        }
        for (ri, row) in block.ops.iter().enumerate() {
            if row.obj > obj {
                return (bi, ri);
            }
            if row.obj == obj {
                if let Key::Map(existing) = &row.key {
                    if existing > s {
                        return (bi, ri);
                    }
                }
            }
        }
    }
    end_of_store(blocks)
}

fn end_of_store(blocks: &Blocks) -> (usize, usize) {
    let last = blocks.len() - 1;
    (last, blocks.block(last).ops.len())
}

/// The first row belonging to `obj`, or the point where its region would
/// begin if it has none yet (new list/text object, first insertion).
fn object_region_start(blocks: &Blocks, obj: ObjId) -> (usize, usize) {
    for (bi, block) in blocks.iter().enumerate() {
        if block.meta.last_object < obj {
            continue;
        }
        for (ri, row) in block.ops.iter().enumerate() {
            if row.obj == obj {
                return (bi, ri);
            }
            if row.obj > obj {
                return (bi, ri);
            }
        }
    }
    end_of_store(blocks)
}

/// Counts this object's currently-visible list elements strictly before
/// `before`, the index the merger reports in emitted edits.
fn visible_index_before(blocks: &Blocks, obj: ObjId, before: (usize, usize)) -> usize {
    let mut seen = std::collections::HashSet::new();
    let mut order = Vec::new();
    'outer: for (bi, block) in blocks.iter().enumerate() {
        for (ri, op) in block.ops.iter().enumerate() {
            if (bi, ri) >= before {
                break 'outer;
            }
            if op.obj == obj {
                if let Key::Seq(ElemId::Id(target)) = &op.key {
                    if seen.insert(*target) {
                        order.push(*target);
                    }
                }
            }
        }
    }
    order
        .into_iter()
        .filter(|target| {
            element_group(blocks, *target)
                .unwrap_or_default()
                .into_iter()
                .any(|(bi, ri)| is_visible(blocks.row(bi, ri), blocks))
        })
        .count()
}

/// An op is visible iff it has no succs, i.e. nothing has overwritten it —
/// except a counter, which stays visible as long as every succ is an `Inc`
/// rather than an overwrite or delete.
///
/// `Inc` ops never carry their own visibility: an increment is folded into
/// the counter row it targets (`visible_value`) and never shown as a
/// separate conflict entry, even though it gets its own doc-op row with an
/// empty `succ` (needed so `load`/`save` can reconstruct it as a distinct
/// op).
fn is_visible(row: &DocOp, blocks: &Blocks) -> bool {
    if matches!(row.action, OpType::Inc(_)) {
        return false;
    }
    if row.succ.is_empty() {
        return true;
    }
    if matches!(row.action, OpType::Set(ScalarValue::Counter(_))) {
        return row.succ.iter().all(|s| {
            find_op_by_id(blocks, *s)
                .map(|(bi, ri)| matches!(blocks.row(bi, ri).action, OpType::Inc(_)))
                .unwrap_or(false)
        });
    }
    false
}

fn op_patch_value(action: &OpType, id: OpId) -> PatchValue {
    match action {
        OpType::Set(v) => PatchValue::Scalar(v.clone()),
        OpType::MakeMap | OpType::MakeList | OpType::MakeText | OpType::MakeTable => {
            PatchValue::Object(ObjId::Id(id))
        }
        OpType::Inc(delta) => PatchValue::Scalar(ScalarValue::Counter(*delta)),
        OpType::Del | OpType::Link => PatchValue::Scalar(ScalarValue::Null),
    }
}

/// Like `op_patch_value`, but sums a counter's `inc` succs into its
/// reported value.
fn visible_value(row: &DocOp, blocks: &Blocks) -> PatchValue {
    if let OpType::Set(ScalarValue::Counter(initial)) = &row.action {
        let mut total = *initial;
        for s in &row.succ {
            if let Some((bi, ri)) = find_op_by_id(blocks, *s) {
                if let OpType::Inc(delta) = &blocks.row(bi, ri).action {
                    total += delta;
                }
            }
        }
        return PatchValue::Scalar(ScalarValue::Counter(total));
    }
    op_patch_value(&row.action, row.id)
}

// --- insert -----------------------------------------------------------

fn apply_insert(
    blocks: &mut Blocks,
    builder: &mut PatchBuilder,
    op: ResolvedOp,
) -> Result<(), AutomergeError> {
    let anchor = op
        .key
        .as_elem_id()
        .expect("an insert op always carries a seq key");

    let mut pos = match anchor {
        ElemId::Head => object_region_start(blocks, op.obj),
        ElemId::Id(target) => {
            let origin =
                find_elem_origin(blocks, target).ok_or(AutomergeError::ReferenceNotFound(target))?;
            advance(blocks, origin)
        }
    };

    // Concurrent inserts at the same anchor are ordered largest-id-first,
    // so skip past any already there with a greater id.
    let anchor_key = Key::Seq(anchor);
    while let Some(next) = peek(blocks, pos) {
        if next.key == anchor_key && next.id > op.id {
            pos = advance(blocks, pos);
        } else {
            break;
        }
    }

    let (bi, ri) = normalize(blocks, pos);
    let visible_index = visible_index_before(blocks, op.obj, (bi, ri));
    let value = op_patch_value(&op.action, op.id);
    let row = DocOp {
        id: op.id,
        obj: op.obj,
        key: op.key,
        insert: true,
        action: op.action,
        succ: Vec::new(),
    };
    blocks.insert_at(bi, ri, row);

    builder.list_edits(op.obj).append_edit(Edit::Insert {
        index: visible_index,
        elem_id: ElemId::Id(op.id),
        op_id: op.id,
        value,
    });
    Ok(())
}

// --- update / delete ----------------------------------------------------

fn apply_update(
    blocks: &mut Blocks,
    builder: &mut PatchBuilder,
    op: ResolvedOp,
) -> Result<(), AutomergeError> {
    let group = match &op.key {
        Key::Map(_) => key_group_positions(blocks, op.obj, &op.key),
        Key::Seq(ElemId::Id(target)) => {
            element_group(blocks, *target).ok_or(AutomergeError::ReferenceNotFound(*target))?
        }
        Key::Seq(ElemId::Head) => {
            return Err(AutomergeError::MalformedData(
                "a non-insert op cannot target _head".to_string(),
            ))
        }
    };

    let group_ids: Vec<OpId> = group.iter().map(|&(bi, ri)| blocks.row(bi, ri).id).collect();
    for pred in &op.pred {
        if !group_ids.contains(pred) {
            return Err(AutomergeError::DanglingPred(op.id));
        }
    }

    let is_list = matches!(op.key, Key::Seq(_));
    let was_visible = group
        .iter()
        .any(|&(bi, ri)| is_visible(blocks.row(bi, ri), blocks));
    let visible_index = if is_list {
        Some(visible_index_before(blocks, op.obj, group[0]))
    } else {
        None
    };

    for &(bi, ri) in &group {
        let row_id = blocks.row(bi, ri).id;
        if op.pred.contains(&row_id) {
            let mut succ = blocks.row(bi, ri).succ.clone();
            let at = succ.partition_point(|s| *s < op.id);
            succ.insert(at, op.id);
            blocks.update_succ(bi, ri, succ);
        }
    }

    if !matches!(op.action, OpType::Del) {
        let insert_pos = match group.last() {
            Some(&last) => advance(blocks, last),
            None => match &op.key {
                Key::Map(s) => insertion_point_for_new_map_key(blocks, op.obj, s),
                _ => unreachable!("element_group always has an origin when it returns Some"),
            },
        };
        let (bi, ri) = normalize(blocks, insert_pos);
        let row = DocOp {
            id: op.id,
            obj: op.obj,
            key: op.key.clone(),
            insert: false,
            action: op.action,
            succ: Vec::new(),
        };
        blocks.insert_at(bi, ri, row);
    }

    let final_group = match &op.key {
        Key::Map(_) => key_group_positions(blocks, op.obj, &op.key),
        Key::Seq(ElemId::Id(target)) => element_group(blocks, *target).unwrap_or_default(),
        Key::Seq(ElemId::Head) => unreachable!(),
    };
    let visible_now: Vec<(OpId, PatchValue)> = final_group
        .iter()
        .filter_map(|&(bi, ri)| {
            let row = blocks.row(bi, ri);
            is_visible(row, blocks).then(|| (row.id, visible_value(row, blocks)))
        })
        .collect();

    match &op.key {
        Key::Map(s) => {
            let conflicts: Conflicts = visible_now.into_iter().collect();
            builder.record_map(op.obj, s.clone(), conflicts);
        }
        Key::Seq(ElemId::Id(_)) => {
            let index = visible_index.unwrap();
            let edits = builder.list_edits(op.obj);
            if visible_now.is_empty() {
                if was_visible {
                    edits.append_edit(Edit::Remove { index, count: 1 });
                }
            } else {
                for (op_id, value) in visible_now {
                    edits.append_edit(Edit::Update { index, op_id, value });
                }
            }
        }
        Key::Seq(ElemId::Head) => unreachable!(),
    }
    Ok(())
}

/// Reconstructs the full current state as one patch, rather than the delta
/// a single `apply_ops` call produces. There is no explicit object-type
/// registry: a map/table key is any row keyed `Key::Map`, and a list/text
/// element is any row with `insert: true`, which is sufficient to route
/// every row correctly.
pub(crate) fn full_patch(blocks: &Blocks) -> Patch {
    let mut builder = PatchBuilder::default();
    let mut seen_map_keys: std::collections::HashSet<(ObjId, SmolStr)> = Default::default();
    let mut seen_elements: std::collections::HashSet<(ObjId, OpId)> = Default::default();
    let mut list_index: FxHashMap<ObjId, usize> = FxHashMap::default();

    for block in blocks.iter() {
        for op in &block.ops {
            match &op.key {
                Key::Map(s) => {
                    if seen_map_keys.insert((op.obj, s.clone())) {
                        let group = key_group_positions(blocks, op.obj, &op.key);
                        let conflicts: Conflicts = group
                            .iter()
                            .filter_map(|&(bi, ri)| {
                                let row = blocks.row(bi, ri);
                                is_visible(row, blocks).then(|| (row.id, visible_value(row, blocks)))
                            })
                            .collect();
                        if !conflicts.is_empty() {
                            builder.record_map(op.obj, s.clone(), conflicts);
                        }
                    }
                }
                Key::Seq(_) => {}
            }

            if op.insert && seen_elements.insert((op.obj, op.id)) {
                let eid = op.id;
                let group = element_group(blocks, eid).unwrap_or_default();
                let mut visible: Vec<(OpId, PatchValue)> = group
                    .iter()
                    .filter_map(|&(bi, ri)| {
                        let row = blocks.row(bi, ri);
                        is_visible(row, blocks).then(|| (row.id, visible_value(row, blocks)))
                    })
                    .collect();
                if !visible.is_empty() {
                    let slot = list_index.entry(op.obj).or_insert(0);
                    let index = *slot;
                    let (first_id, first_value) = visible.remove(0);
                    builder.list_edits(op.obj).append_edit(Edit::Insert {
                        index,
                        elem_id: ElemId::Id(eid),
                        op_id: first_id,
                        value: first_value,
                    });
                    for (op_id, value) in visible {
                        builder
                            .list_edits(op.obj)
                            .append_edit(Edit::Update { index, op_id, value });
                    }
                    *slot += 1;
                }
            }
        }
    }
    builder.into_patch(Vec::new())
}
