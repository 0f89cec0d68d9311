//! The public document API: apply remote changes, make local ones,
//! save/load, and inspect the causal/hash graph.
//!
//! The local-change path augments the caller's change with the current
//! frontier as its deps, assigns a fresh globally-monotonic op counter, and
//! strips the actor's own previous head back out of the reported patch.
//!
//! Atomicity is implemented at this module's grain rather than inside the
//! merge engine: both `apply_changes` and `apply_local_change` clone the
//! whole document before attempting the work and restore it on any error,
//! rather than rolling back individual block-store mutations.

use std::collections::BTreeMap;

use fxhash::FxHashMap;
use tracing::{trace, warn};

use crate::block::{self, Blocks};
use crate::change_graph::{self, ChangeGraph};
use crate::error::AutomergeError;
use crate::merge;
use crate::patch::{ObjectPatchOwned, Patch};
use crate::storage::change;
use crate::storage::document::{self, DocumentBody};
use crate::types::{ActorId, ChangeHash, ElemId, Key, ObjId, OpId, OpType};

/// One op as a caller building a local change expresses it: already resolved
/// against this document's global actor table, exactly as `OpId`s handed
/// back in a previous `Patch` already are.
#[derive(Clone, Debug)]
pub struct LocalOp {
    pub obj: ObjId,
    pub key: Key,
    pub insert: bool,
    pub action: OpType,
    pub pred: Vec<OpId>,
}

/// A not-yet-encoded local change: the document fills in `deps` and
/// `start_op` and assigns the hash.
#[derive(Clone, Debug)]
pub struct LocalChange {
    pub actor: ActorId,
    pub seq: u64,
    pub time: i64,
    pub message: Option<String>,
    pub extra_bytes: Vec<u8>,
    pub ops: Vec<LocalOp>,
}

/// Accumulates the patches of several changes applied in one call into a
/// single combined `Patch`, including changes unblocked from the pending
/// queue.
#[derive(Default)]
struct PatchAccumulator {
    objects: BTreeMap<ObjId, ObjectPatchOwned>,
}

impl PatchAccumulator {
    fn merge(&mut self, patch: Patch) {
        for (obj, incoming) in patch.objects {
            let merged = match (self.objects.remove(&obj), incoming) {
                (Some(ObjectPatchOwned::Seq(mut existing)), ObjectPatchOwned::Seq(more)) => {
                    existing.extend(more);
                    ObjectPatchOwned::Seq(existing)
                }
                (Some(ObjectPatchOwned::Map(mut existing)), ObjectPatchOwned::Map(more)) => {
                    existing.props.extend(more.props);
                    ObjectPatchOwned::Map(existing)
                }
                (_, incoming) => incoming,
            };
            self.objects.insert(obj, merged);
        }
    }

    fn into_patch(self, deps: Vec<ChangeHash>) -> Patch {
        Patch {
            objects: self.objects,
            deps,
        }
    }
}

/// A CRDT document: a block store of merged ops plus the change/hash graph
/// that got them there. `Clone` is the document-level snapshot both mutating
/// entry points use to guarantee atomicity.
#[derive(Clone)]
pub struct Document {
    actors: Vec<ActorId>,
    blocks: Blocks,
    graph: ChangeGraph,
}

impl Default for Document {
    fn default() -> Self {
        Self::init()
    }
}

impl Document {
    pub fn init() -> Self {
        Document {
            actors: Vec::new(),
            blocks: Blocks::new(),
            graph: ChangeGraph::new(),
        }
    }

    /// Finds (or inserts) `actor`'s slot in the document's sorted actor
    /// table. An insertion that isn't an append invalidates every index at
    /// or past it, so the block store and change graph are remapped in
    /// lockstep (`Blocks`/`ChangeGraph::remap_actor_indices`).
    fn resolve_actor(&mut self, actor: &ActorId) -> usize {
        match self.actors.binary_search(actor) {
            Ok(idx) => idx,
            Err(idx) => {
                self.actors.insert(idx, actor.clone());
                self.blocks.remap_actor_indices(idx);
                self.graph.remap_actor_indices(idx);
                idx
            }
        }
    }

    /// Translates a decoded change's local actor-table references into the
    /// document's global ones, assigning each op a real `OpId` from
    /// `change.start_op`. Returns the author's global actor index alongside,
    /// since every caller needs it right after.
    ///
    /// `change.actors` is itself decoded from the wire and may be shorter
    /// than the largest actor index any op/key/pred in the change refers to
    /// (a malformed or adversarial change). Every lookup into
    /// `local_to_global` is bounds-checked and fails closed with
    /// `UnknownActor` rather than indexing past the end of the table, since
    /// this runs before any op has been merged into the block store.
    fn translate_change(
        &mut self,
        change: &change::Change,
    ) -> Result<(Vec<merge::ResolvedOp>, usize), AutomergeError> {
        let local_to_global: Vec<usize> =
            change.actors.iter().map(|a| self.resolve_actor(a)).collect();
        let global_of = |local: usize| -> Result<usize, AutomergeError> {
            local_to_global
                .get(local)
                .copied()
                .ok_or(AutomergeError::UnknownActor(local))
        };
        let author_global = global_of(0)?;
        let mut ops = Vec::with_capacity(change.ops.len());
        for (i, op) in change.ops.iter().enumerate() {
            let obj = match op.obj {
                ObjId::Root => ObjId::Root,
                ObjId::Id(id) => ObjId::Id(OpId::new(id.counter, global_of(id.actor)?)),
            };
            let key = match &op.key {
                Key::Map(s) => Key::Map(s.clone()),
                Key::Seq(ElemId::Head) => Key::Seq(ElemId::Head),
                Key::Seq(ElemId::Id(id)) => {
                    Key::Seq(ElemId::Id(OpId::new(id.counter, global_of(id.actor)?)))
                }
            };
            let mut pred = Vec::with_capacity(op.pred.len());
            for p in &op.pred {
                pred.push(OpId::new(p.counter, global_of(p.actor)?));
            }
            ops.push(merge::ResolvedOp {
                id: OpId::new(change.start_op + i as u64, author_global),
                obj,
                key,
                insert: op.insert,
                action: op.action.clone(),
                pred,
            });
        }
        Ok((ops, author_global))
    }

    /// Builds the change's own (small, author-first) actor table from ops
    /// expressed in global actor indices, and encodes them in terms of it —
    /// the mirror image of `translate_change`. Shared by the local-change
    /// path and by `load`'s per-change reconstruction.
    fn build_change(
        &self,
        author_global: usize,
        seq: u64,
        start_op: u64,
        time: i64,
        message: Option<String>,
        deps: Vec<ChangeHash>,
        extra_bytes: Vec<u8>,
        ops: &[LocalOp],
    ) -> change::Change {
        let mut referenced: Vec<usize> = Vec::new();
        for op in ops {
            if let ObjId::Id(id) = op.obj {
                referenced.push(id.actor);
            }
            if let Key::Seq(ElemId::Id(id)) = &op.key {
                referenced.push(id.actor);
            }
            referenced.extend(op.pred.iter().map(|p| p.actor));
        }
        referenced.retain(|&a| a != author_global);
        referenced.sort_unstable();
        referenced.dedup();

        let mut change_actors = vec![self.actors[author_global].clone()];
        let mut global_to_local: FxHashMap<usize, usize> = FxHashMap::default();
        global_to_local.insert(author_global, 0);
        for (i, &g) in referenced.iter().enumerate() {
            change_actors.push(self.actors[g].clone());
            global_to_local.insert(g, i + 1);
        }

        let change_ops = ops
            .iter()
            .map(|op| change::ChangeOp {
                obj: match op.obj {
                    ObjId::Root => ObjId::Root,
                    ObjId::Id(id) => ObjId::Id(OpId::new(id.counter, global_to_local[&id.actor])),
                },
                key: match &op.key {
                    Key::Map(s) => Key::Map(s.clone()),
                    Key::Seq(ElemId::Head) => Key::Seq(ElemId::Head),
                    Key::Seq(ElemId::Id(id)) => {
                        Key::Seq(ElemId::Id(OpId::new(id.counter, global_to_local[&id.actor])))
                    }
                },
                insert: op.insert,
                action: op.action.clone(),
                pred: op
                    .pred
                    .iter()
                    .map(|p| OpId::new(p.counter, global_to_local[&p.actor]))
                    .collect(),
            })
            .collect();

        change::Change {
            actors: change_actors,
            seq,
            start_op,
            time,
            message,
            deps,
            ops: change_ops,
            extra_bytes,
        }
    }

    fn seq_error_to_automerge(&self, err: change_graph::SeqError, author_global: usize) -> AutomergeError {
        let actor = self.actors[author_global].clone();
        match err {
            change_graph::SeqError::Gap { expected, found } => {
                AutomergeError::SeqGap { actor, expected, found }
            }
            change_graph::SeqError::Reuse { seq } => AutomergeError::SeqReuse { actor, seq },
        }
    }

    /// Merges one decoded change into the document if its deps are
    /// satisfied, else parks it in the pending queue. No-ops if the hash is
    /// already applied or already queued, so applying the same change twice
    /// is indistinguishable from applying it once.
    fn ingest_one(
        &mut self,
        change: &change::Change,
        hash: ChangeHash,
        bytes: Vec<u8>,
        merged: &mut PatchAccumulator,
    ) -> Result<(), AutomergeError> {
        if self.graph.contains(&hash) || self.graph.queued_contains(&hash) {
            trace!(?hash, "change already applied or queued, skipping");
            return Ok(());
        }
        if !self.graph.is_ready(&change.deps) {
            trace!(?hash, actor = %change.actor(), seq = change.seq, "change not causally ready, queuing");
            self.graph.enqueue(change_graph::PendingChange {
                hash,
                deps: change.deps.clone(),
                bytes,
            });
            return Ok(());
        }
        let (ops, author_global) = self.translate_change(change)?;
        let patch = merge::apply_ops(&mut self.blocks, ops, change.deps.clone())?;
        merged.merge(patch);
        trace!(?hash, actor = %change.actor(), seq = change.seq, "applied change");
        self.graph
            .record_applied(
                hash,
                author_global,
                change.seq,
                change.start_op,
                change.max_op(),
                change.time,
                change.message.clone(),
                change.deps.clone(),
                change.extra_bytes.clone(),
                bytes,
            )
            .map_err(|e| self.seq_error_to_automerge(e, author_global))?;
        Ok(())
    }

    fn apply_changes_inner(&mut self, changes: Vec<Vec<u8>>) -> Result<Patch, AutomergeError> {
        let mut merged = PatchAccumulator::default();
        for wire in changes {
            let (change, hash) = change::Change::decode(&wire)?;
            self.ingest_one(&change, hash, wire, &mut merged)?;
        }
        loop {
            let ready = self.graph.drain_ready();
            if ready.is_empty() {
                break;
            }
            for pending in ready {
                let (change, hash) = change::Change::decode(&pending.bytes)?;
                self.ingest_one(&change, hash, pending.bytes, &mut merged)?;
            }
        }
        Ok(merged.into_patch(self.graph.heads().to_vec()))
    }

    /// Applies a batch of wire-encoded changes, returning one combined
    /// patch. Changes whose deps aren't yet satisfied are queued rather
    /// than rejected; this call (and any later one that supplies the
    /// missing dependency) drains whatever that unblocks.
    #[tracing::instrument(skip_all, fields(num_changes = changes.len()))]
    pub fn apply_changes(&mut self, changes: Vec<Vec<u8>>) -> Result<Patch, AutomergeError> {
        let snapshot = self.clone();
        match self.apply_changes_inner(changes) {
            Ok(patch) => Ok(patch),
            Err(err) => {
                warn!(error = %err, "apply_changes failed, document rolled back");
                *self = snapshot;
                Err(err)
            }
        }
    }

    fn apply_local_change_inner(
        &mut self,
        local: LocalChange,
    ) -> Result<(Patch, Vec<u8>), AutomergeError> {
        let author_global = self.resolve_actor(&local.actor);
        let current_seq = self.graph.clock_for(author_global);
        if local.seq <= current_seq {
            warn!(actor = %local.actor, seq = local.seq, current_seq, "local change already applied");
            return Err(AutomergeError::AlreadyApplied {
                actor: local.actor.clone(),
                seq: local.seq,
            });
        }

        // deps = the current frontier, which already includes the author's
        // own previous change as long as nothing has built on top of it yet
        // (the expected case for a local append).
        let mut deps = self.graph.heads().to_vec();
        deps.sort_by(|a, b| a.0.cmp(&b.0));
        let start_op = self.graph.next_op_counter();

        let change = self.build_change(
            author_global,
            local.seq,
            start_op,
            local.time,
            local.message.clone(),
            deps.clone(),
            local.extra_bytes.clone(),
            &local.ops,
        );
        let (wire, hash) = change.encode();

        let (ops, _) = self.translate_change(&change)?;
        let mut patch = merge::apply_ops(&mut self.blocks, ops, deps.clone())?;

        // The caller already knows about its own previous head, so strip it
        // back out of the patch it's handed.
        let prev_hash = if local.seq > 1 {
            self.graph.hash_for_actor_seq(author_global, local.seq - 1)
        } else {
            None
        };
        patch.deps.retain(|h| Some(*h) != prev_hash);

        self.graph
            .record_applied(
                hash,
                author_global,
                change.seq,
                change.start_op,
                change.max_op(),
                change.time,
                change.message.clone(),
                deps,
                change.extra_bytes.clone(),
                wire.clone(),
            )
            .map_err(|e| self.seq_error_to_automerge(e, author_global))?;

        Ok((patch, wire))
    }

    /// Authors and applies a local change, returning the encoded change
    /// alongside the patch so the caller can broadcast it.
    #[tracing::instrument(skip_all, fields(actor = %local.actor, seq = local.seq))]
    pub fn apply_local_change(
        &mut self,
        local: LocalChange,
    ) -> Result<(Patch, Vec<u8>), AutomergeError> {
        let snapshot = self.clone();
        match self.apply_local_change_inner(local) {
            Ok(out) => Ok(out),
            Err(err) => {
                warn!(error = %err, "apply_local_change failed, document rolled back");
                *self = snapshot;
                Err(err)
            }
        }
    }

    /// Every op whose `succ` contains `id` is an op `id` overwrote — the
    /// exact inverse relation change-op `pred` declares, and one that
    /// survives merging (unlike per-change provenance, which isn't tracked
    /// on the doc-op itself). Used to rebuild a change's `pred` lists at
    /// `load` time.
    fn pred_of(&self, id: OpId) -> Vec<OpId> {
        let mut pred: Vec<OpId> = self
            .blocks
            .iter()
            .flat_map(|b| b.ops.iter())
            .filter(|row| row.succ.contains(&id))
            .map(|row| row.id)
            .collect();
        pred.sort();
        pred
    }

    /// A `Del` op never gets a row of its own: it only shows up as a `succ`
    /// entry on whatever it overwrote. Recovers its `(obj, key, pred)` by
    /// finding those rows.
    fn del_target_info(&self, id: OpId) -> (ObjId, Key, Vec<OpId>) {
        let mut obj = ObjId::Root;
        let mut key = Key::head();
        let mut pred = Vec::new();
        for block in self.blocks.iter() {
            for row in &block.ops {
                if row.succ.contains(&id) {
                    obj = row.obj;
                    key = row.key.clone();
                    pred.push(row.id);
                }
            }
        }
        pred.sort();
        (obj, key, pred)
    }

    /// Rebuilds the `LocalOp`s a change produced from its op-counter range:
    /// every counter in `[start_op, max_op]` under `actor` was assigned to
    /// exactly one op, whether or not that op still has a row (`Del`
    /// doesn't).
    fn reconstruct_change_ops(&self, actor: usize, start_op: u64, max_op: u64) -> Vec<LocalOp> {
        let mut ops = Vec::with_capacity((max_op - start_op + 1) as usize);
        for counter in start_op..=max_op {
            let id = OpId::new(counter, actor);
            if let Some((bi, ri)) = merge::find_op_by_id(&self.blocks, id) {
                let row = self.blocks.row(bi, ri);
                ops.push(LocalOp {
                    obj: row.obj,
                    key: row.key.clone(),
                    insert: row.insert,
                    action: row.action.clone(),
                    pred: self.pred_of(id),
                });
            } else {
                let (obj, key, pred) = self.del_target_info(id);
                ops.push(LocalOp {
                    obj,
                    key,
                    insert: false,
                    action: OpType::Del,
                    pred,
                });
            }
        }
        ops
    }

    /// Encodes the document's ops plus per-change metadata into one
    /// container. Each change's own wire bytes aren't part of this format,
    /// only its `ChangeMeta` is — `load` regenerates them by canonical
    /// re-encoding, which is deterministic and so yields the same hash the
    /// change originally had.
    #[tracing::instrument(skip_all, fields(num_changes = self.graph.changes.len()))]
    pub fn save(&self) -> Vec<u8> {
        let changes = self
            .graph
            .changes
            .iter()
            .map(|r| document::ChangeMeta {
                actor: r.actor,
                seq: r.seq,
                max_op: r.max_op,
                time: r.time,
                message: r.message.clone(),
                deps: r.deps_index.clone(),
                extra_bytes: r.extra_bytes.clone(),
            })
            .collect();
        let body = DocumentBody {
            actors: self.actors.clone(),
            heads: self.graph.heads().to_vec(),
            changes,
            ops: self.blocks.all_ops(),
        };
        body.encode_chunk()
    }

    /// Decodes a document previously written by `save`. Changes are
    /// replayed in the order they were saved, re-deriving each `start_op`
    /// from the previous entry's `max_op` (the per-change metadata schema
    /// omits `start_op`, since op counters are allocated globally and so
    /// it's always one past the previous change's `max_op`).
    #[tracing::instrument(skip_all, fields(num_bytes = bytes.len()))]
    pub fn load(bytes: &[u8]) -> Result<Document, AutomergeError> {
        let body = DocumentBody::decode(bytes)?;
        trace!(num_changes = body.changes.len(), num_actors = body.actors.len(), "decoded document body");
        let mut doc = Document {
            actors: body.actors,
            blocks: Blocks::from_ops(body.ops, block::DEFAULT_MAX_OPS_PER_BLOCK),
            graph: ChangeGraph::new(),
        };
        let mut next_start_op = 1u64;
        let mut hashes: Vec<ChangeHash> = Vec::with_capacity(body.changes.len());
        for meta in &body.changes {
            let start_op = next_start_op;
            next_start_op = meta.max_op + 1;
            let ops = doc.reconstruct_change_ops(meta.actor, start_op, meta.max_op);
            let deps: Vec<ChangeHash> = meta.deps.iter().map(|&idx| hashes[idx]).collect();
            let change = doc.build_change(
                meta.actor,
                meta.seq,
                start_op,
                meta.time,
                meta.message.clone(),
                deps.clone(),
                meta.extra_bytes.clone(),
                &ops,
            );
            let (wire, hash) = change.encode();
            hashes.push(hash);
            doc.graph
                .record_applied(
                    hash,
                    meta.actor,
                    meta.seq,
                    start_op,
                    meta.max_op,
                    meta.time,
                    meta.message.clone(),
                    deps,
                    meta.extra_bytes.clone(),
                    wire,
                )
                .map_err(|e| {
                    let actor = doc.actors[meta.actor].clone();
                    match e {
                        change_graph::SeqError::Gap { expected, found } => {
                            AutomergeError::SeqGap { actor, expected, found }
                        }
                        change_graph::SeqError::Reuse { seq } => {
                            AutomergeError::SeqReuse { actor, seq }
                        }
                    }
                })?;
        }
        Ok(doc)
    }

    /// The full current state as one patch, as if every object were being
    /// observed for the first time.
    pub fn get_patch(&self) -> Patch {
        let mut patch = merge::full_patch(&self.blocks);
        patch.deps = self.graph.heads().to_vec();
        patch
    }

    pub fn get_heads(&self) -> Vec<ChangeHash> {
        self.graph.heads().to_vec()
    }

    /// The op counter a fresh local change would start at, without actually
    /// building one — lets a caller predict the ids its own new ops will
    /// get (e.g. to insert into a list it creates in the same change)
    /// before calling `apply_local_change`.
    pub fn peek_next_op_counter(&self) -> u64 {
        self.graph.next_op_counter()
    }

    /// The global actor-table index `actor` would resolve to, without
    /// mutating the document. Pairs with `peek_next_op_counter` to predict
    /// the `OpId`s a not-yet-applied local change will be assigned.
    pub fn peek_actor_index(&self, actor: &ActorId) -> usize {
        match self.actors.binary_search(actor) {
            Ok(idx) | Err(idx) => idx,
        }
    }

    /// Every change the caller doesn't already have, transitively from
    /// `have_deps`. Fails with `UnknownHash` if any hash in `have_deps`
    /// isn't a change this document actually has, rather than silently
    /// treating it as "caller has nothing beyond this".
    pub fn get_changes(&self, have_deps: &[ChangeHash]) -> Result<Vec<Vec<u8>>, AutomergeError> {
        for hash in have_deps {
            if !self.graph.contains(hash) {
                return Err(AutomergeError::UnknownHash(*hash));
            }
        }
        Ok(self
            .graph
            .changes_since(have_deps)
            .into_iter()
            .map(|r| r.bytes.clone())
            .collect())
    }

    pub fn get_change_by_hash(&self, hash: &ChangeHash) -> Option<Vec<u8>> {
        self.graph.get_by_hash(hash).map(|r| r.bytes.clone())
    }

    pub fn get_missing_deps(&self, heads: &[ChangeHash]) -> Vec<ChangeHash> {
        self.graph.get_missing_deps(heads)
    }
}

/// A cheap duplicate-detector over an encoded change's framing, distinct
/// from its full hash — reads the checksum straight out of the wire bytes
/// without re-hashing the body.
pub fn change_checksum(wire: &[u8]) -> Result<[u8; 4], AutomergeError> {
    crate::storage::chunk::checksum_from_wire(wire)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smol_str::SmolStr;

    fn actor(hex: &str) -> ActorId {
        ActorId::from_hex(hex).unwrap()
    }

    fn set_root(actor_idx_ops: &mut Vec<LocalOp>, key: &str, value: crate::types::ScalarValue) {
        actor_idx_ops.push(LocalOp {
            obj: ObjId::Root,
            key: Key::Map(SmolStr::from(key)),
            insert: false,
            action: OpType::Set(value),
            pred: vec![],
        });
    }

    #[test]
    fn local_change_round_trips_through_apply_changes_on_a_second_replica() {
        let mut doc_a = Document::init();
        let mut ops = Vec::new();
        set_root(&mut ops, "x", crate::types::ScalarValue::Uint(1));
        let local = LocalChange {
            actor: actor("01"),
            seq: 1,
            time: 0,
            message: None,
            extra_bytes: vec![],
            ops,
        };
        let (patch, wire) = doc_a.apply_local_change(local).unwrap();
        assert!(!patch.objects.is_empty());

        let mut doc_b = Document::init();
        let patch_b = doc_b.apply_changes(vec![wire]).unwrap();
        assert_eq!(patch_b.objects, doc_a.get_patch().objects);
    }

    #[test]
    fn save_and_load_round_trips_visible_state() {
        let mut doc = Document::init();
        let mut ops = Vec::new();
        set_root(&mut ops, "x", crate::types::ScalarValue::Uint(7));
        doc.apply_local_change(LocalChange {
            actor: actor("01"),
            seq: 1,
            time: 0,
            message: None,
            extra_bytes: vec![],
            ops,
        })
        .unwrap();

        let bytes = doc.save();
        let loaded = Document::load(&bytes).unwrap();
        assert_eq!(loaded.get_patch().objects, doc.get_patch().objects);
        assert_eq!(loaded.get_heads(), doc.get_heads());
    }

    #[test]
    fn applying_the_same_change_twice_is_a_no_op() {
        let mut doc = Document::init();
        let mut ops = Vec::new();
        set_root(&mut ops, "x", crate::types::ScalarValue::Uint(1));
        let (_, wire) = doc
            .apply_local_change(LocalChange {
                actor: actor("01"),
                seq: 1,
                time: 0,
                message: None,
                extra_bytes: vec![],
                ops,
            })
            .unwrap();
        let before = doc.get_patch().objects;
        let patch = doc.apply_changes(vec![wire]).unwrap();
        assert!(patch.objects.is_empty());
        assert_eq!(doc.get_patch().objects, before);
    }

    #[test]
    fn applying_a_change_twice_in_sequence_rejects_the_repeated_seq() {
        let mut doc = Document::init();
        let mut ops = Vec::new();
        set_root(&mut ops, "x", crate::types::ScalarValue::Uint(1));
        doc.apply_local_change(LocalChange {
            actor: actor("01"),
            seq: 1,
            time: 0,
            message: None,
            extra_bytes: vec![],
            ops: ops.clone(),
        })
        .unwrap();
        let err = doc
            .apply_local_change(LocalChange {
                actor: actor("01"),
                seq: 1,
                time: 0,
                message: None,
                extra_bytes: vec![],
                ops,
            })
            .unwrap_err();
        assert_eq!(err, AutomergeError::AlreadyApplied { actor: actor("01"), seq: 1 });
    }

    #[test]
    fn translate_change_rejects_an_out_of_range_actor_index_instead_of_panicking() {
        let mut doc = Document::init();
        let malformed = change::Change {
            actors: vec![actor("01")],
            seq: 1,
            start_op: 1,
            time: 0,
            message: None,
            deps: vec![],
            ops: vec![change::ChangeOp {
                obj: ObjId::Id(OpId::new(1, 5)),
                key: Key::Map(SmolStr::from("x")),
                insert: false,
                action: OpType::Set(crate::types::ScalarValue::Uint(1)),
                pred: vec![],
            }],
            extra_bytes: vec![],
        };
        let err = doc.translate_change(&malformed).unwrap_err();
        assert_eq!(err, AutomergeError::UnknownActor(5));
    }
}
