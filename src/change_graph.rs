//! Causal readiness and the hash graph: per-actor sequence tracking, the
//! pending-change queue, head tracking, and change lookup by hash.
//!
//! The hash-indexed maps are filled lazily: `load` only needs each change's
//! *index* into `deps`, and `compute_hash_graph` resolves those into real
//! hashes the first time a caller needs hash-keyed lookups.

use std::collections::VecDeque;

use fxhash::FxHashMap;

use crate::types::ChangeHash;

/// A sequence-number violation for one actor index, reported in terms the
/// caller (which owns the actor table) can turn into `AutomergeError::SeqGap`
/// / `SeqReuse` with the actual `ActorId` filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SeqError {
    Gap { expected: u64, found: u64 },
    Reuse { seq: u64 },
}

/// One applied change's metadata, independent of its ops (which live in the
/// block store once merged).
#[derive(Clone, Debug)]
pub(crate) struct ChangeRecord {
    pub(crate) hash: ChangeHash,
    pub(crate) actor: usize,
    pub(crate) seq: u64,
    pub(crate) start_op: u64,
    pub(crate) max_op: u64,
    pub(crate) time: i64,
    pub(crate) message: Option<String>,
    /// Resolved once `compute_hash_graph` has run; `None` means only
    /// `deps_index` (indices into `changes`) is known so far.
    pub(crate) deps: Option<Vec<ChangeHash>>,
    pub(crate) deps_index: Vec<usize>,
    pub(crate) extra_bytes: Vec<u8>,
    pub(crate) bytes: Vec<u8>,
}

/// A change that arrived before its dependencies; held until they apply.
#[derive(Clone)]
pub(crate) struct PendingChange {
    pub(crate) hash: ChangeHash,
    pub(crate) deps: Vec<ChangeHash>,
    pub(crate) bytes: Vec<u8>,
}

#[derive(Default, Clone)]
pub(crate) struct ChangeGraph {
    pub(crate) changes: Vec<ChangeRecord>,
    change_index_by_hash: FxHashMap<ChangeHash, usize>,
    dependents_by_hash: FxHashMap<ChangeHash, Vec<ChangeHash>>,
    hashes_by_actor: FxHashMap<usize, Vec<ChangeHash>>,
    clock: FxHashMap<usize, u64>,
    heads: Vec<ChangeHash>,
    queue: VecDeque<PendingChange>,
    graph_complete: bool,
}

impl ChangeGraph {
    pub(crate) fn new() -> Self {
        ChangeGraph {
            graph_complete: true,
            ..Default::default()
        }
    }

    pub(crate) fn heads(&self) -> &[ChangeHash] {
        &self.heads
    }

    pub(crate) fn clock_for(&self, actor: usize) -> u64 {
        *self.clock.get(&actor).unwrap_or(&0)
    }

    pub(crate) fn get_by_hash(&self, hash: &ChangeHash) -> Option<&ChangeRecord> {
        self.change_index_by_hash
            .get(hash)
            .map(|&i| &self.changes[i])
    }

    pub(crate) fn contains(&self, hash: &ChangeHash) -> bool {
        self.change_index_by_hash.contains_key(hash)
    }

    /// A change is causally ready iff every hash in its deps has already
    /// been applied.
    pub(crate) fn is_ready(&self, deps: &[ChangeHash]) -> bool {
        deps.iter().all(|d| self.change_index_by_hash.contains_key(d))
    }

    /// Records a change whose deps are all satisfied, updating the clock,
    /// dependents index, and heads.
    pub(crate) fn record_applied(
        &mut self,
        hash: ChangeHash,
        actor: usize,
        seq: u64,
        start_op: u64,
        max_op: u64,
        time: i64,
        message: Option<String>,
        deps: Vec<ChangeHash>,
        extra_bytes: Vec<u8>,
        bytes: Vec<u8>,
    ) -> Result<(), SeqError> {
        let expected = self.clock_for(actor) + 1;
        if seq < expected {
            if let Some(existing) = self
                .hashes_by_actor
                .get(&actor)
                .and_then(|hs| hs.get((seq - 1) as usize))
            {
                if *existing != hash {
                    return Err(SeqError::Reuse { seq });
                }
                return Ok(());
            }
        } else if seq > expected {
            return Err(SeqError::Gap {
                expected,
                found: seq,
            });
        }

        let deps_index: Vec<usize> = deps
            .iter()
            .map(|d| self.change_index_by_hash[d])
            .collect();
        let index = self.changes.len();
        self.changes.push(ChangeRecord {
            hash,
            actor,
            seq,
            start_op,
            max_op,
            time,
            message,
            deps: Some(deps.clone()),
            deps_index,
            extra_bytes,
            bytes,
        });
        self.change_index_by_hash.insert(hash, index);
        self.hashes_by_actor.entry(actor).or_default().push(hash);
        self.clock.insert(actor, seq);

        for dep in &deps {
            self.dependents_by_hash.entry(*dep).or_default().push(hash);
        }
        self.heads.retain(|h| !deps.contains(h));
        self.heads.push(hash);
        self.heads.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(())
    }

    pub(crate) fn enqueue(&mut self, pending: PendingChange) {
        self.queue.push_back(pending);
    }

    pub(crate) fn queued_contains(&self, hash: &ChangeHash) -> bool {
        self.queue.iter().any(|p| p.hash == *hash)
    }

    /// The hash of the given actor's `seq`-th change, if applied — used by
    /// the local-change path to strip an actor's own previous head from the
    /// patch it reports back to the caller.
    pub(crate) fn hash_for_actor_seq(&self, actor: usize, seq: u64) -> Option<ChangeHash> {
        self.hashes_by_actor
            .get(&actor)
            .and_then(|hs| hs.get((seq - 1) as usize))
            .copied()
    }

    /// The counter a freshly authored op should start at: one past the
    /// highest `maxOp` seen so far (op counters are global, not per-actor).
    pub(crate) fn next_op_counter(&self) -> u64 {
        self.changes
            .iter()
            .map(|c| c.max_op)
            .max()
            .map(|m| m + 1)
            .unwrap_or(1)
    }

    /// Drains the queue, returning changes that are now ready (in FIFO
    /// order); callers loop calling this until it returns empty, since an
    /// application can unblock several in a row.
    pub(crate) fn drain_ready(&mut self) -> Vec<PendingChange> {
        let mut ready = Vec::new();
        let mut remaining = VecDeque::new();
        while let Some(pending) = self.queue.pop_front() {
            if self.is_ready(&pending.deps) {
                ready.push(pending);
            } else {
                remaining.push_back(pending);
            }
        }
        self.queue = remaining;
        ready
    }

    pub(crate) fn get_missing_deps(&self, heads: &[ChangeHash]) -> Vec<ChangeHash> {
        let mut frontier: Vec<ChangeHash> = if heads.is_empty() {
            self.heads.clone()
        } else {
            heads.to_vec()
        };
        let mut missing = Vec::new();
        let mut seen = std::collections::HashSet::new();
        while let Some(h) = frontier.pop() {
            if !seen.insert(h) {
                continue;
            }
            match self.get_by_hash(&h) {
                Some(_) => {}
                None => {
                    if !missing.contains(&h) {
                        missing.push(h);
                    }
                }
            }
        }
        for pending in &self.queue {
            for dep in &pending.deps {
                if !self.contains(dep) && !missing.contains(dep) {
                    missing.push(*dep);
                }
            }
        }
        missing.sort_by(|a, b| a.0.cmp(&b.0));
        missing
    }

    /// Resolves every `deps_index` into concrete hashes and rebuilds the
    /// hash-indexed maps. A no-op once already complete.
    pub(crate) fn compute_hash_graph(&mut self) {
        if self.graph_complete {
            return;
        }
        for i in 0..self.changes.len() {
            if self.changes[i].deps.is_some() {
                continue;
            }
            let resolved: Vec<ChangeHash> = self.changes[i]
                .deps_index
                .iter()
                .map(|&idx| self.changes[idx].hash)
                .collect();
            for dep in &resolved {
                self.dependents_by_hash
                    .entry(*dep)
                    .or_default()
                    .push(self.changes[i].hash);
            }
            self.changes[i].deps = Some(resolved);
        }
        self.graph_complete = true;
    }

    pub(crate) fn mark_lazy(&mut self) {
        self.graph_complete = false;
    }

    /// Shifts every actor index ≥ `threshold` up by one. Called when the
    /// document's sorted actor table grows with an insertion partway
    /// through rather than an append (`doc::Document::resolve_actor`).
    pub(crate) fn remap_actor_indices(&mut self, threshold: usize) {
        for change in &mut self.changes {
            if change.actor >= threshold {
                change.actor += 1;
            }
        }
        let hashes_by_actor = std::mem::take(&mut self.hashes_by_actor);
        for (actor, hashes) in hashes_by_actor {
            let actor = if actor >= threshold { actor + 1 } else { actor };
            self.hashes_by_actor.insert(actor, hashes);
        }
        let clock = std::mem::take(&mut self.clock);
        for (actor, seq) in clock {
            let actor = if actor >= threshold { actor + 1 } else { actor };
            self.clock.insert(actor, seq);
        }
    }

    /// Changes the caller doesn't already have, transitively from
    /// `have_deps`: walks the ancestor closure of `have_deps` to build a
    /// per-actor clock (the highest `seq` already known for each actor),
    /// then returns every change whose `seq` is beyond that actor's clock.
    /// A literal hash-membership filter would wrongly re-return changes the
    /// caller already has transitively (e.g. a caller that only passes its
    /// own most recent known hash, implying everything that hash depends
    /// on).
    pub(crate) fn changes_since(&self, have_deps: &[ChangeHash]) -> Vec<&ChangeRecord> {
        let mut clock: FxHashMap<usize, u64> = FxHashMap::default();
        let mut seen: std::collections::HashSet<ChangeHash> = std::collections::HashSet::new();
        let mut frontier: Vec<ChangeHash> = have_deps.to_vec();
        while let Some(hash) = frontier.pop() {
            if !seen.insert(hash) {
                continue;
            }
            let Some(&idx) = self.change_index_by_hash.get(&hash) else {
                continue;
            };
            let record = &self.changes[idx];
            let entry = clock.entry(record.actor).or_insert(0);
            if record.seq > *entry {
                *entry = record.seq;
            }
            match &record.deps {
                Some(deps) => frontier.extend(deps.iter().copied()),
                None => frontier.extend(record.deps_index.iter().map(|&i| self.changes[i].hash)),
            }
        }
        self.changes
            .iter()
            .filter(|c| c.seq > *clock.get(&c.actor).unwrap_or(&0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(b: u8) -> ChangeHash {
        ChangeHash([b; 32])
    }

    #[test]
    fn heads_track_unsuperseded_changes() {
        let mut g = ChangeGraph::new();
        g.record_applied(hash(1), 0, 1, 1, 1, 0, None, vec![], vec![], vec![])
            .unwrap();
        assert_eq!(g.heads(), &[hash(1)]);
        g.record_applied(hash(2), 0, 2, 2, 2, 0, None, vec![hash(1)], vec![], vec![])
            .unwrap();
        assert_eq!(g.heads(), &[hash(2)]);
    }

    #[test]
    fn queue_drains_once_deps_satisfied() {
        let mut g = ChangeGraph::new();
        g.enqueue(PendingChange {
            hash: hash(2),
            deps: vec![hash(1)],
            bytes: vec![],
        });
        assert!(g.drain_ready().is_empty());
        g.record_applied(hash(1), 0, 1, 1, 1, 0, None, vec![], vec![], vec![])
            .unwrap();
        let ready = g.drain_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].hash, hash(2));
    }

    #[test]
    fn missing_deps_reports_unsatisfied_heads() {
        let mut g = ChangeGraph::new();
        let missing = g.get_missing_deps(&[hash(9)]);
        assert_eq!(missing, vec![hash(9)]);
    }

    #[test]
    fn changes_since_omits_changes_implied_transitively() {
        let mut g = ChangeGraph::new();
        g.record_applied(hash(1), 0, 1, 1, 1, 0, None, vec![], vec![], vec![])
            .unwrap();
        g.record_applied(hash(2), 0, 2, 2, 2, 0, None, vec![hash(1)], vec![], vec![])
            .unwrap();
        g.record_applied(hash(3), 0, 3, 3, 3, 0, None, vec![hash(2)], vec![], vec![])
            .unwrap();

        // Passing only the tip hash implies the whole chain beneath it; a
        // literal hash-membership filter would wrongly return hash(1)/hash(2)
        // since neither equals hash(3).
        let since = g.changes_since(&[hash(3)]);
        assert!(since.is_empty());

        let since_from_root = g.changes_since(&[]);
        let mut got: Vec<ChangeHash> = since_from_root.iter().map(|c| c.hash).collect();
        got.sort_by(|a, b| a.0.cmp(&b.0));
        let mut want = vec![hash(1), hash(2), hash(3)];
        want.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(got, want);
    }
}
