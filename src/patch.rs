//! Patch/edit types returned from every mutating operation: a tree of
//! per-object edits the caller applies to reconstruct visible state.
//!
//! `Edits::append_edit` collapses adjacent edits as they're appended:
//! consecutive single-insert runs coalesce into one `MultiInsert`, and
//! adjacent `Remove`s merge their counts.

use std::collections::BTreeMap;
use std::mem;

use smol_str::SmolStr;

use crate::types::{ElemId, ObjId, OpId, ScalarValue};

/// The value side of a conflict map entry: either a scalar, or a reference
/// to a nested object (whose own edits live in `Patch::objects`).
#[derive(Clone, Debug, PartialEq)]
pub enum PatchValue {
    Scalar(ScalarValue),
    Object(ObjId),
}

/// One entry in a map/table's `props[key]` conflict map.
pub type Conflicts = BTreeMap<OpId, PatchValue>;

#[derive(Clone, Debug, PartialEq)]
pub enum Edit {
    Insert {
        index: usize,
        elem_id: ElemId,
        op_id: OpId,
        value: PatchValue,
    },
    MultiInsert {
        index: usize,
        elem_id: ElemId,
        values: Vec<ScalarValue>,
    },
    Update {
        index: usize,
        op_id: OpId,
        value: PatchValue,
    },
    Remove {
        index: usize,
        count: usize,
    },
}

/// An ordered, self-collapsing sequence of list/text edits.
#[derive(Debug, Default)]
pub struct Edits(Vec<Edit>);

impl Edits {
    pub fn new() -> Self {
        Edits(Vec::new())
    }

    /// Appends `edit`, collapsing it into the previous edit when the shapes
    /// allow it: consecutive single-char inserts by the same actor at
    /// consecutive op ids become a `MultiInsert`, and adjacent `Remove`s at
    /// the same index accumulate their count.
    pub fn append_edit(&mut self, edit: Edit) {
        if let Some(mut last) = self.0.last_mut() {
            match (&mut last, edit) {
                (
                    Edit::Insert {
                        index,
                        elem_id,
                        op_id,
                        value: PatchValue::Scalar(value),
                    },
                    Edit::Insert {
                        index: next_index,
                        elem_id: next_elem_id,
                        op_id: next_op_id,
                        value: PatchValue::Scalar(next_value),
                    },
                ) if *index + 1 == next_index
                    && *elem_id == ElemId::Id(*op_id)
                    && next_elem_id == ElemId::Id(next_op_id)
                    && mem::discriminant(value) == mem::discriminant(&next_value)
                    && op_id.delta(&next_op_id, 1) =>
                {
                    let first = mem::replace(value, ScalarValue::Null);
                    *last = Edit::MultiInsert {
                        index: *index,
                        elem_id: *elem_id,
                        values: vec![first, next_value],
                    };
                }
                (
                    Edit::MultiInsert {
                        index,
                        elem_id,
                        values,
                    },
                    Edit::Insert {
                        index: next_index,
                        elem_id: next_elem_id,
                        op_id,
                        value: PatchValue::Scalar(value),
                    },
                ) if *index + values.len() == next_index
                    && next_elem_id == ElemId::Id(op_id)
                    && mem::discriminant(&values[0]) == mem::discriminant(&value)
                    && elem_id.opid().unwrap().delta(&op_id, values.len() as u64) =>
                {
                    values.push(value);
                }
                (
                    Edit::Remove { index, count },
                    Edit::Remove {
                        index: next_index,
                        count: next_count,
                    },
                ) if *index == next_index => {
                    *count += next_count;
                }
                (_, edit) => self.0.push(edit),
            }
        } else {
            self.0.push(edit);
        }
    }

    pub fn into_vec(self) -> Vec<Edit> {
        self.0
    }

    pub fn as_slice(&self) -> &[Edit] {
        &self.0
    }
}

/// A map/table's per-key conflict maps.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MapPatch {
    pub props: BTreeMap<SmolStr, Conflicts>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectPatch {
    Map(MapPatch),
    /// List/text: edits in order, plus the resolved conflict map per index
    /// for elements with more than one surviving value.
    Seq(Vec<Edit>),
}

/// The full patch tree returned by an apply/load operation: one entry per
/// touched object, linked by `ObjId`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Patch {
    pub objects: BTreeMap<ObjId, ObjectPatchOwned>,
    pub deps: Vec<crate::types::ChangeHash>,
}

/// Owned variant of [`ObjectPatch`] stored in the patch tree (kept
/// separately so `Edits`, which isn't `Clone`/`PartialEq` by default given
/// its collapsing state, doesn't leak into the public patch shape).
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectPatchOwned {
    Map(MapPatch),
    Seq(Vec<Edit>),
}

impl From<ObjectPatch> for ObjectPatchOwned {
    fn from(p: ObjectPatch) -> Self {
        match p {
            ObjectPatch::Map(m) => ObjectPatchOwned::Map(m),
            ObjectPatch::Seq(e) => ObjectPatchOwned::Seq(e),
        }
    }
}
