//! Black-box end-to-end scenarios, exercised only through the public
//! `Document` API: concurrent edits, save/load fidelity, merge order
//! independence, idempotence, and malformed-input rejection.

use smol_str::SmolStr;
use weft::{ActorId, Document, ElemId, Key, LocalChange, LocalOp, ObjId, OpId, OpType};
use weft::patch::{Edit, ObjectPatchOwned, PatchValue};
use weft::ScalarValue;

fn actor(hex: &str) -> ActorId {
    ActorId::from_hex(hex).unwrap()
}

fn map_set(key: &str, value: ScalarValue, pred: Vec<OpId>) -> LocalOp {
    LocalOp {
        obj: ObjId::Root,
        key: Key::Map(SmolStr::from(key)),
        insert: false,
        action: OpType::Set(value),
        pred,
    }
}

fn change(actor: ActorId, seq: u64, ops: Vec<LocalOp>) -> LocalChange {
    LocalChange {
        actor,
        seq,
        time: 0,
        message: None,
        extra_bytes: Vec::new(),
        ops,
    }
}

fn root_map(patch: &weft::Patch) -> &std::collections::BTreeMap<SmolStr, weft::patch::Conflicts> {
    match &patch.objects[&ObjId::Root] {
        ObjectPatchOwned::Map(m) => &m.props,
        other => panic!("expected a map patch at root, got {other:?}"),
    }
}

fn single_value(conflicts: &weft::patch::Conflicts) -> &PatchValue {
    assert_eq!(conflicts.len(), 1, "expected no conflict, got {conflicts:?}");
    conflicts.values().next().unwrap()
}

/// Scenario 1: map set then overwrite.
#[test]
fn map_set_and_overwrite() {
    let a = actor("01234567");
    let mut doc = Document::init();
    doc.apply_local_change(change(
        a.clone(),
        1,
        vec![
            map_set("x", ScalarValue::Uint(3), vec![]),
            map_set("y", ScalarValue::Uint(4), vec![]),
        ],
    ))
    .unwrap();
    let x_id = OpId::new(1, 0);
    doc.apply_local_change(change(
        a.clone(),
        2,
        vec![map_set("x", ScalarValue::Uint(5), vec![x_id])],
    ))
    .unwrap();

    let patch = doc.get_patch();
    let props = root_map(&patch);
    assert_eq!(*single_value(&props[&SmolStr::from("x")]), PatchValue::Scalar(ScalarValue::Uint(5)));
    assert_eq!(*single_value(&props[&SmolStr::from("y")]), PatchValue::Scalar(ScalarValue::Uint(4)));
    assert_eq!(doc.get_changes(&[]).unwrap().len(), 2);

    let bytes = doc.save();
    let loaded = Document::load(&bytes).unwrap();
    assert_eq!(loaded.get_patch(), doc.get_patch());
    assert_eq!(loaded.get_heads(), doc.get_heads());
}

/// Scenario 2: three actors concurrently overwrite the same key.
#[test]
fn concurrent_map_writes_surface_as_conflicts() {
    let a = actor("01234567");
    let b = actor("89abcdef");
    let c = actor("ffffffff");

    let mut base = Document::init();
    let (_, c1) = base
        .apply_local_change(change(a.clone(), 1, vec![map_set("x", ScalarValue::Uint(1), vec![])]))
        .unwrap();
    let base_id = OpId::new(1, 0);

    let mut from_a = base.clone();
    let (_, wire_a) = from_a
        .apply_local_change(change(a.clone(), 2, vec![map_set("x", ScalarValue::Uint(2), vec![base_id])]))
        .unwrap();
    let mut from_b = base.clone();
    let (_, wire_b) = from_b
        .apply_local_change(change(b.clone(), 1, vec![map_set("x", ScalarValue::Uint(3), vec![base_id])]))
        .unwrap();
    let mut from_c = base.clone();
    let (_, wire_c) = from_c
        .apply_local_change(change(c.clone(), 1, vec![map_set("x", ScalarValue::Uint(4), vec![base_id])]))
        .unwrap();

    let mut merged = Document::init();
    merged.apply_changes(vec![c1, wire_a, wire_b, wire_c]).unwrap();

    let patch = merged.get_patch();
    let props = root_map(&patch);
    let conflicts = &props[&SmolStr::from("x")];
    assert_eq!(conflicts.len(), 3);
    let values: Vec<&PatchValue> = conflicts.values().collect();
    assert!(values.contains(&&PatchValue::Scalar(ScalarValue::Uint(2))));
    assert!(values.contains(&&PatchValue::Scalar(ScalarValue::Uint(3))));
    assert!(values.contains(&&PatchValue::Scalar(ScalarValue::Uint(4))));
    // actors sort ascending by their hex bytes: 01 < 89 < ff.
    let ids: Vec<&OpId> = conflicts.keys().collect();
    assert_eq!(ids, vec![&OpId::new(2, 0), &OpId::new(2, 1), &OpId::new(2, 2)]);
}

/// Scenario 3: concurrent head-anchored text insertions, fed to the merge
/// target out of causal order to exercise the causal-readiness queue too.
#[test]
fn text_insertions_at_head_merge_deterministically_and_queue_when_out_of_order() {
    let a = actor("01234567");
    let b = actor("89abcdef");

    let mut doc = Document::init();
    let (_, c1) = doc
        .apply_local_change(change(
            a.clone(),
            1,
            vec![LocalOp {
                obj: ObjId::Root,
                key: Key::Map(SmolStr::from("t")),
                insert: false,
                action: OpType::MakeText,
                pred: vec![],
            }],
        ))
        .unwrap();
    let text_id = ObjId::Id(OpId::new(1, 0));

    let (_, c2) = doc
        .apply_local_change(change(
            a.clone(),
            2,
            vec![LocalOp {
                obj: text_id,
                key: Key::Seq(ElemId::Head),
                insert: true,
                action: OpType::Set(ScalarValue::Str(SmolStr::from("d"))),
                pred: vec![],
            }],
        ))
        .unwrap();

    // B forks here: it has seen the text and "d", but not the next insert.
    let mut doc_b = doc.clone();

    let (_, c3) = doc
        .apply_local_change(change(
            a.clone(),
            3,
            vec![LocalOp {
                obj: text_id,
                key: Key::Seq(ElemId::Head),
                insert: true,
                action: OpType::Set(ScalarValue::Str(SmolStr::from("c"))),
                pred: vec![],
            }],
        ))
        .unwrap();

    let (_, c_b1) = doc_b
        .apply_local_change(change(
            b.clone(),
            1,
            vec![LocalOp {
                obj: text_id,
                key: Key::Seq(ElemId::Head),
                insert: true,
                action: OpType::Set(ScalarValue::Str(SmolStr::from("a"))),
                pred: vec![],
            }],
        ))
        .unwrap();
    let a_char_id = OpId::new(3, 1);
    let (_, c_b2) = doc_b
        .apply_local_change(change(
            b.clone(),
            2,
            vec![LocalOp {
                obj: text_id,
                key: Key::Seq(ElemId::Id(a_char_id)),
                insert: true,
                action: OpType::Set(ScalarValue::Str(SmolStr::from("b"))),
                pred: vec![],
            }],
        ))
        .unwrap();

    let mut merged = Document::init();
    // c3 depends on c2's hash and c_b2 depends on c_b1's: both arrive before
    // their dependency, so they must queue rather than error.
    let patch = merged.apply_changes(vec![c1, c3, c_b2, c2, c_b1]).unwrap();
    assert!(patch.objects.contains_key(&text_id), "queued changes never unblocked");

    let full = merged.get_patch();
    let text: String = match &full.objects[&text_id] {
        ObjectPatchOwned::Seq(edits) => edits
            .iter()
            .map(|e| match e {
                Edit::Insert { value: PatchValue::Scalar(ScalarValue::Str(s)), .. } => s.to_string(),
                other => panic!("expected scalar string inserts, got {other:?}"),
            })
            .collect(),
        other => panic!("expected a seq patch, got {other:?}"),
    };
    assert_eq!(text, "abcd");
}

/// Scenario 4: counter creation, increments, then deletion.
#[test]
fn counter_increments_then_delete_clears_the_entry() {
    let a = actor("01234567");
    let mut doc = Document::init();
    doc.apply_local_change(change(a.clone(), 1, vec![map_set("counter", ScalarValue::Counter(1), vec![])]))
        .unwrap();
    let counter_id = OpId::new(1, 0);

    let (patch2, _) = doc
        .apply_local_change(change(
            a.clone(),
            2,
            vec![LocalOp {
                obj: ObjId::Root,
                key: Key::Map(SmolStr::from("counter")),
                insert: false,
                action: OpType::Inc(2),
                pred: vec![counter_id],
            }],
        ))
        .unwrap();
    assert_eq!(
        *single_value(&root_map(&patch2)[&SmolStr::from("counter")]),
        PatchValue::Scalar(ScalarValue::Counter(3))
    );

    let (patch3, _) = doc
        .apply_local_change(change(
            a.clone(),
            3,
            vec![LocalOp {
                obj: ObjId::Root,
                key: Key::Map(SmolStr::from("counter")),
                insert: false,
                action: OpType::Inc(3),
                pred: vec![counter_id],
            }],
        ))
        .unwrap();
    assert_eq!(
        *single_value(&root_map(&patch3)[&SmolStr::from("counter")]),
        PatchValue::Scalar(ScalarValue::Counter(6))
    );

    let (patch4, _) = doc
        .apply_local_change(change(
            a.clone(),
            4,
            vec![LocalOp {
                obj: ObjId::Root,
                key: Key::Map(SmolStr::from("counter")),
                insert: false,
                action: OpType::Del,
                pred: vec![counter_id],
            }],
        ))
        .unwrap();
    let entry = &root_map(&patch4)[&SmolStr::from("counter")];
    assert!(entry.is_empty(), "deleted counter should leave an empty conflict map in the incremental patch");

    // a full reconstruction omits keys with no surviving value entirely.
    let full = doc.get_patch();
    match &full.objects.get(&ObjId::Root) {
        Some(ObjectPatchOwned::Map(m)) => assert!(!m.props.contains_key(&SmolStr::from("counter"))),
        None => {}
        other => panic!("unexpected root patch shape: {other:?}"),
    }
}

/// Scenario 5: a concurrent delete and update of the same list element; the
/// update wins regardless of application order (no remove is reported).
#[test]
fn concurrent_delete_and_update_revives_the_element() {
    let a = actor("01234567");
    let b = actor("89abcdef");

    let mut base = Document::init();
    base.apply_local_change(change(
        a.clone(),
        1,
        vec![
            LocalOp {
                obj: ObjId::Root,
                key: Key::Map(SmolStr::from("items")),
                insert: false,
                action: OpType::MakeList,
                pred: vec![],
            },
            LocalOp {
                obj: ObjId::Id(OpId::new(1, 0)),
                key: Key::Seq(ElemId::Head),
                insert: true,
                action: OpType::Set(ScalarValue::Uint(1)),
                pred: vec![],
            },
        ],
    ))
    .unwrap();
    let list_id = ObjId::Id(OpId::new(1, 0));
    let elem_id = OpId::new(2, 0);

    let mut doc_del = base.clone();
    let (_, del_wire) = doc_del
        .apply_local_change(change(
            a.clone(),
            2,
            vec![LocalOp {
                obj: list_id,
                key: Key::Seq(ElemId::Id(elem_id)),
                insert: false,
                action: OpType::Del,
                pred: vec![elem_id],
            }],
        ))
        .unwrap();

    let mut doc_set = base.clone();
    let (_, set_wire) = doc_set
        .apply_local_change(change(
            b.clone(),
            1,
            vec![LocalOp {
                obj: list_id,
                key: Key::Seq(ElemId::Id(elem_id)),
                insert: false,
                action: OpType::Set(ScalarValue::Uint(2)),
                pred: vec![elem_id],
            }],
        ))
        .unwrap();

    let base_bytes = base.save();
    for order in [[del_wire.clone(), set_wire.clone()], [set_wire, del_wire]] {
        let mut merged = Document::load(&base_bytes).unwrap();
        merged.apply_changes(order.to_vec()).unwrap();
        let patch = merged.get_patch();
        match &patch.objects[&list_id] {
            ObjectPatchOwned::Seq(edits) => {
                assert!(
                    edits.iter().all(|e| !matches!(e, Edit::Remove { .. })),
                    "a concurrent update should revive the element, not remove it: {edits:?}"
                );
                let values: Vec<&PatchValue> = edits
                    .iter()
                    .filter_map(|e| match e {
                        Edit::Update { value, .. } | Edit::Insert { value, .. } => Some(value),
                        _ => None,
                    })
                    .collect();
                assert_eq!(values, vec![&PatchValue::Scalar(ScalarValue::Uint(2))]);
            }
            other => panic!("expected a seq patch, got {other:?}"),
        }
    }
}

/// Scenario 6 (patch-visible part): a long run of consecutive same-actor
/// single-char inserts coalesces into one `MultiInsert` edit. The block-split
/// and Bloom-membership parts of this scenario are internal storage details
/// covered by `block.rs`'s own unit tests, not the public API.
#[test]
fn long_consecutive_insert_run_coalesces_into_one_multi_insert() {
    let a = actor("01234567");
    let mut doc = Document::init();
    let start = doc.peek_next_op_counter();
    let actor_idx = doc.peek_actor_index(&a);

    const COUNT: usize = 610;
    let mut ops = vec![LocalOp {
        obj: ObjId::Root,
        key: Key::Map(SmolStr::from("t")),
        insert: false,
        action: OpType::MakeText,
        pred: vec![],
    }];
    for i in 1..=COUNT {
        let anchor = if i == 1 {
            ElemId::Head
        } else {
            ElemId::Id(OpId::new(start + i as u64 - 1, actor_idx))
        };
        ops.push(LocalOp {
            obj: ObjId::Id(OpId::new(start, actor_idx)),
            key: Key::Seq(anchor),
            insert: true,
            action: OpType::Set(ScalarValue::Str(SmolStr::from("x"))),
            pred: vec![],
        });
    }
    doc.apply_local_change(change(a, 1, ops)).unwrap();

    let text_id = ObjId::Id(OpId::new(start, actor_idx));
    let patch = doc.get_patch();
    match &patch.objects[&text_id] {
        ObjectPatchOwned::Seq(edits) => {
            assert_eq!(edits.len(), 1, "expected the whole run to coalesce: {edits:?}");
            match &edits[0] {
                Edit::MultiInsert { values, .. } => assert_eq!(values.len(), COUNT),
                other => panic!("expected a MultiInsert, got {other:?}"),
            }
        }
        other => panic!("expected a seq patch, got {other:?}"),
    }
}

/// Save/load fidelity: a document reloaded from its own bytes reports the
/// same patch, heads, and change history as the original.
#[test]
fn save_load_fidelity_across_mixed_object_types() {
    let a = actor("01234567");
    let mut doc = Document::init();
    doc.apply_local_change(change(
        a.clone(),
        1,
        vec![
            map_set("name", ScalarValue::Str(SmolStr::from("doc")), vec![]),
            LocalOp {
                obj: ObjId::Root,
                key: Key::Map(SmolStr::from("tags")),
                insert: false,
                action: OpType::MakeList,
                pred: vec![],
            },
        ],
    ))
    .unwrap();
    let list_id = ObjId::Id(OpId::new(2, 0));
    doc.apply_local_change(change(
        a,
        2,
        vec![LocalOp {
            obj: list_id,
            key: Key::Seq(ElemId::Head),
            insert: true,
            action: OpType::Set(ScalarValue::Str(SmolStr::from("rust"))),
            pred: vec![],
        }],
    ))
    .unwrap();

    let bytes = doc.save();
    let loaded = Document::load(&bytes).unwrap();
    assert_eq!(loaded.get_patch(), doc.get_patch());
    assert_eq!(loaded.get_heads(), doc.get_heads());
    assert_eq!(loaded.get_changes(&[]).unwrap().len(), doc.get_changes(&[]).unwrap().len());
    for change_bytes in doc.get_changes(&[]).unwrap() {
        let hash = weft::change_checksum(&change_bytes).unwrap();
        assert_eq!(hash.len(), 4);
    }
}

/// Order independence: two documents that apply the same causally-independent
/// change set in different orders converge to the same state (map conflicts,
/// list contents, and heads) — the merge algorithm's defining guarantee. We
/// compare converged state rather than raw `save()` bytes: `save()` does not
/// canonically reorder the change history by hash, only the head set, so two
/// different application orders can still serialise to different bytes even
/// though the documents are state-equivalent (documented in `DESIGN.md`).
#[test]
fn applying_independent_changes_in_different_orders_converges() {
    let a = actor("01234567");
    let b = actor("89abcdef");
    let mut base = Document::init();
    let (_, c1) = base
        .apply_local_change(change(a.clone(), 1, vec![map_set("x", ScalarValue::Uint(1), vec![])]))
        .unwrap();
    let base_id = OpId::new(1, 0);
    let mut from_a = base.clone();
    let (_, wire_a) = from_a
        .apply_local_change(change(a, 2, vec![map_set("x", ScalarValue::Uint(2), vec![base_id])]))
        .unwrap();
    let mut from_b = base.clone();
    let (_, wire_b) = from_b
        .apply_local_change(change(b, 1, vec![map_set("x", ScalarValue::Uint(3), vec![base_id])]))
        .unwrap();

    let mut forward = Document::init();
    forward.apply_changes(vec![c1.clone(), wire_a.clone(), wire_b.clone()]).unwrap();
    let mut backward = Document::init();
    backward.apply_changes(vec![c1, wire_b, wire_a]).unwrap();

    assert_eq!(forward.get_patch(), backward.get_patch());
    assert_eq!(forward.get_heads(), backward.get_heads());
}

/// Idempotence: reapplying an already-applied change is a no-op.
#[test]
fn reapplying_a_change_is_a_no_op() {
    let a = actor("01234567");
    let mut doc = Document::init();
    let (_, wire) = doc
        .apply_local_change(change(a, 1, vec![map_set("x", ScalarValue::Uint(1), vec![])]))
        .unwrap();
    let before = doc.get_patch();
    let patch = doc.apply_changes(vec![wire.clone(), wire]).unwrap();
    assert!(patch.objects.is_empty());
    assert_eq!(doc.get_patch(), before);
}

/// A dangling pred is rejected and the document is left unchanged.
#[test]
fn applying_a_change_with_a_dangling_pred_leaves_the_document_unchanged() {
    let a = actor("01234567");
    let mut doc = Document::init();
    doc.apply_local_change(change(a.clone(), 1, vec![map_set("x", ScalarValue::Uint(1), vec![])]))
        .unwrap();
    let before = doc.save();

    let phantom = OpId::new(99, 0);
    let err = doc
        .apply_local_change(change(a, 2, vec![map_set("x", ScalarValue::Uint(2), vec![phantom])]))
        .unwrap_err();
    assert!(matches!(err, weft::AutomergeError::DanglingPred(_)));
    assert_eq!(doc.save(), before);
}

/// `get_changes` rejects a hash the document never saw rather than silently
/// treating it as "caller has nothing beyond this".
#[test]
fn get_changes_rejects_an_unknown_have_dep_hash() {
    let a = actor("01234567");
    let mut doc = Document::init();
    doc.apply_local_change(change(a, 1, vec![map_set("x", ScalarValue::Uint(1), vec![])]))
        .unwrap();

    let bogus = weft::ChangeHash([7u8; 32]);
    let err = doc.get_changes(&[bogus]).unwrap_err();
    assert!(matches!(err, weft::AutomergeError::UnknownHash(h) if h == bogus));
}
