//! Convergence between replicas that exchange updates by hand.

use proptest::prelude::*;
use tessera_core::{ObservationPhase, Row, RowResult};
use tessera_testkit::prelude::*;

fn pair() -> (Replica, Replica) {
    init_tracing();
    let definition = blog_definition();
    (Replica::new(1, &definition), Replica::new(2, &definition))
}

fn title(r: &Replica, id: &str) -> Option<String> {
    r.posts()
        .get(id)
        .valid()
        .and_then(|row| row.get_text("title").map(str::to_string))
}

#[test]
fn edits_to_different_columns_both_survive() {
    let (a, b) = pair();
    a.posts()
        .upsert(post("p1", "Original").with("views", 0i64))
        .unwrap();
    sync_both(&a, &b);

    a.posts()
        .update(Row::new("p1").with("title", "A"))
        .unwrap();
    b.posts()
        .update(Row::new("p1").with("views", 100i64))
        .unwrap();
    sync_both(&a, &b);

    for replica in [&a, &b] {
        let row = replica.posts().get("p1").into_valid().unwrap();
        assert_eq!(row.get_text("title"), Some("A"));
        assert_eq!(row.get_integer("views"), Some(100));
    }
}

#[test]
fn same_column_edits_converge() {
    let (a, b) = pair();
    a.posts().upsert(post("p1", "Original")).unwrap();
    sync_both(&a, &b);

    a.posts()
        .update(Row::new("p1").with("title", "from a"))
        .unwrap();
    b.posts()
        .update(Row::new("p1").with("title", "from b"))
        .unwrap();
    sync_both(&a, &b);

    let (ta, tb) = (title(&a, "p1"), title(&b, "p1"));
    assert_eq!(ta, tb);
    assert!(matches!(ta.as_deref(), Some("from a") | Some("from b")));
}

#[test]
fn remote_update_of_unknown_row_does_not_create_it() {
    let (a, b) = pair();
    a.posts().upsert(post("p1", "Original")).unwrap();
    sync_both(&a, &b);

    // After its own delete, b cannot update the row.
    b.posts().delete("p1").unwrap();
    assert!(!b
        .posts()
        .update(Row::new("p1").with("views", 9i64))
        .unwrap()
        .is_applied());
    sync_both(&a, &b);

    let (ra, rb) = (a.posts().get("p1"), b.posts().get("p1"));
    assert_eq!(ra, rb);
    assert!(matches!(ra, RowResult::NotFound { .. }));
}

#[test]
fn delayed_updates_wait_for_their_rows() {
    let (a, b) = pair();
    let sv = b.doc().state_vector();
    a.posts().upsert(post("p1", "first")).unwrap();
    let create = diff(&a, &b);
    let before_edit = a.doc().state_vector();
    a.posts()
        .update(Row::new("p1").with("title", "second"))
        .unwrap();
    let edit = a
        .doc()
        .encode_state_as_update(Some(&before_edit))
        .unwrap();

    b.doc()
        .apply_update(&edit, tessera_doc::Origin::Remote)
        .unwrap();
    assert!(b.posts().get("p1").is_not_found());
    assert_eq!(b.doc().state_vector(), sv);

    b.doc()
        .apply_update(&create, tessera_doc::Origin::Remote)
        .unwrap();
    assert_eq!(title(&b, "p1").as_deref(), Some("second"));
    assert_eq!(b.doc().pending_len(), 0);
}

#[test]
fn concurrently_created_tables_resync_observers() {
    let (a, b) = pair();
    a.posts()
        .upsert_many([post("from_a", "a"), post("shared", "a's")])
        .unwrap();
    b.posts()
        .upsert_many([post("from_b", "b"), post("shared", "b's")])
        .unwrap();
    let recorder_a = ChangeRecorder::attach(a.posts());
    let phase_a = recorder_a.subscription().phase();

    sync_both(&a, &b);

    // Both replicas keep the container created by the higher client.
    assert_eq!(a.posts().get_all(), b.posts().get_all());
    assert!(a.posts().get("from_a").is_not_found());
    assert_eq!(title(&a, "from_b").as_deref(), Some("b"));
    assert_ne!(recorder_a.subscription().phase(), phase_a);
    assert!(matches!(
        recorder_a.subscription().phase(),
        ObservationPhase::Attached(_)
    ));

    let batches = recorder_a.batches();
    assert_eq!(batches.len(), 1);
    let kinds = batches[0].kinds();
    assert_eq!(kinds.get("from_a"), Some(&"delete"));
    assert_eq!(kinds.get("from_b"), Some(&"add"));
    assert_eq!(kinds.get("shared"), Some(&"add"));
    assert_eq!(title(&a, "shared").as_deref(), Some("b's"));

    // The rebound subscription keeps working.
    a.posts().upsert(post("later", "x")).unwrap();
    let later = recorder_a.batches();
    assert_eq!(later.last().unwrap().kinds().get("later"), Some(&"add"));
}

#[test]
fn snapshot_replay_reproduces_queries() {
    let (a, _) = pair();
    a.posts()
        .upsert_many([
            post("p1", "one").with("views", 1i64),
            post("p2", "two").with("labels", vec!["x".to_string()]),
            Row::new("bad"),
        ])
        .unwrap();
    a.posts().delete("p2").unwrap();
    a.kv().set("fontSize", 18i64).unwrap();

    let copy = Replica::from_snapshot(9, &blog_definition(), &a.snapshot());
    assert_eq!(copy.posts().get_all(), a.posts().get_all());
    assert_eq!(copy.kv().get_all(), a.kv().get_all());
    assert_eq!(copy.doc().state_vector(), a.doc().state_vector());
}

#[test]
fn three_replicas_converge() {
    init_tracing();
    let definition = blog_definition();
    let replicas: Vec<_> = (1..=3).map(|c| Replica::new(c, &definition)).collect();
    let refs: Vec<&Replica> = replicas.iter().collect();

    replicas[0].posts().upsert(post("p1", "seed")).unwrap();
    sync_all(&refs);
    replicas[1]
        .posts()
        .update(Row::new("p1").with("views", 5i64))
        .unwrap();
    replicas[2].posts().upsert(post("p2", "other")).unwrap();
    replicas[0].kv().set("theme", "dark").unwrap();
    sync_all(&refs);
    sync_all(&refs);

    for r in &replicas[1..] {
        assert_eq!(r.posts().get_all(), replicas[0].posts().get_all());
        assert_eq!(r.kv().get_all(), replicas[0].kv().get_all());
    }
    assert_eq!(replicas[2].posts().count(), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_edits_converge(steps in steps_strategy(40)) {
        let (a, b) = pair();
        let replicas = [&a, &b];
        for step in &steps {
            match step {
                Step::Op(i, op) => apply_op(replicas[*i], op),
                Step::Sync => sync_both(&a, &b),
            }
        }
        sync_both(&a, &b);

        prop_assert_eq!(a.posts().get_all(), b.posts().get_all());
        prop_assert_eq!(a.posts().count(), b.posts().count());
        prop_assert_eq!(a.doc().state_vector(), b.doc().state_vector());
    }
}
