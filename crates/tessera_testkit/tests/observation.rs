//! Batched change delivery as seen by table subscribers.

use tessera_core::{Row, RowChange};
use tessera_doc::Origin;
use tessera_testkit::prelude::*;

#[test]
fn one_transaction_is_one_batch() {
    init_tracing();
    let replica = Replica::new(1, &blog_definition());
    let recorder = ChangeRecorder::attach(replica.posts());

    replica.doc().transact(|_| {
        for i in 0..10 {
            replica.posts().upsert(post(&format!("p{i}"), "t")).unwrap();
        }
        replica
            .posts()
            .update(Row::new("p0").with("views", 3i64))
            .unwrap();
    });

    let batches = recorder.take();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].changes.len(), 10);
    assert_eq!(batches[0].kinds()["p0"], "add");
    let p0 = batches[0].changes["p0"].result().and_then(|r| r.valid()).unwrap();
    assert_eq!(p0.get_integer("views"), Some(3));
}

#[test]
fn add_update_delete_boundaries() {
    let replica = Replica::new(1, &blog_definition());
    let recorder = ChangeRecorder::attach(replica.posts());

    replica.posts().upsert(post("p1", "first")).unwrap();
    replica.posts().upsert(post("p1", "second")).unwrap();
    replica
        .posts()
        .update(Row::new("p1").with("views", 1i64))
        .unwrap();
    replica.posts().delete("p1").unwrap();
    replica.posts().upsert(post("p1", "again")).unwrap();

    let kinds: Vec<&str> = recorder
        .batches()
        .iter()
        .map(|b| b.kinds()["p1"])
        .collect();
    assert_eq!(kinds, vec!["add", "update", "update", "delete", "add"]);
}

#[test]
fn changes_carry_the_read_result() {
    let replica = Replica::new(1, &blog_definition());
    let recorder = ChangeRecorder::attach(replica.posts());

    replica.posts().upsert(Row::new("broken")).unwrap();

    let batches = recorder.batches();
    match &batches[0].changes["broken"] {
        RowChange::Add(result) => assert!(result.invalid().is_some()),
        other => panic!("expected an add, got {other:?}"),
    }
}

#[test]
fn remote_batches_carry_their_origin() {
    let a = Replica::new(1, &blog_definition());
    let b = Replica::new(2, &blog_definition());
    let recorder = ChangeRecorder::attach(b.posts());

    a.posts().upsert(post("p1", "hello")).unwrap();
    sync(&a, &b);
    b.posts()
        .update(Row::new("p1").with("views", 2i64))
        .unwrap();

    let batches = recorder.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].origin, Origin::Remote);
    assert_eq!(batches[0].kinds()["p1"], "add");
    assert_eq!(batches[1].origin, Origin::Local);
    assert_eq!(batches[1].kinds()["p1"], "update");
}

#[test]
fn subscribers_do_not_see_other_tables() {
    let replica = Replica::new(1, &blog_definition());
    let recorder = ChangeRecorder::attach(replica.posts());

    replica
        .table("authors")
        .upsert(Row::new("a1").with("name", "Ada"))
        .unwrap();
    replica.kv().set("theme", "dark").unwrap();

    assert!(recorder.is_empty());
}

#[test]
fn detached_recorder_stops_receiving() {
    let replica = Replica::new(1, &blog_definition());
    let recorder = ChangeRecorder::attach(replica.posts());
    let keep = ChangeRecorder::attach(replica.posts());

    replica.posts().upsert(post("p1", "one")).unwrap();
    let recorded = recorder.detach();
    replica.posts().upsert(post("p2", "two")).unwrap();

    assert_eq!(recorded.len(), 1);
    assert_eq!(keep.len(), 2);
}

#[test]
fn empty_transactions_deliver_nothing() {
    let replica = Replica::new(1, &blog_definition());
    let recorder = ChangeRecorder::attach(replica.posts());

    replica.doc().transact(|_| {});
    replica.posts().delete("missing").unwrap();
    assert!(!replica
        .posts()
        .update(post("missing", "x"))
        .unwrap()
        .is_applied());

    assert!(recorder.is_empty());
}
