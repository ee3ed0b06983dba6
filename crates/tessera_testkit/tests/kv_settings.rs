//! Settings reads, writes, resets and observation.

use parking_lot::Mutex;
use std::sync::Arc;
use tessera_codec::Value;
use tessera_core::{CoreError, FieldErrorKind, KvChange, KvResult, ResetOutcome};
use tessera_doc::Origin;
use tessera_testkit::prelude::*;

#[test]
fn default_set_reset_cycle() {
    let replica = Replica::new(1, &blog_definition());
    let kv = replica.kv();

    assert_eq!(kv.get("fontSize"), KvResult::Valid(Value::Integer(14)));
    kv.set("fontSize", 16i64).unwrap();
    assert_eq!(kv.get("fontSize"), KvResult::Valid(Value::Integer(16)));
    assert_eq!(kv.reset("fontSize").unwrap(), ResetOutcome::RestoredDefault);
    assert_eq!(kv.get("fontSize"), KvResult::Valid(Value::Integer(14)));
}

#[test]
fn reset_of_default_value_writes_nothing() {
    let replica = Replica::new(1, &blog_definition());
    replica.kv().set("theme", "light").unwrap();
    let before = replica.doc().state_vector();

    assert_eq!(
        replica.kv().reset("theme").unwrap(),
        ResetOutcome::RestoredDefault
    );
    assert_eq!(replica.doc().state_vector(), before);
}

#[test]
fn invalid_values_surface_on_read() {
    let replica = Replica::new(1, &blog_definition());
    replica.kv().set("theme", "sepia").unwrap();

    match replica.kv().get("theme") {
        KvResult::Invalid { key, value, errors } => {
            assert_eq!(key, "theme");
            assert_eq!(value, Value::from("sepia"));
            assert_eq!(errors[0].kind, FieldErrorKind::UnknownOption);
        }
        other => panic!("expected an invalid read, got {other:?}"),
    }

    replica.kv().set("fontSize", "big").unwrap();
    assert!(matches!(
        replica.kv().get("fontSize"),
        KvResult::Invalid { .. }
    ));
}

#[test]
fn unknown_keys_are_rejected() {
    let replica = Replica::new(1, &blog_definition());
    let kv = replica.kv();

    assert!(matches!(
        kv.set("colour", "red"),
        Err(CoreError::UnknownKvKey { .. })
    ));
    assert!(matches!(kv.reset("colour"), Err(CoreError::UnknownKvKey { .. })));
    assert!(kv.observe("colour", |_, _| {}).is_err());
    assert!(matches!(kv.get("colour"), KvResult::NotFound { .. }));
    assert!(!kv.get_all().contains_key("colour"));
}

#[test]
fn observers_see_only_their_key() {
    let a = Replica::new(1, &blog_definition());
    let b = Replica::new(2, &blog_definition());
    let seen: Arc<Mutex<Vec<(KvChange, Origin)>>> = Arc::default();
    let sink = seen.clone();
    let _sub = b
        .kv()
        .observe("fontSize", move |change, info| {
            sink.lock().push((change.clone(), info.origin.clone()));
        })
        .unwrap();

    a.kv().set("theme", "dark").unwrap();
    sync(&a, &b);
    assert!(seen.lock().is_empty());

    a.kv().set("fontSize", 20i64).unwrap();
    sync(&a, &b);
    b.kv().reset("fontSize").unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(
        seen[0],
        (
            KvChange::Set(KvResult::Valid(Value::Integer(20))),
            Origin::Remote
        )
    );
    assert_eq!(
        seen[1],
        (
            KvChange::Set(KvResult::Valid(Value::Integer(14))),
            Origin::Local
        )
    );
}

#[test]
fn concurrent_settings_converge() {
    let a = Replica::new(1, &blog_definition());
    let b = Replica::new(2, &blog_definition());

    a.kv().set("fontSize", 12i64).unwrap();
    b.kv().set("fontSize", 18i64).unwrap();
    b.kv().set("theme", "dark").unwrap();
    sync_both(&a, &b);

    assert_eq!(a.kv().get_all(), b.kv().get_all());
    assert_eq!(a.kv().get("theme"), KvResult::Valid(Value::from("dark")));
}
