//! Workspace-wide settings store.
//!
//! The KV engine is a single implicit row: one cell sequence under the
//! document's `kv` root, one cell per declared key. Reads resolve the stored
//! value, then the declared default, then `null` for nullable keys.

use crate::cell_store::CellStore;
use crate::error::{ConfigurationError, CoreError, CoreResult};
use crate::schema::{FieldError, KvDefinition, SchemaValidator};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tessera_codec::Value;
use tessera_doc::{Doc, Subscription, TransactionInfo};
use tracing::debug;

/// Name of the root sequence holding the settings cells.
pub(crate) const KV_ROOT: &str = "kv";

/// Result of reading one key.
#[derive(Debug, Clone, PartialEq)]
pub enum KvResult {
    /// Stored value, default, or `null`; validates.
    Valid(Value),
    /// Stored value fails validation.
    Invalid {
        /// Key that was read.
        key: String,
        /// Raw stored value.
        value: Value,
        /// Validation failures.
        errors: Vec<FieldError>,
    },
    /// Nothing stored, no default, and the key is not nullable (or the key
    /// is not declared).
    NotFound {
        /// Key that was read.
        key: String,
    },
}

impl KvResult {
    /// Returns the value if it is valid.
    pub fn valid(&self) -> Option<&Value> {
        match self {
            KvResult::Valid(v) => Some(v),
            _ => None,
        }
    }
}

/// What [`Kv::reset`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// The declared default was written.
    RestoredDefault,
    /// `null` was written (nullable key without default).
    SetNull,
    /// The stored value was removed.
    Deleted,
    /// Nothing was stored; nothing was written.
    NotFoundLocally,
}

/// A change to one key, delivered to [`Kv::observe`] callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum KvChange {
    /// A value is stored; carries the resolved read.
    Set(KvResult),
    /// The stored value was removed.
    Deleted,
}

struct KvEntry {
    definition: KvDefinition,
    validator: SchemaValidator,
}

struct KvInner {
    doc: Doc,
    store: CellStore,
    entries: BTreeMap<String, KvEntry>,
}

impl KvInner {
    fn entry(&self, key: &str) -> CoreResult<&KvEntry> {
        self.entries
            .get(key)
            .ok_or_else(|| CoreError::unknown_kv_key(key))
    }

    fn read(&self, key: &str) -> KvResult {
        let Some(entry) = self.entries.get(key) else {
            return KvResult::NotFound {
                key: key.to_string(),
            };
        };
        let column = &entry.definition.column;

        match self.store.get(&self.doc, key) {
            Some(value) => match entry.validator.validate_value(&value) {
                Ok(()) => KvResult::Valid(value),
                Err(errors) => KvResult::Invalid {
                    key: key.to_string(),
                    value,
                    errors,
                },
            },
            None => match (&column.default, column.nullable) {
                (Some(default), _) => KvResult::Valid(default.clone()),
                (None, true) => KvResult::Valid(Value::Null),
                (None, false) => KvResult::NotFound {
                    key: key.to_string(),
                },
            },
        }
    }
}

/// Handle to the settings store of a workspace.
#[derive(Clone)]
pub struct Kv {
    inner: Arc<KvInner>,
}

impl Kv {
    /// Binds the settings store of `doc`, compiling one validator per key.
    pub fn new(doc: &Doc, definitions: &[KvDefinition]) -> CoreResult<Self> {
        let mut entries = BTreeMap::new();
        for definition in definitions {
            definition.check()?;
            let validator = SchemaValidator::for_column(&definition.column);
            let entry = KvEntry {
                definition: definition.clone(),
                validator,
            };
            if entries.insert(definition.key.clone(), entry).is_some() {
                return Err(ConfigurationError::DuplicateKvKey {
                    key: definition.key.clone(),
                }
                .into());
            }
        }

        let store = CellStore::new(doc.get_or_insert_seq(KV_ROOT)?);
        Ok(Self {
            inner: Arc::new(KvInner {
                doc: doc.clone(),
                store,
                entries,
            }),
        })
    }

    /// Declared keys, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.entries.keys().map(String::as_str)
    }

    /// Declaration of one key.
    pub fn definition(&self, key: &str) -> Option<&KvDefinition> {
        self.inner.entries.get(key).map(|e| &e.definition)
    }

    /// Reads one key.
    pub fn get(&self, key: &str) -> KvResult {
        self.inner.read(key)
    }

    /// Reads every declared key.
    pub fn get_all(&self) -> BTreeMap<String, KvResult> {
        self.inner
            .entries
            .keys()
            .map(|key| (key.clone(), self.inner.read(key)))
            .collect()
    }

    /// Writes one key. The value is validated on read, not here.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> CoreResult<()> {
        self.inner.entry(key)?;
        let value = value.into();
        let inner = &self.inner;
        inner
            .doc
            .transact(|txn| inner.store.set(txn, key, value))
    }

    /// Restores the default, else writes `null`, else removes the value.
    pub fn reset(&self, key: &str) -> CoreResult<ResetOutcome> {
        let column = &self.inner.entry(key)?.definition.column;
        let inner = &self.inner;
        let doc = &inner.doc;
        let stored = inner.store.get(doc, key);

        let outcome = doc.transact(|txn| -> CoreResult<ResetOutcome> {
            match (&column.default, column.nullable) {
                (Some(default), _) => {
                    if stored.as_ref() != Some(default) {
                        inner.store.set(txn, key, default.clone())?;
                    }
                    Ok(ResetOutcome::RestoredDefault)
                }
                (None, true) => {
                    if stored != Some(Value::Null) {
                        inner.store.set(txn, key, Value::Null)?;
                    }
                    Ok(ResetOutcome::SetNull)
                }
                (None, false) => Ok(if inner.store.delete(txn, key)? {
                    ResetOutcome::Deleted
                } else {
                    ResetOutcome::NotFoundLocally
                }),
            }
        })?;
        debug!(key, ?outcome, "kv key reset");
        Ok(outcome)
    }

    /// Observes one key.
    ///
    /// The callback runs after every transaction that touched the key,
    /// locally or remotely.
    pub fn observe<F>(&self, key: &str, callback: F) -> CoreResult<Subscription>
    where
        F: Fn(&KvChange, &TransactionInfo) + Send + Sync + 'static,
    {
        self.inner.entry(key)?;
        let weak: Weak<KvInner> = Arc::downgrade(&self.inner);
        let key = key.to_string();
        let seq = self.inner.store.seq().clone();

        Ok(seq.observe(&self.inner.doc, move |info, event| {
            if !CellStore::changed_keys(event).contains(&key) {
                return;
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let change = if inner.store.has(&inner.doc, &key) {
                KvChange::Set(inner.read(&key))
            } else {
                KvChange::Deleted
            };
            callback(&change, info);
        }))
    }
}

impl std::fmt::Debug for Kv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kv")
            .field("keys", &self.inner.entries.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDefinition;
    use parking_lot::Mutex;
    use tessera_doc::{ClientId, Origin};

    fn settings(doc: &Doc) -> Kv {
        Kv::new(
            doc,
            &[
                KvDefinition::new("fontSize", ColumnDefinition::integer("v").default_value(14i64)),
                KvDefinition::new("theme", ColumnDefinition::select("v", ["light", "dark"]).nullable()),
                KvDefinition::new("token", ColumnDefinition::text("v")),
            ],
        )
        .unwrap()
    }

    #[test]
    fn default_set_reset() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let kv = settings(&doc);
        assert_eq!(kv.get("fontSize"), KvResult::Valid(Value::Integer(14)));

        kv.set("fontSize", 16i64).unwrap();
        assert_eq!(kv.get("fontSize"), KvResult::Valid(Value::Integer(16)));

        assert_eq!(kv.reset("fontSize").unwrap(), ResetOutcome::RestoredDefault);
        assert_eq!(kv.get("fontSize"), KvResult::Valid(Value::Integer(14)));
    }

    #[test]
    fn nullable_and_required_keys() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let kv = settings(&doc);
        assert_eq!(kv.get("theme"), KvResult::Valid(Value::Null));
        assert!(matches!(kv.get("token"), KvResult::NotFound { .. }));

        kv.set("theme", "dark").unwrap();
        assert_eq!(kv.reset("theme").unwrap(), ResetOutcome::SetNull);
        assert_eq!(kv.get("theme"), KvResult::Valid(Value::Null));

        assert_eq!(kv.reset("token").unwrap(), ResetOutcome::NotFoundLocally);
        kv.set("token", "abc").unwrap();
        assert_eq!(kv.reset("token").unwrap(), ResetOutcome::Deleted);
        assert!(matches!(kv.get("token"), KvResult::NotFound { .. }));
    }

    #[test]
    fn invalid_value_is_reported() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let kv = settings(&doc);
        kv.set("theme", "sepia").unwrap();
        match kv.get("theme") {
            KvResult::Invalid { key, value, errors } => {
                assert_eq!(key, "theme");
                assert_eq!(value, Value::from("sepia"));
                assert_eq!(errors.len(), 1);
            }
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[test]
    fn undeclared_keys() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let kv = settings(&doc);
        assert!(matches!(kv.get("nope"), KvResult::NotFound { .. }));
        assert!(matches!(
            kv.set("nope", 1i64),
            Err(CoreError::UnknownKvKey { .. })
        ));
        assert_eq!(kv.get_all().len(), 3);
    }

    #[test]
    fn duplicate_keys_rejected() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let col = ColumnDefinition::text("v");
        let err = Kv::new(
            &doc,
            &[KvDefinition::new("a", col.clone()), KvDefinition::new("a", col)],
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn observe_filters_by_key() {
        let a = Doc::with_client_id(ClientId::new(1));
        let b = Doc::with_client_id(ClientId::new(2));
        let (ka, kb) = (settings(&a), settings(&b));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = kb
            .observe("fontSize", move |change, info| {
                sink.lock().push((change.clone(), info.origin.clone()));
            })
            .unwrap();

        ka.set("theme", "dark").unwrap();
        ka.set("fontSize", 18i64).unwrap();
        let update = a.encode_state_as_update(None).unwrap();
        b.apply_update(&update, Origin::Remote).unwrap();
        kb.reset("fontSize").unwrap();

        let seen = seen.lock();
        assert_eq!(
            *seen,
            vec![
                (KvChange::Set(KvResult::Valid(Value::Integer(18))), Origin::Remote),
                (KvChange::Set(KvResult::Valid(Value::Integer(14))), Origin::Local),
            ]
        );
    }
}
