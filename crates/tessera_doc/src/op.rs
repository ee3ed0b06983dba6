//! Replicated operations and their CBOR form.

use crate::error::{DocError, DocResult};
use crate::id::{ClientId, ContainerId, ContainerKind, OpId, Stamp};
use tessera_codec::{from_cbor, to_canonical_cbor, Value};

/// What a map write stores under its key.
#[derive(Debug, Clone, PartialEq)]
pub enum NewContent {
    /// A plain value.
    Value(Value),
    /// A fresh nested container whose ID is the writing operation's ID.
    Container(ContainerKind),
}

/// Type of an operation, with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    /// Write a key of a map.
    MapSet {
        /// Key written.
        key: String,
        /// Content stored.
        content: NewContent,
    },
    /// Remove a key of a map.
    MapRemove {
        /// Key removed.
        key: String,
    },
    /// Append a value to a sequence.
    SeqPush {
        /// Value appended.
        value: Value,
    },
    /// Remove one element of a sequence.
    SeqRemove {
        /// Element removed (the ID of the push that created it).
        element: OpId,
    },
}

impl OpKind {
    /// Converts to a numeric code for CBOR encoding.
    pub fn to_code(&self) -> u8 {
        match self {
            OpKind::MapSet { .. } => 1,
            OpKind::MapRemove { .. } => 2,
            OpKind::SeqPush { .. } => 3,
            OpKind::SeqRemove { .. } => 4,
        }
    }

    /// Kind of container this operation targets.
    pub fn target_kind(&self) -> ContainerKind {
        match self {
            OpKind::MapSet { .. } | OpKind::MapRemove { .. } => ContainerKind::Map,
            OpKind::SeqPush { .. } | OpKind::SeqRemove { .. } => ContainerKind::Seq,
        }
    }
}

/// Largest lamport time an operation may carry: the largest that encodes
/// as a non-negative integer.
pub(crate) const MAX_LAMPORT: u64 = i64::MAX.unsigned_abs();

/// A single replicated operation.
///
/// Operations are the unit of exchange between replicas: a transaction's
/// update is the list of operations it integrated, and a snapshot is every
/// operation a replica knows.
#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    /// Operation identity.
    pub id: OpId,
    /// Lamport time at creation.
    pub lamport: u64,
    /// Container the operation applies to.
    pub target: ContainerId,
    /// Operation payload.
    pub kind: OpKind,
}

impl Op {
    /// Returns the tie-break stamp of this operation.
    pub fn stamp(&self) -> Stamp {
        Stamp::new(self.lamport, self.id.client)
    }

    /// Converts the operation into its CBOR value form.
    pub fn to_value(&self) -> Value {
        let mut pairs = vec![
            ("c", int(self.id.client.as_u64())),
            ("s", int(self.id.seq)),
            ("l", int(self.lamport)),
            ("t", container_to_value(&self.target)),
            ("k", Value::Integer(i64::from(self.kind.to_code()))),
        ];

        match &self.kind {
            OpKind::MapSet { key, content } => {
                pairs.push(("key", Value::Text(key.clone())));
                match content {
                    NewContent::Value(v) => pairs.push(("v", v.clone())),
                    NewContent::Container(kind) => {
                        pairs.push(("n", Value::Integer(i64::from(kind.to_code()))));
                    }
                }
            }
            OpKind::MapRemove { key } => pairs.push(("key", Value::Text(key.clone()))),
            OpKind::SeqPush { value } => pairs.push(("v", value.clone())),
            OpKind::SeqRemove { element } => pairs.push(("e", op_id_to_value(*element))),
        }

        Value::text_map(pairs)
    }

    /// Parses an operation from its CBOR value form.
    pub fn from_value(value: &Value) -> DocResult<Self> {
        if value.as_map().is_none() {
            return Err(DocError::malformed_update("expected map for operation"));
        }
        let field = |name: &str| {
            value
                .get(name)
                .ok_or_else(|| DocError::malformed_update(format!("missing {name}")))
        };

        let client = ClientId::new(uint(field("c")?, "c")?);
        let seq = uint(field("s")?, "s")?;
        let lamport = uint(field("l")?, "l")?;
        let target = container_from_value(field("t")?)?;
        let code = uint(field("k")?, "k")?;

        let key = || {
            field("key")?
                .as_text()
                .map(str::to_string)
                .ok_or_else(|| DocError::malformed_update("key must be text"))
        };

        let kind = match code {
            1 => {
                let content = match value.get("n") {
                    Some(n) => {
                        let code = u8::try_from(uint(n, "n")?)
                            .ok()
                            .and_then(ContainerKind::from_code)
                            .ok_or_else(|| DocError::malformed_update("invalid container kind"))?;
                        NewContent::Container(code)
                    }
                    None => NewContent::Value(field("v")?.clone()),
                };
                OpKind::MapSet {
                    key: key()?,
                    content,
                }
            }
            2 => OpKind::MapRemove { key: key()? },
            3 => OpKind::SeqPush {
                value: field("v")?.clone(),
            },
            4 => OpKind::SeqRemove {
                element: op_id_from_value(field("e")?)?,
            },
            other => {
                return Err(DocError::malformed_update(format!(
                    "invalid operation kind {other}"
                )))
            }
        };

        Ok(Self {
            id: OpId::new(client, seq),
            lamport,
            target,
            kind,
        })
    }
}

/// Encodes a list of operations as an update.
pub fn encode_ops<'a>(ops: impl IntoIterator<Item = &'a Op>) -> DocResult<Vec<u8>> {
    let array = Value::Array(ops.into_iter().map(Op::to_value).collect());
    Ok(to_canonical_cbor(&array)?)
}

/// Decodes an update into its operations.
pub fn decode_ops(bytes: &[u8]) -> DocResult<Vec<Op>> {
    let value = from_cbor(bytes)?;
    let items = value
        .as_array()
        .ok_or_else(|| DocError::malformed_update("expected array of operations"))?;
    items.iter().map(Op::from_value).collect()
}

#[allow(clippy::cast_possible_wrap)]
fn int(n: u64) -> Value {
    Value::Integer(n as i64)
}

fn uint(value: &Value, name: &str) -> DocResult<u64> {
    value
        .as_integer()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| DocError::malformed_update(format!("{name} must be a non-negative integer")))
}

fn op_id_to_value(id: OpId) -> Value {
    Value::Array(vec![int(id.client.as_u64()), int(id.seq)])
}

fn op_id_from_value(value: &Value) -> DocResult<OpId> {
    match value.as_array() {
        Some([client, seq]) => Ok(OpId::new(
            ClientId::new(uint(client, "client")?),
            uint(seq, "seq")?,
        )),
        _ => Err(DocError::malformed_update("operation id must be [client, seq]")),
    }
}

fn container_to_value(id: &ContainerId) -> Value {
    match id {
        ContainerId::Root(name) => Value::Text(name.clone()),
        ContainerId::Op(op) => op_id_to_value(*op),
    }
}

fn container_from_value(value: &Value) -> DocResult<ContainerId> {
    match value {
        Value::Text(name) => Ok(ContainerId::Root(name.clone())),
        other => op_id_from_value(other).map(ContainerId::Op),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(kind: OpKind, target: ContainerId) -> Op {
        Op {
            id: OpId::new(ClientId::new(11), 4),
            lamport: 9,
            target,
            kind,
        }
    }

    #[test]
    fn kind_codes_and_targets() {
        let set = OpKind::MapSet {
            key: "a".into(),
            content: NewContent::Value(Value::Null),
        };
        assert_eq!(set.to_code(), 1);
        assert_eq!(set.target_kind(), ContainerKind::Map);
        let push = OpKind::SeqPush { value: Value::Null };
        assert_eq!(push.to_code(), 3);
        assert_eq!(push.target_kind(), ContainerKind::Seq);
    }

    #[test]
    fn update_carries_every_operation_shape() {
        let nested = ContainerId::Op(OpId::new(ClientId::new(3), 0));
        let ops = vec![
            op(
                OpKind::MapSet {
                    key: "posts".into(),
                    content: NewContent::Container(ContainerKind::Map),
                },
                ContainerId::root("tables"),
            ),
            op(
                OpKind::MapSet {
                    key: "p1".into(),
                    content: NewContent::Value(Value::from("x")),
                },
                nested.clone(),
            ),
            op(OpKind::MapRemove { key: "p1".into() }, nested.clone()),
            op(
                OpKind::SeqPush {
                    value: Value::Float(0.25),
                },
                nested.clone(),
            ),
            op(
                OpKind::SeqRemove {
                    element: OpId::new(ClientId::new(3), 1),
                },
                nested,
            ),
        ];

        let bytes = encode_ops(&ops).unwrap();
        assert_eq!(decode_ops(&bytes).unwrap(), ops);
    }

    #[test]
    fn rejects_unknown_kind() {
        let value = Value::text_map([
            ("c", Value::Integer(1)),
            ("s", Value::Integer(0)),
            ("l", Value::Integer(1)),
            ("t", Value::from("kv")),
            ("k", Value::Integer(99)),
        ]);
        assert!(matches!(
            Op::from_value(&value),
            Err(DocError::MalformedUpdate { .. })
        ));
    }

    #[test]
    fn largest_lamport_time_round_trips() {
        let mut last = op(OpKind::MapRemove { key: "p1".into() }, ContainerId::root("kv"));
        last.lamport = MAX_LAMPORT;
        assert_eq!(Op::from_value(&last.to_value()).unwrap(), last);
    }

    #[test]
    fn rejects_non_array_update() {
        let bytes = to_canonical_cbor(&Value::Integer(1)).unwrap();
        assert!(decode_ops(&bytes).is_err());
    }
}
