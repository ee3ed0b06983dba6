//! State vectors: what a replica has integrated, per client.

use crate::error::{DocError, DocResult};
use crate::id::{ClientId, OpId};
use std::collections::BTreeMap;
use tessera_codec::{from_cbor, to_canonical_cbor, Value};

/// Maps each client to the next operation `seq` this replica expects from it.
///
/// Two replicas exchange state vectors to compute the minimal update each
/// one is missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateVector {
    clocks: BTreeMap<ClientId, u64>,
}

impl StateVector {
    /// Creates an empty state vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next expected `seq` for the client (zero if never seen).
    pub fn get(&self, client: ClientId) -> u64 {
        self.clocks.get(&client).copied().unwrap_or(0)
    }

    /// Records that every operation of `client` below `next` is integrated.
    pub fn set(&mut self, client: ClientId, next: u64) {
        self.clocks.insert(client, next);
    }

    /// Returns true if the operation is already covered by this vector.
    pub fn contains(&self, id: OpId) -> bool {
        id.seq < self.get(id.client)
    }

    /// Iterates over `(client, next seq)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ClientId, u64)> + '_ {
        self.clocks.iter().map(|(c, n)| (*c, *n))
    }

    /// Returns true if no client has been seen.
    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// Encodes to canonical CBOR.
    #[allow(clippy::cast_possible_wrap)]
    pub fn encode(&self) -> DocResult<Vec<u8>> {
        let pairs = self
            .clocks
            .iter()
            .map(|(client, next)| {
                (
                    Value::Integer(client.as_u64() as i64),
                    Value::Integer(*next as i64),
                )
            })
            .collect();
        Ok(to_canonical_cbor(&Value::map(pairs))?)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> DocResult<Self> {
        let value = from_cbor(bytes)?;
        let pairs = value
            .as_map()
            .ok_or_else(|| DocError::malformed_state_vector("expected map"))?;

        let mut clocks = BTreeMap::new();
        for (k, v) in pairs {
            let client = k
                .as_integer()
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| DocError::malformed_state_vector("client must be an integer"))?;
            let next = v
                .as_integer()
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| DocError::malformed_state_vector("clock must be an integer"))?;
            clocks.insert(ClientId::new(client), next);
        }
        Ok(Self { clocks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_tracks_contiguous_prefix() {
        let mut sv = StateVector::new();
        let a = ClientId::new(5);
        assert!(!sv.contains(OpId::new(a, 0)));

        sv.set(a, 3);
        assert!(sv.contains(OpId::new(a, 2)));
        assert!(!sv.contains(OpId::new(a, 3)));
        assert_eq!(sv.get(ClientId::new(6)), 0);
    }

    #[test]
    fn encoded_form_survives_exchange() {
        let mut sv = StateVector::new();
        sv.set(ClientId::new(1), 10);
        sv.set(ClientId::new(900_000), 2);

        let decoded = StateVector::decode(&sv.encode().unwrap()).unwrap();
        assert_eq!(decoded, sv);
        assert_eq!(decoded.iter().count(), 2);
    }

    #[test]
    fn rejects_negative_clock() {
        let bytes = to_canonical_cbor(&Value::map(vec![(
            Value::Integer(1),
            Value::Integer(-4),
        )]))
        .unwrap();
        assert!(matches!(
            StateVector::decode(&bytes),
            Err(DocError::MalformedStateVector { .. })
        ));
    }
}
