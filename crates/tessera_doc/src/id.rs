//! Identifier types for replicas, operations and containers.

use std::fmt;
use uuid::Uuid;

/// Identifier of one replica of a document.
///
/// Client IDs stay below `i64::MAX` so they encode losslessly as CBOR
/// integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u64);

impl ClientId {
    /// Creates a client ID, clearing the top bit.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id & (i64::MAX as u64))
    }

    /// Creates a random client ID.
    #[must_use]
    pub fn random() -> Self {
        Self::new(Uuid::new_v4().as_u64_pair().0)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client:{}", self.0)
    }
}

/// Identity of a single operation.
///
/// `seq` is contiguous per client, starting at zero, which is what lets a
/// [`StateVector`](crate::StateVector) describe everything a replica has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId {
    /// Replica that authored the operation.
    pub client: ClientId,
    /// Per-client sequence number.
    pub seq: u64,
}

impl OpId {
    /// Creates an operation ID.
    #[must_use]
    pub const fn new(client: ClientId, seq: u64) -> Self {
        Self { client, seq }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.seq, self.client.0)
    }
}

/// Total order over operations used for every conflict tie-break.
///
/// Higher Lamport time wins; equal times fall back to the higher client ID.
/// The order is identical on every replica and never consults a wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp {
    /// Lamport time of the operation.
    pub lamport: u64,
    /// Author of the operation.
    pub client: ClientId,
}

impl Stamp {
    /// Creates a stamp.
    #[must_use]
    pub const fn new(lamport: u64, client: ClientId) -> Self {
        Self { lamport, client }
    }
}

/// Address of a container inside a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContainerId {
    /// A named top-level container. Roots exist implicitly on every replica
    /// and can never be replaced.
    Root(String),
    /// A nested container, identified by the operation that created it.
    Op(OpId),
}

impl ContainerId {
    /// Creates a root container ID.
    pub fn root(name: impl Into<String>) -> Self {
        Self::Root(name.into())
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerId::Root(name) => write!(f, "root:{name}"),
            ContainerId::Op(id) => write!(f, "op:{id}"),
        }
    }
}

/// The two container shapes the document supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    /// Last-writer-wins map from text keys to content.
    Map,
    /// Append-only sequence of values ordered by [`Stamp`].
    Seq,
}

impl ContainerKind {
    /// Converts to a numeric code for CBOR encoding.
    pub fn to_code(self) -> u8 {
        match self {
            ContainerKind::Map => 1,
            ContainerKind::Seq => 2,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ContainerKind::Map),
            2 => Some(ContainerKind::Seq),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_orders_by_lamport_then_client() {
        let a = Stamp::new(3, ClientId::new(9));
        let b = Stamp::new(4, ClientId::new(1));
        let c = Stamp::new(4, ClientId::new(2));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn random_client_fits_in_i64() {
        for _ in 0..32 {
            assert!(i64::try_from(ClientId::random().as_u64()).is_ok());
        }
    }

    #[test]
    fn container_id_display() {
        assert_eq!(ContainerId::root("tables").to_string(), "root:tables");
        let op = ContainerId::Op(OpId::new(ClientId::new(7), 2));
        assert_eq!(op.to_string(), "op:2@7");
    }

    #[test]
    fn kind_codes() {
        assert_eq!(ContainerKind::from_code(1), Some(ContainerKind::Map));
        assert_eq!(ContainerKind::from_code(2), Some(ContainerKind::Seq));
        assert_eq!(ContainerKind::from_code(0), None);
    }
}
