//! # tessera doc
//!
//! The replicated document underneath every tessera workspace.
//!
//! A [`Doc`] holds named root containers. Containers are either
//! last-writer-wins maps ([`MapRef`]) or append-only sequences ordered by
//! operation stamp ([`SeqRef`]), and maps can nest further containers.
//!
//! ## Guarantees
//!
//! - **Atomic transactions**: observers see a transaction only after its
//!   outermost [`Doc::transact`] returns, and exactly once.
//! - **Convergence**: replicas that integrated the same operations hold the
//!   same state, whatever order the updates arrived in.
//! - **Deterministic conflicts**: concurrent writes to one map key resolve by
//!   [`Stamp`] (Lamport time, then client ID), never by wall clock.
//!
//! ## Usage
//!
//! ```
//! use tessera_doc::{ClientId, Doc, Origin};
//!
//! let a = Doc::with_client_id(ClientId::new(1));
//! let b = Doc::with_client_id(ClientId::new(2));
//!
//! let settings = a.get_or_insert_map("settings").unwrap();
//! a.transact(|txn| settings.insert(txn, "theme", "dark")).unwrap();
//!
//! let update = a.encode_state_as_update(Some(&b.state_vector())).unwrap();
//! b.apply_update(&update, Origin::Remote).unwrap();
//!
//! let settings_b = b.get_or_insert_map("settings").unwrap();
//! assert_eq!(settings_b.get_value(&b, "theme"), Some("dark".into()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod doc;
mod error;
mod event;
mod id;
mod observer;
mod op;
mod state_vector;
mod store;
mod types;

pub use doc::{Doc, Txn, WeakDoc};
pub use error::{DocError, DocResult};
pub use event::{ContainerEvent, EntryChange, MapEvent, Origin, SeqEvent, TransactionInfo};
pub use id::{ClientId, ContainerId, ContainerKind, OpId, Stamp};
pub use observer::Subscription;
pub use op::{decode_ops, encode_ops, NewContent, Op, OpKind};
pub use state_vector::StateVector;
pub use store::Content;
pub use tessera_codec::Value;
pub use types::{MapRef, SeqRef};
