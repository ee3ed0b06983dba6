//! # tessera testkit
//!
//! Test utilities for tessera.
//!
//! This crate provides:
//! - Workspace fixtures with a representative schema
//! - Replicas that exchange updates by hand, for deterministic sync tests
//! - A change recorder collecting batched table notifications
//! - Property-based generators for table operations
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust
//! use tessera_testkit::prelude::*;
//!
//! let a = Replica::new(1, &blog_definition());
//! let b = Replica::new(2, &blog_definition());
//! a.posts().upsert(post("p1", "Hello")).unwrap();
//! sync_both(&a, &b);
//! assert!(b.posts().has("p1"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod recorder;
pub mod replica;
pub mod trace;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::recorder::*;
    pub use crate::replica::*;
    pub use crate::trace::*;
}

pub use fixtures::*;
pub use generators::*;
pub use recorder::*;
pub use replica::*;
pub use trace::*;
