//! Property-based test generators using proptest.
//!
//! Row ids come from a small pool so that generated operations collide on
//! the same rows and columns often.

use crate::replica::Replica;
use proptest::prelude::*;
use tessera_core::Row;

/// One operation on the `posts` table of a [`Replica`].
#[derive(Debug, Clone)]
pub enum TableOp {
    /// Create or replace a post.
    Upsert {
        /// Row id.
        id: String,
        /// Title.
        title: String,
        /// View count.
        views: i64,
    },
    /// Merge a new title.
    SetTitle {
        /// Row id.
        id: String,
        /// Title.
        title: String,
    },
    /// Merge a new view count.
    SetViews {
        /// Row id.
        id: String,
        /// View count.
        views: i64,
    },
    /// Delete a post.
    Delete {
        /// Row id.
        id: String,
    },
    /// Delete every post.
    Clear,
}

/// Strategy for row ids from a pool of four.
pub fn row_id_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["p0", "p1", "p2", "p3"]).prop_map(String::from)
}

/// Strategy for short titles.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{0,8}").expect("Invalid regex")
}

/// Strategy for a single table operation. `Clear` is rare.
pub fn table_op_strategy() -> impl Strategy<Value = TableOp> {
    prop_oneof![
        4 => (row_id_strategy(), title_strategy(), 0i64..1000)
            .prop_map(|(id, title, views)| TableOp::Upsert { id, title, views }),
        3 => (row_id_strategy(), title_strategy())
            .prop_map(|(id, title)| TableOp::SetTitle { id, title }),
        3 => (row_id_strategy(), 0i64..1000)
            .prop_map(|(id, views)| TableOp::SetViews { id, views }),
        2 => row_id_strategy().prop_map(|id| TableOp::Delete { id }),
        1 => Just(TableOp::Clear),
    ]
}

/// A step of a two-replica run: an operation on replica 0 or 1, or a full
/// exchange.
#[derive(Debug, Clone)]
pub enum Step {
    /// Apply an operation on one replica.
    Op(usize, TableOp),
    /// Sync both replicas.
    Sync,
}

/// Strategy for a sequence of steps.
pub fn steps_strategy(max: usize) -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        prop_oneof![
            6 => (0usize..2, table_op_strategy()).prop_map(|(r, op)| Step::Op(r, op)),
            1 => Just(Step::Sync),
        ],
        0..max,
    )
}

/// Applies `op` to the `posts` table of `replica`.
pub fn apply_op(replica: &Replica, op: &TableOp) {
    let posts = replica.posts();
    match op {
        TableOp::Upsert { id, title, views } => posts
            .upsert(Row::new(id.as_str()).with("title", title.as_str()).with("views", *views))
            .expect("upsert failed"),
        TableOp::SetTitle { id, title } => {
            posts
                .update(Row::new(id.as_str()).with("title", title.as_str()))
                .expect("update failed");
        }
        TableOp::SetViews { id, views } => {
            posts
                .update(Row::new(id.as_str()).with("views", *views))
                .expect("update failed");
        }
        TableOp::Delete { id } => {
            posts.delete(id).expect("delete failed");
        }
        TableOp::Clear => posts.clear().expect("clear failed"),
    }
}
