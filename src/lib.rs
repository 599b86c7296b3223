//! # lattice-pathdb
//!
//! lattice-pathdb grows persistent, loop-free path graphs over a 3-D integer
//! lattice. Starting from a root point, each [`PathContext::advance`] call
//! performs one breadth-first step: every open connection of the outermost
//! shell is resolved against a branching-rule oracle and either links to a
//! node of the next shell or becomes a dead end. Every node is persisted
//! through a [`PathNodeStore`] whose `(context, point)` uniqueness constraint
//! guarantees that no point is ever visited twice.
//!
//! ## Features
//! - Parallel expansion of a shell over a rayon worker pool
//! - Two shell indexes chosen from a growth prediction: a plain map for small
//!   shells, a sharded concurrent map for large ones
//! - A generation-checked node arena: recycled nodes cannot be reached through
//!   stale handles
//! - Resume of a context from its stored shells
//! - An in-memory store and a deterministic oracle for drivers and tests
//!
//! ## Determinism
//!
//! Given the same oracle, growth context, offset and root point, the set of
//! nodes and the state of every connection slot are identical across runs,
//! whatever the worker count. Only store ids depend on scheduling.
//!
//! ## Usage
//!
//! ```
//! use lattice_pathdb::prelude::*;
//! use std::sync::Arc;
//!
//! let env = PathEnv::new(Arc::new(MemoryStore::new()), Arc::new(AlternatingTrioOracle));
//! let mut ctx = PathContext::create(&env, GrowthContext::new(1, 8, 0), 0)?;
//! ctx.init_root_node(Point::ORIGIN)?;
//! let reports = ctx.request_new_max_dist(4)?;
//! assert_eq!(reports.len(), 4);
//! assert_eq!(ctx.max_dist(), 4);
//! # Ok::<(), PathError>(())
//! ```

pub mod config;
pub mod debug_invariants;
pub mod geometry;
pub mod oracle;
pub mod path;
pub mod path_error;
pub mod store;

pub use debug_invariants::DebugInvariants;
pub use path::{PathContext, PathEnv};
pub use path_error::PathError;
pub use store::PathNodeStore;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::config::PathConfig;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::geometry::{ConnectionId, GrowthContext, Point};
    pub use crate::oracle::{AlternatingTrioOracle, BranchingOracle, BuilderSelector, NodeBuilder};
    pub use crate::path::{
        AdvanceReport, ConnectionState, ContextState, Link, NodeHandle, NodePool, NodeState,
        NodeView, PathContext, PathEnv, PathNodeMap,
    };
    pub use crate::path_error::PathError;
    pub use crate::store::{MemoryStore, PathContextId, PathNodeId, PathNodeStore, StoreError};
}
