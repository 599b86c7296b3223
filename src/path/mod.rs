//! The breadth-first path engine.
//!
//! - [`pool`]: generation-checked node arena shared across contexts.
//! - [`node`]: path nodes and their connection-state machine.
//! - [`map`]: point-keyed shell indexes.
//! - [`shell`]: one distance level and its size prediction.
//! - [`context`]: the orchestrator and its `advance()` step.

pub mod context;
pub mod map;
pub mod node;
pub mod pool;
pub mod shell;

pub use context::{AdvanceReport, ContextState, PathContext, PathEnv};
pub use map::{FrontierIndex, HashPathNodeMap, PathNodeMap, SimplePathNodeMap};
pub use node::{ConnectionState, Link, NodeState, NodeView, PathNode};
pub use pool::{NodeHandle, NodePool};
pub use shell::{FrontierShell, predicted_size};
