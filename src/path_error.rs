//! PathError: unified error type for lattice-pathdb public APIs.
//!
//! Expected contention (a lost race on a connection slot, a uniqueness
//! conflict on insert) is resolved inside the engine and counted; only
//! `ConnectionNotAvailable` ever escapes to a caller, and the context treats
//! it as a dead end.

use crate::geometry::{ConnectionId, Point};
use crate::oracle::OracleError;
use crate::path::pool::NodeHandle;
use crate::store::StoreError;
use thiserror::Error;

/// Unified error type for path-building operations.
#[derive(Debug, Error)]
pub enum PathError {
    /// The node's branching rule has no connection with this id.
    #[error("connection {conn} not found in trio {trio_id} of node at {point:?}")]
    ConnectionNotFound {
        conn: ConnectionId,
        trio_id: i16,
        point: Point,
    },
    /// The matching slot is already taken (another parent won the race).
    #[error("connection {conn} not available on node at {point:?}: slot {slot} already set")]
    ConnectionNotAvailable {
        conn: ConnectionId,
        slot: usize,
        point: Point,
    },
    /// Geometric or structural data is self-inconsistent.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// `advance()` or a node query on a context without root node.
    #[error("path context {0} has no root node")]
    NotInitialized(i32),
    /// A previous fatal error stopped this context.
    #[error("path context {0} was aborted by an earlier fatal error")]
    Aborted(i32),
    /// Access through a handle whose node was recycled.
    #[error("stale node handle {0:?}: the node was returned to the pool")]
    StaleHandle(NodeHandle),
    /// Persisted ids are strictly positive.
    #[error("path node id must be positive, got {0}")]
    InvalidNodeId(i64),
    /// Sync requested on a node that lost its insert race.
    #[error("path node at {0:?} is in conflict, use the stored one")]
    NodeInConflict(Point),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PathError {
    /// Fatal errors terminate the current `advance()` and the context.
    pub fn is_fatal(&self) -> bool {
        match self {
            PathError::ConnectionNotAvailable { .. } | PathError::Store(_) => false,
            PathError::NodeInConflict(_) => false,
            _ => true,
        }
    }
}
