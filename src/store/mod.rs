//! Backing store for path contexts and path nodes.
//!
//! The engine needs very little from persistence: point lookup, insert with a
//! uniqueness constraint on `(context id, point)`, update of the mutable
//! connection fields and a count. Reloading a shell and the context table
//! operations complete the set. The uniqueness constraint is the sole
//! concurrency backstop; the engine relies on it and never reimplements it.

pub mod memory;

pub use memory::MemoryStore;

use crate::geometry::{GrowthContext, Point};
use crate::oracle::{BuilderSelector, NB_CONNECTIONS};
use crate::path_error::PathError;
use std::fmt;
use std::num::NonZeroU64;
use thiserror::Error;

/// Identifier of a persisted path context.
pub type PathContextId = i32;

/// Identifier of a persisted path node. Always strictly positive.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[repr(transparent)]
pub struct PathNodeId(NonZeroU64);

impl PathNodeId {
    /// Wraps a raw store id; ids `<= 0` are rejected.
    #[inline]
    pub fn new(raw: i64) -> Result<Self, PathError> {
        u64::try_from(raw)
            .ok()
            .and_then(NonZeroU64::new)
            .map(PathNodeId)
            .ok_or(PathError::InvalidNodeId(raw))
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for PathNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathNodeId").field(&self.get()).finish()
    }
}

impl fmt::Display for PathNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Store failures. Only `UniqueViolation` has a meaning to the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unique constraint violation on (context {ctx}, point {point:?})")]
    UniqueViolation { ctx: PathContextId, point: Point },
    #[error("no {table} row with id {id}")]
    NotFound { table: &'static str, id: i64 },
    #[error("store backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    #[inline]
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}

/// Insertable fields of a path node row.
///
/// `link_ids[i]` is meaningful per slot state: the parent id for From, the
/// child id (or `None` while unassigned) for Next, always `None` otherwise.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeFields {
    pub ctx_id: PathContextId,
    pub selector: BuilderSelector,
    pub point: Point,
    pub d: i32,
    pub connection_mask: u16,
    pub link_ids: [Option<PathNodeId>; NB_CONNECTIONS],
}

/// A stored path node row.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PathNodeRecord {
    pub id: PathNodeId,
    pub fields: NodeFields,
}

/// Mutable columns of a path node row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeUpdate {
    pub connection_mask: u16,
    pub link_ids: [Option<PathNodeId>; NB_CONNECTIONS],
}

/// A stored path context row.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ContextRecord {
    pub id: PathContextId,
    pub growth: GrowthContext,
    pub growth_offset: i32,
    pub root_builder_id: Option<i32>,
    pub max_dist: i32,
}

/// Persistence operations consumed by the path engine.
///
/// Every call may block the calling worker until the store answers.
pub trait PathNodeStore: Send + Sync {
    fn lookup_by_point(
        &self,
        ctx: PathContextId,
        point: Point,
    ) -> Result<Option<PathNodeRecord>, StoreError>;

    /// Inserts a row, failing with [`StoreError::UniqueViolation`] when
    /// `(ctx, point)` already exists.
    fn insert_returning_id(&self, fields: &NodeFields) -> Result<PathNodeId, StoreError>;

    /// Returns the number of rows affected.
    fn update(&self, id: PathNodeId, update: &NodeUpdate) -> Result<usize, StoreError>;

    fn count_by_context(&self, ctx: PathContextId) -> Result<usize, StoreError>;

    /// All nodes of a context at distance `d`, ordered by id.
    fn nodes_at_distance(
        &self,
        ctx: PathContextId,
        d: i32,
    ) -> Result<Vec<PathNodeRecord>, StoreError>;

    /// All nodes of a context with `from_d <= d <= to_d`, ordered by
    /// distance then id.
    fn nodes_between(
        &self,
        ctx: PathContextId,
        from_d: i32,
        to_d: i32,
    ) -> Result<Vec<PathNodeRecord>, StoreError> {
        let mut rows = Vec::new();
        for d in from_d..=to_d {
            rows.extend(self.nodes_at_distance(ctx, d)?);
        }
        Ok(rows)
    }

    fn count_at_distance(&self, ctx: PathContextId, d: i32) -> Result<usize, StoreError> {
        Ok(self.nodes_at_distance(ctx, d)?.len())
    }

    /// Node count of a context with `from_d <= d <= to_d`.
    fn count_between(
        &self,
        ctx: PathContextId,
        from_d: i32,
        to_d: i32,
    ) -> Result<usize, StoreError> {
        (from_d..=to_d).try_fold(0, |n, d| Ok(n + self.count_at_distance(ctx, d)?))
    }

    fn create_context(
        &self,
        growth: GrowthContext,
        growth_offset: i32,
    ) -> Result<ContextRecord, StoreError>;

    fn load_context(&self, ctx: PathContextId) -> Result<Option<ContextRecord>, StoreError>;

    /// Returns the number of rows affected.
    fn update_context(&self, record: &ContextRecord) -> Result<usize, StoreError>;
}
