//! Branching-rule oracle.
//!
//! The oracle decides, for a lattice point and a travel direction, which local
//! branching rule ("trio") applies at the destination and where the
//! destination is. The engine depends only on [`BranchingOracle`]; the
//! geometric precomputation behind it lives elsewhere.
//!
//! [`AlternatingTrioOracle`] is a small, fully deterministic oracle usable by
//! drivers, tests and benchmarks.

use crate::geometry::{ConnectionId, GrowthContext, Point};
use thiserror::Error;

/// Number of connection slots of every branching rule.
pub const NB_CONNECTIONS: usize = 3;

/// Persisted selector of a branching rule: the builder id plus its trio id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct BuilderSelector {
    pub builder_id: i32,
    pub trio_id: i16,
}

/// A resolved branching rule: its selector and the three connection ids it
/// exposes, slot `i` using `connections[i]`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeBuilder {
    pub selector: BuilderSelector,
    pub connections: [ConnectionId; NB_CONNECTIONS],
}

impl NodeBuilder {
    /// Slot index of `conn` in this rule, if the rule exposes it.
    #[inline]
    pub fn slot_of(&self, conn: ConnectionId) -> Option<usize> {
        self.connections.iter().position(|c| *c == conn)
    }
}

/// Failures of the oracle. Under correct use these never happen: they mean
/// the geometric data is self-inconsistent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("connection {conn} is not exposed at relative point {from:?} in {growth}")]
    UnknownConnection {
        conn: ConnectionId,
        from: Point,
        growth: GrowthContext,
    },
    #[error("no branching rule for builder id {builder_id} and trio {trio_id}")]
    UnknownSelector { builder_id: i32, trio_id: i16 },
    #[error("growth context {0} is not supported")]
    UnsupportedGrowth(GrowthContext),
}

/// Source of branching rules. Implementations must be pure functions of
/// their inputs.
pub trait BranchingOracle: Send + Sync {
    /// Branching rule applying at the root of a context.
    fn root_builder(&self, growth: &GrowthContext, offset: i32) -> Result<NodeBuilder, OracleError>;

    /// Destination rule and point (relative to the root) reached from
    /// `from_rel` along `conn`.
    fn next_builder(
        &self,
        growth: &GrowthContext,
        offset: i32,
        from_rel: Point,
        conn: ConnectionId,
    ) -> Result<(NodeBuilder, Point), OracleError>;

    /// Rebuild a rule from its persisted selector.
    fn builder(&self, selector: BuilderSelector) -> Result<NodeBuilder, OracleError>;
}

/// Deterministic oracle over the three unit axes.
///
/// Points with an even coordinate sum (relative to the root) branch along
/// `{+X, +Y, +Z}`, odd ones along `{-X, -Y, -Z}`. Every hop flips parity, so
/// the destination rule always exposes the reverse connection. The slot order
/// is rotated by `growth_index + offset`.
#[derive(Copy, Clone, Debug, Default)]
pub struct AlternatingTrioOracle;

impl AlternatingTrioOracle {
    pub const X: i8 = 1;
    pub const Y: i8 = 2;
    pub const Z: i8 = 3;

    fn rotation(growth: &GrowthContext, offset: i32) -> usize {
        (growth.growth_index + offset).rem_euclid(NB_CONNECTIONS as i32) as usize
    }

    fn make(parity: usize, rotation: usize) -> Result<NodeBuilder, OracleError> {
        let sign: i8 = if parity == 0 { 1 } else { -1 };
        let axes = [Self::X, Self::Y, Self::Z];
        let selector = BuilderSelector {
            builder_id: 1 + (parity * NB_CONNECTIONS + rotation) as i32,
            trio_id: parity as i16,
        };
        let conn = |i: usize| {
            ConnectionId::new(sign * axes[(i + rotation) % NB_CONNECTIONS]).ok_or(
                OracleError::UnknownSelector {
                    builder_id: selector.builder_id,
                    trio_id: selector.trio_id,
                },
            )
        };
        Ok(NodeBuilder {
            selector,
            connections: [conn(0)?, conn(1)?, conn(2)?],
        })
    }

    fn builder_at(rel: Point, rotation: usize) -> Result<NodeBuilder, OracleError> {
        Self::make(rel.coord_sum().rem_euclid(2) as usize, rotation)
    }

    /// Unit vector travelled along `conn`, if it is one of the six axis moves.
    pub fn vector(conn: ConnectionId) -> Option<Point> {
        let sign = conn.get().signum() as i32;
        match conn.get().abs() {
            Self::X => Some(Point::new(sign, 0, 0)),
            Self::Y => Some(Point::new(0, sign, 0)),
            Self::Z => Some(Point::new(0, 0, sign)),
            _ => None,
        }
    }
}

impl BranchingOracle for AlternatingTrioOracle {
    fn root_builder(&self, growth: &GrowthContext, offset: i32) -> Result<NodeBuilder, OracleError> {
        Self::builder_at(Point::ORIGIN, Self::rotation(growth, offset))
    }

    fn next_builder(
        &self,
        growth: &GrowthContext,
        offset: i32,
        from_rel: Point,
        conn: ConnectionId,
    ) -> Result<(NodeBuilder, Point), OracleError> {
        let rotation = Self::rotation(growth, offset);
        let unknown = || OracleError::UnknownConnection {
            conn,
            from: from_rel,
            growth: *growth,
        };
        let current = Self::builder_at(from_rel, rotation)?;
        if current.slot_of(conn).is_none() {
            return Err(unknown());
        }
        let np = from_rel + Self::vector(conn).ok_or_else(unknown)?;
        Ok((Self::builder_at(np, rotation)?, np))
    }

    fn builder(&self, selector: BuilderSelector) -> Result<NodeBuilder, OracleError> {
        let raw = selector.builder_id - 1;
        let unknown = OracleError::UnknownSelector {
            builder_id: selector.builder_id,
            trio_id: selector.trio_id,
        };
        if !(0..(2 * NB_CONNECTIONS as i32)).contains(&raw) {
            return Err(unknown);
        }
        let parity = raw as usize / NB_CONNECTIONS;
        if parity as i16 != selector.trio_id {
            return Err(unknown);
        }
        Self::make(parity, raw as usize % NB_CONNECTIONS)
    }
}
