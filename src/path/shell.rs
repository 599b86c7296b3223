//! One distance level of a path context.

use super::map::{FrontierIndex, PathNodeMap};
use super::pool::{NodeHandle, NodePool};
use crate::config::PathConfig;
use crate::debug_invariants::{DebugInvariants, ensure};
use crate::geometry::Point;
use crate::path_error::PathError;

/// Predicted size of the shell following one at distance `d` holding
/// `current_len` nodes.
///
/// Sphere area grows by `1 + 2/d + 1/d²` from `d` to `d + 1`; the ratio is
/// inflated for small `d` where the lattice is far from spherical.
pub fn predicted_size(d: i32, current_len: usize) -> usize {
    match d {
        i32::MIN..=0 => 3,
        1 => 6,
        _ => {
            let df = d as f64;
            let ratio = 1.0 + 2.0 / df + 1.0 / (df * df);
            let correction = if d <= 16 {
                1.11
            } else if d <= 32 {
                1.04
            } else {
                1.02
            };
            (current_len as f64 * ratio * correction) as usize
        }
    }
}

/// The nodes at one distance from the root, plus per-shell counters.
#[derive(Debug)]
pub struct FrontierShell {
    d: i32,
    expected_size: usize,
    index: FrontierIndex,
    select_conflicts: usize,
    insert_conflicts: usize,
}

impl FrontierShell {
    /// Shell at distance `d` sized for `expected_size` nodes.
    pub fn with_expected(d: i32, expected_size: usize, config: &PathConfig) -> Self {
        Self {
            d,
            expected_size,
            index: FrontierIndex::for_predicted(
                expected_size,
                config.small_shell_threshold,
                config.overload_warn_ratio,
            ),
            select_conflicts: 0,
            insert_conflicts: 0,
        }
    }

    /// The distance-0 shell holding only the root.
    pub fn root(config: &PathConfig) -> Self {
        Self::with_expected(0, 1, config)
    }

    /// The shell following `self`, sized from the growth prediction.
    pub fn next(&self, config: &PathConfig) -> Self {
        Self::with_expected(self.d + 1, self.predicted_next_size(), config)
    }

    #[inline]
    pub fn d(&self) -> i32 {
        self.d
    }

    #[inline]
    pub fn expected_size(&self) -> usize {
        self.expected_size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn predicted_next_size(&self) -> usize {
        predicted_size(self.d, self.len())
    }

    #[inline]
    pub fn index(&self) -> &FrontierIndex {
        &self.index
    }

    #[inline]
    pub fn get(&self, point: &Point) -> Option<NodeHandle> {
        self.index.get(point)
    }

    /// Inserts the node behind `handle` keyed by its own point. Returns the
    /// canonical handle for that point and whether `handle` was inserted.
    pub fn add_node(&self, pool: &NodePool, handle: NodeHandle) -> Result<(NodeHandle, bool), PathError> {
        let point = pool.with(handle, |n| n.point())?;
        Ok(self.index.add_if_absent(point, handle))
    }

    pub fn remove(&self, point: &Point) -> Option<NodeHandle> {
        self.index.remove(point)
    }

    pub fn select_conflicts(&self) -> usize {
        self.select_conflicts
    }

    pub fn insert_conflicts(&self) -> usize {
        self.insert_conflicts
    }

    /// Adds worker-summed conflict counts.
    pub fn record_conflicts(&mut self, select: usize, insert: usize) {
        self.select_conflicts += select;
        self.insert_conflicts += insert;
    }

    /// Returns every node to `pool` except the root and nodes at the live
    /// distance `live_d` or beyond. Returns the number released.
    pub fn release(&self, pool: &NodePool, live_d: i32) -> usize {
        let mut released = 0;
        for (p, h) in self.index.drain() {
            let keep = pool.with(h, |n| n.is_root() || n.d() >= live_d).unwrap_or(false);
            if keep {
                log::debug!("shell d={}: keeping node at {p:?}", self.d);
                self.index.add_if_absent(p, h);
                continue;
            }
            match pool.release(h) {
                Ok(()) => released += 1,
                Err(e) => log::warn!("shell d={}: node at {p:?} not released: {e}", self.d),
            }
        }
        released
    }
}

impl DebugInvariants for FrontierShell {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "FrontierShell");
    }

    fn validate_invariants(&self) -> Result<(), PathError> {
        ensure(self.d >= 0, || format!("shell distance {} is negative", self.d))?;
        ensure(self.d > 0 || self.len() <= 1, || {
            format!("distance-0 shell holds {} nodes", self.len())
        })
    }
}
