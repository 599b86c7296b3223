//! Spatial frontier index: point → node handle within one shell.
//!
//! Two implementations share the [`PathNodeMap`] contract:
//! - [`SimplePathNodeMap`]: a single-lock hash map for small shells, ranged by
//!   one worker.
//! - [`HashPathNodeMap`]: a sharded concurrent map pre-sized to the predicted
//!   shell size, ranged in parallel. It watches its own growth and warns once
//!   when the prediction was far too low.
//!
//! `add_if_absent` is the only mutating operation used concurrently; it is
//! atomic per point, so concurrent inserts of the same point yield exactly one
//! winner and every caller learns the canonical handle.

use super::pool::{NodeHandle, NodePool};
use crate::geometry::Point;
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Contract of a shell index.
pub trait PathNodeMap: Send + Sync {
    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn get(&self, point: &Point) -> Option<NodeHandle>;

    /// Inserts `handle` under `point` unless the point is already present.
    /// Returns the canonical handle and whether `handle` was inserted.
    fn add_if_absent(&self, point: Point, handle: NodeHandle) -> (NodeHandle, bool);

    fn remove(&self, point: &Point) -> Option<NodeHandle>;

    /// Empties the index and hands back its content, sorted by point.
    fn drain(&self) -> Vec<(Point, NodeHandle)>;

    /// Snapshot of the content, sorted by point.
    fn entries(&self) -> Vec<(Point, NodeHandle)>;

    /// Number of workers `range` will use for `parallelism`.
    fn workers(&self, parallelism: usize) -> usize;

    /// Empties the index and returns every node to `pool`.
    fn clear(&self, pool: &NodePool) -> usize {
        let drained = self.drain();
        let n = drained.len();
        drained.into_par_iter().for_each(|(p, h)| {
            if let Err(e) = pool.release(h) {
                log::warn!("clear: node at {p:?} was already released: {e}");
            }
        });
        n
    }

    /// Visits every entry exactly once across up to `parallelism` workers.
    ///
    /// Each worker folds into its own `S`; the per-worker states are returned
    /// once every worker has finished. Blocks the caller.
    fn range<S, F>(&self, parallelism: usize, visit: F) -> Vec<S>
    where
        Self: Sized,
        S: Default + Send,
        F: Fn(&mut S, Point, NodeHandle) + Sync,
    {
        range_entries(&self.entries(), self.workers(parallelism), visit)
    }
}

/// Splits `entries` into at most `workers` contiguous chunks and folds each
/// chunk on the rayon pool.
pub fn range_entries<S, F>(entries: &[(Point, NodeHandle)], workers: usize, visit: F) -> Vec<S>
where
    S: Default + Send,
    F: Fn(&mut S, Point, NodeHandle) + Sync,
{
    if entries.is_empty() {
        return Vec::new();
    }
    let workers = workers.clamp(1, entries.len());
    let fold = |chunk: &[(Point, NodeHandle)]| {
        let mut state = S::default();
        for &(p, h) in chunk {
            visit(&mut state, p, h);
        }
        state
    };
    if workers == 1 {
        return vec![fold(entries)];
    }
    entries
        .par_chunks(entries.len().div_ceil(workers))
        .map(fold)
        .collect()
}

fn sorted(mut v: Vec<(Point, NodeHandle)>) -> Vec<(Point, NodeHandle)> {
    v.sort_unstable_by_key(|(p, _)| *p);
    v
}

/// Plain map behind one lock, for shells predicted to stay small.
#[derive(Debug, Default)]
pub struct SimplePathNodeMap {
    inner: RwLock<hashbrown::HashMap<Point, NodeHandle>>,
}

impl SimplePathNodeMap {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(hashbrown::HashMap::with_capacity(capacity)),
        }
    }
}

impl PathNodeMap for SimplePathNodeMap {
    fn size(&self) -> usize {
        self.inner.read().len()
    }

    fn get(&self, point: &Point) -> Option<NodeHandle> {
        self.inner.read().get(point).copied()
    }

    fn add_if_absent(&self, point: Point, handle: NodeHandle) -> (NodeHandle, bool) {
        match self.inner.write().entry(point) {
            hashbrown::hash_map::Entry::Occupied(e) => (*e.get(), false),
            hashbrown::hash_map::Entry::Vacant(e) => {
                e.insert(handle);
                (handle, true)
            }
        }
    }

    fn remove(&self, point: &Point) -> Option<NodeHandle> {
        self.inner.write().remove(point)
    }

    fn drain(&self) -> Vec<(Point, NodeHandle)> {
        sorted(self.inner.write().drain().collect())
    }

    fn entries(&self) -> Vec<(Point, NodeHandle)> {
        sorted(self.inner.read().iter().map(|(p, h)| (*p, *h)).collect())
    }

    fn workers(&self, _parallelism: usize) -> usize {
        1
    }
}

/// Sharded concurrent map for large shells.
#[derive(Debug)]
pub struct HashPathNodeMap {
    inner: DashMap<Point, NodeHandle, RandomState>,
    predicted: usize,
    overload_limit: usize,
    overloaded: AtomicBool,
    overload_inserts: AtomicUsize,
}

impl HashPathNodeMap {
    /// `overload_ratio` times `predicted` is the size past which the index
    /// reports an under-predicted shell.
    pub fn new(predicted: usize, overload_ratio: f64) -> Self {
        let predicted = predicted.max(1);
        let limit = (predicted as f64 * overload_ratio).ceil();
        let overload_limit = if limit.is_finite() && limit >= 1.0 {
            limit as usize
        } else {
            predicted
        };
        Self {
            inner: DashMap::with_capacity_and_hasher(predicted, RandomState::new()),
            predicted,
            overload_limit,
            overloaded: AtomicBool::new(false),
            overload_inserts: AtomicUsize::new(0),
        }
    }

    pub fn predicted(&self) -> usize {
        self.predicted
    }

    /// True once the index grew past its overload limit.
    pub fn under_predicted(&self) -> bool {
        self.overloaded.load(Ordering::Relaxed)
    }

    /// Inserts performed while past the overload limit.
    pub fn overload_inserts(&self) -> usize {
        self.overload_inserts.load(Ordering::Relaxed)
    }

    fn note_insert(&self) {
        let len = self.inner.len();
        if len <= self.overload_limit {
            return;
        }
        self.overload_inserts.fetch_add(1, Ordering::Relaxed);
        if !self.overloaded.swap(true, Ordering::Relaxed) {
            log::warn!(
                "frontier index holds {len} nodes for a predicted {}; shell size prediction is too low",
                self.predicted
            );
        }
    }
}

impl PathNodeMap for HashPathNodeMap {
    fn size(&self) -> usize {
        self.inner.len()
    }

    fn get(&self, point: &Point) -> Option<NodeHandle> {
        self.inner.get(point).map(|e| *e.value())
    }

    fn add_if_absent(&self, point: Point, handle: NodeHandle) -> (NodeHandle, bool) {
        let out = match self.inner.entry(point) {
            Entry::Occupied(e) => (*e.get(), false),
            Entry::Vacant(e) => {
                e.insert(handle);
                (handle, true)
            }
        };
        if out.1 {
            self.note_insert();
        }
        out
    }

    fn remove(&self, point: &Point) -> Option<NodeHandle> {
        self.inner.remove(point).map(|(_, h)| h)
    }

    fn drain(&self) -> Vec<(Point, NodeHandle)> {
        let out = self.entries();
        self.inner.clear();
        out
    }

    fn entries(&self) -> Vec<(Point, NodeHandle)> {
        sorted(self.inner.iter().map(|e| (*e.key(), *e.value())).collect())
    }

    fn workers(&self, parallelism: usize) -> usize {
        parallelism.max(1)
    }
}

/// The index a shell uses, picked from its predicted size.
#[derive(Debug)]
pub enum FrontierIndex {
    Simple(SimplePathNodeMap),
    Hashed(HashPathNodeMap),
}

impl FrontierIndex {
    /// Plain map up to `small_threshold`, hashed map above.
    pub fn for_predicted(predicted: usize, small_threshold: usize, overload_ratio: f64) -> Self {
        if predicted <= small_threshold {
            FrontierIndex::Simple(SimplePathNodeMap::with_capacity(predicted))
        } else {
            FrontierIndex::Hashed(HashPathNodeMap::new(predicted, overload_ratio))
        }
    }

    pub fn is_hashed(&self) -> bool {
        matches!(self, FrontierIndex::Hashed(_))
    }

    pub fn under_predicted(&self) -> bool {
        match self {
            FrontierIndex::Simple(_) => false,
            FrontierIndex::Hashed(m) => m.under_predicted(),
        }
    }
}

impl PathNodeMap for FrontierIndex {
    fn size(&self) -> usize {
        match self {
            FrontierIndex::Simple(m) => m.size(),
            FrontierIndex::Hashed(m) => m.size(),
        }
    }

    fn get(&self, point: &Point) -> Option<NodeHandle> {
        match self {
            FrontierIndex::Simple(m) => m.get(point),
            FrontierIndex::Hashed(m) => m.get(point),
        }
    }

    fn add_if_absent(&self, point: Point, handle: NodeHandle) -> (NodeHandle, bool) {
        match self {
            FrontierIndex::Simple(m) => m.add_if_absent(point, handle),
            FrontierIndex::Hashed(m) => m.add_if_absent(point, handle),
        }
    }

    fn remove(&self, point: &Point) -> Option<NodeHandle> {
        match self {
            FrontierIndex::Simple(m) => m.remove(point),
            FrontierIndex::Hashed(m) => m.remove(point),
        }
    }

    fn drain(&self) -> Vec<(Point, NodeHandle)> {
        match self {
            FrontierIndex::Simple(m) => m.drain(),
            FrontierIndex::Hashed(m) => m.drain(),
        }
    }

    fn entries(&self) -> Vec<(Point, NodeHandle)> {
        match self {
            FrontierIndex::Simple(m) => m.entries(),
            FrontierIndex::Hashed(m) => m.entries(),
        }
    }

    fn workers(&self, parallelism: usize) -> usize {
        match self {
            FrontierIndex::Simple(m) => m.workers(parallelism),
            FrontierIndex::Hashed(m) => m.workers(parallelism),
        }
    }
}
