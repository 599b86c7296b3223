#![allow(dead_code)]
use lattice_pathdb::oracle::OracleError;
use lattice_pathdb::prelude::*;
use lattice_pathdb::store::{ContextRecord, NodeFields, NodeUpdate, PathNodeRecord};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn p(x: i32, y: i32, z: i32) -> Point {
    Point::new(x, y, z)
}

pub fn growth() -> GrowthContext {
    GrowthContext::new(1, 8, 0)
}

/// Tuning without sleeps between retries.
pub fn fast_config() -> PathConfig {
    PathConfig {
        sync_backoff_ms: 0,
        ..PathConfig::default()
    }
}

/// Environment over `store` with a private pool.
pub fn env_on(store: Arc<dyn PathNodeStore>, oracle: Arc<dyn BranchingOracle>) -> PathEnv {
    PathEnv::new(store, oracle)
        .with_pool(Arc::new(NodePool::new()))
        .with_config(fast_config())
}

pub fn memory_env() -> (PathEnv, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (env_on(store.clone(), Arc::new(AlternatingTrioOracle)), store)
}

pub fn started(env: &PathEnv, offset: i32, center: Point) -> PathContext {
    let mut ctx = PathContext::create(env, growth(), offset).unwrap();
    ctx.init_root_node(center).unwrap();
    ctx
}

pub fn from_count(n: &NodeView) -> usize {
    n.connections
        .iter()
        .filter(|c| **c == ConnectionState::From)
        .count()
}

/// Every stored node of `ctx` up to `max_d`, keyed by point.
pub fn stored_nodes(store: &MemoryStore, ctx: PathContextId, max_d: i32) -> BTreeMap<Point, PathNodeRecord> {
    (0..=max_d)
        .flat_map(|d| store.nodes_at_distance(ctx, d).unwrap())
        .map(|r| (r.fields.point, r))
        .collect()
}

/// Id-free description of a stored graph: per point its distance, mask and
/// the points its links lead to.
pub type Signature = BTreeMap<Point, (i32, u16, [Option<Point>; 3])>;

pub fn signature(store: &MemoryStore, ctx: PathContextId, max_d: i32, center: Point) -> Signature {
    stored_nodes(store, ctx, max_d)
        .into_values()
        .map(|r| {
            let links = r
                .fields
                .link_ids
                .map(|id| id.and_then(|id| store.get(id)).map(|l| l.fields.point - center));
            (
                r.fields.point - center,
                (r.fields.d, r.fields.connection_mask, links),
            )
        })
        .collect()
}

fn slot_state(mask: u16, slot: usize) -> u16 {
    (mask >> (2 * slot)) & 0b11
}

/// Checks distance monotonicity and link symmetry in both directions over
/// the stored graph, and
/// that every node below `complete_below` has all its slots decided.
pub fn assert_graph_consistent(store: &MemoryStore, ctx: PathContextId, max_d: i32, complete_below: i32) {
    let nodes = stored_nodes(store, ctx, max_d);
    let by_id: HashMap<PathNodeId, &PathNodeRecord> = nodes.values().map(|r| (r.id, r)).collect();
    for r in nodes.values() {
        let f = &r.fields;
        let mut froms = 0;
        for slot in 0..3 {
            let state = slot_state(f.connection_mask, slot);
            match state {
                0 => {
                    assert!(f.link_ids[slot].is_none());
                    assert!(f.d >= complete_below, "open slot on {:?} at d={}", f.point, f.d);
                }
                1 => {
                    froms += 1;
                    let parent = by_id[&f.link_ids[slot].expect("from slot without parent")];
                    assert_eq!(parent.fields.d, f.d - 1, "parent of {:?}", f.point);
                    let linked_back = (0..3).any(|ps| {
                        slot_state(parent.fields.connection_mask, ps) == 2
                            && parent.fields.link_ids[ps] == Some(r.id)
                    });
                    assert!(linked_back, "parent of {:?} has no next link to it", f.point);
                }
                2 => {
                    if let Some(child) = f.link_ids[slot] {
                        let child = by_id[&child];
                        assert_eq!(child.fields.d, f.d + 1, "child of {:?}", f.point);
                        assert!(child.fields.link_ids.contains(&Some(r.id)));
                    }
                }
                _ => assert!(f.link_ids[slot].is_none()),
            }
        }
        if f.d == 0 {
            assert_eq!(froms, 0);
        } else {
            assert!(froms >= 1, "{:?} has no parent", f.point);
        }
    }
}

/// Oracle over an explicit graph. Points are relative to the root; builder
/// ids follow point order.
#[derive(Debug, Default, Clone)]
pub struct ScriptedOracle {
    trios: BTreeMap<Point, [i8; 3]>,
    edges: HashMap<(Point, i8), Point>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, at: Point, trio: [i8; 3]) -> Self {
        self.trios.insert(at, trio);
        self
    }

    pub fn edge(mut self, from: Point, conn: i8, to: Point) -> Self {
        self.edges.insert((from, conn), to);
        self
    }

    /// Adds an edge for every slot of every node using fixed vectors.
    pub fn with_vectors(mut self, vectors: &[(i8, Point)]) -> Self {
        let v: HashMap<i8, Point> = vectors
            .iter()
            .flat_map(|&(k, v)| [(k, v), (-k, -v)])
            .collect();
        let trios: Vec<_> = self.trios.iter().map(|(p, t)| (*p, *t)).collect();
        for (at, trio) in trios {
            for k in trio {
                if let Some(vec) = v.get(&k) {
                    self.edges.entry((at, k)).or_insert(at + *vec);
                }
            }
        }
        self
    }

    fn builder_at(&self, at: Point) -> Option<NodeBuilder> {
        let pos = self.trios.keys().position(|k| *k == at)?;
        let trio = self.trios[&at];
        Some(NodeBuilder {
            selector: BuilderSelector {
                builder_id: pos as i32 + 1,
                trio_id: 0,
            },
            connections: trio.map(|k| ConnectionId::new(k).unwrap()),
        })
    }

    /// Triangular prism: two triangles joined by three vertical edges.
    pub fn prism() -> Self {
        Self::new()
            .node(p(0, 0, 0), [1, 2, 4])
            .node(p(1, 0, 0), [-1, 3, 4])
            .node(p(0, 1, 0), [-2, -3, 4])
            .node(p(0, 0, 1), [1, 2, -4])
            .node(p(1, 0, 1), [-1, 3, -4])
            .node(p(0, 1, 1), [-2, -3, -4])
            .with_vectors(&[
                (1, p(1, 0, 0)),
                (2, p(0, 1, 0)),
                (3, p(-1, 1, 0)),
                (4, p(0, 0, 1)),
            ])
    }

    /// Two parents reach the same child through the same reverse
    /// connection; every other slot leads back to the root.
    pub fn contested() -> Self {
        let (r, p1, p2, p3, q) = (p(0, 0, 0), p(1, 0, 0), p(0, 1, 0), p(0, 0, 1), p(1, 1, 0));
        Self::new()
            .node(r, [1, 2, 3])
            .node(p1, [-1, 5, 6])
            .node(p2, [-2, 5, 7])
            .node(p3, [-3, 8, 9])
            .node(q, [-5, 10, 11])
            .edge(r, 1, p1)
            .edge(r, 2, p2)
            .edge(r, 3, p3)
            .edge(p1, 5, q)
            .edge(p1, 6, r)
            .edge(p2, 5, q)
            .edge(p2, 7, r)
            .edge(p3, 8, r)
            .edge(p3, 9, r)
            .edge(q, 10, r)
            .edge(q, 11, r)
    }

    /// Binary tree of `depth - 1` levels under a three-way root. On the last
    /// step every parent sends one connection to a hub shared with other
    /// parents through the same reverse connection, and one to its own leaf.
    /// Hubs sit at `(1000 + i % hubs, depth, 0)`.
    pub fn funnel(depth: i32, hubs: i32) -> Self {
        let conn = |level: i32, k: i32| (10 * level + 1 + k) as i8;
        let mut o = Self::new().node(Point::ORIGIN, [1, 2, 3]);
        for i in 0..3 {
            let child = p(i, 1, 0);
            o = o
                .node(child, [-(i as i8 + 1), conn(1, 0), conn(1, 1)])
                .edge(Point::ORIGIN, i as i8 + 1, child);
        }
        let mut width = 3;
        for level in 1..depth - 1 {
            for i in 0..width {
                for k in 0..2 {
                    let child = p(2 * i + k, level + 1, 0);
                    o = o
                        .node(child, [-conn(level, k), conn(level + 1, 0), conn(level + 1, 1)])
                        .edge(p(i, level, 0), conn(level, k), child);
                }
            }
            width *= 2;
        }
        let last = depth - 1;
        for i in 0..width {
            let (parent, hub, leaf) = (p(i, last, 0), p(1000 + i % hubs, depth, 0), p(i, depth, 0));
            o = o
                .node(hub, [-conn(last, 0), conn(depth, 0), conn(depth, 1)])
                .node(leaf, [-conn(last, 1), conn(depth, 0), conn(depth, 1)])
                .edge(parent, conn(last, 0), hub)
                .edge(parent, conn(last, 1), leaf);
        }
        o
    }
}

impl BranchingOracle for ScriptedOracle {
    fn root_builder(&self, growth: &GrowthContext, _offset: i32) -> Result<NodeBuilder, OracleError> {
        self.builder_at(Point::ORIGIN)
            .ok_or(OracleError::UnsupportedGrowth(*growth))
    }

    fn next_builder(
        &self,
        growth: &GrowthContext,
        _offset: i32,
        from_rel: Point,
        conn: ConnectionId,
    ) -> Result<(NodeBuilder, Point), OracleError> {
        let unknown = || OracleError::UnknownConnection {
            conn,
            from: from_rel,
            growth: *growth,
        };
        let to = *self.edges.get(&(from_rel, conn.get())).ok_or_else(unknown)?;
        let b = self.builder_at(to).ok_or_else(unknown)?;
        Ok((b, to))
    }

    fn builder(&self, selector: BuilderSelector) -> Result<NodeBuilder, OracleError> {
        let unknown = OracleError::UnknownSelector {
            builder_id: selector.builder_id,
            trio_id: selector.trio_id,
        };
        let at = self
            .trios
            .keys()
            .nth((selector.builder_id - 1).max(0) as usize)
            .ok_or(unknown.clone())?;
        self.builder_at(*at).ok_or(unknown)
    }
}

/// Store wrapper injecting failures in front of a [`MemoryStore`].
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    /// Number of upcoming inserts that fail with a backend error.
    pub failing_inserts: AtomicUsize,
    /// Points whose inserts always fail with a backend error.
    pub broken_points: Mutex<HashSet<Point>>,
    /// Points another writer grabs right before our insert.
    pub stolen_points: Mutex<HashSet<Point>>,
    /// Number of upcoming inserts that commit and then report a backend
    /// error.
    pub ghost_commits: AtomicUsize,
    /// Number of upcoming context updates that fail with a backend error.
    pub failing_context_updates: AtomicUsize,
    pub insert_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_failure(&self) -> bool {
        take(&self.failing_inserts)
    }
}

fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl PathNodeStore for FlakyStore {
    fn lookup_by_point(&self, ctx: PathContextId, point: Point) -> Result<Option<PathNodeRecord>, StoreError> {
        self.inner.lookup_by_point(ctx, point)
    }

    fn insert_returning_id(&self, fields: &NodeFields) -> Result<PathNodeId, StoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.broken_points.lock().contains(&fields.point) || self.take_failure() {
            return Err(StoreError::Backend(format!("insert of {:?} timed out", fields.point)));
        }
        if self.stolen_points.lock().remove(&fields.point) {
            let mut theirs = fields.clone();
            theirs.connection_mask = 0;
            theirs.link_ids = [None; 3];
            self.inner.insert_returning_id(&theirs)?;
        }
        let id = self.inner.insert_returning_id(fields)?;
        if take(&self.ghost_commits) {
            return Err(StoreError::Backend(format!("commit of {:?} timed out", fields.point)));
        }
        Ok(id)
    }

    fn update(&self, id: PathNodeId, update: &NodeUpdate) -> Result<usize, StoreError> {
        self.inner.update(id, update)
    }

    fn count_by_context(&self, ctx: PathContextId) -> Result<usize, StoreError> {
        self.inner.count_by_context(ctx)
    }

    fn nodes_at_distance(&self, ctx: PathContextId, d: i32) -> Result<Vec<PathNodeRecord>, StoreError> {
        self.inner.nodes_at_distance(ctx, d)
    }

    fn create_context(&self, growth: GrowthContext, growth_offset: i32) -> Result<ContextRecord, StoreError> {
        self.inner.create_context(growth, growth_offset)
    }

    fn load_context(&self, ctx: PathContextId) -> Result<Option<ContextRecord>, StoreError> {
        self.inner.load_context(ctx)
    }

    fn update_context(&self, record: &ContextRecord) -> Result<usize, StoreError> {
        if take(&self.failing_context_updates) {
            return Err(StoreError::Backend("context update timed out".into()));
        }
        self.inner.update_context(record)
    }
}
