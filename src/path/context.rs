//! Path context: owns the root, the live shell and the breadth-first step.
//!
//! One [`PathContext::advance`] call moves the frontier one distance level
//! outward:
//! 1. every open slot of every node in the current shell is resolved against
//!    the current shell, the next shell and the store, creating or linking
//!    nodes of the next shell (parallel over the current shell);
//! 2. the next shell is persisted, then the current one;
//! 3. the next shell becomes current and the old one is recycled.
//!
//! Workers fold their counters privately; the totals land in the returned
//! [`AdvanceReport`]. A single context never advances concurrently with
//! itself (`advance` takes `&mut self`); independent contexts may advance on
//! different threads against the same store and pool.

use super::map::PathNodeMap;
use super::node::{NodeState, NodeView, PathNode};
use super::pool::{NodeHandle, NodePool};
use super::shell::FrontierShell;
use crate::config::PathConfig;
use crate::debug_invariants::{DebugInvariants, ensure};
use crate::geometry::{ConnectionId, GrowthContext, Point};
use crate::oracle::BranchingOracle;
use crate::path_error::PathError;
use crate::store::{
    ContextRecord, PathContextId, PathNodeId, PathNodeRecord, PathNodeStore, StoreError,
};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Collaborators shared by every context of a run.
#[derive(Clone)]
pub struct PathEnv {
    pub store: Arc<dyn PathNodeStore>,
    pub oracle: Arc<dyn BranchingOracle>,
    pub pool: Arc<NodePool>,
    pub config: PathConfig,
}

impl PathEnv {
    /// Environment on the process-wide node pool with default tuning.
    pub fn new(store: Arc<dyn PathNodeStore>, oracle: Arc<dyn BranchingOracle>) -> Self {
        Self {
            store,
            oracle,
            pool: NodePool::shared(),
            config: PathConfig::default(),
        }
    }

    pub fn with_pool(mut self, pool: Arc<NodePool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_config(mut self, config: PathConfig) -> Self {
        self.config = config;
        self
    }
}

impl fmt::Debug for PathEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathEnv")
            .field("pool", &self.pool)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContextState {
    Created,
    RootInitialized,
    Advancing,
    Aborted,
}

/// Outcome of one `advance()` call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdvanceReport {
    pub from_d: i32,
    pub to_d: i32,
    pub current_size: usize,
    pub next_size: usize,
    /// Nodes created for the next shell.
    pub created: usize,
    /// Candidates that reached a node already in the next shell.
    pub merges: usize,
    /// Slots turned Blocked this round.
    pub dead_ends: usize,
    /// Candidates already stored at a shallower distance.
    pub select_conflicts: usize,
    /// Next-shell nodes that lost their insert race.
    pub insert_conflicts: usize,
    /// Persistence changes dropped after retries.
    pub sync_failures: usize,
    /// Current-shell nodes skipped because they were never persisted.
    pub skipped: usize,
    /// Nodes returned to the pool when the old shell was recycled.
    pub released: usize,
}

#[derive(Default)]
struct ExpandStats {
    created: usize,
    merges: usize,
    dead_ends: usize,
    select_conflicts: usize,
    skipped: usize,
    failures: usize,
    fatal: Option<PathError>,
}

#[derive(Default)]
struct SyncStats {
    failures: usize,
    conflicted: Vec<(Point, NodeHandle)>,
    fatal: Option<PathError>,
}

/// Snapshot of an open node taken before any child is locked.
struct OpenNode {
    id: Option<PathNodeId>,
    state: NodeState,
    point: Point,
    builder: Option<crate::oracle::NodeBuilder>,
    open: Vec<usize>,
}

/// Exploration of the lattice from one root point.
pub struct PathContext {
    record: ContextRecord,
    state: ContextState,
    center: Point,
    root: Option<NodeHandle>,
    current: Option<FrontierShell>,
    retained: Vec<FrontierShell>,
    store: Arc<dyn PathNodeStore>,
    oracle: Arc<dyn BranchingOracle>,
    pool: Arc<NodePool>,
    config: PathConfig,
}

impl PathContext {
    fn from_record(env: &PathEnv, record: ContextRecord) -> Result<Self, PathError> {
        env.config.validate()?;
        Ok(Self {
            record,
            state: ContextState::Created,
            center: Point::ORIGIN,
            root: None,
            current: None,
            retained: Vec::new(),
            store: Arc::clone(&env.store),
            oracle: Arc::clone(&env.oracle),
            pool: Arc::clone(&env.pool),
            config: env.config.clone(),
        })
    }

    /// Inserts a new context row and returns the context in `Created` state.
    pub fn create(env: &PathEnv, growth: GrowthContext, growth_offset: i32) -> Result<Self, PathError> {
        env.config.validate()?;
        let record = env.store.create_context(growth, growth_offset)?;
        log::debug!("created path context {} for {growth} offset {growth_offset}", record.id);
        Self::from_record(env, record)
    }

    /// Rebuilds a context from the store: root from distance 0, live shell
    /// from the stored maximum distance.
    pub fn load(env: &PathEnv, ctx_id: PathContextId) -> Result<Self, PathError> {
        let record = env
            .store
            .load_context(ctx_id)?
            .ok_or(StoreError::NotFound {
                table: "path_contexts",
                id: ctx_id as i64,
            })?;
        let roots = env.store.nodes_at_distance(ctx_id, 0)?;
        let [root_row] = roots.as_slice() else {
            return Err(PathError::InvariantViolation(format!(
                "context {ctx_id} has {} root rows",
                roots.len()
            )));
        };
        if record.root_builder_id != Some(root_row.fields.selector.builder_id) {
            return Err(PathError::InvariantViolation(format!(
                "context {ctx_id} root builder {:?} does not match root row {:?}",
                record.root_builder_id, root_row.fields.selector
            )));
        }
        let max_dist = record.max_dist;
        let mut ctx = Self::from_record(env, record)?;
        ctx.center = root_row.fields.point;

        let root = ctx.load_node(root_row)?;
        let root_shell = FrontierShell::root(&ctx.config);
        root_shell.add_node(&ctx.pool, root)?;
        ctx.root = Some(root);

        if max_dist == 0 {
            ctx.current = Some(root_shell);
            ctx.state = ContextState::RootInitialized;
        } else {
            ctx.retained.push(root_shell);
            let rows = ctx.store.nodes_at_distance(ctx_id, max_dist)?;
            let shell = FrontierShell::with_expected(max_dist, rows.len().max(1), &ctx.config);
            // the context's Drop recycles the shell even when a row is rejected
            ctx.current = Some(shell);
            for row in &rows {
                let h = ctx.load_node(row)?;
                if let Some(shell) = ctx.current.as_ref() {
                    shell.add_node(&ctx.pool, h)?;
                }
            }
            ctx.state = ContextState::Advancing;
        }
        log::info!("{ctx}: loaded with {} open nodes", ctx.number_of_open_nodes());
        Ok(ctx)
    }

    fn load_node(&self, row: &PathNodeRecord) -> Result<NodeHandle, PathError> {
        let builder = self.oracle.builder(row.fields.selector)?;
        let h = self.pool.acquire();
        match self.pool.with_mut(h, |n| n.load(row, builder)).and_then(|r| r) {
            Ok(()) => Ok(h),
            Err(e) => {
                self.pool.release(h)?;
                Err(e)
            }
        }
    }

    /// Creates and persists the root node at `center`.
    pub fn init_root_node(&mut self, center: Point) -> Result<(), PathError> {
        match self.state {
            ContextState::Created => {}
            ContextState::Aborted => return Err(PathError::Aborted(self.id())),
            _ => {
                return Err(PathError::InvariantViolation(format!(
                    "{self}: root node already initialized"
                )));
            }
        }
        let builder = self
            .oracle
            .root_builder(&self.record.growth, self.record.growth_offset)?;
        let h = self.pool.acquire();
        let ctx_id = self.id();
        let synced = self
            .pool
            .with_mut(h, |n| -> Result<NodeState, PathError> {
                n.init(ctx_id, builder, center, 0)?;
                self.persist(n)?;
                // a root row left by an earlier attempt is taken over
                if n.state() == NodeState::InConflict {
                    self.adopt_own_row(n)?;
                }
                Ok(n.state())
            })
            .and_then(|r| r);
        match synced {
            Ok(NodeState::SyncedInDb) => {}
            Ok(_) => {
                self.pool.release(h)?;
                return Err(PathError::NodeInConflict(center));
            }
            Err(e) => {
                self.pool.release(h)?;
                return Err(e);
            }
        }

        let mut record = self.record.clone();
        record.root_builder_id = Some(builder.selector.builder_id);
        if let Err(e) = self.persist_context(&record) {
            log::error!("{self}: root node stored but context update failed: {e}");
            self.pool.release(h)?;
            return Err(e);
        }
        self.record = record;

        let shell = FrontierShell::root(&self.config);
        shell.add_node(&self.pool, h)?;
        self.center = center;
        self.root = Some(h);
        self.current = Some(shell);
        self.state = ContextState::RootInitialized;
        log::info!("{self}: root node at {center:?}");
        Ok(())
    }

    /// Expands the live shell by one distance level.
    pub fn advance(&mut self) -> Result<AdvanceReport, PathError> {
        match self.state {
            ContextState::Created => return Err(PathError::NotInitialized(self.id())),
            ContextState::Aborted => return Err(PathError::Aborted(self.id())),
            ContextState::RootInitialized | ContextState::Advancing => {}
        }
        let built = self.build_next();
        match built {
            Ok((next, report)) => Ok(self.swap_in(next, report)),
            Err(e) => {
                if e.is_fatal() {
                    log::error!("{self}: aborting: {e}");
                    self.state = ContextState::Aborted;
                }
                Err(e)
            }
        }
    }

    /// Calls [`advance`](Self::advance) until `max_dist() >= d` or the
    /// frontier is exhausted.
    ///
    /// An exhausted frontier is not an error: the reports stop at the last
    /// distance reached, and callers compare [`max_dist`](Self::max_dist)
    /// with `d` to tell the two outcomes apart.
    pub fn request_new_max_dist(&mut self, d: i32) -> Result<Vec<AdvanceReport>, PathError> {
        let mut reports = Vec::new();
        while self.max_dist() < d {
            if self.state != ContextState::Created && self.number_of_open_nodes() == 0 {
                log::info!("{self}: frontier exhausted at distance {}", self.max_dist());
                break;
            }
            reports.push(self.advance()?);
        }
        Ok(reports)
    }

    fn build_next(&self) -> Result<(FrontierShell, AdvanceReport), PathError> {
        let current = self
            .current
            .as_ref()
            .ok_or(PathError::NotInitialized(self.id()))?;
        let mut next = current.next(&self.config);
        let par = self.config.parallelism;
        let abort = AtomicBool::new(false);

        let expanded: Vec<ExpandStats> = current.index().range(par, |s: &mut ExpandStats, p, h| {
            if s.fatal.is_some() || abort.load(Ordering::Relaxed) {
                return;
            }
            if let Err(e) = self.expand_node(current, &next, h, s) {
                if e.is_fatal() {
                    abort.store(true, Ordering::Relaxed);
                    s.fatal = Some(e);
                } else {
                    log::error!("{self}: dropping expansion of node at {p:?}: {e}");
                    s.failures += 1;
                }
            }
        });

        let mut report = AdvanceReport {
            from_d: current.d(),
            to_d: next.d(),
            current_size: current.len(),
            ..AdvanceReport::default()
        };
        for s in expanded {
            if let Some(e) = s.fatal {
                next.index().clear(&self.pool);
                return Err(e);
            }
            report.created += s.created;
            report.merges += s.merges;
            report.dead_ends += s.dead_ends;
            report.select_conflicts += s.select_conflicts;
            report.skipped += s.skipped;
            report.sync_failures += s.failures;
        }

        // Children first: parents' Next links resolve to the ids assigned here.
        let synced = self.sync_shell(&next, true);
        let mut conflicted = Vec::new();
        for s in synced {
            if let Some(e) = s.fatal {
                next.index().clear(&self.pool);
                return Err(e);
            }
            report.sync_failures += s.failures;
            conflicted.extend(s.conflicted);
        }
        report.insert_conflicts = conflicted.len();
        for (p, h) in conflicted {
            next.remove(&p);
            self.pool.release(h)?;
        }

        for s in self.sync_shell(current, false) {
            if let Some(e) = s.fatal {
                next.index().clear(&self.pool);
                return Err(e);
            }
            report.sync_failures += s.failures;
        }

        next.record_conflicts(report.select_conflicts, report.insert_conflicts);
        report.next_size = next.len();
        Ok((next, report))
    }

    fn expand_node(
        &self,
        current: &FrontierShell,
        next: &FrontierShell,
        on_h: NodeHandle,
        s: &mut ExpandStats,
    ) -> Result<(), PathError> {
        let on = self.pool.with(on_h, |on| OpenNode {
            id: on.id(),
            state: on.state(),
            point: on.point(),
            builder: on.builder().copied(),
            open: on.open_slots().collect(),
        })?;
        let Some(on_id) = on.id.filter(|_| on.state != NodeState::New) else {
            log::error!("{self}: node at {:?} was never persisted, skipping", on.point);
            s.skipped += 1;
            return Ok(());
        };
        if on.open.is_empty() {
            log::debug!("{self}: node at {:?} has no open connection", on.point);
            return Ok(());
        }
        let builder = on.builder.ok_or_else(|| {
            PathError::InvariantViolation(format!("node at {:?} has no branching rule", on.point))
        })?;
        let from_rel = on.point - self.center;

        for slot in on.open {
            let conn = builder.connections[slot];
            let (child_builder, np_rel) = self.oracle.next_builder(
                &self.record.growth,
                self.record.growth_offset,
                from_rel,
                conn,
            )?;
            let np = self.center + np_rel;

            if current.get(&np).is_some() {
                self.dead_end(on_h, slot, s)?;
                continue;
            }
            let child = match next.get(&np) {
                Some(h) => {
                    s.merges += 1;
                    h
                }
                None => {
                    if self.lookup_with_retry(np)?.is_some() {
                        s.select_conflicts += 1;
                        self.dead_end(on_h, slot, s)?;
                        continue;
                    }
                    let h = self.pool.acquire();
                    let ctx_id = self.id();
                    let d = next.d();
                    if let Err(e) = self
                        .pool
                        .with_mut(h, |n| n.init(ctx_id, child_builder, np, d))
                        .and_then(|r| r)
                    {
                        self.pool.release(h)?;
                        return Err(e);
                    }
                    let (winner, inserted) = next.add_node(&self.pool, h)?;
                    if inserted {
                        s.created += 1;
                    } else {
                        self.pool.release(h)?;
                        s.merges += 1;
                    }
                    winner
                }
            };
            self.link(on_h, on_id, slot, conn, child, s)?;
        }
        Ok(())
    }

    /// Claims the child's From slot for `on`; a lost race blocks `on`'s slot.
    fn link(
        &self,
        on_h: NodeHandle,
        on_id: PathNodeId,
        slot: usize,
        conn: ConnectionId,
        child: NodeHandle,
        s: &mut ExpandStats,
    ) -> Result<(), PathError> {
        let claimed = self
            .pool
            .with_mut(child, |c| c.set_from(conn.reverse(), on_id, Some(on_h)).map(|_| c.id()))?;
        match claimed {
            Ok(child_id) => self.pool.with_mut(on_h, |on| on.set_next(slot, child_id, child)),
            Err(e @ PathError::ConnectionNotAvailable { .. }) => {
                log::debug!("{self}: node {on_id} lost a from-slot race: {e}");
                self.dead_end(on_h, slot, s)
            }
            Err(e) => Err(e),
        }
    }

    fn dead_end(&self, on_h: NodeHandle, slot: usize, s: &mut ExpandStats) -> Result<(), PathError> {
        self.pool.with_mut(on_h, |on| on.set_dead_end(slot))?;
        s.dead_ends += 1;
        Ok(())
    }

    fn sync_shell(&self, shell: &FrontierShell, allow_insert: bool) -> Vec<SyncStats> {
        shell
            .index()
            .range(self.config.parallelism, |s: &mut SyncStats, p, h| {
                if s.fatal.is_some() {
                    return;
                }
                match self.sync_node(h, allow_insert) {
                    Ok(NodeState::InConflict) => s.conflicted.push((p, h)),
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => s.fatal = Some(e),
                    Err(e) => {
                        log::error!(
                            "{self}: dropping {} of node at {p:?} (d={}): {e}",
                            if allow_insert { "insert" } else { "update" },
                            shell.d()
                        );
                        s.failures += 1;
                    }
                }
            })
    }

    /// Resolves pending Next links from the children's state, then persists.
    fn sync_node(&self, h: NodeHandle, allow_insert: bool) -> Result<NodeState, PathError> {
        let (state, pending) = self.pool.with(h, |n| (n.state(), n.unassigned_next_links()))?;
        if state == NodeState::New && !allow_insert {
            return Ok(state);
        }
        let resolved: Vec<(usize, Option<(NodeState, Option<PathNodeId>)>)> = pending
            .into_iter()
            .map(|(slot, child)| (slot, self.pool.with(child, |c| (c.state(), c.id())).ok()))
            .collect();
        self.pool.with_mut(h, |n| -> Result<NodeState, PathError> {
            for (slot, child) in resolved {
                match child {
                    Some((_, Some(id))) => n.resolve_next_link(slot, id),
                    // child insert was dropped; stored as an unassigned link
                    Some((NodeState::New, None)) => {}
                    _ => n.set_dead_end(slot),
                }
            }
            self.persist(n)?;
            if n.state() == NodeState::InConflict {
                if !allow_insert {
                    return Err(PathError::NodeInConflict(n.point()));
                }
                // an earlier attempt may have committed before reporting failure
                self.adopt_own_row(n)?;
            }
            Ok(n.state())
        })?
    }

    /// Takes over the stored row at `n`'s point when it carries the same
    /// distance, builder and parent links as `n`. A row written by another
    /// parent leaves `n` in conflict.
    fn adopt_own_row(&self, n: &mut PathNode) -> Result<(), PathError> {
        match self.lookup_with_retry(n.point()) {
            Ok(Some(row)) if n.adopt_stored(&row) => {
                log::warn!("{self}: node at {:?} took over its stored row {}", n.point(), row.id);
                self.persist(n)?;
            }
            Ok(Some(row)) => {
                log::debug!("{self}: node at {:?} lost its insert to row {}", n.point(), row.id);
            }
            Ok(None) => {
                log::warn!("{self}: node at {:?} in conflict but no row found", n.point());
            }
            Err(e) => {
                log::error!("{self}: lookup after insert conflict at {:?} failed: {e}", n.point());
            }
        }
        Ok(())
    }

    fn persist(&self, n: &mut PathNode) -> Result<(), PathError> {
        let mut attempt = 0;
        loop {
            match n.sync_in_db(self.store.as_ref()) {
                Err(PathError::Store(e)) if attempt < self.config.sync_retries => {
                    attempt += 1;
                    log::warn!(
                        "{self}: sync of node at {:?} failed (attempt {attempt}): {e}",
                        n.point()
                    );
                    std::thread::sleep(self.config.backoff(attempt));
                }
                other => return other,
            }
        }
    }

    fn lookup_with_retry(&self, point: Point) -> Result<Option<PathNodeRecord>, PathError> {
        let mut attempt = 0;
        loop {
            match self.store.lookup_by_point(self.id(), point) {
                Ok(found) => return Ok(found),
                Err(e) if attempt < self.config.sync_retries => {
                    attempt += 1;
                    log::warn!("{self}: lookup of {point:?} failed (attempt {attempt}): {e}");
                    std::thread::sleep(self.config.backoff(attempt));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn persist_context(&self, record: &ContextRecord) -> Result<(), PathError> {
        let mut attempt = 0;
        loop {
            match self.store.update_context(record) {
                Ok(1) => return Ok(()),
                Ok(_) => {
                    return Err(StoreError::NotFound {
                        table: "path_contexts",
                        id: record.id as i64,
                    }
                    .into());
                }
                Err(e) if attempt < self.config.sync_retries => {
                    attempt += 1;
                    log::warn!("{self}: context update failed (attempt {attempt}): {e}");
                    std::thread::sleep(self.config.backoff(attempt));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn swap_in(&mut self, next: FrontierShell, mut report: AdvanceReport) -> AdvanceReport {
        let mut record = self.record.clone();
        record.max_dist = next.d();
        if let Err(e) = self.persist_context(&record) {
            log::error!("{self}: dropping max distance update to {}: {e}", next.d());
            report.sync_failures += 1;
        }
        self.record = record;

        let live_d = next.d();
        if let Some(old) = self.current.replace(next) {
            if old.d() <= self.config.retained_distances {
                self.retained.push(old);
            } else {
                report.released = old.release(&self.pool, live_d);
            }
        }
        self.state = ContextState::Advancing;
        self.debug_assert_invariants();
        log::info!(
            "{self}: d {} -> {}: {} -> {} nodes, created={} merges={} dead_ends={} select_conflicts={} insert_conflicts={} sync_failures={}",
            report.from_d,
            report.to_d,
            report.current_size,
            report.next_size,
            report.created,
            report.merges,
            report.dead_ends,
            report.select_conflicts,
            report.insert_conflicts,
            report.sync_failures
        );
        report
    }

    #[inline]
    pub fn id(&self) -> PathContextId {
        self.record.id
    }

    #[inline]
    pub fn growth(&self) -> GrowthContext {
        self.record.growth
    }

    #[inline]
    pub fn growth_offset(&self) -> i32 {
        self.record.growth_offset
    }

    #[inline]
    pub fn center(&self) -> Point {
        self.center
    }

    #[inline]
    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Distance of the live shell.
    #[inline]
    pub fn max_dist(&self) -> i32 {
        self.record.max_dist
    }

    /// Size of the live shell.
    pub fn number_of_open_nodes(&self) -> usize {
        self.current.as_ref().map_or(0, FrontierShell::len)
    }

    pub fn predicted_next_size(&self) -> usize {
        self.current
            .as_ref()
            .map_or(0, FrontierShell::predicted_next_size)
    }

    /// Stored node count of this context.
    pub fn count_all_path_nodes(&self) -> Result<usize, PathError> {
        Ok(self.store.count_by_context(self.id())?)
    }

    /// `(distance, size)` of every shell held in memory, by distance.
    pub fn shell_sizes(&self) -> Vec<(i32, usize)> {
        let mut sizes: Vec<_> = self
            .retained
            .iter()
            .chain(self.current.as_ref())
            .map(|s| (s.d(), s.len()))
            .collect();
        sizes.sort_unstable();
        sizes
    }

    pub fn root(&self) -> Result<NodeView, PathError> {
        let h = self.root.ok_or(PathError::NotInitialized(self.id()))?;
        self.pool.with(h, PathNode::view)
    }

    /// Nodes of the live shell, sorted by point.
    pub fn current_nodes(&self) -> Result<Vec<NodeView>, PathError> {
        let shell = self
            .current
            .as_ref()
            .ok_or(PathError::NotInitialized(self.id()))?;
        self.views(shell)
    }

    /// Nodes of the in-memory shell at distance `d`, sorted by point.
    pub fn shell_nodes(&self, d: i32) -> Result<Option<Vec<NodeView>>, PathError> {
        match self.retained.iter().chain(self.current.as_ref()).find(|s| s.d() == d) {
            Some(shell) => self.views(shell).map(Some),
            None => Ok(None),
        }
    }

    /// Stored node count at distance `d`.
    pub fn number_of_nodes_at(&self, d: i32) -> Result<usize, PathError> {
        Ok(self.store.count_at_distance(self.id(), d)?)
    }

    /// Stored node count with `from_d <= d <= to_d`.
    pub fn number_of_nodes_between(&self, from_d: i32, to_d: i32) -> Result<usize, PathError> {
        Ok(self.store.count_between(self.id(), from_d, to_d)?)
    }

    /// Stored nodes at distance `d`, by id. Works for shells already
    /// released from memory.
    pub fn path_nodes_at(&self, d: i32) -> Result<Vec<NodeView>, PathError> {
        let rows = self.store.nodes_at_distance(self.id(), d)?;
        self.stored_views(&rows)
    }

    /// Stored nodes with `from_d <= d <= to_d`, by distance then id.
    pub fn path_nodes_between(&self, from_d: i32, to_d: i32) -> Result<Vec<NodeView>, PathError> {
        let rows = self.store.nodes_between(self.id(), from_d, to_d)?;
        self.stored_views(&rows)
    }

    fn stored_views(&self, rows: &[PathNodeRecord]) -> Result<Vec<NodeView>, PathError> {
        rows.iter()
            .map(|row| -> Result<NodeView, PathError> {
                let builder = self.oracle.builder(row.fields.selector)?;
                let mut node = PathNode::default();
                node.load(row, builder)?;
                Ok(node.view())
            })
            .collect()
    }

    fn views(&self, shell: &FrontierShell) -> Result<Vec<NodeView>, PathError> {
        shell
            .index()
            .entries()
            .into_iter()
            .map(|(_, h)| self.pool.with(h, PathNode::view))
            .collect()
    }
}

impl DebugInvariants for PathContext {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "PathContext");
    }

    fn validate_invariants(&self) -> Result<(), PathError> {
        let Some(current) = self.current.as_ref() else {
            return Ok(());
        };
        ensure(current.d() == self.max_dist(), || {
            format!("{self}: live shell at d={} but max_dist={}", current.d(), self.max_dist())
        })?;
        for shell in &self.retained {
            ensure(shell.d() < current.d(), || {
                format!("{self}: retained shell d={} not behind live shell", shell.d())
            })?;
            shell.validate_invariants()?;
        }
        if let Some(root) = self.root {
            ensure(self.pool.is_live(root), || format!("{self}: root handle is stale"))?;
        }
        current.validate_invariants()
    }
}

impl fmt::Display for PathContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PathCtx{}-{}-{}-d{}",
            self.record.id, self.record.growth, self.record.growth_offset, self.record.max_dist
        )
    }
}

impl fmt::Debug for PathContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathContext")
            .field("record", &self.record)
            .field("state", &self.state)
            .field("center", &self.center)
            .field("shells", &self.shell_sizes())
            .finish_non_exhaustive()
    }
}

impl Drop for PathContext {
    fn drop(&mut self) {
        for shell in self.retained.drain(..).chain(self.current.take()) {
            shell.index().clear(&self.pool);
        }
        if let Some(root) = self.root.take() {
            if self.pool.is_live(root) {
                let _ = self.pool.release(root);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::AlternatingTrioOracle;
    use crate::path::node::{ConnectionState, Link};
    use crate::store::MemoryStore;

    fn env() -> (PathEnv, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let env = PathEnv::new(store.clone(), Arc::new(AlternatingTrioOracle))
            .with_pool(Arc::new(NodePool::new()));
        (env, store)
    }

    fn from_count(n: &NodeView) -> usize {
        n.connections
            .iter()
            .filter(|c| **c == ConnectionState::From)
            .count()
    }

    fn started(env: &PathEnv) -> PathContext {
        let mut ctx = PathContext::create(env, GrowthContext::new(1, 8, 0), 0).unwrap();
        ctx.init_root_node(Point::new(30, 30, 30)).unwrap();
        ctx
    }

    #[test]
    fn advance_requires_root() {
        let (env, _) = env();
        let mut ctx = PathContext::create(&env, GrowthContext::new(1, 8, 0), 0).unwrap();
        assert_eq!(ctx.state(), ContextState::Created);
        assert!(matches!(ctx.advance(), Err(PathError::NotInitialized(_))));
        // misuse does not abort; the context can still be initialized
        ctx.init_root_node(Point::ORIGIN).unwrap();
        assert!(ctx.advance().is_ok());
    }

    #[test]
    fn root_is_persisted_and_recorded() {
        let (env, store) = env();
        let mut ctx = started(&env);
        let root = ctx.root().unwrap();
        assert_eq!(root.d, 0);
        assert_eq!(root.state, NodeState::SyncedInDb);
        assert_eq!(root.point, Point::new(30, 30, 30));
        assert!(root.connections.iter().all(|c| *c == ConnectionState::NotSet));
        let rec = store.load_context(ctx.id()).unwrap().unwrap();
        assert_eq!(rec.root_builder_id, Some(root.builder.unwrap().selector.builder_id));
        assert!(matches!(
            ctx.init_root_node(Point::ORIGIN),
            Err(PathError::InvariantViolation(_))
        ));
    }

    #[test]
    fn first_advance_links_three_children_to_root() {
        let (env, _) = env();
        let mut ctx = started(&env);
        let report = ctx.advance().unwrap();
        assert_eq!((report.from_d, report.to_d), (0, 1));
        assert_eq!(report.created, 3);
        assert_eq!(report.next_size, 3);
        assert_eq!(report.dead_ends, 0);

        let root = ctx.root().unwrap();
        assert!(root.connections.iter().all(|c| *c == ConnectionState::Next));
        let children = ctx.current_nodes().unwrap();
        assert_eq!(children.len(), 3);
        for child in &children {
            assert_eq!(child.d, 1);
            assert_eq!(child.state, NodeState::SyncedInDb);
            assert_eq!(from_count(child), 1);
            assert!(child.links.contains(&Link::Node(root.id.unwrap())));
            assert!(root.links.contains(&Link::Node(child.id.unwrap())));
        }
        assert_eq!(ctx.max_dist(), 1);
        assert_eq!(ctx.count_all_path_nodes().unwrap(), 4);
    }

    #[test]
    fn third_shell_merges_shared_points() {
        let (env, _) = env();
        let mut ctx = started(&env);
        let reports = ctx.request_new_max_dist(3).unwrap();
        let created: Vec<usize> = reports.iter().map(|r| r.created).collect();
        let merges: Vec<usize> = reports.iter().map(|r| r.merges).collect();
        assert_eq!(created, vec![3, 6, 9]);
        assert_eq!(merges, vec![0, 0, 3]);
        // merged nodes have one From slot per parent
        let two_parents = ctx
            .current_nodes()
            .unwrap()
            .iter()
            .filter(|n| from_count(n) == 2)
            .count();
        assert_eq!(two_parents, 3);
        assert_eq!(ctx.shell_sizes(), vec![(0, 1), (1, 3), (2, 6), (3, 9)]);
    }

    #[test]
    fn retained_shells_stop_at_configured_distance() {
        let (env, _) = env();
        let env = env.with_config(PathConfig {
            retained_distances: 1,
            ..PathConfig::default()
        });
        let mut ctx = started(&env);
        let reports = ctx.request_new_max_dist(4).unwrap();
        assert_eq!(reports.len(), 4);
        let ds: Vec<i32> = ctx.shell_sizes().iter().map(|(d, _)| *d).collect();
        assert_eq!(ds, vec![0, 1, 4]);
        assert!(reports[2].released > 0);
        assert!(ctx.validate_invariants().is_ok());
    }

    #[test]
    fn drop_returns_every_node_to_pool() {
        let (env, _) = env();
        {
            let mut ctx = started(&env);
            ctx.request_new_max_dist(5).unwrap();
            assert!(env.pool.live_count() > 0);
        }
        assert_eq!(env.pool.live_count(), 0);
    }
}
