//! In-process [`PathNodeStore`] backed by concurrent hash maps.
//!
//! The `(context, point)` uniqueness constraint is enforced atomically through
//! the point index entry: the first inserter holds the shard lock while its
//! row is written, every later inserter observes the occupied entry.

use super::{
    ContextRecord, NodeFields, NodeUpdate, PathContextId, PathNodeId, PathNodeRecord,
    PathNodeStore, StoreError,
};
use crate::geometry::{GrowthContext, Point};
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

#[derive(Debug)]
pub struct MemoryStore {
    next_node_id: AtomicU64,
    next_ctx_id: AtomicI32,
    nodes: DashMap<PathNodeId, PathNodeRecord, RandomState>,
    by_point: DashMap<(PathContextId, Point), PathNodeId, RandomState>,
    contexts: DashMap<PathContextId, ContextRecord, RandomState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            next_node_id: AtomicU64::new(1),
            next_ctx_id: AtomicI32::new(1),
            nodes: DashMap::with_hasher(RandomState::new()),
            by_point: DashMap::with_hasher(RandomState::new()),
            contexts: DashMap::with_hasher(RandomState::new()),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of node rows across all contexts.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Row by id, if present.
    pub fn get(&self, id: PathNodeId) -> Option<PathNodeRecord> {
        self.nodes.get(&id).map(|r| r.value().clone())
    }

    fn allocate_id(&self) -> Result<PathNodeId, StoreError> {
        let raw = self.next_node_id.fetch_add(1, Ordering::Relaxed);
        i64::try_from(raw)
            .ok()
            .and_then(|raw| PathNodeId::new(raw).ok())
            .ok_or_else(|| StoreError::Backend(format!("node id sequence exhausted at {raw}")))
    }
}

impl PathNodeStore for MemoryStore {
    fn lookup_by_point(
        &self,
        ctx: PathContextId,
        point: Point,
    ) -> Result<Option<PathNodeRecord>, StoreError> {
        let Some(id) = self.by_point.get(&(ctx, point)).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.get(id))
    }

    fn insert_returning_id(&self, fields: &NodeFields) -> Result<PathNodeId, StoreError> {
        if !self.contexts.contains_key(&fields.ctx_id) {
            return Err(StoreError::NotFound {
                table: "path_contexts",
                id: fields.ctx_id as i64,
            });
        }
        match self.by_point.entry((fields.ctx_id, fields.point)) {
            Entry::Occupied(_) => Err(StoreError::UniqueViolation {
                ctx: fields.ctx_id,
                point: fields.point,
            }),
            Entry::Vacant(slot) => {
                let id = self.allocate_id()?;
                self.nodes.insert(
                    id,
                    PathNodeRecord {
                        id,
                        fields: fields.clone(),
                    },
                );
                slot.insert(id);
                Ok(id)
            }
        }
    }

    fn update(&self, id: PathNodeId, update: &NodeUpdate) -> Result<usize, StoreError> {
        match self.nodes.get_mut(&id) {
            Some(mut row) => {
                row.fields.connection_mask = update.connection_mask;
                row.fields.link_ids = update.link_ids;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn count_by_context(&self, ctx: PathContextId) -> Result<usize, StoreError> {
        Ok(self.by_point.iter().filter(|e| e.key().0 == ctx).count())
    }

    fn nodes_at_distance(
        &self,
        ctx: PathContextId,
        d: i32,
    ) -> Result<Vec<PathNodeRecord>, StoreError> {
        let mut rows: Vec<PathNodeRecord> = self
            .nodes
            .iter()
            .filter(|r| r.fields.ctx_id == ctx && r.fields.d == d)
            .map(|r| r.value().clone())
            .collect();
        rows.sort_unstable_by_key(|r| r.id);
        Ok(rows)
    }

    fn nodes_between(
        &self,
        ctx: PathContextId,
        from_d: i32,
        to_d: i32,
    ) -> Result<Vec<PathNodeRecord>, StoreError> {
        let mut rows: Vec<PathNodeRecord> = self
            .nodes
            .iter()
            .filter(|r| r.fields.ctx_id == ctx && (from_d..=to_d).contains(&r.fields.d))
            .map(|r| r.value().clone())
            .collect();
        rows.sort_unstable_by_key(|r| (r.fields.d, r.id));
        Ok(rows)
    }

    fn count_at_distance(&self, ctx: PathContextId, d: i32) -> Result<usize, StoreError> {
        self.count_between(ctx, d, d)
    }

    fn count_between(
        &self,
        ctx: PathContextId,
        from_d: i32,
        to_d: i32,
    ) -> Result<usize, StoreError> {
        Ok(self
            .nodes
            .iter()
            .filter(|r| r.fields.ctx_id == ctx && (from_d..=to_d).contains(&r.fields.d))
            .count())
    }

    fn create_context(
        &self,
        growth: GrowthContext,
        growth_offset: i32,
    ) -> Result<ContextRecord, StoreError> {
        let id = self.next_ctx_id.fetch_add(1, Ordering::Relaxed);
        let record = ContextRecord {
            id,
            growth,
            growth_offset,
            root_builder_id: None,
            max_dist: 0,
        };
        self.contexts.insert(id, record.clone());
        Ok(record)
    }

    fn load_context(&self, ctx: PathContextId) -> Result<Option<ContextRecord>, StoreError> {
        Ok(self.contexts.get(&ctx).map(|r| r.value().clone()))
    }

    fn update_context(&self, record: &ContextRecord) -> Result<usize, StoreError> {
        match self.contexts.get_mut(&record.id) {
            Some(mut row) => {
                *row = record.clone();
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::BuilderSelector;
    use std::sync::Arc;

    fn fields(ctx: PathContextId, p: Point) -> NodeFields {
        NodeFields {
            ctx_id: ctx,
            selector: BuilderSelector {
                builder_id: 1,
                trio_id: 0,
            },
            point: p,
            d: 0,
            connection_mask: 0,
            link_ids: [None; 3],
        }
    }

    fn with_two_contexts() -> (MemoryStore, PathContextId, PathContextId) {
        let s = MemoryStore::new();
        let g = GrowthContext::new(1, 8, 0);
        let a = s.create_context(g, 0).unwrap().id;
        let b = s.create_context(g, 0).unwrap().id;
        (s, a, b)
    }

    #[test]
    fn unique_point_per_context() {
        let (s, a, b) = with_two_contexts();
        let p = Point::new(1, 2, 3);
        let id = s.insert_returning_id(&fields(a, p)).unwrap();
        let err = s.insert_returning_id(&fields(a, p)).unwrap_err();
        assert!(err.is_unique_violation());
        // same point in another context is independent
        let other = s.insert_returning_id(&fields(b, p)).unwrap();
        assert_ne!(id, other);
        assert_eq!(s.lookup_by_point(a, p).unwrap().unwrap().id, id);
        assert_eq!(s.count_by_context(a).unwrap(), 1);
        assert_eq!(s.count_by_context(b).unwrap(), 1);
    }

    #[test]
    fn insert_requires_known_context() {
        let s = MemoryStore::new();
        let err = s.insert_returning_id(&fields(42, Point::ORIGIN)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn update_reports_rows_affected() {
        let (s, a, _) = with_two_contexts();
        let id = s.insert_returning_id(&fields(a, Point::ORIGIN)).unwrap();
        let up = NodeUpdate {
            connection_mask: 0b11,
            link_ids: [None; 3],
        };
        assert_eq!(s.update(id, &up).unwrap(), 1);
        assert_eq!(s.get(id).unwrap().fields.connection_mask, 0b11);
        let missing = PathNodeId::new(999).unwrap();
        assert_eq!(s.update(missing, &up).unwrap(), 0);
    }

    #[test]
    fn concurrent_same_point_inserts_have_one_winner() {
        let (s, a, _) = with_two_contexts();
        let s = Arc::new(s);
        let p = Point::new(4, 4, 4);
        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let s = Arc::clone(&s);
                    scope.spawn(move || s.insert_returning_id(&fields(a, p)).is_ok() as usize)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(winners, 1);
        assert_eq!(s.count_by_context(a).unwrap(), 1);
    }

    #[test]
    fn nodes_at_distance_are_ordered_by_id() {
        let (s, a, _) = with_two_contexts();
        for x in 0..5 {
            let mut f = fields(a, Point::new(x, 0, 0));
            f.d = x % 2;
            s.insert_returning_id(&f).unwrap();
        }
        let at_zero = s.nodes_at_distance(a, 0).unwrap();
        assert_eq!(at_zero.len(), 3);
        assert!(at_zero.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn distance_ranges_are_inclusive_and_per_context() {
        let (s, a, b) = with_two_contexts();
        for x in 0..6 {
            let mut f = fields(a, Point::new(x, 0, 0));
            f.d = 5 - x;
            s.insert_returning_id(&f).unwrap();
        }
        s.insert_returning_id(&fields(b, Point::ORIGIN)).unwrap();

        assert_eq!(s.count_at_distance(a, 2).unwrap(), 1);
        assert_eq!(s.count_between(a, 1, 3).unwrap(), 3);
        assert_eq!(s.count_between(a, 4, 2).unwrap(), 0);
        let rows = s.nodes_between(a, 1, 3).unwrap();
        let ds: Vec<i32> = rows.iter().map(|r| r.fields.d).collect();
        assert_eq!(ds, vec![1, 2, 3]);
        assert!(rows.iter().all(|r| r.fields.ctx_id == a));
    }
}
