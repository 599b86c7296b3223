//! Path nodes and their connection-state machine.
//!
//! A node owns three connection slots, one per connection of its branching
//! rule. Each slot carries a 2-bit [`ConnectionState`] packed into a `u16`
//! mask (the persisted representation) plus a [`Link`] to the neighbour.
//!
//! Lifecycle:
//! ```text
//! New --insert ok--> SyncedInDb --slot change--> Modified --update ok--> SyncedInDb
//!  \--unique violation--> InConflict --own row found--> SyncedInDb | Modified
//!                            \--another writer's row--> discarded
//! any --release--> InPool --acquire--> New
//! ```

use super::pool::NodeHandle;
use crate::debug_invariants::{DebugInvariants, ensure};
use crate::geometry::{ConnectionId, Point};
use crate::oracle::{NB_CONNECTIONS, NodeBuilder};
use crate::path_error::PathError;
use crate::store::{
    NodeFields, NodeUpdate, PathContextId, PathNodeId, PathNodeRecord, PathNodeStore,
};

/// State of one connection slot. The discriminant is the persisted 2-bit code.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    NotSet = 0,
    From = 1,
    Next = 2,
    Blocked = 3,
}

impl ConnectionState {
    #[inline]
    fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0 => ConnectionState::NotSet,
            1 => ConnectionState::From,
            2 => ConnectionState::Next,
            _ => ConnectionState::Blocked,
        }
    }
}

/// Lifecycle state of a node object.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeState {
    New,
    InPool,
    SyncedInDb,
    InConflict,
    Modified,
}

/// What a connection slot points at.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum Link {
    /// Nothing recorded yet (slot NotSet).
    #[default]
    Unset,
    /// A persisted neighbour: the parent for From, the child for Next.
    Node(PathNodeId),
    /// Next link whose child has no id yet; resolved when the child is synced.
    Unassigned,
    /// Blocked slot.
    DeadEnd,
}

impl Link {
    #[inline]
    pub fn id(self) -> Option<PathNodeId> {
        match self {
            Link::Node(id) => Some(id),
            _ => None,
        }
    }
}

/// Read-only copy of a node for inspection outside the pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeView {
    pub id: Option<PathNodeId>,
    pub state: NodeState,
    pub point: Point,
    pub d: i32,
    pub builder: Option<NodeBuilder>,
    pub connections: [ConnectionState; NB_CONNECTIONS],
    pub links: [Link; NB_CONNECTIONS],
}

impl NodeView {
    pub fn has_open_connections(&self) -> bool {
        self.connections.contains(&ConnectionState::NotSet)
    }
}

/// One lattice point of a path context.
#[derive(Clone, Debug)]
pub struct PathNode {
    state: NodeState,
    id: Option<PathNodeId>,
    ctx_id: PathContextId,
    builder: Option<NodeBuilder>,
    point: Point,
    d: i32,
    connection_mask: u16,
    links: [Link; NB_CONNECTIONS],
    link_nodes: [Option<NodeHandle>; NB_CONNECTIONS],
}

impl Default for PathNode {
    fn default() -> Self {
        PathNode {
            state: NodeState::New,
            id: None,
            ctx_id: 0,
            builder: None,
            point: Point::ORIGIN,
            d: 0,
            connection_mask: 0,
            links: [Link::Unset; NB_CONNECTIONS],
            link_nodes: [None; NB_CONNECTIONS],
        }
    }
}

impl PathNode {
    /// Fill a freshly acquired node.
    pub fn init(
        &mut self,
        ctx_id: PathContextId,
        builder: NodeBuilder,
        point: Point,
        d: i32,
    ) -> Result<(), PathError> {
        if self.state != NodeState::New || self.builder.is_some() {
            return Err(PathError::InvariantViolation(format!(
                "init on node at {:?} in state {:?}",
                self.point, self.state
            )));
        }
        self.ctx_id = ctx_id;
        self.builder = Some(builder);
        self.point = point;
        self.d = d;
        Ok(())
    }

    /// Fill a freshly acquired node from a stored row.
    ///
    /// The row's mask and link ids must agree: From slots need a parent id,
    /// Blocked and NotSet slots must not carry one. A Next slot without id is
    /// accepted as a link to a child whose sync was dropped; it stays an
    /// unassigned Next link with no neighbour to resolve from, matching the
    /// stored row.
    pub fn load(&mut self, record: &PathNodeRecord, builder: NodeBuilder) -> Result<(), PathError> {
        let f = &record.fields;
        if builder.selector != f.selector {
            return Err(PathError::InvariantViolation(format!(
                "row {} selector {:?} does not match builder {:?}",
                record.id, f.selector, builder.selector
            )));
        }
        self.init(f.ctx_id, builder, f.point, f.d)?;
        for i in 0..NB_CONNECTIONS {
            let state = ConnectionState::from_bits(f.connection_mask >> (2 * i));
            let link = match (state, f.link_ids[i]) {
                (ConnectionState::NotSet, None) => Link::Unset,
                (ConnectionState::Blocked, None) => Link::DeadEnd,
                (ConnectionState::From, Some(id)) | (ConnectionState::Next, Some(id)) => {
                    Link::Node(id)
                }
                (ConnectionState::Next, None) => {
                    log::warn!(
                        "row {} at {:?}: next slot {i} has no child id, its child was never stored",
                        record.id,
                        f.point
                    );
                    Link::Unassigned
                }
                (state, link) => {
                    return Err(PathError::InvariantViolation(format!(
                        "row {} at {:?}: slot {i} is {state:?} with link {link:?}",
                        record.id, f.point
                    )));
                }
            };
            self.set_mask_bits(i, state);
            self.links[i] = link;
        }
        self.id = Some(record.id);
        self.state = NodeState::SyncedInDb;
        Ok(())
    }

    pub(crate) fn reset_new(&mut self) {
        *self = PathNode::default();
    }

    pub(crate) fn reset_pooled(&mut self) {
        *self = PathNode {
            state: NodeState::InPool,
            ..PathNode::default()
        };
    }

    #[inline]
    pub fn id(&self) -> Option<PathNodeId> {
        self.id
    }

    #[inline]
    pub fn state(&self) -> NodeState {
        self.state
    }

    #[inline]
    pub fn ctx_id(&self) -> PathContextId {
        self.ctx_id
    }

    #[inline]
    pub fn builder(&self) -> Option<&NodeBuilder> {
        self.builder.as_ref()
    }

    #[inline]
    pub fn point(&self) -> Point {
        self.point
    }

    #[inline]
    pub fn d(&self) -> i32 {
        self.d
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.d == 0 && self.builder.is_some()
    }

    #[inline]
    pub fn connection_mask(&self) -> u16 {
        self.connection_mask
    }

    #[inline]
    pub fn link(&self, slot: usize) -> Link {
        self.links[slot]
    }

    /// In-memory handle of the neighbour behind `slot`, if any.
    #[inline]
    pub fn link_node(&self, slot: usize) -> Option<NodeHandle> {
        self.link_nodes[slot]
    }

    #[inline]
    pub fn connection_state(&self, slot: usize) -> ConnectionState {
        ConnectionState::from_bits(self.connection_mask >> (2 * slot))
    }

    /// Sets the slot state; a synced node becomes `Modified`.
    pub fn set_connection_state(&mut self, slot: usize, state: ConnectionState) {
        if self.connection_state(slot) == state {
            return;
        }
        self.set_mask_bits(slot, state);
        if self.state == NodeState::SyncedInDb {
            self.state = NodeState::Modified;
        }
    }

    fn set_mask_bits(&mut self, slot: usize, state: ConnectionState) {
        let shift = 2 * slot;
        self.connection_mask = (self.connection_mask & !(0b11 << shift)) | ((state as u16) << shift);
    }

    /// Blocks `slot` and forgets its neighbour. Idempotent.
    pub fn set_dead_end(&mut self, slot: usize) {
        self.set_connection_state(slot, ConnectionState::Blocked);
        self.links[slot] = Link::DeadEnd;
        self.link_nodes[slot] = None;
    }

    /// Claims the slot exposing `conn` as this node's From slot.
    ///
    /// Callers pass the reverse of the connection they travelled. Fails with
    /// `ConnectionNotAvailable` when that slot is already taken and
    /// `ConnectionNotFound` when the branching rule has no such connection.
    pub fn set_from(
        &mut self,
        conn: ConnectionId,
        from_id: PathNodeId,
        from: Option<NodeHandle>,
    ) -> Result<usize, PathError> {
        let builder = self.require_builder()?;
        let Some(slot) = builder.slot_of(conn) else {
            return Err(PathError::ConnectionNotFound {
                conn,
                trio_id: builder.selector.trio_id,
                point: self.point,
            });
        };
        if self.d == 0 || self.connection_state(slot) != ConnectionState::NotSet {
            return Err(PathError::ConnectionNotAvailable {
                conn,
                slot,
                point: self.point,
            });
        }
        self.set_connection_state(slot, ConnectionState::From);
        self.links[slot] = Link::Node(from_id);
        self.link_nodes[slot] = from;
        Ok(slot)
    }

    /// Records `child` as the Next neighbour of `slot`. Without `child_id`
    /// the link stays unassigned until the child is persisted.
    pub fn set_next(&mut self, slot: usize, child_id: Option<PathNodeId>, child: NodeHandle) {
        self.set_connection_state(slot, ConnectionState::Next);
        self.links[slot] = child_id.map_or(Link::Unassigned, Link::Node);
        self.link_nodes[slot] = Some(child);
    }

    /// Replaces an unassigned Next link with the child's persisted id.
    pub fn resolve_next_link(&mut self, slot: usize, child_id: PathNodeId) {
        if self.links[slot] == Link::Unassigned {
            self.links[slot] = Link::Node(child_id);
            if self.state == NodeState::SyncedInDb {
                self.state = NodeState::Modified;
            }
        }
    }

    /// Next slots still waiting for their child's id.
    pub fn unassigned_next_links(&self) -> Vec<(usize, NodeHandle)> {
        (0..NB_CONNECTIONS)
            .filter(|&i| self.links[i] == Link::Unassigned)
            .filter_map(|i| self.link_nodes[i].map(|h| (i, h)))
            .collect()
    }

    /// True while any slot is NotSet: the frontier membership predicate.
    #[inline]
    pub fn has_open_connections(&self) -> bool {
        (0..NB_CONNECTIONS).any(|i| self.connection_state(i) == ConnectionState::NotSet)
    }

    pub fn open_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..NB_CONNECTIONS).filter(move |&i| self.connection_state(i) == ConnectionState::NotSet)
    }

    /// Persists the node according to its lifecycle state.
    ///
    /// A unique violation on insert flips the node to `InConflict` and
    /// returns `Ok`; callers must check [`PathNode::state`] afterwards.
    pub fn sync_in_db(&mut self, store: &dyn PathNodeStore) -> Result<(), PathError> {
        match self.state {
            NodeState::SyncedInDb => Ok(()),
            NodeState::InPool => Err(PathError::InvariantViolation(format!(
                "sync of a pooled node at {:?}",
                self.point
            ))),
            NodeState::InConflict => Err(PathError::NodeInConflict(self.point)),
            NodeState::New => {
                let fields = self.fields_for_db()?;
                match store.insert_returning_id(&fields) {
                    Ok(id) => {
                        self.id = Some(id);
                        self.state = NodeState::SyncedInDb;
                        Ok(())
                    }
                    Err(e) if e.is_unique_violation() => {
                        log::debug!("node at {:?} lost its insert race", self.point);
                        self.state = NodeState::InConflict;
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            NodeState::Modified => {
                self.debug_assert_invariants();
                let Some(id) = self.id else {
                    return Err(PathError::InvariantViolation(format!(
                        "modified node at {:?} has no id",
                        self.point
                    )));
                };
                let rows = store.update(id, &self.update_for_db())?;
                if rows != 1 {
                    return Err(crate::store::StoreError::NotFound {
                        table: "path_nodes",
                        id: id.get() as i64,
                    }
                    .into());
                }
                self.state = NodeState::SyncedInDb;
                Ok(())
            }
        }
    }

    /// Takes over `record` after an insert reported a unique violation, when
    /// the row is this node's own earlier write (an insert that committed but
    /// reported a failure). The row must match context, point, distance and
    /// branching rule, and carry every From link this node holds. Returns
    /// `false` and leaves the node untouched when the row belongs to another
    /// writer.
    pub fn adopt_stored(&mut self, record: &PathNodeRecord) -> bool {
        let f = &record.fields;
        if self.state != NodeState::InConflict
            || f.ctx_id != self.ctx_id
            || f.point != self.point
            || f.d != self.d
            || self.builder.map(|b| b.selector) != Some(f.selector)
        {
            return false;
        }
        let mut froms = 0;
        for i in 0..NB_CONNECTIONS {
            if self.connection_state(i) != ConnectionState::From {
                continue;
            }
            froms += 1;
            let stored = ConnectionState::from_bits(f.connection_mask >> (2 * i));
            if stored != ConnectionState::From || f.link_ids[i] != self.links[i].id() {
                return false;
            }
        }
        if self.d > 0 && froms == 0 {
            return false;
        }
        self.id = Some(record.id);
        self.state = if f.connection_mask == self.connection_mask
            && f.link_ids == self.link_ids_for_db()
        {
            NodeState::SyncedInDb
        } else {
            NodeState::Modified
        };
        true
    }

    /// Stored link ids; only From and resolved Next slots carry one.
    fn link_ids_for_db(&self) -> [Option<PathNodeId>; NB_CONNECTIONS] {
        let mut ids = [None; NB_CONNECTIONS];
        for (i, id) in ids.iter_mut().enumerate() {
            *id = match self.connection_state(i) {
                ConnectionState::From | ConnectionState::Next => self.links[i].id(),
                ConnectionState::NotSet | ConnectionState::Blocked => None,
            };
        }
        ids
    }

    pub fn fields_for_db(&self) -> Result<NodeFields, PathError> {
        let builder = self.require_builder()?;
        Ok(NodeFields {
            ctx_id: self.ctx_id,
            selector: builder.selector,
            point: self.point,
            d: self.d,
            connection_mask: self.connection_mask,
            link_ids: self.link_ids_for_db(),
        })
    }

    pub fn update_for_db(&self) -> NodeUpdate {
        NodeUpdate {
            connection_mask: self.connection_mask,
            link_ids: self.link_ids_for_db(),
        }
    }

    pub fn view(&self) -> NodeView {
        NodeView {
            id: self.id,
            state: self.state,
            point: self.point,
            d: self.d,
            builder: self.builder,
            connections: std::array::from_fn(|i| self.connection_state(i)),
            links: self.links,
        }
    }

    fn require_builder(&self) -> Result<&NodeBuilder, PathError> {
        if self.state == NodeState::InPool {
            return Err(PathError::InvariantViolation(
                "access to a pooled node".into(),
            ));
        }
        self.builder.as_ref().ok_or_else(|| {
            PathError::InvariantViolation(format!("node at {:?} has no branching rule", self.point))
        })
    }

    #[cfg(test)]
    pub(crate) fn set_point_for_test(&mut self, p: Point) {
        self.point = p;
    }
}

impl DebugInvariants for PathNode {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "PathNode");
    }

    fn validate_invariants(&self) -> Result<(), PathError> {
        if self.state == NodeState::InPool {
            return Ok(());
        }
        let mut from_slots = 0;
        for i in 0..NB_CONNECTIONS {
            let state = self.connection_state(i);
            let ok = match state {
                ConnectionState::NotSet => self.links[i] == Link::Unset,
                ConnectionState::From => {
                    from_slots += 1;
                    matches!(self.links[i], Link::Node(_))
                }
                ConnectionState::Next => {
                    matches!(self.links[i], Link::Node(_) | Link::Unassigned)
                }
                ConnectionState::Blocked => self.links[i] == Link::DeadEnd,
            };
            ensure(ok, || {
                format!(
                    "node at {:?}: slot {i} is {state:?} with link {:?}",
                    self.point, self.links[i]
                )
            })?;
        }
        let from_ok = if self.d == 0 { from_slots == 0 } else { from_slots >= 1 };
        ensure(self.id.is_none() || from_ok, || {
            format!(
                "node at {:?} (d={}) has {from_slots} from slots",
                self.point, self.d
            )
        })
    }
}
