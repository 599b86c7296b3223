//! Recycling arena for path nodes.
//!
//! Shells deep in an exploration hold thousands to millions of nodes, and
//! each shell lives for a single `advance()` step. Nodes therefore live in
//! slots of a shared [`NodePool`] and are addressed by a [`NodeHandle`]
//! (slot index + generation). Releasing a node resets it and bumps the slot
//! generation, so a handle that outlived its node fails with
//! [`PathError::StaleHandle`] instead of silently aliasing the slot's next
//! occupant.
//!
//! # Determinism
//! - Freed slots are reused last-in first-out.
//! - Generations only ever increase (wrapping after `u32::MAX` reuses).

use super::node::PathNode;
use crate::path_error::PathError;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Lightweight reference to a pooled node.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

impl NodeHandle {
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHandle({}v{})", self.index, self.generation)
    }
}

struct Slot {
    generation: u32,
    node: PathNode,
}

/// Thread-safe node arena with free-list reuse.
pub struct NodePool {
    slots: RwLock<Vec<Arc<Mutex<Slot>>>>,
    free: Mutex<Vec<u32>>,
    live: AtomicUsize,
}

static SHARED_POOL: Lazy<Arc<NodePool>> = Lazy::new(|| Arc::new(NodePool::new()));

impl Default for NodePool {
    fn default() -> Self {
        Self::new()
    }
}

impl NodePool {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            free: Mutex::new(Vec::new()),
            live: AtomicUsize::new(0),
        }
    }

    /// Process-wide pool shared by every context that does not bring its own.
    pub fn shared() -> Arc<NodePool> {
        Arc::clone(&SHARED_POOL)
    }

    /// Hands out a node in the `New` state with every field cleared.
    pub fn acquire(&self) -> NodeHandle {
        self.live.fetch_add(1, Ordering::Relaxed);
        let reused = self.free.lock().pop();
        if let Some(index) = reused {
            if let Some(slot) = self.slots.read().get(index as usize).cloned() {
                let mut slot = slot.lock();
                slot.node.reset_new();
                return NodeHandle {
                    index,
                    generation: slot.generation,
                };
            }
        }
        let mut slots = self.slots.write();
        let index = slots.len() as u32;
        slots.push(Arc::new(Mutex::new(Slot {
            generation: 0,
            node: PathNode::default(),
        })));
        NodeHandle {
            index,
            generation: 0,
        }
    }

    /// Resets the node, invalidates every outstanding handle to it and makes
    /// the slot available again.
    pub fn release(&self, handle: NodeHandle) -> Result<(), PathError> {
        let slot = self.slot(handle)?;
        {
            let mut slot = slot.lock();
            if slot.generation != handle.generation {
                return Err(PathError::StaleHandle(handle));
            }
            slot.node.reset_pooled();
            slot.generation = slot.generation.wrapping_add(1);
        }
        self.free.lock().push(handle.index);
        self.live.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    /// Runs `f` on the node behind `handle`.
    pub fn with<R>(&self, handle: NodeHandle, f: impl FnOnce(&PathNode) -> R) -> Result<R, PathError> {
        let slot = self.slot(handle)?;
        let slot = slot.lock();
        if slot.generation != handle.generation {
            return Err(PathError::StaleHandle(handle));
        }
        Ok(f(&slot.node))
    }

    /// Runs `f` on the node behind `handle` with exclusive access.
    pub fn with_mut<R>(
        &self,
        handle: NodeHandle,
        f: impl FnOnce(&mut PathNode) -> R,
    ) -> Result<R, PathError> {
        let slot = self.slot(handle)?;
        let mut slot = slot.lock();
        if slot.generation != handle.generation {
            return Err(PathError::StaleHandle(handle));
        }
        Ok(f(&mut slot.node))
    }

    /// True while `handle` still designates a live node.
    pub fn is_live(&self, handle: NodeHandle) -> bool {
        self.slot(handle)
            .map(|s| s.lock().generation == handle.generation)
            .unwrap_or(false)
    }

    /// Nodes currently handed out.
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Total number of slots ever allocated.
    pub fn capacity(&self) -> usize {
        self.slots.read().len()
    }

    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }

    fn slot(&self, handle: NodeHandle) -> Result<Arc<Mutex<Slot>>, PathError> {
        self.slots
            .read()
            .get(handle.index as usize)
            .cloned()
            .ok_or(PathError::StaleHandle(handle))
    }
}

impl fmt::Debug for NodePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodePool")
            .field("capacity", &self.capacity())
            .field("live", &self.live_count())
            .finish()
    }
}
