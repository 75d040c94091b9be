//! Generation-stamped arena holding every live project state and the
//! "supersedes" edges between them.
//!
//! A [`StateId`] is an index plus a generation. Removing a node bumps the
//! slot's generation, so ids held elsewhere go stale instead of aliasing a
//! newer state. Edges always point from a state to the states it replaced.

use super::StateCore;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Handle to a project state inside the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId {
    index: u32,
    generation: u32,
}

impl StateId {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

struct Node {
    core: Arc<StateCore>,
    previous: Vec<StateId>,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Arena {
    fn node(&self, id: StateId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn is_live(&self, id: StateId) -> bool {
        self.node(id).is_some()
    }
}

#[derive(Default)]
pub(crate) struct StateGraph {
    arena: Mutex<Arena>,
}

impl StateGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocate a slot and build the state core for it.
    ///
    /// `make` runs under the graph lock and must not touch the graph.
    pub(crate) fn insert(
        &self,
        previous: Vec<StateId>,
        make: impl FnOnce(StateId) -> StateCore,
    ) -> Arc<StateCore> {
        let mut arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
        let previous: Vec<StateId> = previous
            .into_iter()
            .filter(|id| arena.is_live(*id))
            .collect();

        let index = match arena.free.pop() {
            Some(index) => index,
            None => {
                arena.slots.push(Slot {
                    generation: 0,
                    node: None,
                });
                (arena.slots.len() - 1) as u32
            }
        };
        let slot = &mut arena.slots[index as usize];
        let id = StateId {
            index,
            generation: slot.generation,
        };
        let core = Arc::new(make(id));
        slot.node = Some(Node {
            core: Arc::clone(&core),
            previous,
        });
        core
    }

    /// Drop a node. States that pointed at it inherit its predecessors so
    /// that fan-out still reaches older snapshots.
    pub(crate) fn remove(&self, id: StateId) {
        let removed = {
            let mut arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(slot) = arena.slots.get_mut(id.index as usize) else {
                return;
            };
            if slot.generation != id.generation {
                return;
            }
            let Some(node) = slot.node.take() else {
                return;
            };
            slot.generation = slot.generation.wrapping_add(1);
            arena.free.push(id.index);

            for slot in arena.slots.iter_mut() {
                let Some(other) = slot.node.as_mut() else {
                    continue;
                };
                if let Some(pos) = other.previous.iter().position(|p| *p == id) {
                    other.previous.remove(pos);
                    for inherited in &node.previous {
                        if !other.previous.contains(inherited) {
                            other.previous.push(*inherited);
                        }
                    }
                }
            }
            node
        };
        // Listener closures may own states; release them outside the lock.
        drop(removed);
    }

    pub(crate) fn core(&self, id: StateId) -> Option<Arc<StateCore>> {
        let arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
        arena.node(id).map(|node| Arc::clone(&node.core))
    }

    /// Live states directly replaced by `id`. Stale entries are pruned.
    pub(crate) fn predecessors(&self, id: StateId) -> Vec<StateId> {
        let mut arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(node) = arena.node(id) else {
            return Vec::new();
        };
        let live: Vec<StateId> = node
            .previous
            .iter()
            .copied()
            .filter(|p| arena.is_live(*p))
            .collect();
        if live.len() != node.previous.len()
            && let Some(slot) = arena.slots.get_mut(id.index as usize)
            && let Some(node) = slot.node.as_mut()
        {
            node.previous = live.clone();
        }
        live
    }

    pub(crate) fn len(&self) -> usize {
        let arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
        arena.slots.iter().filter(|s| s.node.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Quality;
    use crate::state::ResourceId;
    use indexmap::IndexSet;

    fn core(id: StateId) -> StateCore {
        StateCore::new(
            id,
            ResourceId::new("/projects/demo"),
            Quality::Simple,
            Quality::Simple,
            IndexSet::new(),
        )
    }

    #[test]
    fn test_insert_and_lookup() {
        let graph = StateGraph::new();
        let a = graph.insert(Vec::new(), core);
        let b = graph.insert(vec![a.id()], core);

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.predecessors(b.id()), vec![a.id()]);
        assert!(graph.core(a.id()).is_some());
    }

    #[test]
    fn test_removed_id_goes_stale() {
        let graph = StateGraph::new();
        let a = graph.insert(Vec::new(), core);
        let a_id = a.id();
        graph.remove(a_id);

        assert!(graph.core(a_id).is_none());
        let reused = graph.insert(Vec::new(), core);
        assert_eq!(reused.id().index(), a_id.index());
        assert_ne!(reused.id(), a_id);
        assert!(graph.core(a_id).is_none());
    }

    #[test]
    fn test_remove_splices_chain() {
        let graph = StateGraph::new();
        let s1 = graph.insert(Vec::new(), core);
        let s2 = graph.insert(vec![s1.id()], core);
        let s3 = graph.insert(vec![s2.id()], core);

        graph.remove(s2.id());
        assert_eq!(graph.predecessors(s3.id()), vec![s1.id()]);
    }

    #[test]
    fn test_remove_twice_is_noop() {
        let graph = StateGraph::new();
        let a = graph.insert(Vec::new(), core);
        graph.remove(a.id());
        graph.remove(a.id());
        assert_eq!(graph.len(), 0);
    }
}
