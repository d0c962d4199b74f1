//! Ties the unit ids handed out at compile time back to the scripts they came from.

use alloc::collections::BTreeMap;

use educe::Educe;

use crate::protocol::UnitId;
use crate::vecmap::VecMap;

/// A two-way mapping between unit ids and editor-side origins (usually a handle to the top block of a script).
///
/// Every origin has at most one id. Ids are assigned as one more than the largest id currently held,
/// so an id is never handed to a second origin while the first one still holds it.
#[derive(Debug, Clone, Educe)]
#[educe(Default)]
pub struct IdentityRegistry<O: Ord + Clone> {
    by_origin: BTreeMap<O, UnitId>,
    by_id: VecMap<UnitId, O>,
}
impl<O: Ord + Clone> IdentityRegistry<O> {
    pub fn new() -> Self {
        Self::default()
    }
    /// Gets the id of `origin`, handing out a fresh one if it does not have one yet.
    pub fn assign(&mut self, origin: O) -> UnitId {
        if let Some(id) = self.by_origin.get(&origin) {
            return *id;
        }
        let id = self.by_id.keys().next_back().map(|x| x + 1).unwrap_or(0);
        self.by_id.insert(id, origin.clone());
        self.by_origin.insert(origin, id);
        id
    }
    pub fn resolve(&self, id: UnitId) -> Option<&O> {
        self.by_id.get(&id)
    }
    pub fn id_of(&self, origin: &O) -> Option<UnitId> {
        self.by_origin.get(origin).copied()
    }
    /// Releases `id`, returning the origin that held it.
    pub fn free(&mut self, id: UnitId) -> Option<O> {
        let origin = self.by_id.remove(&id)?;
        self.by_origin.remove(&origin);
        Some(origin)
    }
    pub fn free_origin(&mut self, origin: &O) -> Option<UnitId> {
        let id = self.by_origin.remove(origin)?;
        self.by_id.remove(&id);
        Some(id)
    }
    pub fn clear(&mut self) {
        self.by_origin.clear();
        self.by_id.clear();
    }
    pub fn len(&self) -> usize {
        self.by_id.len()
    }
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
    /// Iterates over every live binding in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (UnitId, &O)> {
        self.by_id.iter().map(|(id, origin)| (*id, origin))
    }
}
