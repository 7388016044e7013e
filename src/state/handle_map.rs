//! A single `handle -> wrapper` map, independently lock-guarded (component C).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::Error;

/// One handle type's slice of the state block. Reads take the shared lock; create/destroy take
/// the exclusive lock only long enough to mutate the map.
#[derive(Debug)]
pub struct HandleMap<V> {
    name: &'static str,
    entries: RwLock<HashMap<u64, Arc<V>>>,
}

impl<V> Default for HandleMap<V> {
    fn default() -> Self {
        Self { name: "handle", entries: RwLock::new(HashMap::new()) }
    }
}

impl<V> HandleMap<V> {
    pub fn new(name: &'static str) -> Self {
        Self { name, entries: RwLock::new(HashMap::new()) }
    }

    /// Fails if `handle` is already tracked (invariant 1 / error kind 2: fatal on duplicate).
    pub fn create(&self, handle: u64, value: V) -> anyhow::Result<Arc<V>> {
        let mut entries = self.entries.write()?;
        if entries.contains_key(&handle) {
            return Err(Error::DuplicateHandle(self.name).into());
        }
        let arc = Arc::new(value);
        entries.insert(handle, arc.clone());
        Ok(arc)
    }

    pub fn get(&self, handle: u64) -> anyhow::Result<Arc<V>> {
        self.entries
            .read()?
            .get(&handle)
            .cloned()
            .ok_or(Error::UnknownHandle(self.name, "lookup"))
            .map_err(Into::into)
    }

    pub fn try_get(&self, handle: u64) -> anyhow::Result<Option<Arc<V>>> {
        Ok(self.entries.read()?.get(&handle).cloned())
    }

    pub fn get_or_create(&self, handle: u64, make: impl FnOnce() -> V) -> anyhow::Result<Arc<V>> {
        if let Some(existing) = self.entries.read()?.get(&handle) {
            return Ok(existing.clone());
        }
        let mut entries = self.entries.write()?;
        if let Some(existing) = entries.get(&handle) {
            return Ok(existing.clone());
        }
        let arc = Arc::new(make());
        entries.insert(handle, arc.clone());
        Ok(arc)
    }

    pub fn erase(&self, handle: u64) -> anyhow::Result<Arc<V>> {
        self.entries
            .write()?
            .remove(&handle)
            .ok_or(Error::UnknownHandle(self.name, "erase"))
            .map_err(Into::into)
    }

    /// Bulk removal used when a parent handle is destroyed; returns the removed wrappers so
    /// callers can cascade further (e.g. purging a physical device's dependents).
    pub fn erase_if(&self, mut predicate: impl FnMut(&V) -> bool) -> anyhow::Result<Vec<Arc<V>>> {
        let mut entries = self.entries.write()?;
        let doomed: Vec<u64> = entries
            .iter()
            .filter(|(_, v)| predicate(v))
            .map(|(k, _)| *k)
            .collect();
        Ok(doomed.into_iter().filter_map(|k| entries.remove(&k)).collect())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a handle value guaranteed not to collide with anything currently tracked, for MEC
    /// to seed placeholders the real driver will overwrite on replay (component L).
    pub fn get_unused(&self) -> anyhow::Result<u64> {
        let entries = self.entries.read()?;
        let mut candidate: u64 = 1;
        while entries.contains_key(&candidate) {
            candidate += 1;
        }
        Ok(candidate)
    }

    pub fn values(&self) -> anyhow::Result<Vec<Arc<V>>> {
        Ok(self.entries.read()?.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_duplicate_handle() {
        let map: HandleMap<u32> = HandleMap::new("thing");
        map.create(1, 10).unwrap();
        assert!(map.create(1, 20).is_err());
    }

    #[test]
    fn erase_unknown_handle_is_an_error() {
        let map: HandleMap<u32> = HandleMap::new("thing");
        assert!(map.erase(99).is_err());
    }

    #[test]
    fn get_unused_skips_tracked_handles() {
        let map: HandleMap<u32> = HandleMap::new("thing");
        map.create(1, 0).unwrap();
        map.create(2, 0).unwrap();
        assert_eq!(map.get_unused().unwrap(), 3);
    }

    #[test]
    fn erase_if_cascades_dependents() {
        let map: HandleMap<u32> = HandleMap::new("thing");
        map.create(1, 100).unwrap();
        map.create(2, 200).unwrap();
        map.create(3, 100).unwrap();
        let removed = map.erase_if(|v| *v == 100).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(map.len(), 1);
    }
}
