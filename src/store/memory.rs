//! In-process document store

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

use super::{assign_unique_id, DocumentStore, Filter, Patch, Sort, StoreError};
use crate::model::{EntityKind, VersionId};

/// Document store holding every collection in memory
///
/// Documents keep insertion order; `find_many` without a sort returns them
/// in that order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<EntityKind, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a whole collection (used when loading from disk)
    pub fn load(&self, kind: EntityKind, documents: Vec<Value>) -> Result<(), StoreError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        collections.insert(kind, documents);
        Ok(())
    }

    /// Copy of a whole collection
    pub fn snapshot(&self, kind: EntityKind) -> Result<Vec<Value>, StoreError> {
        let collections = self
            .collections
            .read()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        Ok(collections.get(&kind).cloned().unwrap_or_default())
    }
}

impl DocumentStore for MemoryStore {
    fn insert(&self, kind: EntityKind, mut document: Value) -> Result<VersionId, StoreError> {
        let id = assign_unique_id(&mut document)?;
        let mut collections = self
            .collections
            .write()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        collections.entry(kind).or_default().push(document);
        Ok(id)
    }

    fn find_one(&self, kind: EntityKind, filter: &Filter) -> Result<Option<Value>, StoreError> {
        let collections = self
            .collections
            .read()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        Ok(collections
            .get(&kind)
            .and_then(|docs| docs.iter().find(|doc| filter.matches(doc)))
            .cloned())
    }

    fn find_many(
        &self,
        kind: EntityKind,
        filter: &Filter,
        sort: Option<&Sort>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, StoreError> {
        let mut found: Vec<Value> = {
            let collections = self
                .collections
                .read()
                .map_err(|_| StoreError::Poisoned("memory store"))?;
            collections
                .get(&kind)
                .map(|docs| docs.iter().filter(|doc| filter.matches(doc)).cloned().collect())
                .unwrap_or_default()
        };

        if let Some(sort) = sort {
            found.sort_by(|a, b| sort.compare(a, b));
        }
        if let Some(limit) = limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    fn update_many(
        &self,
        kind: EntityKind,
        filter: &Filter,
        patch: &Patch,
    ) -> Result<usize, StoreError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        let Some(docs) = collections.get_mut(&kind) else {
            return Ok(0);
        };

        let mut modified = 0;
        for doc in docs.iter_mut().filter(|doc| filter.matches(doc)) {
            if patch.apply(doc) {
                modified += 1;
            }
        }
        Ok(modified)
    }

    fn delete_many(&self, kind: EntityKind, filter: &Filter) -> Result<usize, StoreError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        let Some(docs) = collections.get_mut(&kind) else {
            return Ok(0);
        };

        let before = docs.len();
        docs.retain(|doc| !filter.matches(doc));
        Ok(before - docs.len())
    }

    fn count(&self, kind: EntityKind, filter: &Filter) -> Result<usize, StoreError> {
        let collections = self
            .collections
            .read()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        Ok(collections
            .get(&kind)
            .map(|docs| docs.iter().filter(|doc| filter.matches(doc)).count())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_and_find() {
        let store = MemoryStore::new();
        let id = store
            .insert(EntityKind::Schema, json!({"name": "a", "versionNumber": 1}))
            .unwrap();

        let found = store
            .find_one(EntityKind::Schema, &Filter::new().eq("uniqueId", id.to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(found["name"], "a");

        // collections are disjoint
        assert!(store
            .find_one(EntityKind::Configuration, &Filter::new())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_update_and_delete_many() {
        let store = MemoryStore::new();
        for n in 1..=3u32 {
            store
                .insert(EntityKind::Schema, json!({"groupId": "g", "versionNumber": n, "isActive": true}))
                .unwrap();
        }

        let group = Filter::new().eq("groupId", "g");
        let modified = store
            .update_many(EntityKind::Schema, &group, &Patch::new().set("isActive", false))
            .unwrap();
        assert_eq!(modified, 3);
        assert_eq!(
            store
                .count(EntityKind::Schema, &Filter::new().eq("isActive", true))
                .unwrap(),
            0
        );

        let top = store
            .find_many(EntityKind::Schema, &group, Some(&Sort::descending("versionNumber")), Some(1))
            .unwrap();
        assert_eq!(top[0]["versionNumber"], 3);

        assert_eq!(store.delete_many(EntityKind::Schema, &group).unwrap(), 3);
        assert_eq!(store.delete_many(EntityKind::Schema, &group).unwrap(), 0);
    }
}
