//! File-backed document store
//!
//! Each collection lives in one pretty-printed JSON array:
//!
//! ```text
//! <root>/
//! ├── schemas.json
//! └── configurations.json
//! ```
//!
//! Reads are served from memory. Every mutation rewrites the touched
//! collection through a temporary file and a rename, so a crash leaves
//! either the old or the new file, never a torn one.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{DocumentStore, Filter, MemoryStore, Patch, Sort, StoreError};
use crate::migration;
use crate::model::{EntityKind, VersionId};

pub struct FileStore {
    root: PathBuf,
    memory: MemoryStore,
    /// Held across a mutation and its write-back so files land in order
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (or create) a store rooted at `path`
    ///
    /// Legacy records are upgraded here, once, and written back.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let store = Self {
            root,
            memory: MemoryStore::new(),
            write_lock: Mutex::new(()),
        };

        for kind in EntityKind::all() {
            let path = store.collection_path(*kind);
            if !path.exists() {
                continue;
            }

            let content = fs::read_to_string(&path)?;
            let documents: Vec<Value> =
                serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
                    path: path.clone(),
                    message: e.to_string(),
                })?;

            let outcome = migration::upgrade_collection(*kind, documents, Utc::now())?;
            for document in &outcome.documents {
                migration::check_record(*kind, document).map_err(|message| {
                    StoreError::Corrupt {
                        path: path.clone(),
                        message,
                    }
                })?;
            }
            let changed = outcome.changed();
            if changed {
                info!(
                    collection = kind.collection(),
                    upgraded = outcome.upgraded,
                    demoted = outcome.demoted,
                    "Migrated legacy records"
                );
            }
            debug!(
                collection = kind.collection(),
                records = outcome.documents.len(),
                "Loaded collection"
            );

            store.memory.load(*kind, outcome.documents)?;
            if changed {
                store.persist(*kind)?;
            }
        }

        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_path(&self, kind: EntityKind) -> PathBuf {
        self.root.join(format!("{}.json", kind.collection()))
    }

    fn persist(&self, kind: EntityKind) -> Result<(), StoreError> {
        let documents = self.memory.snapshot(kind)?;
        let path = self.collection_path(kind);
        let tmp = path.with_extension("json.tmp");

        fs::write(&tmp, serde_json::to_string_pretty(&documents)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Apply `op` in memory and write the collection back
    ///
    /// When the write fails the collection is restored to its state before
    /// `op`, so memory never holds a change the file does not.
    fn mutate<T>(
        &self,
        kind: EntityKind,
        op: impl FnOnce(&MemoryStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Poisoned("file store"))?;
        let before = self.memory.snapshot(kind)?;
        let result = op(&self.memory)?;
        if let Err(e) = self.persist(kind) {
            warn!(collection = kind.collection(), error = %e, "Write-back failed, rolling back");
            self.memory.load(kind, before)?;
            return Err(e);
        }
        Ok(result)
    }
}

impl DocumentStore for FileStore {
    fn insert(&self, kind: EntityKind, document: Value) -> Result<VersionId, StoreError> {
        self.mutate(kind, |memory| memory.insert(kind, document))
    }

    fn find_one(&self, kind: EntityKind, filter: &Filter) -> Result<Option<Value>, StoreError> {
        self.memory.find_one(kind, filter)
    }

    fn find_many(
        &self,
        kind: EntityKind,
        filter: &Filter,
        sort: Option<&Sort>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, StoreError> {
        self.memory.find_many(kind, filter, sort, limit)
    }

    fn update_many(
        &self,
        kind: EntityKind,
        filter: &Filter,
        patch: &Patch,
    ) -> Result<usize, StoreError> {
        self.mutate(kind, |memory| memory.update_many(kind, filter, patch))
    }

    fn delete_many(&self, kind: EntityKind, filter: &Filter) -> Result<usize, StoreError> {
        self.mutate(kind, |memory| memory.delete_many(kind, filter))
    }

    fn count(&self, kind: EntityKind, filter: &Filter) -> Result<usize, StoreError> {
        self.memory.count(kind, filter)
    }
}
