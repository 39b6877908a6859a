//! Generic version lifecycle
//!
//! A [`VersionStore`] manages linear version sequences for one entity kind.
//! Each group has versions `1..=n` and at most one active version.
//!
//! Mutations of one group are serialized in-process by a per-group mutex,
//! so two writers can never both compute `max + 1` or both mark themselves
//! active. Group creation is serialized per kind, which keeps the name
//! uniqueness check and the insert atomic. Lock order, when several are
//! held: reference pin, then group lock, then creation lock.
//!
//! New versions are written deactivate-then-insert. A crash between the two
//! steps leaves the group with no active version; `get_active` then returns
//! `None` until `set_active` repairs it.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{RegistryError, Result};
use crate::model::{fields, GroupId, VersionId, VersionMeta, Versioned};
use crate::store::{DocumentStore, Filter, Patch, Sort};

pub struct VersionStore<E: Versioned> {
    store: Arc<dyn DocumentStore>,
    group_locks: DashMap<GroupId, Arc<Mutex<()>>>,
    create_lock: Mutex<()>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Versioned> VersionStore<E> {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            group_locks: DashMap::new(),
            create_lock: Mutex::new(()),
            _entity: PhantomData,
        }
    }

    /// Create a new group whose first version is `draft`
    ///
    /// The draft's envelope is replaced: fresh group id, version 1, active.
    pub fn create_group(&self, draft: E) -> Result<E> {
        let _creating = lock(&self.create_lock);
        self.ensure_unique(&draft, None)?;

        let mut entity = draft;
        let now = Utc::now();
        *entity.meta_mut() = VersionMeta {
            unique_id: VersionId::nil(),
            group_id: GroupId::new(),
            version_number: 1,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let created = self.insert(entity)?;
        info!(
            kind = %E::KIND,
            name = created.name(),
            group_id = %created.meta().group_id,
            "Created group"
        );
        Ok(created)
    }

    /// Append version `max + 1` to a group and make it the active one
    ///
    /// `build` receives the group's active version (or its highest version
    /// when none is active) and returns the attributes of the new version.
    /// It runs under the group lock, so validation done there cannot race
    /// with other writers of the same group.
    pub fn create_next_version<F>(&self, group_id: &GroupId, build: F) -> Result<E>
    where
        F: FnOnce(&E) -> Result<E>,
    {
        self.with_group_lock(group_id, || {
            let versions = self.list_versions(group_id)?;
            let latest = versions.first().ok_or_else(|| RegistryError::GroupNotFound {
                kind: E::KIND,
                group_id: group_id.clone(),
            })?;
            let base = versions
                .iter()
                .find(|v| v.meta().is_active)
                .unwrap_or(latest);
            let next_number = latest.meta().version_number + 1;

            let mut entity = build(base)?;

            // Only a changed identity can collide with another group
            let _creating = if entity.identity_filter() != base.identity_filter() {
                let guard = lock(&self.create_lock);
                self.ensure_unique(&entity, Some(group_id))?;
                Some(guard)
            } else {
                None
            };

            let now = Utc::now();
            *entity.meta_mut() = VersionMeta {
                unique_id: VersionId::nil(),
                group_id: group_id.clone(),
                version_number: next_number,
                is_active: true,
                created_at: now,
                updated_at: now,
            };

            self.deactivate_all(group_id, now)?;
            let created = self.insert(entity)?;
            info!(
                kind = %E::KIND,
                group_id = %group_id,
                version = next_number,
                "Created version"
            );
            Ok(created)
        })
    }

    pub fn get_active(&self, group_id: &GroupId) -> Result<Option<E>> {
        let filter = group_filter(group_id).eq(fields::IS_ACTIVE, true);
        self.find_one(&filter)
    }

    pub fn get_by_version(&self, group_id: &GroupId, version_number: u32) -> Result<Option<E>> {
        let filter = group_filter(group_id).eq(fields::VERSION_NUMBER, version_number);
        self.find_one(&filter)
    }

    pub fn get_by_id(&self, unique_id: &VersionId) -> Result<Option<E>> {
        self.find_one(&Filter::new().eq(fields::UNIQUE_ID, unique_id.as_str()))
    }

    /// Every version of the group, highest version first
    pub fn list_versions(&self, group_id: &GroupId) -> Result<Vec<E>> {
        self.find(
            &group_filter(group_id),
            Some(&Sort::descending(fields::VERSION_NUMBER)),
            None,
        )
    }

    /// Make `version_number` the only active version of the group
    pub fn set_active(&self, group_id: &GroupId, version_number: u32) -> Result<E> {
        self.with_group_lock(group_id, || {
            let Some(mut target) = self.get_by_version(group_id, version_number)? else {
                return Err(if self.group_exists(group_id)? {
                    RegistryError::VersionNotFound {
                        kind: E::KIND,
                        group_id: group_id.clone(),
                        version: version_number,
                    }
                } else {
                    RegistryError::GroupNotFound {
                        kind: E::KIND,
                        group_id: group_id.clone(),
                    }
                });
            };

            let now = Utc::now();
            self.deactivate_all(group_id, now)?;
            let patch = Patch::new()
                .set(fields::IS_ACTIVE, true)
                .set(fields::UPDATED_AT, now.to_rfc3339());
            self.store.update_many(
                E::KIND,
                &Filter::new().eq(fields::UNIQUE_ID, target.meta().unique_id.as_str()),
                &patch,
            )?;

            let meta = target.meta_mut();
            meta.is_active = true;
            meta.updated_at = now;
            info!(kind = %E::KIND, group_id = %group_id, version = version_number, "Activated version");
            Ok(target)
        })
    }

    /// Apply an in-place patch to every version of a group
    ///
    /// Only for fields that are not part of the version identity.
    pub fn patch_group(&self, group_id: &GroupId, patch: Patch) -> Result<usize> {
        self.with_group_lock(group_id, || {
            let patch = patch.set(fields::UPDATED_AT, Utc::now().to_rfc3339());
            let modified = self.store.update_many(E::KIND, &group_filter(group_id), &patch)?;
            if modified == 0 {
                return Err(RegistryError::GroupNotFound {
                    kind: E::KIND,
                    group_id: group_id.clone(),
                });
            }
            Ok(modified)
        })
    }

    /// Remove every version of a group; 0 when the group does not exist
    pub fn delete_group(&self, group_id: &GroupId) -> Result<usize> {
        self.delete_group_with(group_id, |_| Ok(()))
            .map(|removed| removed.len())
    }

    /// Remove every version of a group once `precheck` accepts them
    ///
    /// `precheck` runs under the group lock and sees every version about to
    /// be removed. Returns the removed versions.
    pub fn delete_group_with<F>(&self, group_id: &GroupId, precheck: F) -> Result<Vec<E>>
    where
        F: FnOnce(&[E]) -> Result<()>,
    {
        let removed = self.with_group_lock(group_id, || {
            let versions = self.list_versions(group_id)?;
            if versions.is_empty() {
                return Ok(versions);
            }
            precheck(&versions)?;

            let count = self.store.delete_many(E::KIND, &group_filter(group_id))?;
            info!(kind = %E::KIND, group_id = %group_id, count, "Deleted group");
            Ok(versions)
        })?;

        self.group_locks.remove(group_id);
        Ok(removed)
    }

    /// Matching entities, optionally sorted and limited
    pub fn find(&self, filter: &Filter, sort: Option<&Sort>, limit: Option<usize>) -> Result<Vec<E>> {
        debug!(kind = %E::KIND, clauses = filter.clauses().len(), "Querying versions");
        self.store
            .find_many(E::KIND, filter, sort, limit)?
            .into_iter()
            .map(decode)
            .collect()
    }

    pub fn count(&self, filter: &Filter) -> Result<usize> {
        Ok(self.store.count(E::KIND, filter)?)
    }

    pub fn group_exists(&self, group_id: &GroupId) -> Result<bool> {
        Ok(self.store.count(E::KIND, &group_filter(group_id))? > 0)
    }

    /// Fail with `DuplicateName` when another group already owns the identity
    pub fn ensure_unique(&self, entity: &E, excluding: Option<&GroupId>) -> Result<()> {
        let clashes = self.store.find_many(E::KIND, &entity.identity_filter(), None, None)?;
        let taken = clashes.iter().any(|doc| match excluding {
            Some(group_id) => doc.get(fields::GROUP_ID).and_then(Value::as_str) != Some(group_id.as_str()),
            None => true,
        });

        if taken {
            return Err(RegistryError::DuplicateName {
                kind: E::KIND,
                name: entity.name().to_string(),
                scope: entity.identity_scope(),
            });
        }
        Ok(())
    }

    /// Run `f` while holding the group's mutation lock
    pub fn with_group_lock<T>(&self, group_id: &GroupId, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let group_lock = Arc::clone(
            self.group_locks
                .entry(group_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let _held = lock(&group_lock);
        f()
    }

    fn find_one(&self, filter: &Filter) -> Result<Option<E>> {
        self.store.find_one(E::KIND, filter)?.map(decode).transpose()
    }

    fn insert(&self, mut entity: E) -> Result<E> {
        let mut document = serde_json::to_value(&entity)?;
        if let Some(object) = document.as_object_mut() {
            object.remove(fields::UNIQUE_ID);
        }
        let unique_id = self.store.insert(E::KIND, document)?;
        entity.meta_mut().unique_id = unique_id;
        Ok(entity)
    }

    fn deactivate_all(&self, group_id: &GroupId, now: DateTime<Utc>) -> Result<usize> {
        let patch = Patch::new()
            .set(fields::IS_ACTIVE, false)
            .set(fields::UPDATED_AT, now.to_rfc3339());
        let filter = group_filter(group_id).eq(fields::IS_ACTIVE, true);
        Ok(self.store.update_many(E::KIND, &filter, &patch)?)
    }
}

fn group_filter(group_id: &GroupId) -> Filter {
    Filter::new().eq(fields::GROUP_ID, group_id.as_str())
}

fn decode<E: Versioned>(document: Value) -> Result<E> {
    Ok(serde_json::from_value(document)?)
}

/// A poisoned lock only means another writer panicked; the guarded unit
/// carries no data, so continuing is sound.
fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
