//! One-shot upgrade of legacy records
//!
//! Older records may lack version bookkeeping. They are brought up to the
//! current shape once, when a collection is ingested, so that readers never
//! have to guess defaults:
//!
//! - `version` / `active` / `_id` are renamed to `versionNumber` / `isActive` / `uniqueId`
//! - `configId` (configurations) and `schemaId` (schemas) are renamed to `groupId`
//! - a missing version number becomes 1, a missing active flag becomes true
//! - a missing group id becomes the record's own unique id
//! - schemas gain `enabled = true` and a document checksum when absent
//! - groups left with several active versions keep only the highest one active

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::checksum::Checksum;
use crate::model::{fields, ConfigurationVersion, EntityKind, SchemaVersion, VersionId};
use crate::store::StoreError;

/// Result of upgrading one collection
#[derive(Debug, Default)]
pub struct MigrationOutcome {
    pub documents: Vec<Value>,
    /// Records that needed at least one change
    pub upgraded: usize,
    /// Versions demoted because their group had more than one active version
    pub demoted: usize,
}

impl MigrationOutcome {
    pub fn changed(&self) -> bool {
        self.upgraded > 0 || self.demoted > 0
    }
}

/// Upgrade every record of a collection
pub fn upgrade_collection(
    kind: EntityKind,
    documents: Vec<Value>,
    now: DateTime<Utc>,
) -> Result<MigrationOutcome, StoreError> {
    let mut outcome = MigrationOutcome::default();

    for document in documents {
        let (document, changed) = upgrade_record(kind, document, now)?;
        if changed {
            outcome.upgraded += 1;
        }
        outcome.documents.push(document);
    }

    outcome.demoted = demote_extra_actives(&mut outcome.documents);
    Ok(outcome)
}

/// Check that an upgraded record has every field its model requires
///
/// The error message names the record's unique id.
pub fn check_record(kind: EntityKind, document: &Value) -> Result<(), String> {
    let checked = match kind {
        EntityKind::Schema => SchemaVersion::deserialize(document).map(drop),
        EntityKind::Configuration => ConfigurationVersion::deserialize(document).map(drop),
    };
    checked.map_err(|e| {
        let id = document
            .get(fields::UNIQUE_ID)
            .and_then(Value::as_str)
            .unwrap_or("<unknown>");
        format!("record {}: {}", id, e)
    })
}

/// Upgrade one record; the flag reports whether anything changed
pub fn upgrade_record(
    kind: EntityKind,
    document: Value,
    now: DateTime<Utc>,
) -> Result<(Value, bool), StoreError> {
    let Value::Object(mut object) = document else {
        return Err(StoreError::InvalidDocument(format!(
            "{} record is not a JSON object",
            kind
        )));
    };
    let mut changed = false;

    changed |= rename(&mut object, "_id", fields::UNIQUE_ID);
    changed |= rename(&mut object, "version", fields::VERSION_NUMBER);
    changed |= rename(&mut object, "active", fields::IS_ACTIVE);
    let legacy_group = match kind {
        EntityKind::Schema => "schemaId",
        EntityKind::Configuration => "configId",
    };
    changed |= rename(&mut object, legacy_group, fields::GROUP_ID);

    let existing = object
        .get(fields::UNIQUE_ID)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    let unique_id = match existing {
        Some(id) => id,
        None => {
            let id = VersionId::new().to_string();
            object.insert(fields::UNIQUE_ID.into(), Value::String(id.clone()));
            changed = true;
            id
        }
    };

    changed |= default_field(&mut object, fields::GROUP_ID, Value::String(unique_id));
    changed |= default_field(&mut object, fields::VERSION_NUMBER, Value::from(1u32));
    changed |= default_field(&mut object, fields::IS_ACTIVE, Value::Bool(true));
    changed |= default_field(&mut object, fields::CREATED_AT, Value::String(now.to_rfc3339()));
    let created = object[fields::CREATED_AT].clone();
    changed |= default_field(&mut object, fields::UPDATED_AT, created);

    if kind == EntityKind::Schema {
        changed |= default_field(&mut object, fields::ENABLED, Value::Bool(true));
        if !object.contains_key(fields::CHECKSUM) {
            let document = object.get(fields::DOCUMENT).cloned().unwrap_or(Value::Null);
            let checksum = Checksum::from_json(&document);
            object.insert(fields::CHECKSUM.into(), Value::String(checksum.to_string()));
            changed = true;
        }
    }

    Ok((Value::Object(object), changed))
}

fn rename(object: &mut Map<String, Value>, from: &str, to: &str) -> bool {
    if object.contains_key(to) {
        return false;
    }
    match object.remove(from) {
        Some(value) => {
            object.insert(to.to_string(), value);
            true
        }
        None => false,
    }
}

fn default_field(object: &mut Map<String, Value>, field: &str, value: Value) -> bool {
    match object.get(field) {
        Some(existing) if !existing.is_null() => false,
        _ => {
            object.insert(field.to_string(), value);
            true
        }
    }
}

fn demote_extra_actives(documents: &mut [Value]) -> usize {
    // group id -> (index, version) of the highest active version seen so far
    let mut winners: HashMap<String, (usize, u64)> = HashMap::new();
    let mut losers = Vec::new();

    for (index, doc) in documents.iter().enumerate() {
        if doc.get(fields::IS_ACTIVE).and_then(Value::as_bool) != Some(true) {
            continue;
        }
        let group = doc
            .get(fields::GROUP_ID)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let version = doc
            .get(fields::VERSION_NUMBER)
            .and_then(Value::as_u64)
            .unwrap_or(0);

        match winners.get(&group).copied() {
            Some((_, best)) if best >= version => losers.push(index),
            Some((winner, _)) => {
                losers.push(winner);
                winners.insert(group, (index, version));
            }
            None => {
                winners.insert(group, (index, version));
            }
        }
    }

    for index in &losers {
        if let Some(object) = documents[*index].as_object_mut() {
            object.insert(fields::IS_ACTIVE.into(), Value::Bool(false));
        }
    }
    losers.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_configuration_defaults() {
        let legacy = json!({"_id": "c1", "name": "C", "data": {"x": 1}});
        let (doc, changed) = upgrade_record(EntityKind::Configuration, legacy, Utc::now()).unwrap();

        assert!(changed);
        assert_eq!(doc["uniqueId"], "c1");
        assert_eq!(doc["groupId"], "c1");
        assert_eq!(doc["versionNumber"], 1);
        assert_eq!(doc["isActive"], true);
        assert!(doc.get("_id").is_none());
        assert!(doc.get("enabled").is_none());
    }

    #[test]
    fn test_legacy_field_aliases_renamed() {
        let legacy = json!({
            "uniqueId": "s2",
            "schemaId": "s1",
            "version": 2,
            "active": false,
            "document": {"type": "object"}
        });
        let (doc, _) = upgrade_record(EntityKind::Schema, legacy, Utc::now()).unwrap();

        assert_eq!(doc["groupId"], "s1");
        assert_eq!(doc["versionNumber"], 2);
        assert_eq!(doc["isActive"], false);
        assert_eq!(doc["enabled"], true);
        assert_eq!(
            doc["checksum"],
            Checksum::from_json(&json!({"type": "object"})).to_string()
        );
    }

    #[test]
    fn test_current_records_untouched() {
        let now = Utc::now();
        let current = json!({
            "uniqueId": "a",
            "groupId": "g",
            "versionNumber": 1,
            "isActive": true,
            "createdAt": now.to_rfc3339(),
            "updatedAt": now.to_rfc3339()
        });
        let (doc, changed) =
            upgrade_record(EntityKind::Configuration, current.clone(), now).unwrap();
        assert!(!changed);
        assert_eq!(doc, current);
    }

    #[test]
    fn test_extra_actives_demoted() {
        let docs = vec![
            json!({"uniqueId": "a", "groupId": "g", "version": 1}),
            json!({"uniqueId": "b", "groupId": "g", "version": 3}),
            json!({"uniqueId": "c", "groupId": "g", "version": 2}),
            json!({"uniqueId": "d", "groupId": "h", "version": 1}),
        ];
        let outcome = upgrade_collection(EntityKind::Configuration, docs, Utc::now()).unwrap();

        assert_eq!(outcome.upgraded, 4);
        assert_eq!(outcome.demoted, 2);
        let active: Vec<&str> = outcome
            .documents
            .iter()
            .filter(|d| d["isActive"] == true)
            .map(|d| d["uniqueId"].as_str().unwrap())
            .collect();
        assert_eq!(active, vec!["b", "d"]);
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(upgrade_record(EntityKind::Schema, json!("nope"), Utc::now()).is_err());
    }

    #[test]
    fn test_check_record_names_incomplete_record() {
        let (doc, _) = upgrade_record(
            EntityKind::Configuration,
            json!({"_id": "old", "name": "Old", "data": {}}),
            Utc::now(),
        )
        .unwrap();

        let message = check_record(EntityKind::Configuration, &doc).unwrap_err();
        assert!(message.contains("record old"));
        assert!(message.contains("entityType"));
    }

    #[test]
    fn test_check_record_accepts_upgraded_schema() {
        let (doc, _) = upgrade_record(
            EntityKind::Schema,
            json!({"_id": "s1", "name": "S", "entityType": "signal", "document": {"type": "object"}}),
            Utc::now(),
        )
        .unwrap();
        assert!(check_record(EntityKind::Schema, &doc).is_ok());
    }
}
