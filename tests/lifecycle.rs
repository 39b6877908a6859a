//! Version Lifecycle Tests
//!
//! End-to-end behaviour of both registries over the in-memory and file stores.

use std::sync::mpsc;
use std::sync::Arc;

use config_registry::store::Filter;
use config_registry::{
    ChannelPublisher, ConfigurationRevision, DocumentStore, EntityKind, EntityType, EventKind,
    FileStore, GroupId, MemoryStore, Registries, RegistryError, SchemaRevision, ValidatorCache,
};
use rstest::rstest;
use serde_json::{json, Value};
use tempfile::TempDir;

fn memory_registries() -> Registries {
    Registries::new(Arc::new(MemoryStore::new())).unwrap()
}

fn active_versions(store: &dyn DocumentStore, kind: EntityKind, group: &GroupId) -> usize {
    store
        .count(
            kind,
            &Filter::new()
                .eq("groupId", group.as_str())
                .eq("isActive", true),
        )
        .unwrap()
}

// =============================================================================
// Pinning Scenario
// =============================================================================

#[test]
fn test_pinned_configuration_survives_schema_revision() {
    let registries = memory_registries();

    let s1 = registries
        .schemas
        .register(
            "S",
            EntityType::Signal,
            json!({"type": "object", "required": ["x"]}),
            None,
        )
        .unwrap();
    assert_eq!(s1.version_number(), 1);
    assert!(s1.is_active());

    let c = registries
        .configurations
        .register("C", EntityType::Signal, s1.unique_id(), json!({"x": 1}))
        .unwrap();

    let s2 = registries
        .schemas
        .revise(
            s1.group_id(),
            SchemaRevision::document(json!({"type": "object", "required": ["x", "y"]})),
        )
        .unwrap();
    assert_eq!(s2.version_number(), 2);
    assert!(s2.is_active());
    let s1_now = registries.schemas.get_version(s1.group_id(), 1).unwrap().unwrap();
    assert!(!s1_now.is_active());

    // the pinned target is still version 1, so the data is still valid
    let fetched = registries.configurations.get_by_id(c.unique_id()).unwrap().unwrap();
    assert_eq!(&fetched.target_schema_version_id, s1.unique_id());
    assert!(registries.configurations.revalidate(c.unique_id()).unwrap().valid);
    // and would not be valid against the new active version
    assert!(!registries.schemas.validate(s2.unique_id(), &fetched.data).unwrap().valid);

    match registries.schemas.retire(s1.group_id()).unwrap_err() {
        RegistryError::ReferencedEntity { count, .. } => assert_eq!(count, 1),
        other => panic!("Expected ReferencedEntity, got {:?}", other),
    }
}

#[test]
fn test_activation_does_not_change_pinned_outcome() {
    let registries = memory_registries();
    let s1 = registries
        .schemas
        .register("S", EntityType::Device, json!({"type": "object"}), None)
        .unwrap();
    let c = registries
        .configurations
        .register("C", EntityType::Device, s1.unique_id(), json!({"anything": true}))
        .unwrap();

    registries
        .schemas
        .revise(s1.group_id(), SchemaRevision::document(json!({"type": "array"})))
        .unwrap();
    assert!(registries.configurations.revalidate(c.unique_id()).unwrap().valid);

    registries.schemas.activate(s1.group_id(), 2).unwrap();
    registries.schemas.activate(s1.group_id(), 1).unwrap();
    registries.schemas.activate(s1.group_id(), 2).unwrap();
    assert!(registries.configurations.revalidate(c.unique_id()).unwrap().valid);
}

// =============================================================================
// Retirement
// =============================================================================

#[test]
fn test_retire_blocked_until_references_are_gone() {
    let registries = memory_registries();
    let s1 = registries
        .schemas
        .register("S", EntityType::Pipeline, json!({}), None)
        .unwrap();
    let c = registries
        .configurations
        .register("C", EntityType::Pipeline, s1.unique_id(), json!({}))
        .unwrap();
    assert_eq!(registries.schemas.reference_count(s1.group_id()).unwrap(), 1);

    assert!(matches!(
        registries.schemas.retire(s1.group_id()),
        Err(RegistryError::ReferencedEntity { count: 1, .. })
    ));
    assert!(registries.schemas.get_active(s1.group_id()).unwrap().is_some());
    assert!(registries.schemas.cache().contains(s1.unique_id()));

    assert_eq!(registries.configurations.retire(c.group_id()).unwrap(), 1);
    assert_eq!(registries.schemas.retire(s1.group_id()).unwrap(), 1);

    assert!(registries.schemas.get_active(s1.group_id()).unwrap().is_none());
    assert!(registries.schemas.get_version(s1.group_id(), 1).unwrap().is_none());
    assert!(!registries.schemas.cache().contains(s1.unique_id()));
    assert_eq!(registries.schemas.retire(s1.group_id()).unwrap(), 0);
}

#[test]
fn test_inactive_configuration_version_still_blocks_retire() {
    let registries = memory_registries();
    let old = registries
        .schemas
        .register("Old", EntityType::Alert, json!({}), None)
        .unwrap();
    let new = registries
        .schemas
        .register("New", EntityType::Alert, json!({}), None)
        .unwrap();

    let c1 = registries
        .configurations
        .register("C", EntityType::Alert, old.unique_id(), json!({}))
        .unwrap();
    // v2 re-pins to the other schema; v1 still pins the old one
    registries
        .configurations
        .revise(c1.group_id(), ConfigurationRevision::retarget(new.unique_id().clone()))
        .unwrap();

    assert!(matches!(
        registries.schemas.retire(old.group_id()),
        Err(RegistryError::ReferencedEntity { count: 1, .. })
    ));
}

// =============================================================================
// Immutable Identity
// =============================================================================

#[test]
fn test_renaming_is_rejected_for_both_kinds() {
    let registries = memory_registries();
    let schema = registries
        .schemas
        .register("S", EntityType::Report, json!({}), None)
        .unwrap();
    let config = registries
        .configurations
        .register("C", EntityType::Report, schema.unique_id(), json!({}))
        .unwrap();

    let schema_rename = SchemaRevision {
        name: Some("Renamed".into()),
        ..SchemaRevision::default()
    };
    assert!(matches!(
        registries.schemas.revise(schema.group_id(), schema_rename),
        Err(RegistryError::ImmutableField { field: "name" })
    ));

    let config_rename = ConfigurationRevision {
        name: Some("Renamed".into()),
        ..ConfigurationRevision::default()
    };
    assert!(matches!(
        registries.configurations.revise(config.group_id(), config_rename),
        Err(RegistryError::ImmutableField { field: "name" })
    ));

    let config_retype = ConfigurationRevision {
        entity_type: Some(EntityType::Signal),
        ..ConfigurationRevision::default()
    };
    assert!(matches!(
        registries.configurations.revise(config.group_id(), config_retype),
        Err(RegistryError::ImmutableField { field: "entityType" })
    ));
}

// =============================================================================
// Validation
// =============================================================================

#[rstest]
#[case(json!({"type": "object", "required": ["x"]}), json!({"x": 1}), true)]
#[case(json!({"type": "object", "required": ["x"]}), json!({"y": 1}), false)]
#[case(json!({"type": "array", "items": {"type": "integer"}}), json!([1, 2, 3]), true)]
#[case(json!({"type": "array", "items": {"type": "integer"}}), json!([1, "two"]), false)]
#[case(
    json!({"type": "object", "properties": {"rate": {"type": "number", "minimum": 0}}}),
    json!({"rate": -1}),
    false
)]
#[case(
    json!({"if": {"properties": {"kind": {"const": "a"}}}, "then": {"required": ["a"]}}),
    json!({"kind": "a", "a": 1}),
    true
)]
#[case(json!({"enum": ["low", "high"]}), json!("medium"), false)]
fn test_register_configuration_against_schema(
    #[case] document: Value,
    #[case] data: Value,
    #[case] accepted: bool,
) {
    let registries = memory_registries();
    let schema = registries
        .schemas
        .register("S", EntityType::Channel, document, None)
        .unwrap();

    let report = registries.schemas.validate(schema.unique_id(), &data).unwrap();
    assert_eq!(report.valid, accepted);
    assert_eq!(report.errors.is_empty(), accepted);

    let result = registries
        .configurations
        .register("C", EntityType::Channel, schema.unique_id(), data);
    match (accepted, result) {
        (true, Ok(config)) => assert!(registries.configurations.revalidate(config.unique_id()).unwrap().valid),
        (false, Err(RegistryError::Validation { errors })) => assert!(!errors.is_empty()),
        (_, other) => panic!("Unexpected outcome: {:?}", other.map(|c| c.name)),
    }
}

#[rstest]
#[case(json!({"type": "object", "properties": {"a": {"type": "integer"}}}), json!({"a": "x"}), "/a")]
#[case(json!({"type": "object", "required": ["a"]}), json!({}), "(root)")]
#[case(
    json!({"type": "object", "properties": {"items": {"type": "array", "items": {"type": "string"}}}}),
    json!({"items": ["ok", 3]}),
    "/items/1"
)]
fn test_violation_paths(#[case] document: Value, #[case] data: Value, #[case] path: &str) {
    let registries = memory_registries();
    let schema = registries
        .schemas
        .register("S", EntityType::Signal, document, None)
        .unwrap();

    let report = registries.schemas.validate(schema.unique_id(), &data).unwrap();
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].path, path);
}

// =============================================================================
// Events
// =============================================================================

#[test]
fn test_events_follow_mutations() {
    let (tx, rx) = mpsc::channel();
    let registries = Registries::builder(Arc::new(MemoryStore::new()))
        .publisher(Arc::new(ChannelPublisher::new(tx)))
        .build()
        .unwrap();

    let s1 = registries
        .schemas
        .register("S", EntityType::Signal, json!({}), None)
        .unwrap();
    registries
        .schemas
        .revise(s1.group_id(), SchemaRevision::document(json!({"type": "object"})))
        .unwrap();
    registries.schemas.activate(s1.group_id(), 1).unwrap();
    registries.schemas.set_enabled(s1.group_id(), false).unwrap();
    registries.schemas.retire(s1.group_id()).unwrap();
    // retiring an absent group emits nothing
    registries.schemas.retire(s1.group_id()).unwrap();

    let kinds: Vec<EventKind> = rx.try_iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::EntityCreated,
            EventKind::EntityUpdated,
            EventKind::EntityUpdated,
            EventKind::EntityUpdated,
            EventKind::EntityDeleted,
        ]
    );
}

#[test]
fn test_configuration_revise_emits_update() {
    let (tx, rx) = mpsc::channel();
    let registries = Registries::builder(Arc::new(MemoryStore::new()))
        .publisher(Arc::new(ChannelPublisher::new(tx)))
        .build()
        .unwrap();

    let schema = registries
        .schemas
        .register("S", EntityType::Signal, json!({"type": "object"}), None)
        .unwrap();
    let config = registries
        .configurations
        .register("C", EntityType::Signal, schema.unique_id(), json!({"n": 1}))
        .unwrap();
    let v2 = registries
        .configurations
        .revise(config.group_id(), ConfigurationRevision::data(json!({"n": 2})))
        .unwrap();

    let events: Vec<_> = rx
        .try_iter()
        .filter(|e| e.entity == EntityKind::Configuration)
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, EventKind::EntityCreated);
    assert_eq!(events[1].kind, EventKind::EntityUpdated);
    assert_eq!(events[1].version_number, Some(v2.version_number()));
}

#[test]
fn test_closed_event_channel_never_fails_operations() {
    let (tx, rx) = mpsc::channel();
    drop(rx);
    let registries = Registries::builder(Arc::new(MemoryStore::new()))
        .publisher(Arc::new(ChannelPublisher::new(tx)))
        .build()
        .unwrap();

    let schema = registries
        .schemas
        .register("S", EntityType::Signal, json!({}), None)
        .unwrap();
    assert_eq!(registries.schemas.retire(schema.group_id()).unwrap(), 1);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_configuration_revisions() {
    let store = Arc::new(MemoryStore::new());
    let registries = Arc::new(Registries::new(store.clone()).unwrap());
    let schema = registries
        .schemas
        .register("S", EntityType::Signal, json!({"type": "object"}), None)
        .unwrap();
    let config = registries
        .configurations
        .register("C", EntityType::Signal, schema.unique_id(), json!({"n": 0}))
        .unwrap();
    let group = config.group_id().clone();

    let handles: Vec<_> = (1..=6)
        .map(|n| {
            let registries = Arc::clone(&registries);
            let group = group.clone();
            std::thread::spawn(move || {
                registries
                    .configurations
                    .revise(&group, ConfigurationRevision::data(json!({ "n": n })))
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let versions = registries.configurations.list_versions(&group).unwrap();
    let numbers: Vec<u32> = versions.iter().map(|v| v.version_number()).collect();
    assert_eq!(numbers, vec![7, 6, 5, 4, 3, 2, 1]);
    assert_eq!(active_versions(store.as_ref(), EntityKind::Configuration, &group), 1);
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn test_file_store_round_trip() {
    let dir = TempDir::new().unwrap();
    let (schema_group, config_id) = {
        let registries = Registries::new(Arc::new(FileStore::open(dir.path()).unwrap())).unwrap();
        let schema = registries
            .schemas
            .register("S", EntityType::Signal, json!({"type": "object", "required": ["x"]}), None)
            .unwrap();
        registries
            .schemas
            .revise(schema.group_id(), SchemaRevision::document(json!({"type": "object"})))
            .unwrap();
        let config = registries
            .configurations
            .register("C", EntityType::Signal, schema.unique_id(), json!({"x": 1}))
            .unwrap();
        (schema.group_id().clone(), config.unique_id().clone())
    };

    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let registries = Registries::new(store.clone()).unwrap();

    let versions = registries.schemas.list_versions(&schema_group).unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(active_versions(store.as_ref(), EntityKind::Schema, &schema_group), 1);
    // the reopened cache is cold; validation compiles on demand
    assert!(registries.configurations.revalidate(&config_id).unwrap().valid);
    assert!(matches!(
        registries.schemas.retire(&schema_group),
        Err(RegistryError::ReferencedEntity { count: 1, .. })
    ));
}

#[test]
fn test_legacy_records_are_upgraded_on_open() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("schemas.json"),
        serde_json::to_string(&json!([
            {
                "_id": "legacy-schema",
                "name": "Legacy",
                "entityType": "signal",
                "document": {"type": "object", "required": ["x"]}
            }
        ]))
        .unwrap(),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("configurations.json"),
        serde_json::to_string(&json!([
            {
                "_id": "legacy-config",
                "name": "Legacy",
                "entityType": "signal",
                "targetSchemaVersionId": "legacy-schema",
                "data": {"x": 1}
            }
        ]))
        .unwrap(),
    )
    .unwrap();

    let registries = Registries::new(Arc::new(FileStore::open(dir.path()).unwrap())).unwrap();
    let group: GroupId = "legacy-schema".parse().unwrap();

    let schema = registries.schemas.get_active(&group).unwrap().unwrap();
    assert_eq!(schema.version_number(), 1);
    assert!(schema.enabled);
    assert!(schema.checksum.matches(&schema.document));

    let config_id = "legacy-config".parse().unwrap();
    assert!(registries.configurations.revalidate(&config_id).unwrap().valid);
    assert_eq!(registries.schemas.reference_count(&group).unwrap(), 1);

    // new versions continue the migrated sequence
    let v2 = registries
        .schemas
        .revise(&group, SchemaRevision::document(json!({"type": "object"})))
        .unwrap();
    assert_eq!(v2.version_number(), 2);
}

#[test]
fn test_failed_write_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("registry");
    let registries = Registries::new(Arc::new(FileStore::open(&root).unwrap())).unwrap();
    std::fs::remove_dir_all(&root).unwrap();

    let document = json!({"type": "object"});
    assert!(matches!(
        registries.schemas.register("S", EntityType::Signal, document.clone(), None),
        Err(RegistryError::Store(_))
    ));
    assert!(registries
        .schemas
        .find_by_name("S", EntityType::Signal)
        .unwrap()
        .is_none());

    // once the directory is back the same registration goes through
    std::fs::create_dir_all(&root).unwrap();
    let schema = registries
        .schemas
        .register("S", EntityType::Signal, document, None)
        .unwrap();
    assert_eq!(schema.version_number(), 1);
}

#[test]
fn test_incomplete_legacy_record_fails_open() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("configurations.json"),
        serde_json::to_string(&json!([{"_id": "old", "name": "Old", "data": {}}])).unwrap(),
    )
    .unwrap();

    let error = FileStore::open(dir.path()).err().unwrap();
    assert!(error.to_string().contains("record old"));
}
