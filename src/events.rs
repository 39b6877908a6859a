//! Change notifications
//!
//! Every successful create, update and delete emits one [`RegistryEvent`].
//! Delivery is fire-and-forget: a publisher failure is logged and never
//! fails the operation that produced the event.

use std::sync::mpsc::Sender;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{EntityKind, GroupId, VersionId, Versioned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    EntityCreated,
    EntityUpdated,
    EntityDeleted,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::EntityCreated => write!(f, "ENTITY_CREATED"),
            EventKind::EntityUpdated => write!(f, "ENTITY_UPDATED"),
            EventKind::EntityDeleted => write!(f, "ENTITY_DELETED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEvent {
    pub kind: EventKind,
    pub entity: EntityKind,
    pub group_id: GroupId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<VersionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_number: Option<u32>,
    /// Deleted version count for `EntityDeleted`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    pub at: DateTime<Utc>,
}

impl RegistryEvent {
    /// Event describing one concrete version
    pub fn for_version<E: Versioned>(kind: EventKind, entity: &E) -> Self {
        let meta = entity.meta();
        Self {
            kind,
            entity: E::KIND,
            group_id: meta.group_id.clone(),
            unique_id: Some(meta.unique_id.clone()),
            version_number: Some(meta.version_number),
            count: None,
            at: Utc::now(),
        }
    }

    pub fn deleted(entity: EntityKind, group_id: GroupId, count: usize) -> Self {
        Self {
            kind: EventKind::EntityDeleted,
            entity,
            group_id,
            unique_id: None,
            version_number: None,
            count: Some(count),
            at: Utc::now(),
        }
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Event channel closed")]
    Closed,

    #[error("Publisher unavailable: {0}")]
    Unavailable(String),
}

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &RegistryEvent) -> Result<(), PublishError>;
}

/// Emit through a publisher, downgrading failures to a warning
pub(crate) fn emit(publisher: &dyn EventPublisher, event: RegistryEvent) {
    if let Err(e) = publisher.publish(&event) {
        warn!(kind = %event.kind, entity = %event.entity, group_id = %event.group_id, error = %e, "Failed to publish registry event");
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: &RegistryEvent) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Writes every event to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

impl EventPublisher for LogPublisher {
    fn publish(&self, event: &RegistryEvent) -> Result<(), PublishError> {
        info!(
            kind = %event.kind,
            entity = %event.entity,
            group_id = %event.group_id,
            unique_id = ?event.unique_id.as_ref().map(VersionId::as_str),
            version = ?event.version_number,
            "Registry event"
        );
        Ok(())
    }
}

/// Forwards events into an mpsc channel
pub struct ChannelPublisher {
    sender: Mutex<Sender<RegistryEvent>>,
}

impl ChannelPublisher {
    pub fn new(sender: Sender<RegistryEvent>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl EventPublisher for ChannelPublisher {
    fn publish(&self, event: &RegistryEvent) -> Result<(), PublishError> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| PublishError::Unavailable("sender lock poisoned".into()))?;
        sender.send(event.clone()).map_err(|_| PublishError::Closed)
    }
}
