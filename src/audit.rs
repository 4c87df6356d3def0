use std::fmt;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::auth::Actor;
use crate::model::Ms;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Cancel,
    StatusChange,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Cancel => "cancel",
            AuditAction::StatusChange => "status_change",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Vehicle,
    Extra,
    Reservation,
    Review,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Vehicle => "vehicle",
            EntityType::Extra => "extra",
            EntityType::Reservation => "reservation",
            EntityType::Review => "review",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub at: Ms,
    pub actor_id: String,
    pub actor_name: String,
    pub action: AuditAction,
    pub entity: EntityType,
    pub entity_id: String,
    pub details: serde_json::Value,
}

impl AuditEntry {
    /// An actor with a blank name is recorded as `system`.
    pub fn new(
        actor: &Actor,
        action: AuditAction,
        entity: EntityType,
        entity_id: impl fmt::Display,
        details: serde_json::Value,
    ) -> Self {
        let (actor_id, actor_name) = if actor.name.trim().is_empty() {
            ("system".to_string(), "system".to_string())
        } else {
            (actor.id.clone(), actor.name.clone())
        };
        Self {
            at: crate::engine::now_ms(),
            actor_id,
            actor_name,
            action,
            entity,
            entity_id: entity_id.to_string(),
            details,
        }
    }
}

/// Fire-and-forget fan-out of audit entries. Publishing never blocks and
/// never fails the operation that produced the entry.
pub struct AuditHub {
    sender: broadcast::Sender<AuditEntry>,
}

impl AuditHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditEntry> {
        self.sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn record(&self, entry: AuditEntry) {
        let _ = self.sender.send(entry);
    }
}

impl Default for AuditHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain the hub into the log. Entries are not persisted anywhere else.
pub async fn run_audit_logger(mut rx: broadcast::Receiver<AuditEntry>) {
    loop {
        match rx.recv().await {
            Ok(entry) => info!(
                target: "audit",
                actor_id = %entry.actor_id,
                actor_name = %entry.actor_name,
                action = entry.action.as_str(),
                entity = entry.entity.as_str(),
                entity_id = %entry.entity_id,
                details = %entry.details,
                "audit"
            ),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(target: "audit", missed, "audit logger lagged, entries dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
