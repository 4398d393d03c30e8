//! Informer event types.
//!
//! Providers push one payload per change onto three topics per scope. The
//! wire shapes below are what providers emit; [`ResourceEvent::decode`]
//! turns them into a single typed change with a resolved id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::EventError;
use crate::identity::{IdExtractor, ResourceId};
use crate::scope::ResourceScope;

/// The three informer actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Add,
    Update,
    Delete,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Add, EventKind::Update, EventKind::Delete];

    /// Topic suffix for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload published on the ADD topic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddPayload {
    pub data: Value,
    pub key: String,
    pub connection: String,
    pub id: String,
    pub namespace: String,
}

/// Payload published on the UPDATE topic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdatePayload {
    pub old_data: Value,
    pub new_data: Value,
    pub key: String,
    pub connection: String,
    pub id: String,
    pub namespace: String,
}

/// Payload published on the DELETE topic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeletePayload {
    pub data: Value,
    pub key: String,
    pub connection: String,
    pub id: String,
    pub namespace: String,
}

/// Where an event claims to come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventOrigin {
    /// Resource kind the provider reported, may be empty.
    pub key: String,
    /// Connection the provider reported, may be empty.
    pub connection: String,
    /// Namespace of the object, empty for cluster-scoped objects.
    pub namespace: String,
}

impl EventOrigin {
    /// Check the origin against a scope. Empty fields are not checked.
    pub fn belongs_to(&self, scope: &ResourceScope) -> bool {
        (self.connection.is_empty() || self.connection == scope.connection_id())
            && (self.key.is_empty() || self.key == scope.resource_kind())
            && scope.contains_namespace(&self.namespace)
    }
}

/// The change carried by an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Added { id: ResourceId, data: Value },
    Updated { id: ResourceId, data: Value },
    Deleted { id: ResourceId },
}

impl Change {
    pub fn id(&self) -> &str {
        match self {
            Self::Added { id, .. } | Self::Updated { id, .. } | Self::Deleted { id } => id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Added { .. } => EventKind::Add,
            Self::Updated { .. } => EventKind::Update,
            Self::Deleted { .. } => EventKind::Delete,
        }
    }
}

/// A decoded informer event.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEvent {
    pub origin: EventOrigin,
    pub change: Change,
}

impl ResourceEvent {
    pub fn added(id: impl Into<String>, data: Value) -> Self {
        Self {
            origin: EventOrigin::default(),
            change: Change::Added {
                id: id.into(),
                data,
            },
        }
    }

    pub fn updated(id: impl Into<String>, data: Value) -> Self {
        Self {
            origin: EventOrigin::default(),
            change: Change::Updated {
                id: id.into(),
                data,
            },
        }
    }

    pub fn deleted(id: impl Into<String>) -> Self {
        Self {
            origin: EventOrigin::default(),
            change: Change::Deleted { id: id.into() },
        }
    }

    pub fn id(&self) -> &str {
        self.change.id()
    }

    pub fn kind(&self) -> EventKind {
        self.change.kind()
    }

    /// Decode a raw topic payload.
    ///
    /// The explicit `id` field wins; when it is missing or empty the id is
    /// extracted from the object itself (`data`, or `newData` for updates).
    pub fn decode(kind: EventKind, raw: Value, ids: &IdExtractor) -> Result<Self, EventError> {
        let malformed = |e: serde_json::Error| EventError::MalformedPayload {
            kind: kind.to_string(),
            reason: e.to_string(),
        };
        if !raw.is_object() {
            return Err(EventError::MalformedPayload {
                kind: kind.to_string(),
                reason: "payload is not an object".to_string(),
            });
        }

        let event = match kind {
            EventKind::Add => {
                let p: AddPayload = serde_json::from_value(raw).map_err(malformed)?;
                let id = resolve_id(kind, p.id, &p.data, ids)?;
                Self {
                    origin: EventOrigin {
                        key: p.key,
                        connection: p.connection,
                        namespace: p.namespace,
                    },
                    change: Change::Added { id, data: p.data },
                }
            }
            EventKind::Update => {
                let p: UpdatePayload = serde_json::from_value(raw).map_err(malformed)?;
                let id = resolve_id(kind, p.id, &p.new_data, ids)?;
                Self {
                    origin: EventOrigin {
                        key: p.key,
                        connection: p.connection,
                        namespace: p.namespace,
                    },
                    change: Change::Updated {
                        id,
                        data: p.new_data,
                    },
                }
            }
            EventKind::Delete => {
                let p: DeletePayload = serde_json::from_value(raw).map_err(malformed)?;
                let id = resolve_id(kind, p.id, &p.data, ids)?;
                Self {
                    origin: EventOrigin {
                        key: p.key,
                        connection: p.connection,
                        namespace: p.namespace,
                    },
                    change: Change::Deleted { id },
                }
            }
        };
        Ok(event)
    }
}

fn resolve_id(
    kind: EventKind,
    explicit: String,
    object: &Value,
    ids: &IdExtractor,
) -> Result<ResourceId, EventError> {
    if !explicit.is_empty() {
        return Ok(explicit);
    }
    ids.extract(object).ok_or_else(|| EventError::MissingId {
        kind: kind.to_string(),
    })
}
