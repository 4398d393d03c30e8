//! Contracts for the external collaborators: the remote resource client
//! and the event subscription transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::{CreateError, FetchError, SubscriptionError};
use crate::identity::ResourceId;
use crate::order::SortOrder;
use crate::scope::ResourceScope;

/// Default number of resources requested per List page.
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Pagination window for a List.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Input for a bulk List.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListInput {
    /// Provider-specific parameters, e.g. `labelSelector`.
    pub params: Map<String, Value>,
    pub order: SortOrder,
    pub pagination: Pagination,
    pub namespaces: BTreeSet<String>,
}

impl ListInput {
    /// List input covering the namespaces of `scope`.
    pub fn for_scope(scope: &ResourceScope) -> Self {
        Self {
            namespaces: scope.namespaces().clone(),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.pagination.page_size = page_size;
        self
    }
}

/// Complete point-in-time snapshot returned by a List.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListResult {
    /// Resources keyed by id.
    pub result: HashMap<ResourceId, Value>,
}

impl ListResult {
    pub fn new(result: HashMap<ResourceId, Value>) -> Self {
        Self { result }
    }

    pub fn len(&self) -> usize {
        self.result.len()
    }

    pub fn is_empty(&self) -> bool {
        self.result.is_empty()
    }
}

/// Input for a Create.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateInput {
    /// Provider-specific parameters, e.g. `dryRun`.
    pub params: Map<String, Value>,
    /// The object to create.
    pub input: Value,
    pub namespaces: BTreeSet<String>,
}

impl CreateInput {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            ..Default::default()
        }
    }
}

/// Remote resource client.
///
/// Transport, retries, and authentication all live behind this trait.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fetch a complete snapshot of the scope. Never a diff.
    async fn list(&self, scope: &ResourceScope, input: &ListInput)
        -> Result<ListResult, FetchError>;

    /// Create a resource, returning its canonical representation.
    async fn create(&self, scope: &ResourceScope, input: &CreateInput)
        -> Result<Value, CreateError>;
}

#[async_trait]
impl<T: ResourceClient + ?Sized> ResourceClient for Arc<T> {
    async fn list(
        &self,
        scope: &ResourceScope,
        input: &ListInput,
    ) -> Result<ListResult, FetchError> {
        (**self).list(scope, input).await
    }

    async fn create(
        &self,
        scope: &ResourceScope,
        input: &CreateInput,
    ) -> Result<Value, CreateError> {
        (**self).create(scope, input).await
    }
}

/// Callback invoked with each raw payload delivered on a topic.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Push-event transport.
///
/// Delivery is at-least-once and ordered per topic. Both calls are
/// synchronous registrations; neither may block on I/O.
pub trait EventSubscriber: Send + Sync {
    /// Register `handler` for `topic`.
    fn subscribe(&self, topic: &str, handler: EventHandler) -> Result<(), SubscriptionError>;

    /// Remove the handler for `topic`. Unknown topics are ignored.
    fn unsubscribe(&self, topic: &str);
}

impl<T: EventSubscriber + ?Sized> EventSubscriber for Arc<T> {
    fn subscribe(&self, topic: &str, handler: EventHandler) -> Result<(), SubscriptionError> {
        (**self).subscribe(topic, handler)
    }

    fn unsubscribe(&self, topic: &str) {
        (**self).unsubscribe(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_input_defaults() {
        let input = ListInput::default();
        assert_eq!(input.pagination.page, 1);
        assert_eq!(input.pagination.page_size, 200);
        assert!(input.order.ascending);
        assert!(input.namespaces.is_empty());
    }

    #[test]
    fn test_list_input_for_scope() {
        let scope = ResourceScope::new("k8s", "c1", "pods", ["web", "default"]);
        let input = ListInput::for_scope(&scope)
            .with_param("labelSelector", json!("app=nginx"))
            .with_page_size(50);

        assert_eq!(input.namespaces.len(), 2);
        assert_eq!(input.params["labelSelector"], "app=nginx");
        assert_eq!(input.pagination.page_size, 50);
    }

    #[test]
    fn test_list_input_wire_format() {
        let value = serde_json::to_value(ListInput::default()).unwrap();
        assert_eq!(value["pagination"]["pageSize"], 200);
        assert_eq!(value["order"]["by"], "name");
        assert_eq!(value["order"]["ascending"], true);
    }

    #[test]
    fn test_create_input_new() {
        let input = CreateInput::new(json!({"metadata": {"name": "pod-1"}}));
        assert!(input.params.is_empty());
        assert_eq!(input.input["metadata"]["name"], "pod-1");
    }
}
