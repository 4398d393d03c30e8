//! Consumer-facing views over an observed scope.

use resync_core::{EventSubscriber, ResourceClient, ResourceScope, SyncError, SyncResult};
use resync_storage::{CacheEntry, Revision};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::lease::{LeaseHandle, LeaseStatus};
use crate::synchronizer::Synchronizer;

/// What a consumer binds a view to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewOptions {
    pub plugin_id: String,
    pub connection_id: String,
    /// Resource kind, e.g. `core::v1::pods`.
    pub resource_key: String,
    /// Empty means all namespaces.
    pub namespaces: Vec<String>,
    /// Extra List parameters.
    pub list_params: Map<String, Value>,
    /// Default Create parameters.
    pub create_params: Map<String, Value>,
}

impl ViewOptions {
    pub fn new(
        plugin_id: impl Into<String>,
        connection_id: impl Into<String>,
        resource_key: impl Into<String>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            connection_id: connection_id.into(),
            resource_key: resource_key.into(),
            ..Default::default()
        }
    }

    pub fn with_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_list_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.list_params.insert(key.into(), value);
        self
    }

    pub fn with_create_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.create_params.insert(key.into(), value);
        self
    }

    pub fn scope(&self) -> ResourceScope {
        ResourceScope::new(
            self.plugin_id.as_str(),
            self.connection_id.as_str(),
            self.resource_key.as_str(),
            self.namespaces.iter().map(String::as_str),
        )
    }
}

/// A consumer's read of a scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resources {
    /// Entries in the configured order; `None` until the first sync.
    pub data: Option<Vec<CacheEntry>>,
    pub error: Option<SyncError>,
    pub is_loading: bool,
    /// A created resource has not been observed yet, or events are not
    /// flowing.
    pub is_stale: bool,
    pub degraded: bool,
    pub revision: Option<Revision>,
}

impl Resources {
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids in display order.
    pub fn ids(&self) -> Vec<&str> {
        self.data
            .iter()
            .flatten()
            .map(|entry| entry.id.as_str())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&CacheEntry> {
        self.data.iter().flatten().find(|entry| entry.id == id)
    }
}

/// A [`Synchronizer`] bound to one scope and its default parameters.
///
/// The view holds one lease reference until it is closed or dropped.
pub struct ResourceView<C, E>
where
    C: ResourceClient + 'static,
    E: EventSubscriber + 'static,
{
    sync: Synchronizer<C, E>,
    handle: LeaseHandle,
    create_params: Map<String, Value>,
}

impl<C, E> std::fmt::Debug for ResourceView<C, E>
where
    C: ResourceClient + 'static,
    E: EventSubscriber + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceView")
            .field("handle", &self.handle)
            .finish()
    }
}

impl<C, E> ResourceView<C, E>
where
    C: ResourceClient + 'static,
    E: EventSubscriber + 'static,
{
    /// Bind a view and start observing without waiting.
    pub fn open(sync: &Synchronizer<C, E>, options: ViewOptions) -> Self {
        let scope = options.scope();
        let mut list_input = sync.default_list_input(&scope);
        list_input.params = options.list_params;
        let handle = sync.begin_observe(scope, list_input);
        Self {
            sync: sync.clone(),
            handle,
            create_params: options.create_params,
        }
    }

    /// Bind a view and wait for the initial sync.
    pub async fn observe(sync: &Synchronizer<C, E>, options: ViewOptions) -> SyncResult<Self> {
        let view = Self::open(sync, options);
        match view.ready().await {
            Ok(()) => Ok(view),
            Err(e) => {
                view.close();
                Err(e)
            }
        }
    }

    pub fn scope(&self) -> &ResourceScope {
        self.handle.scope()
    }

    pub fn handle(&self) -> &LeaseHandle {
        &self.handle
    }

    pub fn status(&self) -> LeaseStatus {
        self.handle.status()
    }

    pub async fn ready(&self) -> SyncResult<()> {
        self.handle.ready().await
    }

    /// Current state, sorted by the configured order.
    pub fn resources(&self) -> Resources {
        let mut resources = Resources::default();
        match self.handle.status() {
            LeaseStatus::Loading => resources.is_loading = true,
            LeaseStatus::Failed(e) => resources.error = Some(e),
            LeaseStatus::Released => {
                resources.error = Some(SyncError::Cancelled {
                    scope: self.scope().to_string(),
                })
            }
            status @ (LeaseStatus::Live | LeaseStatus::Degraded(_)) => {
                resources.degraded = matches!(status, LeaseStatus::Degraded(_));
                match self.sync.snapshot(self.scope()) {
                    Ok(Some(collection)) => {
                        resources.data = Some(collection.sorted(&self.sync.config().sort));
                        resources.revision = Some(collection.revision());
                    }
                    Ok(None) => resources.is_loading = true,
                    Err(e) => resources.error = Some(e),
                }
                resources.is_stale =
                    resources.degraded || self.sync.pending_convergence(&self.handle).is_some();
            }
        }
        resources
    }

    /// Like [`resources`](Self::resources), but re-Lists first when a
    /// created resource has not shown up within the convergence grace.
    pub async fn read(&self) -> Resources {
        let grace = self.sync.config().create_convergence_grace;
        let overdue = self
            .sync
            .pending_convergence(&self.handle)
            .is_some_and(|age| age >= grace);

        if overdue {
            debug!(scope = %self.scope(), "Created resource not observed in time, re-listing");
            if let Err(e) = self.sync.refresh(&self.handle).await {
                warn!(scope = %self.scope(), error = %e, "Refresh failed");
                let mut resources = self.resources();
                resources.error = Some(e);
                return resources;
            }
        }
        self.resources()
    }

    /// Re-run the List now.
    pub async fn refresh(&self) -> SyncResult<()> {
        self.sync.refresh(&self.handle).await
    }

    /// Create with the view's default parameters.
    pub async fn create(&self, input: Value) -> SyncResult<Value> {
        self.sync
            .create(self.scope(), self.create_params.clone(), input)
            .await
    }

    /// Create with `params` in place of the view's defaults.
    pub async fn create_with(&self, params: Map<String, Value>, input: Value) -> SyncResult<Value> {
        self.sync.create(self.scope(), params, input).await
    }

    /// Release the lease. Dropping the view does the same.
    pub fn close(self) {
        drop(self);
    }
}

impl<C, E> Drop for ResourceView<C, E>
where
    C: ResourceClient + 'static,
    E: EventSubscriber + 'static,
{
    fn drop(&mut self) {
        self.sync.release(self.handle.lease());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_options_scope() {
        let options = ViewOptions::new("k8s", "c1", "core::v1::pods")
            .with_namespaces(["web", "default"])
            .with_list_param("labelSelector", json!("app=web"))
            .with_create_param("dryRun", json!(false));

        let scope = options.scope();
        assert_eq!(scope.plugin_id(), "k8s");
        assert_eq!(scope.connection_id(), "c1");
        assert_eq!(scope.resource_kind(), "core::v1::pods");
        assert_eq!(scope.namespaces().len(), 2);
        assert_eq!(options.list_params["labelSelector"], "app=web");
        assert_eq!(options.create_params["dryRun"], false);
    }

    #[test]
    fn test_resources_accessors() {
        let resources = Resources {
            data: Some(vec![
                CacheEntry::new("a", json!({"name": "a"})),
                CacheEntry::new("b", json!({"name": "b"})),
            ]),
            ..Default::default()
        };

        assert_eq!(resources.len(), 2);
        assert_eq!(resources.ids(), vec!["a", "b"]);
        assert_eq!(resources.get("b").unwrap().payload["name"], "b");
        assert!(resources.get("c").is_none());

        let empty = Resources::default();
        assert!(empty.is_empty());
        assert!(empty.ids().is_empty());
    }
}
