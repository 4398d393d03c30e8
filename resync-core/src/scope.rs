//! Resource scopes: the partition key for cached collections.
//!
//! A [`ResourceScope`] names one live collection: a plugin, a connection
//! owned by that plugin, a resource kind, and an optional namespace filter.
//! The private inner struct means a scope can only be built through
//! [`ResourceScope::new`], which normalizes the namespace filter into a
//! sorted set so two scopes naming the same namespaces in a different
//! order compare (and hash) equal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::event::EventKind;

/// Separator between the segments of a topic name.
const TOPIC_SEPARATOR: char = '/';

/// Immutable identity of a cached resource collection.
///
/// # Topic Format
///
/// Every scope derives exactly three event topics:
///
/// ```text
/// {plugin_id}/{connection_id}/{resource_kind}/ADD
/// {plugin_id}/{connection_id}/{resource_kind}/UPDATE
/// {plugin_id}/{connection_id}/{resource_kind}/DELETE
/// ```
///
/// The namespace filter is NOT part of the topic: the event stream is
/// per kind, and namespace filtering happens when events are applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceScope {
    inner: ScopeInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
struct ScopeInner {
    plugin_id: String,
    connection_id: String,
    resource_kind: String,
    namespaces: BTreeSet<String>,
}

impl ResourceScope {
    /// Create a new scope.
    ///
    /// An empty namespace iterator means "all namespaces". Empty namespace
    /// strings are ignored, duplicates collapse.
    pub fn new<I, S>(
        plugin_id: impl Into<String>,
        connection_id: impl Into<String>,
        resource_kind: impl Into<String>,
        namespaces: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let namespaces = namespaces
            .into_iter()
            .map(Into::into)
            .filter(|ns: &String| !ns.is_empty())
            .collect();

        Self {
            inner: ScopeInner {
                plugin_id: plugin_id.into(),
                connection_id: connection_id.into(),
                resource_kind: resource_kind.into(),
                namespaces,
            },
        }
    }

    /// Create a scope spanning all namespaces.
    pub fn all_namespaces(
        plugin_id: impl Into<String>,
        connection_id: impl Into<String>,
        resource_kind: impl Into<String>,
    ) -> Self {
        Self::new(plugin_id, connection_id, resource_kind, Vec::<String>::new())
    }

    pub fn plugin_id(&self) -> &str {
        &self.inner.plugin_id
    }

    pub fn connection_id(&self) -> &str {
        &self.inner.connection_id
    }

    /// The resource kind, e.g. `core::v1::pods`.
    pub fn resource_kind(&self) -> &str {
        &self.inner.resource_kind
    }

    /// The namespace filter, sorted. Empty means all namespaces.
    pub fn namespaces(&self) -> &BTreeSet<String> {
        &self.inner.namespaces
    }

    /// Returns true if the scope spans every namespace.
    pub fn is_all_namespaces(&self) -> bool {
        self.inner.namespaces.is_empty()
    }

    /// Check whether an object living in `namespace` belongs to this scope.
    ///
    /// Cluster-scoped objects (empty namespace) always belong.
    pub fn contains_namespace(&self, namespace: &str) -> bool {
        namespace.is_empty()
            || self.inner.namespaces.is_empty()
            || self.inner.namespaces.contains(namespace)
    }

    /// Topic prefix shared by the three event topics of this scope.
    pub fn topic_prefix(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.inner.plugin_id,
            self.inner.connection_id,
            self.inner.resource_kind,
            sep = TOPIC_SEPARATOR
        )
    }

    /// Topic name carrying events of the given kind.
    pub fn topic(&self, kind: EventKind) -> String {
        format!("{}{}{}", self.topic_prefix(), TOPIC_SEPARATOR, kind.as_str())
    }

    /// All three topics, in ADD, UPDATE, DELETE order.
    pub fn topics(&self) -> [(EventKind, String); 3] {
        EventKind::ALL.map(|kind| (kind, self.topic(kind)))
    }
}

impl fmt::Display for ResourceScope {
    /// Canonical form: `plugin/connection/kind[ns1,ns2]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.topic_prefix())?;
        if !self.inner.namespaces.is_empty() {
            let joined: Vec<&str> = self.inner.namespaces.iter().map(String::as_str).collect();
            write!(f, "[{}]", joined.join(","))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pods(namespaces: &[&str]) -> ResourceScope {
        ResourceScope::new("k8s", "c1", "core::v1::pods", namespaces.iter().copied())
    }

    #[test]
    fn test_new_and_getters() {
        let scope = pods(&["default"]);

        assert_eq!(scope.plugin_id(), "k8s");
        assert_eq!(scope.connection_id(), "c1");
        assert_eq!(scope.resource_kind(), "core::v1::pods");
        assert!(scope.namespaces().contains("default"));
        assert!(!scope.is_all_namespaces());
    }

    #[test]
    fn test_namespace_order_does_not_matter() {
        assert_eq!(pods(&["a", "b"]), pods(&["b", "a"]));
        assert_eq!(pods(&["a", "a", "b"]), pods(&["b", "a"]));
    }

    #[test]
    fn test_empty_namespace_strings_are_ignored() {
        assert_eq!(pods(&[""]), pods(&[]));
        assert!(pods(&[""]).is_all_namespaces());
    }

    #[test]
    fn test_different_fields_different_scopes() {
        let base = pods(&[]);
        assert_ne!(base, ResourceScope::all_namespaces("k8s", "c2", "core::v1::pods"));
        assert_ne!(base, ResourceScope::all_namespaces("aws", "c1", "core::v1::pods"));
        assert_ne!(base, ResourceScope::all_namespaces("k8s", "c1", "apps::v1::deployments"));
        assert_ne!(base, pods(&["default"]));
    }

    #[test]
    fn test_topics() {
        let scope = pods(&["default"]);
        let topics = scope.topics();

        assert_eq!(topics[0].1, "k8s/c1/core::v1::pods/ADD");
        assert_eq!(topics[1].1, "k8s/c1/core::v1::pods/UPDATE");
        assert_eq!(topics[2].1, "k8s/c1/core::v1::pods/DELETE");
        assert_eq!(scope.topic(EventKind::Delete), topics[2].1);
    }

    #[test]
    fn test_contains_namespace() {
        let all = pods(&[]);
        assert!(all.contains_namespace("kube-system"));
        assert!(all.contains_namespace(""));

        let filtered = pods(&["default", "web"]);
        assert!(filtered.contains_namespace("web"));
        assert!(filtered.contains_namespace(""));
        assert!(!filtered.contains_namespace("kube-system"));
    }

    #[test]
    fn test_display() {
        assert_eq!(pods(&[]).to_string(), "k8s/c1/core::v1::pods");
        assert_eq!(pods(&["web", "default"]).to_string(), "k8s/c1/core::v1::pods[default,web]");
    }
}
