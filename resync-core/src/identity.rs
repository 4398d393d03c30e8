//! Resource identity extraction.
//!
//! Resource payloads are opaque JSON owned by their resource kind. The only
//! thing this layer needs from them is a stable id, found by trying an
//! ordered list of accessor strategies until one yields a non-empty value.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Resource identifier, unique within a scope.
pub type ResourceId = String;

/// Accessor function used by [`IdStrategy::Custom`].
pub type IdAccessor = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// Default id fields, in priority order.
pub const DEFAULT_ID_FIELDS: [&str; 5] = ["metadata.name", "id", "name", "ID", "Name"];

/// Fields probed for a human-readable name when sorting.
pub const NAME_FIELDS: [&str; 3] = ["metadata.name", "name", "Name"];

/// One way of pulling an id out of a payload.
#[derive(Clone)]
pub enum IdStrategy {
    /// A JSON pointer (`/metadata/name`) into the payload.
    Pointer(String),
    /// Arbitrary accessor registered by a resource kind.
    Custom { name: String, accessor: IdAccessor },
}

impl IdStrategy {
    /// Strategy reading a dotted field path such as `metadata.name`.
    pub fn field(path: &str) -> Self {
        let pointer = path
            .split('.')
            .map(|segment| segment.replace('~', "~0").replace('/', "~1"))
            .fold(String::new(), |mut acc, segment| {
                acc.push('/');
                acc.push_str(&segment);
                acc
            });
        Self::Pointer(pointer)
    }

    /// Strategy backed by a custom accessor.
    pub fn custom<F>(name: impl Into<String>, accessor: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        Self::Custom {
            name: name.into(),
            accessor: Arc::new(accessor),
        }
    }

    /// Apply this strategy. Empty strings count as absent.
    pub fn extract(&self, payload: &Value) -> Option<ResourceId> {
        let found = match self {
            Self::Pointer(pointer) => payload.pointer(pointer).and_then(scalar_to_id),
            Self::Custom { accessor, .. } => accessor(payload),
        };
        found.filter(|id| !id.is_empty())
    }
}

impl fmt::Debug for IdStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pointer(pointer) => f.debug_tuple("Pointer").field(pointer).finish(),
            Self::Custom { name, .. } => f.debug_struct("Custom").field("name", name).finish(),
        }
    }
}

fn scalar_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Ordered chain of id strategies; the first match wins.
#[derive(Debug, Clone)]
pub struct IdExtractor {
    strategies: Vec<IdStrategy>,
}

impl Default for IdExtractor {
    fn default() -> Self {
        Self::from_fields(&DEFAULT_ID_FIELDS)
    }
}

impl IdExtractor {
    pub fn new(strategies: Vec<IdStrategy>) -> Self {
        Self { strategies }
    }

    /// Build a chain of dotted field paths.
    pub fn from_fields(fields: &[&str]) -> Self {
        Self::new(fields.iter().map(|f| IdStrategy::field(f)).collect())
    }

    /// Put a strategy in front of the chain.
    pub fn with_first(mut self, strategy: IdStrategy) -> Self {
        self.strategies.insert(0, strategy);
        self
    }

    /// Append a strategy to the end of the chain.
    pub fn with_last(mut self, strategy: IdStrategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn strategies(&self) -> &[IdStrategy] {
        &self.strategies
    }

    /// Try each strategy in order.
    pub fn extract(&self, payload: &Value) -> Option<ResourceId> {
        self.strategies.iter().find_map(|s| s.extract(payload))
    }
}

/// Per-resource-kind id extractors with a shared default.
#[derive(Debug, Clone, Default)]
pub struct IdExtractorRegistry {
    default: IdExtractor,
    by_kind: HashMap<String, IdExtractor>,
}

impl IdExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the extractor used for `resource_kind`, replacing any previous one.
    pub fn register(&mut self, resource_kind: impl Into<String>, extractor: IdExtractor) {
        self.by_kind.insert(resource_kind.into(), extractor);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_kind(mut self, resource_kind: impl Into<String>, extractor: IdExtractor) -> Self {
        self.register(resource_kind, extractor);
        self
    }

    pub fn for_kind(&self, resource_kind: &str) -> &IdExtractor {
        self.by_kind.get(resource_kind).unwrap_or(&self.default)
    }

    pub fn extract(&self, resource_kind: &str, payload: &Value) -> Option<ResourceId> {
        self.for_kind(resource_kind).extract(payload)
    }
}

/// Best-effort display name used for ordering.
pub fn display_name(payload: &Value) -> Option<String> {
    NAME_FIELDS
        .iter()
        .find_map(|field| IdStrategy::field(field).extract(payload))
}
