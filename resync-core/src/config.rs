//! Synchronizer configuration.
//!
//! Loadable from TOML (durations in milliseconds) or built in code with the
//! `with_*` methods.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::client::DEFAULT_PAGE_SIZE;
use crate::error::ConfigError;
use crate::order::SortOrder;

/// Configuration for the synchronizer and its consumer views.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Upper bound on a single List round-trip.
    pub list_timeout: Duration,
    /// Upper bound on a single Create round-trip.
    pub create_timeout: Duration,
    /// Page size used for default List inputs.
    pub page_size: u32,
    /// Consumer-facing order.
    pub sort: SortOrder,
    /// How long a view waits for the ADD event of a created resource
    /// before re-listing on the next read.
    pub create_convergence_grace: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            list_timeout: Duration::from_secs(30),
            create_timeout: Duration::from_secs(30),
            page_size: DEFAULT_PAGE_SIZE,
            sort: SortOrder::default(),
            create_convergence_grace: Duration::from_secs(2),
        }
    }
}

/// On-disk representation. Every field is optional and falls back to the default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawSyncConfig {
    list_timeout_ms: Option<u64>,
    create_timeout_ms: Option<u64>,
    page_size: Option<u32>,
    sort: Option<SortOrder>,
    create_convergence_grace_ms: Option<u64>,
}

impl SyncConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawSyncConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;

        let defaults = Self::default();
        let config = Self {
            list_timeout: raw
                .list_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.list_timeout),
            create_timeout: raw
                .create_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.create_timeout),
            page_size: raw.page_size.unwrap_or(defaults.page_size),
            sort: raw.sort.unwrap_or(defaults.sort),
            create_convergence_grace: raw
                .create_convergence_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.create_convergence_grace),
        };
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.list_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "list_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.create_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "create_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "page_size",
                reason: "must be > 0".to_string(),
            });
        }
        if let crate::order::SortKey::Field(pointer) = &self.sort.by {
            if !pointer.starts_with('/') {
                return Err(ConfigError::InvalidValue {
                    field: "sort.by.field",
                    reason: format!("JSON pointer must start with '/': {}", pointer),
                });
            }
        }
        Ok(())
    }

    /// Set the List timeout.
    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    /// Set the Create timeout.
    pub fn with_create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self
    }

    /// Set the default page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the consumer-facing order.
    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    /// Set the create convergence grace period.
    pub fn with_convergence_grace(mut self, grace: Duration) -> Self {
        self.create_convergence_grace = grace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::SortKey;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.list_timeout, Duration::from_secs(30));
        assert_eq!(config.page_size, 200);
        assert_eq!(config.sort, SortOrder::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SyncConfig::new()
            .with_list_timeout(Duration::from_millis(250))
            .with_create_timeout(Duration::from_millis(500))
            .with_page_size(50)
            .with_sort(SortOrder::new(SortKey::Id, false))
            .with_convergence_grace(Duration::from_millis(10));

        assert_eq!(config.list_timeout, Duration::from_millis(250));
        assert_eq!(config.create_timeout, Duration::from_millis(500));
        assert_eq!(config.page_size, 50);
        assert_eq!(config.sort.by, SortKey::Id);
        assert_eq!(config.create_convergence_grace, Duration::from_millis(10));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = SyncConfig::from_toml_str(
            r#"
            list_timeout_ms = 5000
            page_size = 100

            [sort]
            by = { field = "/metadata/creationTimestamp" }
            ascending = false
            "#,
        )
        .unwrap();

        assert_eq!(config.list_timeout, Duration::from_secs(5));
        assert_eq!(config.create_timeout, Duration::from_secs(30));
        assert_eq!(config.page_size, 100);
        assert_eq!(
            config.sort.by,
            SortKey::Field("/metadata/creationTimestamp".to_string())
        );
        assert!(!config.sort.ascending);
    }

    #[test]
    fn test_from_toml_rejects_unknown_fields() {
        let err = SyncConfig::from_toml_str("retries = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let err = SyncConfig::from_toml_str("page_size = 0").unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                field: "page_size",
                reason: "must be > 0".to_string()
            }
        );

        let err = SyncConfig::default()
            .with_list_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "list_timeout_ms", .. }));
    }

    #[test]
    fn test_validate_rejects_bad_pointer() {
        let err = SyncConfig::default()
            .with_sort(SortOrder::new(SortKey::Field("status.phase".to_string()), true))
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "sort.by.field", .. }));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "create_convergence_grace_ms = 750").unwrap();

        let config = SyncConfig::from_path(file.path()).unwrap();
        assert_eq!(config.create_convergence_grace, Duration::from_millis(750));

        let err = SyncConfig::from_path(Path::new("/nonexistent/resync.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
