//! Storage host configuration from environment variables
//!
//! Selects the host backend and where the per-origin sandbox lives. The file
//! name and payload written by the workflow are fixed and not configurable.

use std::env;
use std::path::PathBuf;

/// Which storage host backs the workflow
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Sandbox directories on the local file system
    Disk,
    /// Process-local host; nothing survives the run
    Memory,
}

#[derive(Clone, Debug)]
pub struct DraftConfig {
    pub backend: Backend,
    /// Base directory holding one sandbox per origin
    pub storage_dir: PathBuf,
    /// Origin the sandbox is scoped to
    pub origin: String,
    /// Byte ceiling for the origin's committed content
    pub quota_bytes: Option<u64>,
    /// When false the host refuses to map a storage root
    pub storage_enabled: bool,
}

impl DraftConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `DRAFT_BACKEND`: "disk" (default) or "memory"
    /// - `DRAFT_STORAGE_DIR`: sandbox base directory (default `./opfs`)
    /// - `DRAFT_ORIGIN`: origin the sandbox belongs to (default `http://localhost`)
    /// - `DRAFT_QUOTA_BYTES`: optional quota in bytes
    /// - `DRAFT_STORAGE_ENABLED`: "false" simulates a context without storage access
    ///
    /// A `.env` file in the working directory is loaded first when present.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let backend = match lookup("DRAFT_BACKEND")
            .map(|value| value.trim().to_lowercase())
            .as_deref()
        {
            None | Some("") | Some("disk") => Backend::Disk,
            Some("memory") => Backend::Memory,
            Some(other) => {
                log::warn!("Unknown backend '{}', defaulting to disk", other);
                Backend::Disk
            }
        };

        let storage_dir = lookup("DRAFT_STORAGE_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_dir);

        let origin = lookup("DRAFT_ORIGIN")
            .filter(|origin| !origin.trim().is_empty())
            .unwrap_or(defaults.origin);

        let quota_bytes =
            lookup("DRAFT_QUOTA_BYTES").and_then(|raw| match raw.trim().parse::<u64>() {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    log::warn!("Ignoring DRAFT_QUOTA_BYTES '{}': {}", raw, err);
                    None
                }
            });

        let storage_enabled = match lookup("DRAFT_STORAGE_ENABLED")
            .map(|value| value.trim().to_lowercase())
            .as_deref()
        {
            None | Some("") | Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            Some(other) => {
                log::warn!(
                    "Unknown DRAFT_STORAGE_ENABLED '{}', keeping storage enabled",
                    other
                );
                true
            }
        };

        log::debug!(
            "Storage backend {:?} at {} for origin {}",
            backend,
            storage_dir.display(),
            origin
        );

        Self {
            backend,
            storage_dir,
            origin,
            quota_bytes,
            storage_enabled,
        }
    }
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Disk,
            storage_dir: PathBuf::from("./opfs"),
            origin: "http://localhost".to_string(),
            quota_bytes: None,
            storage_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = DraftConfig::from_lookup(|_| None);
        assert_eq!(config.backend, Backend::Disk);
        assert_eq!(config.storage_dir, PathBuf::from("./opfs"));
        assert_eq!(config.origin, "http://localhost");
        assert_eq!(config.quota_bytes, None);
        assert!(config.storage_enabled);
    }

    #[test]
    fn test_overrides() {
        let config = DraftConfig::from_lookup(lookup_from(&[
            ("DRAFT_BACKEND", "Memory"),
            ("DRAFT_STORAGE_DIR", "/var/lib/drafts"),
            ("DRAFT_ORIGIN", "https://example.com"),
            ("DRAFT_QUOTA_BYTES", "1024"),
            ("DRAFT_STORAGE_ENABLED", "false"),
        ]));
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.storage_dir, PathBuf::from("/var/lib/drafts"));
        assert_eq!(config.origin, "https://example.com");
        assert_eq!(config.quota_bytes, Some(1024));
        assert!(!config.storage_enabled);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = DraftConfig::from_lookup(lookup_from(&[
            ("DRAFT_BACKEND", "tape"),
            ("DRAFT_QUOTA_BYTES", "lots"),
            ("DRAFT_STORAGE_ENABLED", "maybe"),
        ]));
        assert_eq!(config.backend, Backend::Disk);
        assert_eq!(config.quota_bytes, None);
        assert!(config.storage_enabled);
    }
}
