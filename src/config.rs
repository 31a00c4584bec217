//! Crate configuration, loaded from TOML or from the environment.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::storage::{FileKv, KvDriver};
use crate::Result;

/// Name of the file [`Config::kv_driver`] keeps under `storage_dir`.
pub const STORAGE_FILE: &str = "singletn.json";

pub const ENV_DEVTOOLS: &str = "SINGLETN_DEVTOOLS";
pub const ENV_STORAGE_DIR: &str = "SINGLETN_STORAGE_DIR";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Enables the inspection bridge.
    pub devtools: bool,
    /// Directory for the synchronous adapter's file store. Unset means
    /// persistent stores fall back to memory.
    pub storage_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_toml(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Reads `SINGLETN_DEVTOOLS` (`1`, `true`, `yes` or `on`, case-insensitive)
    /// and `SINGLETN_STORAGE_DIR`. Unset or empty variables keep the defaults.
    pub fn from_env() -> Self {
        let devtools = std::env::var(ENV_DEVTOOLS)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        let storage_dir = std::env::var_os(ENV_STORAGE_DIR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Self {
            devtools,
            storage_dir,
        }
    }

    /// Opens the file store under `storage_dir`.
    ///
    /// Returns `None` when no directory is configured or the store cannot be
    /// opened; the failure is logged and stores built with it stay in memory.
    pub fn kv_driver(&self) -> Option<Arc<dyn KvDriver>> {
        let dir = self.storage_dir.as_ref()?;
        match FileKv::open(dir.join(STORAGE_FILE)) {
            Ok(kv) => Some(Arc::new(kv)),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "cannot open storage, persistence disabled");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_from_toml() -> Result<()> {
        let config = Config::from_toml(
            r#"
            devtools = true
            storage_dir = "/tmp/singletn"
            "#,
        )?;

        assert!(config.devtools);
        assert_eq!(config.storage_dir, Some(PathBuf::from("/tmp/singletn")));
        Ok(())
    }

    #[test]
    fn test_from_toml_defaults() -> Result<()> {
        assert_eq!(Config::from_toml("")?, Config::default());
        Ok(())
    }

    #[test]
    fn test_from_toml_rejects_wrong_types() {
        let result = Config::from_toml("devtools = \"maybe\"");
        assert!(matches!(result, Err(crate::SingletnError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var(ENV_DEVTOOLS, "TRUE");
        std::env::set_var(ENV_STORAGE_DIR, "/var/lib/app");

        let config = Config::from_env();

        std::env::remove_var(ENV_DEVTOOLS);
        std::env::remove_var(ENV_STORAGE_DIR);

        assert!(config.devtools);
        assert_eq!(config.storage_dir, Some(PathBuf::from("/var/lib/app")));
    }

    #[test]
    #[serial]
    fn test_from_env_unset() {
        std::env::remove_var(ENV_DEVTOOLS);
        std::env::remove_var(ENV_STORAGE_DIR);

        assert_eq!(Config::from_env(), Config::default());
    }

    #[test]
    fn test_kv_driver_needs_storage_dir() {
        assert!(Config::default().kv_driver().is_none());
    }

    #[test]
    fn test_kv_driver_opens_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            devtools: false,
            storage_dir: Some(dir.path().to_path_buf()),
        };

        let kv = config.kv_driver().unwrap();
        kv.set_item("k", "\"v\"").unwrap();

        assert!(dir.path().join(STORAGE_FILE).exists());
    }
}
