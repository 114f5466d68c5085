//! Runtime configuration.
//!
//! The only knob the host controls is whether pre/post snapshots are dumped.
//! It is read once from the process environment:
//!
//! ```ignore
//! CCL_DUMP_CLASS=true   # 1 | true | yes | on, case-insensitive
//! ```

use std::path::{Path, PathBuf};

/// Environment variable enabling class dumps.
pub const DUMP_CLASS_ENV: &str = "CCL_DUMP_CLASS";

/// Default dump root, relative to the working directory.
pub const DEFAULT_DUMP_DIR: &str = "ASM_CCL/REDIRECTOR";

/// Whether a raw environment value counts as enabled.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Check if an environment variable is set to a truthy value.
pub fn env_bool(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| parse_bool(&v))
        .unwrap_or(false)
}

/// Like [`env_bool`], but falls back to `default` when the variable is unset.
pub fn env_bool_or(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => parse_bool(&v),
        Err(_) => default,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectorConfig {
    /// Write `_PRE`/`_POST` snapshots of every rewritten unit
    pub dump_classes: bool,
    /// Root directory for snapshots
    pub dump_dir: PathBuf,
}

impl Default for RedirectorConfig {
    fn default() -> Self {
        Self {
            dump_classes: false,
            dump_dir: PathBuf::from(DEFAULT_DUMP_DIR),
        }
    }
}

impl RedirectorConfig {
    pub fn from_env() -> Self {
        Self {
            dump_classes: env_bool(DUMP_CLASS_ENV),
            ..Self::default()
        }
    }

    /// Let `CCL_DUMP_CLASS` override a host-chosen setting, keeping it when unset.
    pub fn with_env_overrides(self) -> Self {
        Self {
            dump_classes: env_bool_or(DUMP_CLASS_ENV, self.dump_classes),
            ..self
        }
    }

    pub fn with_dump_classes(mut self, enabled: bool) -> Self {
        self.dump_classes = enabled;
        self
    }

    pub fn with_dump_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.dump_dir = dir.as_ref().to_path_buf();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_values() {
        for yes in ["1", "true", "TRUE", "Yes", "on", " on "] {
            assert!(parse_bool(yes), "{:?}", yes);
        }
        for no in ["", "0", "false", "off", "enabled", "2"] {
            assert!(!parse_bool(no), "{:?}", no);
        }
    }

    #[test]
    fn test_env_bool_or_default_when_unset() {
        let key = "CCL_REDIRECTOR_TEST_SURELY_UNSET_FLAG";
        assert!(env_bool_or(key, true));
        assert!(!env_bool_or(key, false));
        assert!(!env_bool(key));
    }

    #[test]
    fn test_env_overrides_keep_dump_dir() {
        let config = RedirectorConfig::default()
            .with_dump_dir("/tmp/dumps")
            .with_env_overrides();
        assert_eq!(config.dump_dir, PathBuf::from("/tmp/dumps"));
        assert_eq!(config.dump_classes, env_bool_or(DUMP_CLASS_ENV, false));
    }

    #[test]
    fn test_builder_overrides() {
        let config = RedirectorConfig::default()
            .with_dump_classes(true)
            .with_dump_dir("/tmp/dumps");
        assert!(config.dump_classes);
        assert_eq!(config.dump_dir, PathBuf::from("/tmp/dumps"));
        assert_eq!(RedirectorConfig::default().dump_dir, PathBuf::from(DEFAULT_DUMP_DIR));
    }
}
