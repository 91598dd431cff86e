//! Sync configuration.
//!
//! Settings live in `config.toml` inside the data directory. Every field is
//! optional; a missing file means all defaults. Page sizes can also be
//! overridden from the environment.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::panel::PanelLayout;
use crate::strategy::FetchLimits;

pub const DEFAULT_LIST_ENDPOINT: &str = "https://chatgpt.com/backend-api/conversations";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote list endpoint, without paging parameters.
    pub list_endpoint: String,
    /// Path marker preceding the record id in conversation links.
    pub link_marker: String,
    /// Class that tags separators owned by this engine.
    pub separator_class: String,

    pub default_limit: usize,
    pub new_chat_limit: usize,
    pub scroll_batch_size: usize,
    /// Offset ceiling for the full crawl.
    pub safety_cap: usize,

    /// How many times to look for the panel before giving up.
    pub mount_attempts: u32,
    pub mount_interval_ms: u64,

    /// Crawl the whole list (up to `safety_cap`) on every change instead of
    /// fetching one page.
    pub legacy_full_reload: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let limits = FetchLimits::default();
        let layout = PanelLayout::default();
        Self {
            list_endpoint: DEFAULT_LIST_ENDPOINT.to_string(),
            link_marker: layout.link_marker,
            separator_class: layout.separator_class,
            default_limit: limits.default_limit,
            new_chat_limit: limits.new_chat_limit,
            scroll_batch_size: limits.scroll_batch_size,
            safety_cap: limits.safety_cap,
            mount_attempts: 30,
            mount_interval_ms: 300,
            legacy_full_reload: false,
        }
    }
}

impl SyncConfig {
    /// Load from a TOML file, apply environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override page sizes from `THREADLINE_*` variables. Unparseable values
    /// are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).and_then(|v| v.trim().parse::<usize>().ok());

        if let Some(v) = read("THREADLINE_DEFAULT_LIMIT") {
            self.default_limit = v;
        }
        if let Some(v) = read("THREADLINE_NEW_CHAT_LIMIT") {
            self.new_chat_limit = v;
        }
        if let Some(v) = read("THREADLINE_SCROLL_BATCH_SIZE") {
            self.scroll_batch_size = v;
        }
        if let Some(v) = read("THREADLINE_SAFETY_CAP") {
            self.safety_cap = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("default_limit", self.default_limit),
            ("new_chat_limit", self.new_chat_limit),
            ("scroll_batch_size", self.scroll_batch_size),
            ("safety_cap", self.safety_cap),
        ] {
            if value == 0 {
                bail!("{} must be greater than zero", name);
            }
        }
        if self.link_marker.is_empty() {
            bail!("link_marker must not be empty");
        }
        if self.separator_class.is_empty() {
            bail!("separator_class must not be empty");
        }
        url::Url::parse(&self.list_endpoint)
            .with_context(|| format!("Invalid list_endpoint: {}", self.list_endpoint))?;
        Ok(())
    }

    pub fn limits(&self) -> FetchLimits {
        FetchLimits {
            default_limit: self.default_limit,
            new_chat_limit: self.new_chat_limit,
            scroll_batch_size: self.scroll_batch_size,
            safety_cap: self.safety_cap,
        }
    }

    pub fn layout(&self) -> PanelLayout {
        PanelLayout {
            link_marker: self.link_marker.clone(),
            separator_class: self.separator_class.clone(),
        }
    }

    pub fn mount_interval(&self) -> Duration {
        Duration::from_millis(self.mount_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.default_limit, 50);
        assert_eq!(config.new_chat_limit, 5);
        assert_eq!(config.scroll_batch_size, 28);
        assert_eq!(config.safety_cap, 1000);
        assert_eq!(config.mount_attempts, 30);
        assert_eq!(config.mount_interval(), Duration::from_millis(300));
        assert_eq!(config.link_marker, "/c/");
        assert!(!config.legacy_full_reload);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.list_endpoint, DEFAULT_LIST_ENDPOINT);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "list_endpoint = \"http://localhost:9000/api/list\"\nscroll_batch_size = 10\nlegacy_full_reload = true\n",
        )
        .unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.list_endpoint, "http://localhost:9000/api/list");
        assert_eq!(config.scroll_batch_size, 10);
        assert!(config.legacy_full_reload);
        assert_eq!(config.new_chat_limit, 5);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(&path, "default_limit = 0\n").unwrap();
        assert!(SyncConfig::load(&path).is_err());

        std::fs::write(&path, "list_endpoint = \"nowhere\"\n").unwrap();
        assert!(SyncConfig::load(&path).is_err());

        std::fs::write(&path, "default_limit = \"many\"\n").unwrap();
        assert!(SyncConfig::load(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("THREADLINE_DEFAULT_LIMIT", "20"),
            ("THREADLINE_SAFETY_CAP", " 400 "),
            ("THREADLINE_NEW_CHAT_LIMIT", "lots"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.default_limit, 20);
        assert_eq!(config.safety_cap, 400);
        assert_eq!(config.new_chat_limit, 5);
        assert_eq!(config.limits().scroll_batch_size, 28);
    }
}
