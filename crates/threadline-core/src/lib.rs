//! Threadline core: keeps a local index of remote conversations in step with
//! a list panel and regroups that panel under date separators.
//!
//! - [`remote`]: paginated reads of the conversation list
//! - [`index`]: session-lifetime record index
//! - [`strategy`]: which page to fetch for a given panel change
//! - [`grouping`]: date buckets and separator reconciliation
//! - [`panel`] / [`feed`]: the panel abstraction and its change notifications
//! - [`sync`]: the controller tying one cycle together

use std::path::PathBuf;

use anyhow::Result;

pub mod config;
pub mod feed;
pub mod grouping;
pub mod index;
pub mod panel;
pub mod record;
pub mod remote;
pub mod strategy;
pub mod sync;

pub use config::SyncConfig;
pub use feed::{change_feed, ChangeFeed, ChangeNotifier};
pub use grouping::{element_key, reconcile, DateBucket, ReconcileReport};
pub use index::{LocalIndex, MergeStats};
pub use panel::{Anchor, MemoryPanel, NodeId, Panel, PanelLayout, PanelNode};
pub use record::Record;
pub use remote::{ConversationClient, Page, RemoteError};
pub use strategy::{FetchIntent, FetchLimits, FetchPlan, FetchStrategy};
pub use sync::{CycleReport, SessionContext, SyncController};

pub use threadline_auth::{CaptureSource, Credential, CredentialProvider, CredentialWatch};

#[derive(Debug, Clone)]
pub struct ThreadlinePaths {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    /// Key/value storage holding the captured credential.
    pub storage_path: PathBuf,
}

impl ThreadlinePaths {
    pub fn from_env() -> Self {
        if let Some(dir) = std::env::var_os("THREADLINE_DATA_DIR") {
            return Self::from_base(PathBuf::from(dir));
        }
        if let Some(home) = std::env::var_os("HOME") {
            return Self::from_base(PathBuf::from(home).join(".threadline"));
        }
        Self::from_base(PathBuf::from(".threadline"))
    }

    pub fn from_base(base_dir: PathBuf) -> Self {
        let config_path = base_dir.join("config.toml");
        let storage_path = base_dir.join("storage.json");
        Self {
            base_dir,
            config_path,
            storage_path,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }
}
