pub mod buckets;
pub mod sync;
pub mod token;

use anyhow::Result;
use threadline_core::{CredentialProvider, ThreadlinePaths};

/// Credential provider over the default data directory.
fn credentials(paths: &ThreadlinePaths) -> Result<CredentialProvider> {
    paths.ensure_dirs()?;
    CredentialProvider::load(&paths.storage_path)
}
