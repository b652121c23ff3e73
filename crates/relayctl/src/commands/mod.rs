pub mod route;
pub mod simulate;
pub mod validate;

use anyhow::{Context, Result};
use relay_core::ResourceManager;
use std::path::Path;

/// Load a resource directory, with the path in the error
pub(crate) fn load_resources(dir: &Path) -> Result<ResourceManager> {
    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }
    let mut manager = ResourceManager::new();
    manager
        .load_directory(dir)
        .with_context(|| format!("Failed to load resources from {}", dir.display()))?;
    Ok(manager)
}
