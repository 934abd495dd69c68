//! Plan artifact storage between the plan and apply phases.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

/// Keeps plan files under storage keys.
pub trait PlanStorage {
    fn plan_exists(&self, key: &str) -> Result<bool>;
    fn delete_stored_plan(&self, key: &str) -> Result<()>;
    /// Upload the plan at `local` under `key`.
    fn store_plan(&self, local: &Path, key: &str) -> Result<()>;
    /// Download `key` to `local`; `None` when nothing is stored.
    fn retrieve_plan(&self, local: &Path, key: &str) -> Result<Option<PathBuf>>;
}

/// Stores plans as files under a root directory (`<root>/<key>`).
#[derive(Debug, Clone)]
pub struct FsPlanStorage {
    root: PathBuf,
}

impl FsPlanStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn stored_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(anyhow!("invalid storage key {key:?}"));
        }
        Ok(self.root.join(relative))
    }
}

impl PlanStorage for FsPlanStorage {
    fn plan_exists(&self, key: &str) -> Result<bool> {
        Ok(self.stored_path(key)?.is_file())
    }

    fn delete_stored_plan(&self, key: &str) -> Result<()> {
        let path = self.stored_path(key)?;
        debug!(path = %path.display(), "deleting stored plan");
        fs::remove_file(&path).with_context(|| format!("delete stored plan {}", path.display()))
    }

    fn store_plan(&self, local: &Path, key: &str) -> Result<()> {
        let path = self.stored_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create plan store dir {}", parent.display()))?;
        }
        debug!(from = %local.display(), to = %path.display(), "storing plan");
        fs::copy(local, &path).with_context(|| {
            format!("copy plan {} to {}", local.display(), path.display())
        })?;
        Ok(())
    }

    fn retrieve_plan(&self, local: &Path, key: &str) -> Result<Option<PathBuf>> {
        let path = self.stored_path(key)?;
        if !path.is_file() {
            debug!(key, "no stored plan");
            return Ok(None);
        }
        if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create plan dir {}", parent.display()))?;
        }
        fs::copy(&path, local).with_context(|| {
            format!("copy plan {} to {}", path.display(), local.display())
        })?;
        Ok(Some(local.to_path_buf()))
    }
}
