//! Project lock abstraction and a lock-file implementation.
//!
//! The lock file adapter is meant for a single machine or a shared
//! filesystem. It has no leases: a lock stays held until its holder (or an
//! operator via `force_unlock`) removes it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::project::ProjectIdentity;

/// Per-project mutual exclusion.
pub trait ProjectLock {
    /// Try to take the lock. `Ok(false)` means another party holds it.
    fn lock(&self) -> Result<bool>;
    /// Release the lock regardless of who holds it.
    fn force_unlock(&self) -> Result<()>;
    fn lock_id(&self) -> String;
}

/// Contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub lock_id: String,
    pub holder: String,
    pub acquired_at_epoch_ms: u64,
}

/// Lock held as `<dir>/<namespace>#<name>.lock`, both parts escaped by
/// [`lock_file_name`].
///
/// The same holder may re-acquire its own lock, so a plan and a later apply
/// from one pipeline run do not block each other.
#[derive(Debug, Clone)]
pub struct FileProjectLock {
    path: PathBuf,
    lock_id: String,
    holder: String,
}

impl FileProjectLock {
    pub fn new(dir: &Path, project: &ProjectIdentity, holder: impl Into<String>) -> Self {
        Self {
            path: dir.join(lock_file_name(project)),
            lock_id: project.label(),
            holder: holder.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lock record, if any.
    pub fn current(&self) -> Result<Option<LockRecord>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("read lock {}", self.path.display()));
            }
        };
        let record = serde_json::from_str(&contents)
            .with_context(|| format!("parse lock {}", self.path.display()))?;
        Ok(Some(record))
    }

    /// Write the record to a holder-specific temp file, then hard-link it into
    /// place. The link fails if the lock file exists, so readers never see a
    /// partially written lock.
    fn try_create(&self) -> Result<bool> {
        let parent = self
            .path
            .parent()
            .with_context(|| format!("lock path missing parent {}", self.path.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("create lock dir {}", parent.display()))?;

        let record = LockRecord {
            lock_id: self.lock_id.clone(),
            holder: self.holder.clone(),
            acquired_at_epoch_ms: now_epoch_ms()?,
        };
        let mut buf = serde_json::to_string_pretty(&record).context("serialize lock record")?;
        buf.push('\n');

        let tmp_path = self
            .path
            .with_extension(format!("lock.{}.tmp", std::process::id()));
        fs::write(&tmp_path, buf)
            .with_context(|| format!("write temp lock {}", tmp_path.display()))?;
        let linked = fs::hard_link(&tmp_path, &self.path);
        let _ = fs::remove_file(&tmp_path);
        match linked {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err).with_context(|| format!("create lock {}", self.path.display())),
        }
    }
}

impl ProjectLock for FileProjectLock {
    fn lock(&self) -> Result<bool> {
        if self.try_create()? {
            info!(lock_id = %self.lock_id, holder = %self.holder, "lock acquired");
            return Ok(true);
        }
        match self.current()? {
            Some(record) if record.holder == self.holder => {
                debug!(lock_id = %self.lock_id, "lock already held by this holder");
                Ok(true)
            }
            Some(record) => {
                info!(
                    lock_id = %self.lock_id,
                    held_by = %record.holder,
                    "lock held by another holder"
                );
                Ok(false)
            }
            // Released between our create attempt and the read.
            None => self.try_create(),
        }
    }

    fn force_unlock(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(lock_id = %self.lock_id, "lock released");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(lock_id = %self.lock_id, "lock was not held");
                Ok(())
            }
            Err(err) => Err(err).with_context(|| format!("remove lock {}", self.path.display())),
        }
    }

    fn lock_id(&self) -> String {
        self.lock_id.clone()
    }
}

/// File name for a project's lock. Bytes outside `[A-Za-z0-9._-]` are
/// percent-encoded, so distinct identities never share a file.
pub fn lock_file_name(project: &ProjectIdentity) -> String {
    format!(
        "{}#{}.lock",
        escape_component(&project.namespace),
        escape_component(&project.name)
    )
}

fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn now_epoch_ms() -> Result<u64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("compute timestamp")?;
    Ok(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> ProjectIdentity {
        ProjectIdentity::new("org/repo", "prod", "infra/prod")
    }

    #[test]
    fn lock_file_name_and_id_follow_project() {
        let lock = FileProjectLock::new(Path::new("/locks"), &project(), "run-1");
        assert_eq!(lock.path(), Path::new("/locks/org%2Frepo#prod.lock"));
        assert_eq!(lock.lock_id(), "org/repo#prod");
    }

    #[test]
    fn separator_lookalike_namespaces_get_distinct_files() {
        let slash = lock_file_name(&ProjectIdentity::new("org/repo", "prod", "."));
        let colon = lock_file_name(&ProjectIdentity::new("org:repo", "prod", "."));
        let hash = lock_file_name(&ProjectIdentity::new("org", "repo#prod", "."));
        assert_eq!(slash, "org%2Frepo#prod.lock");
        assert_eq!(colon, "org%3Arepo#prod.lock");
        assert_eq!(hash, "org#repo%23prod.lock");

        let temp = tempfile::tempdir().expect("tempdir");
        let first = FileProjectLock::new(
            temp.path(),
            &ProjectIdentity::new("org/repo", "prod", "."),
            "run-1",
        );
        let second = FileProjectLock::new(
            temp.path(),
            &ProjectIdentity::new("org:repo", "prod", "."),
            "run-2",
        );
        assert!(first.lock().expect("slash lock"));
        assert!(second.lock().expect("colon lock"));
    }

    #[test]
    fn second_holder_is_refused_until_force_unlock() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = FileProjectLock::new(temp.path(), &project(), "run-1");
        let second = FileProjectLock::new(temp.path(), &project(), "run-2");

        assert!(first.lock().expect("first lock"));
        assert!(!second.lock().expect("second lock"));

        second.force_unlock().expect("force unlock");
        assert!(second.lock().expect("second lock after unlock"));
        assert!(!first.lock().expect("first lock after takeover"));
    }

    #[test]
    fn same_holder_reacquires() {
        let temp = tempfile::tempdir().expect("tempdir");
        let lock = FileProjectLock::new(temp.path(), &project(), "run-1");
        assert!(lock.lock().expect("lock"));
        assert!(lock.lock().expect("relock"));

        let record = lock.current().expect("read").expect("record present");
        assert_eq!(record.holder, "run-1");
        assert_eq!(record.lock_id, "org/repo#prod");
    }

    #[test]
    fn force_unlock_without_lock_is_ok() {
        let temp = tempfile::tempdir().expect("tempdir");
        let lock = FileProjectLock::new(temp.path(), &project(), "run-1");
        lock.force_unlock().expect("unlock");
        assert_eq!(lock.current().expect("read"), None);
    }

    #[test]
    fn different_projects_do_not_contend() {
        let temp = tempfile::tempdir().expect("tempdir");
        let prod = FileProjectLock::new(temp.path(), &project(), "run-1");
        let staging = FileProjectLock::new(
            temp.path(),
            &ProjectIdentity::new("org/repo", "staging", "infra/staging"),
            "run-2",
        );
        assert!(prod.lock().expect("prod"));
        assert!(staging.lock().expect("staging"));
    }
}
