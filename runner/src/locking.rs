//! Per-project locking around an [`Executor`].
//!
//! Contention is not a failure: when another party holds the lock, plan and
//! apply return the neutral skipped result without touching the wrapped
//! executor. Only a malfunctioning lock produces an error.

use anyhow::{Context, Result};
use tracing::info;

use crate::core::types::PlanOutcome;
use crate::executor::Executor;
use crate::io::lock::ProjectLock;

/// Acquires the project lock before delegating to `executor`.
pub struct LockingExecutor<'a, E> {
    lock: &'a dyn ProjectLock,
    executor: E,
}

impl<'a, E: Executor> LockingExecutor<'a, E> {
    pub fn new(lock: &'a dyn ProjectLock, executor: E) -> Self {
        Self { lock, executor }
    }

    /// Take the lock without running anything, e.g. to hold it across
    /// several invocations. Returns whether it was acquired.
    pub fn lock(&self) -> Result<bool> {
        let locked = self
            .lock
            .lock()
            .with_context(|| format!("failed to acquire lock {}", self.lock.lock_id()))?;
        info!(lock_id = %self.lock.lock_id(), locked, "lock result");
        Ok(locked)
    }

    /// Release the lock whoever holds it.
    pub fn unlock(&self) -> Result<()> {
        self.lock
            .force_unlock()
            .with_context(|| format!("failed to release lock {}", self.lock.lock_id()))
    }

    pub fn inner(&self) -> &E {
        &self.executor
    }

    fn acquire(&self) -> Result<bool> {
        let locked = self.lock.lock().context("error locking project")?;
        info!(lock_id = %self.lock.lock_id(), locked, "lock result");
        Ok(locked)
    }
}

impl<E: Executor> Executor for LockingExecutor<'_, E> {
    fn plan(&self) -> Result<PlanOutcome> {
        if !self.acquire()? {
            return Ok(PlanOutcome::skipped());
        }
        self.executor.plan()
    }

    fn apply(&self) -> Result<bool> {
        if !self.acquire()? {
            return Ok(false);
        }
        self.executor.apply()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingExecutor, ScriptedLock};

    #[test]
    fn held_elsewhere_skips_without_delegating() {
        let lock = ScriptedLock::held_elsewhere();
        let locking = LockingExecutor::new(&lock, RecordingExecutor::succeeding("plan text"));

        assert_eq!(locking.plan().expect("plan"), PlanOutcome::skipped());
        assert!(!locking.apply().expect("apply"));
        assert_eq!(locking.inner().plan_calls(), 0);
        assert_eq!(locking.inner().apply_calls(), 0);
        assert_eq!(lock.lock_calls(), 2);
    }

    #[test]
    fn acquired_delegates_and_propagates_result() {
        let lock = ScriptedLock::acquired();
        let locking = LockingExecutor::new(&lock, RecordingExecutor::succeeding("plan text"));

        let outcome = locking.plan().expect("plan");
        assert_eq!(outcome, PlanOutcome::completed("plan text".to_string()));
        assert!(locking.apply().expect("apply"));
        assert_eq!(locking.inner().plan_calls(), 1);
        assert_eq!(locking.inner().apply_calls(), 1);
    }

    #[test]
    fn inner_error_is_returned_unchanged() {
        let lock = ScriptedLock::acquired();
        let locking = LockingExecutor::new(&lock, RecordingExecutor::failing("boom"));
        let err = locking.plan().unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn lock_failure_is_wrapped_and_not_delegated() {
        let lock = ScriptedLock::failing("backend unreachable");
        let locking = LockingExecutor::new(&lock, RecordingExecutor::succeeding(""));

        let err = locking.plan().unwrap_err();
        assert_eq!(err.to_string(), "error locking project");
        assert!(format!("{err:#}").contains("backend unreachable"));
        assert!(locking.apply().is_err());
        assert_eq!(locking.inner().plan_calls(), 0);
        assert_eq!(locking.inner().apply_calls(), 0);
    }

    #[test]
    fn explicit_lock_and_unlock() {
        let lock = ScriptedLock::acquired();
        let locking = LockingExecutor::new(&lock, RecordingExecutor::succeeding(""));
        assert!(locking.lock().expect("lock"));
        locking.unlock().expect("unlock");
        assert_eq!(lock.unlock_calls(), 1);
        assert_eq!(locking.inner().plan_calls(), 0);
    }

    #[test]
    fn unlock_error_names_the_lock() {
        let lock = ScriptedLock::acquired().with_unlock_error("permission denied");
        let locking = LockingExecutor::new(&lock, RecordingExecutor::succeeding(""));
        let err = locking.unlock().unwrap_err();
        assert_eq!(err.to_string(), "failed to release lock org/repo#prod");
    }
}
