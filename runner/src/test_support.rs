//! Test-only fakes for the executor's collaborators.
//!
//! Every fake records what it was asked to do so tests can assert on call
//! order, and can be scripted to fail at a chosen point.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

use crate::core::types::{EnvOverlay, PlanOutcome, PlanOutput, ToolError, ToolOutput};
use crate::executor::Executor;
use crate::io::commands::CommandRunner;
use crate::io::config::{DEFAULT_CONFIG_PATH, ProjectConfig, write_config};
use crate::io::lock::ProjectLock;
use crate::io::reporter::Reporter;
use crate::io::storage::PlanStorage;
use crate::io::terraform::ToolRunner;

/// One recorded tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Init(Vec<String>),
    Plan(Vec<String>),
    Apply {
        args: Vec<String>,
        plan_file: Option<PathBuf>,
    },
}

/// Tool runner that replays queued results. An empty queue yields an empty
/// successful output.
#[derive(Default)]
pub struct ScriptedToolRunner {
    init: RefCell<VecDeque<Result<ToolOutput, ToolError>>>,
    plan: RefCell<VecDeque<Result<PlanOutput, ToolError>>>,
    apply: RefCell<VecDeque<Result<ToolOutput, ToolError>>>,
    calls: RefCell<Vec<Call>>,
    envs: RefCell<Vec<EnvOverlay>>,
}

impl ScriptedToolRunner {
    pub fn with_init(self, result: Result<ToolOutput, ToolError>) -> Self {
        self.init.borrow_mut().push_back(result);
        self
    }

    pub fn with_plan(self, result: Result<PlanOutput, ToolError>) -> Self {
        self.plan.borrow_mut().push_back(result);
        self
    }

    pub fn with_apply(self, result: Result<ToolOutput, ToolError>) -> Self {
        self.apply.borrow_mut().push_back(result);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    /// Overlay passed to each call, in call order.
    pub fn envs(&self) -> Vec<EnvOverlay> {
        self.envs.borrow().clone()
    }

    fn record(&self, call: Call, env: &EnvOverlay) {
        self.calls.borrow_mut().push(call);
        self.envs.borrow_mut().push(env.clone());
    }
}

impl ToolRunner for ScriptedToolRunner {
    fn init(&self, args: &[String], env: &EnvOverlay) -> Result<ToolOutput, ToolError> {
        self.record(Call::Init(args.to_vec()), env);
        self.init
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(ToolOutput::default()))
    }

    fn plan(&self, args: &[String], env: &EnvOverlay) -> Result<PlanOutput, ToolError> {
        self.record(Call::Plan(args.to_vec()), env);
        self.plan
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(PlanOutput::default()))
    }

    fn apply(
        &self,
        args: &[String],
        plan_file: Option<&Path>,
        env: &EnvOverlay,
    ) -> Result<ToolOutput, ToolError> {
        self.record(
            Call::Apply {
                args: args.to_vec(),
                plan_file: plan_file.map(Path::to_path_buf),
            },
            env,
        );
        self.apply
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(ToolOutput::default()))
    }
}

/// One recorded `run` step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRun {
    pub workdir: PathBuf,
    pub shell: String,
    pub commands: Vec<String>,
}

/// Command runner that records runs and optionally fails them.
#[derive(Default)]
pub struct RecordingCommandRunner {
    runs: RefCell<Vec<CommandRun>>,
    fail_with: Option<String>,
}

impl RecordingCommandRunner {
    pub fn failing(stderr: &str) -> Self {
        Self {
            fail_with: Some(stderr.to_string()),
            ..Self::default()
        }
    }

    pub fn runs(&self) -> Vec<CommandRun> {
        self.runs.borrow().clone()
    }
}

impl CommandRunner for RecordingCommandRunner {
    fn run(
        &self,
        workdir: &Path,
        shell: &str,
        commands: &[String],
    ) -> Result<ToolOutput, ToolError> {
        self.runs.borrow_mut().push(CommandRun {
            workdir: workdir.to_path_buf(),
            shell: shell.to_string(),
            commands: commands.to_vec(),
        });
        match &self.fail_with {
            Some(stderr) => Err(ToolError::exit(shell, Some(1), "", stderr.as_str())),
            None => Ok(ToolOutput::default()),
        }
    }
}

/// Storage operation, in the order the executor issued them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    Exists(String),
    Delete(String),
    Store { local: PathBuf, key: String },
    Retrieve { local: PathBuf, key: String },
}

/// Which storage operation a [`MemoryPlanStorage`] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFault {
    Exists,
    Delete,
    Store,
    Retrieve,
}

/// In-memory plan store keyed by storage key.
#[derive(Default)]
pub struct MemoryPlanStorage {
    plans: RefCell<BTreeMap<String, PathBuf>>,
    operations: RefCell<Vec<StorageOp>>,
    fault: Option<StorageFault>,
}

impl MemoryPlanStorage {
    /// Start with a plan already stored under `key`.
    pub fn with_plan(self, key: &str) -> Self {
        self.plans
            .borrow_mut()
            .insert(key.to_string(), PathBuf::from("previous.tfplan"));
        self
    }

    pub fn failing_on(mut self, fault: StorageFault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.borrow().clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.plans.borrow().contains_key(key)
    }

    fn check(&self, op: StorageOp, fault: StorageFault) -> Result<()> {
        self.operations.borrow_mut().push(op);
        if self.fault == Some(fault) {
            return Err(anyhow!("storage unavailable"));
        }
        Ok(())
    }
}

impl PlanStorage for MemoryPlanStorage {
    fn plan_exists(&self, key: &str) -> Result<bool> {
        self.check(StorageOp::Exists(key.to_string()), StorageFault::Exists)?;
        Ok(self.contains(key))
    }

    fn delete_stored_plan(&self, key: &str) -> Result<()> {
        self.check(StorageOp::Delete(key.to_string()), StorageFault::Delete)?;
        self.plans
            .borrow_mut()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| anyhow!("no stored plan {key}"))
    }

    fn store_plan(&self, local: &Path, key: &str) -> Result<()> {
        let op = StorageOp::Store {
            local: local.to_path_buf(),
            key: key.to_string(),
        };
        self.check(op, StorageFault::Store)?;
        self.plans
            .borrow_mut()
            .insert(key.to_string(), local.to_path_buf());
        Ok(())
    }

    fn retrieve_plan(&self, local: &Path, key: &str) -> Result<Option<PathBuf>> {
        let op = StorageOp::Retrieve {
            local: local.to_path_buf(),
            key: key.to_string(),
        };
        self.check(op, StorageFault::Retrieve)?;
        Ok(self.contains(key).then(|| local.to_path_buf()))
    }
}

/// Reporter that keeps every formatted report, optionally failing each send.
#[derive(Default)]
pub struct RecordingReporter {
    reports: RefCell<Vec<String>>,
    fail: bool,
}

impl RecordingReporter {
    /// Records each attempt, then fails it.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn reports(&self) -> Vec<String> {
        self.reports.borrow().clone()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, content: &str, formatter: &dyn Fn(&str) -> String) -> Result<()> {
        self.reports.borrow_mut().push(formatter(content));
        if self.fail {
            return Err(anyhow!("comment service unavailable"));
        }
        Ok(())
    }
}

/// Lock with a fixed acquisition result.
pub struct ScriptedLock {
    outcome: std::result::Result<bool, String>,
    unlock_error: Option<String>,
    lock_calls: Cell<usize>,
    unlock_calls: Cell<usize>,
}

impl ScriptedLock {
    fn with_outcome(outcome: std::result::Result<bool, String>) -> Self {
        Self {
            outcome,
            unlock_error: None,
            lock_calls: Cell::new(0),
            unlock_calls: Cell::new(0),
        }
    }

    pub fn acquired() -> Self {
        Self::with_outcome(Ok(true))
    }

    pub fn held_elsewhere() -> Self {
        Self::with_outcome(Ok(false))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_outcome(Err(message.to_string()))
    }

    pub fn with_unlock_error(mut self, message: &str) -> Self {
        self.unlock_error = Some(message.to_string());
        self
    }

    pub fn lock_calls(&self) -> usize {
        self.lock_calls.get()
    }

    pub fn unlock_calls(&self) -> usize {
        self.unlock_calls.get()
    }
}

impl ProjectLock for ScriptedLock {
    fn lock(&self) -> Result<bool> {
        self.lock_calls.set(self.lock_calls.get() + 1);
        self.outcome.clone().map_err(|message| anyhow!(message))
    }

    fn force_unlock(&self) -> Result<()> {
        self.unlock_calls.set(self.unlock_calls.get() + 1);
        match &self.unlock_error {
            Some(message) => Err(anyhow!(message.clone())),
            None => Ok(()),
        }
    }

    fn lock_id(&self) -> String {
        "org/repo#prod".to_string()
    }
}

/// Executor that counts calls and returns a fixed result.
pub struct RecordingExecutor {
    outcome: std::result::Result<String, String>,
    plan_calls: Cell<usize>,
    apply_calls: Cell<usize>,
}

impl RecordingExecutor {
    pub fn succeeding(plan: &str) -> Self {
        Self {
            outcome: Ok(plan.to_string()),
            plan_calls: Cell::new(0),
            apply_calls: Cell::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            plan_calls: Cell::new(0),
            apply_calls: Cell::new(0),
        }
    }

    pub fn plan_calls(&self) -> usize {
        self.plan_calls.get()
    }

    pub fn apply_calls(&self) -> usize {
        self.apply_calls.get()
    }
}

impl Executor for RecordingExecutor {
    fn plan(&self) -> Result<PlanOutcome> {
        self.plan_calls.set(self.plan_calls.get() + 1);
        match &self.outcome {
            Ok(plan) => Ok(PlanOutcome::completed(plan.clone())),
            Err(message) => Err(anyhow!(message.clone())),
        }
    }

    fn apply(&self) -> Result<bool> {
        self.apply_calls.set(self.apply_calls.get() + 1);
        match &self.outcome {
            Ok(_) => Ok(true),
            Err(message) => Err(anyhow!(message.clone())),
        }
    }
}

/// Scratch directory holding a `plan-runner.toml`.
pub struct TestWorkspace {
    dir: tempfile::TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join(DEFAULT_CONFIG_PATH)
    }

    pub fn write_config(&self, cfg: &ProjectConfig) -> Result<()> {
        write_config(&self.config_path(), cfg)
    }
}
