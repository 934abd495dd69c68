//! Operations behind the `plan-runner` subcommands.
//!
//! Each operation wires the local adapters from a [`ProjectConfig`] into a
//! locked [`StageExecutor`] and runs one phase for the configured project.
//! Relative paths in the config resolve against the config file's directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::format::terraform_output_collapsible;
use crate::core::project::{ProjectIdentity, ProjectPathProvider};
use crate::core::stage::Stage;
use crate::executor::{Collaborators, Executor, StageExecutor};
use crate::io::commands::ShellCommandRunner;
use crate::io::config::{ExecutionSettings, ProjectConfig, load_config, write_config};
use crate::io::lock::FileProjectLock;
use crate::io::reporter::{FileReporter, Reporter, StdoutReporter};
use crate::io::storage::{FsPlanStorage, PlanStorage};
use crate::io::terraform::TerraformCli;
use crate::locking::LockingExecutor;

/// Result of a subcommand that takes the project lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The operation ran to completion.
    Completed,
    /// Another holder has the project lock; nothing ran.
    Locked,
}

/// Loaded config plus the per-invocation values the CLI resolved.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: ProjectConfig,
    /// Directory relative config paths resolve against.
    pub root: PathBuf,
    /// Lock holder id for this invocation.
    pub holder: String,
    pub settings: ExecutionSettings,
}

impl RunContext {
    /// The root is made absolute: terraform runs inside the project directory,
    /// so a plan file path handed to it must not be relative to ours.
    pub fn load(config_path: &Path, holder: String, settings: ExecutionSettings) -> Result<Self> {
        let config = load_config(config_path)?;
        let config_path = std::path::absolute(config_path)
            .with_context(|| format!("resolve {}", config_path.display()))?;
        let root = config_path
            .parent()
            .with_context(|| format!("config path has no parent {}", config_path.display()))?
            .to_path_buf();
        Ok(Self {
            config,
            root,
            holder,
            settings,
        })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Project identity with its path resolved.
    pub fn project(&self) -> ProjectIdentity {
        ProjectIdentity {
            path: self.resolve(&self.config.project.path),
            ..self.config.project.clone()
        }
    }
}

/// Lock holder id: `GITHUB_RUN_ID` when set, else the process id.
pub fn default_holder() -> String {
    holder_from_lookup(|key| std::env::var(key).ok())
}

pub fn holder_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup("GITHUB_RUN_ID")
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("pid-{}", std::process::id()))
}

/// The local adapter set for one project.
struct Adapters {
    project: ProjectIdentity,
    tool: TerraformCli,
    commands: ShellCommandRunner,
    storage: Option<FsPlanStorage>,
    reporter: Box<dyn Reporter>,
    paths: ProjectPathProvider,
    lock: FileProjectLock,
}

impl Adapters {
    fn new(ctx: &RunContext) -> Self {
        let cfg = &ctx.config;
        let project = ctx.project();
        let timeout = cfg.execution.timeout();
        let limit = cfg.execution.output_limit_bytes;
        let reporter: Box<dyn Reporter> = match &cfg.report.path {
            Some(path) => Box::new(FileReporter::new(ctx.resolve(path))),
            None => Box::new(StdoutReporter),
        };
        Self {
            tool: TerraformCli::new(&cfg.terraform.binary, &project.path, timeout, limit),
            commands: ShellCommandRunner::new(timeout, limit),
            storage: cfg
                .storage
                .dir
                .as_deref()
                .map(|dir| FsPlanStorage::new(ctx.resolve(dir))),
            reporter,
            paths: ProjectPathProvider::new(project.clone()),
            lock: FileProjectLock::new(&ctx.resolve(&cfg.lock.dir), &project, &ctx.holder),
            project,
        }
    }

    fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            tool: &self.tool,
            commands: &self.commands,
            reporter: &*self.reporter,
            storage: self.storage.as_ref().map(|s| s as &dyn PlanStorage),
            paths: &self.paths,
        }
    }

    fn executor(&self, ctx: &RunContext) -> LockingExecutor<'_, StageExecutor<'_>> {
        let cfg = &ctx.config;
        let stages = StageExecutor::new(
            self.project.clone(),
            cfg.plan.clone(),
            cfg.apply.clone(),
            self.collaborators(),
        )
        .with_env(cfg.env.state.clone(), cfg.env.command.clone())
        .with_settings(ctx.settings.clone());
        LockingExecutor::new(&self.lock, stages)
    }
}

/// Lock the project, run the plan stage and report the sanitized plan.
#[instrument(skip_all, fields(project = %ctx.config.project.label()))]
pub fn run_plan(ctx: &RunContext) -> Result<RunOutcome> {
    let adapters = Adapters::new(ctx);
    let outcome = adapters.executor(ctx).plan()?;
    if !outcome.success {
        info!(holder = %ctx.holder, "project locked elsewhere, plan skipped");
        return Ok(RunOutcome::Locked);
    }
    let header = format!("Plan for <b>{}</b>", adapters.project.label());
    adapters
        .reporter
        .report(&outcome.plan, &terraform_output_collapsible(&header))
        .context("error publishing plan")?;
    Ok(RunOutcome::Completed)
}

/// Lock the project and run the apply stage. The executor reports apply
/// output itself.
#[instrument(skip_all, fields(project = %ctx.config.project.label()))]
pub fn run_apply(ctx: &RunContext) -> Result<RunOutcome> {
    let adapters = Adapters::new(ctx);
    if !adapters.executor(ctx).apply()? {
        info!(holder = %ctx.holder, "project locked elsewhere, apply skipped");
        return Ok(RunOutcome::Locked);
    }
    Ok(RunOutcome::Completed)
}

/// Take the project lock for this holder without running anything.
pub fn run_lock(ctx: &RunContext) -> Result<RunOutcome> {
    let adapters = Adapters::new(ctx);
    if adapters.executor(ctx).lock()? {
        Ok(RunOutcome::Completed)
    } else {
        Ok(RunOutcome::Locked)
    }
}

/// Release the project lock whoever holds it.
pub fn run_unlock(ctx: &RunContext) -> Result<()> {
    let adapters = Adapters::new(ctx);
    adapters.executor(ctx).unlock()
}

/// Options for `plan-runner init`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub force: bool,
    pub project: ProjectIdentity,
}

/// Write a starter config with explicit default stages and a local plan
/// store. Returns `false` when a config exists and `force` is unset.
pub fn init_config(path: &Path, opts: &InitOptions) -> Result<bool> {
    if !opts.force && path.exists() {
        info!(path = %path.display(), "config exists, leaving it unchanged");
        return Ok(false);
    }
    let mut cfg = ProjectConfig {
        project: opts.project.clone(),
        plan: Some(Stage::default_plan()),
        apply: Some(Stage::default_apply()),
        ..ProjectConfig::default()
    };
    cfg.storage.dir = Some(PathBuf::from(".plan-runner/plans"));
    write_config(path, &cfg).with_context(|| format!("write {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::io::config::DEFAULT_CONFIG_PATH;
    use crate::test_support::TestWorkspace;

    #[test]
    fn holder_prefers_run_id() {
        let env = HashMap::from([("GITHUB_RUN_ID", "1234")]);
        assert_eq!(holder_from_lookup(|k| env.get(k).map(|v| v.to_string())), "1234");
        assert!(holder_from_lookup(|_| None).starts_with("pid-"));
    }

    #[test]
    fn init_does_not_overwrite_without_force() {
        let ws = TestWorkspace::new().expect("workspace");
        let opts = InitOptions {
            force: false,
            project: ProjectIdentity::new("org/repo", "prod", "."),
        };
        assert!(init_config(&ws.config_path(), &opts).expect("init"));
        assert!(!init_config(&ws.config_path(), &opts).expect("init again"));

        let forced = InitOptions {
            force: true,
            project: ProjectIdentity::new("org/repo", "dev", "."),
        };
        assert!(init_config(&ws.config_path(), &forced).expect("force"));
        let cfg = load_config(&ws.config_path()).expect("load");
        assert_eq!(cfg.project.name, "dev");
        assert_eq!(cfg.plan, Some(Stage::default_plan()));
    }

    #[test]
    fn context_resolves_paths_against_config_dir() {
        let ws = TestWorkspace::new().expect("workspace");
        let cfg = ProjectConfig {
            project: ProjectIdentity::new("org/repo", "prod", "infra"),
            ..ProjectConfig::default()
        };
        ws.write_config(&cfg).expect("write");

        let ctx = RunContext::load(
            &ws.path().join(DEFAULT_CONFIG_PATH),
            "me".to_string(),
            ExecutionSettings::default(),
        )
        .expect("load");
        assert!(ctx.root.is_absolute());
        assert_eq!(ctx.project().path, ws.path().join("infra"));
        assert_eq!(ctx.project().label(), "org/repo#prod");
    }

    #[test]
    fn lock_contention_between_holders() {
        let ws = TestWorkspace::new().expect("workspace");
        let cfg = ProjectConfig {
            project: ProjectIdentity::new("org/repo", "prod", "."),
            ..ProjectConfig::default()
        };
        ws.write_config(&cfg).expect("write");
        let load = |holder: &str| {
            RunContext::load(
                &ws.config_path(),
                holder.to_string(),
                ExecutionSettings::default(),
            )
            .expect("load")
        };

        assert_eq!(run_lock(&load("a")).expect("lock a"), RunOutcome::Completed);
        assert_eq!(run_lock(&load("b")).expect("lock b"), RunOutcome::Locked);
        assert_eq!(run_plan(&load("b")).expect("plan b"), RunOutcome::Locked);
        run_unlock(&load("b")).expect("unlock");
        assert_eq!(run_lock(&load("b")).expect("relock b"), RunOutcome::Completed);
    }
}
