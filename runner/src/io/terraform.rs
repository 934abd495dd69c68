//! Tool runner abstraction and the `terraform` CLI adapter.
//!
//! The [`ToolRunner`] trait decouples stage execution from the actual
//! infrastructure tool. Tests use scripted runners that return predetermined
//! outputs without spawning processes.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::types::{EnvOverlay, PlanOutput, ToolError, ToolOutput};
use crate::io::process::run_tool;

/// Exit code of `plan -detailed-exitcode` when the plan has changes.
const PLAN_HAS_CHANGES: i32 = 2;

/// Abstraction over the infrastructure tool.
pub trait ToolRunner {
    /// Initialize the working directory.
    fn init(&self, args: &[String], env: &EnvOverlay) -> Result<ToolOutput, ToolError>;
    /// Compute a plan; `args` already include `-out <file>`.
    fn plan(&self, args: &[String], env: &EnvOverlay) -> Result<PlanOutput, ToolError>;
    /// Apply `plan_file` when given, otherwise a fresh plan.
    fn apply(
        &self,
        args: &[String],
        plan_file: Option<&Path>,
        env: &EnvOverlay,
    ) -> Result<ToolOutput, ToolError>;
}

/// Runs the `terraform` binary in a project directory.
#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: String,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl TerraformCli {
    pub fn new(
        binary: impl Into<String>,
        workdir: impl Into<PathBuf>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            binary: binary.into(),
            workdir: workdir.into(),
            timeout,
            output_limit_bytes,
        }
    }

    fn command(
        &self,
        subcommand: &str,
        fixed: &[&str],
        args: &[String],
        env: &EnvOverlay,
    ) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(subcommand)
            .args(fixed)
            .args(args)
            .envs(env)
            .current_dir(&self.workdir);
        cmd
    }

    fn describe(&self, subcommand: &str) -> String {
        format!("{} {subcommand}", self.binary)
    }
}

impl ToolRunner for TerraformCli {
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    fn init(&self, args: &[String], env: &EnvOverlay) -> Result<ToolOutput, ToolError> {
        info!(?args, "running init");
        let cmd = self.command("init", &["-input=false", "-no-color"], args, env);
        run_tool(cmd, &self.describe("init"), self.timeout, self.output_limit_bytes)?
            .into_success()
    }

    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    fn plan(&self, args: &[String], env: &EnvOverlay) -> Result<PlanOutput, ToolError> {
        info!(?args, "running plan");
        let cmd = self.command(
            "plan",
            &["-input=false", "-no-color", "-detailed-exitcode"],
            args,
            env,
        );
        let run = run_tool(cmd, &self.describe("plan"), self.timeout, self.output_limit_bytes)?;
        let non_empty_change = match run.code {
            Some(0) => false,
            Some(PLAN_HAS_CHANGES) => true,
            code => {
                warn!(exit_code = ?code, "plan failed");
                return Err(run.into_exit_error());
            }
        };
        debug!(non_empty_change, "plan finished");
        Ok(PlanOutput {
            non_empty_change,
            stdout: run.output.stdout,
            stderr: run.output.stderr,
        })
    }

    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    fn apply(
        &self,
        args: &[String],
        plan_file: Option<&Path>,
        env: &EnvOverlay,
    ) -> Result<ToolOutput, ToolError> {
        info!(?args, plan_file = ?plan_file, "running apply");
        let mut cmd = self.command(
            "apply",
            &["-input=false", "-no-color", "-auto-approve"],
            args,
            env,
        );
        if let Some(plan_file) = plan_file {
            cmd.arg(plan_file);
        }
        run_tool(cmd, &self.describe("apply"), self.timeout, self.output_limit_bytes)?
            .into_success()
    }
}
