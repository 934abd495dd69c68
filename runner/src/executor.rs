//! Stage interpretation for a single project.
//!
//! [`StageExecutor`] walks a plan or apply stage step by step, dispatching each
//! step to the injected tool runner, command runner or plan store. The first
//! failing step aborts the stage; later steps never run.

use std::error::Error;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::format::{collapsible, terraform_output_collapsible};
use crate::core::project::{PlanPathProvider, ProjectIdentity};
use crate::core::sanitize::{cleanup_apply, cleanup_plan};
use crate::core::stage::{Action, Stage, Step};
use crate::core::types::{EnvOverlay, PlanOutcome};
use crate::io::commands::CommandRunner;
use crate::io::config::ExecutionSettings;
use crate::io::reporter::Reporter;
use crate::io::storage::PlanStorage;
use crate::io::terraform::ToolRunner;

/// Something that can plan and apply a project.
pub trait Executor {
    fn plan(&self) -> Result<PlanOutcome>;
    /// `Ok(true)` when every step of the apply stage completed.
    fn apply(&self) -> Result<bool>;
}

/// Collaborators a [`StageExecutor`] dispatches to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub tool: &'a dyn ToolRunner,
    pub commands: &'a dyn CommandRunner,
    pub reporter: &'a dyn Reporter,
    /// Plan store; `None` keeps plans local only.
    pub storage: Option<&'a dyn PlanStorage>,
    pub paths: &'a dyn PlanPathProvider,
}

/// Interprets the plan and apply stages of one project.
pub struct StageExecutor<'a> {
    project: ProjectIdentity,
    state_env: EnvOverlay,
    command_env: EnvOverlay,
    plan_stage: Stage,
    apply_stage: Stage,
    settings: ExecutionSettings,
    deps: Collaborators<'a>,
}

impl<'a> StageExecutor<'a> {
    /// Missing stages are replaced by [`Stage::default_plan`] and
    /// [`Stage::default_apply`].
    pub fn new(
        project: ProjectIdentity,
        plan_stage: Option<Stage>,
        apply_stage: Option<Stage>,
        deps: Collaborators<'a>,
    ) -> Self {
        Self {
            project,
            state_env: EnvOverlay::new(),
            command_env: EnvOverlay::new(),
            plan_stage: plan_stage.unwrap_or_else(Stage::default_plan),
            apply_stage: apply_stage.unwrap_or_else(Stage::default_apply),
            settings: ExecutionSettings::default(),
            deps,
        }
    }

    /// Overlays for `init` (`state`) and for `plan`/`apply` (`command`).
    pub fn with_env(mut self, state: EnvOverlay, command: EnvOverlay) -> Self {
        self.state_env = state;
        self.command_env = command;
        self
    }

    pub fn with_settings(mut self, settings: ExecutionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn plan_stage(&self) -> &Stage {
        &self.plan_stage
    }

    pub fn apply_stage(&self) -> &Stage {
        &self.apply_stage
    }

    fn run_init(&self, step: &Step) -> Result<()> {
        self.deps
            .tool
            .init(&step.extra_args, &self.state_env)
            .context("error running init")?;
        Ok(())
    }

    fn run_plan(&self, step: &Step) -> Result<String> {
        let mut args = vec!["-out".to_string(), self.deps.paths.plan_file_name()];
        args.extend(step.extra_args.iter().cloned());
        let output = self
            .deps
            .tool
            .plan(&args, &self.command_env)
            .context("error executing plan")?;
        debug!(non_empty_change = output.non_empty_change, "plan computed");

        if let Some(storage) = self.deps.storage {
            self.replace_stored_plan(storage)?;
        }
        Ok(cleanup_plan(
            output.non_empty_change,
            None,
            &output.stdout,
            &output.stderr,
        ))
    }

    /// Drop any previously stored plan, then upload the fresh one.
    fn replace_stored_plan(&self, storage: &dyn PlanStorage) -> Result<()> {
        let key = self.deps.paths.stored_plan_file_path();
        let exists = storage
            .plan_exists(&key)
            .context("error checking if plan exists")?;
        if exists {
            debug!(key = %key, "replacing stored plan");
            storage
                .delete_stored_plan(&key)
                .context("error deleting plan")?;
        }
        storage
            .store_plan(&self.deps.paths.local_plan_file_path(), &key)
            .context("error storing plan")?;
        info!(key = %key, "plan stored");
        Ok(())
    }

    fn run_apply(&self, step: &Step, plan_file: Option<&Path>) -> Result<()> {
        let result = self
            .deps
            .tool
            .apply(&step.extra_args, plan_file, &self.command_env);
        let output = match &result {
            Ok(out) => cleanup_apply(true, None, &out.stdout, &out.stderr),
            Err(err) => cleanup_apply(true, Some(err as &dyn Error), err.stdout(), err.stderr()),
        };

        let header = format!("Apply for <b>{}</b>", self.project.label());
        if let Err(err) = self
            .deps
            .reporter
            .report(&output, &terraform_output_collapsible(&header))
        {
            warn!(err = %format!("{err:#}"), "error publishing apply output");
        }

        if let Err(err) = result {
            if let Err(report_err) = self
                .deps
                .reporter
                .report(&err.to_string(), &collapsible("Error during applying."))
            {
                warn!(err = %format!("{report_err:#}"), "error publishing apply error");
            }
            return Err(anyhow::Error::new(err).context("error executing apply"));
        }
        Ok(())
    }

    fn run_command(&self, step: &Step) -> Result<()> {
        let mut commands = Vec::new();
        if self.settings.activate_venv {
            commands.push(self.settings.venv_activation());
        }
        commands.push(step.value.clone());
        info!(command = %step.value, project = %self.project.label(), "running command");
        self.deps
            .commands
            .run(&self.project.path, &step.shell, &commands)
            .context("error running command")?;
        Ok(())
    }
}

impl Executor for StageExecutor<'_> {
    #[instrument(skip_all, fields(project = %self.project.label()))]
    fn plan(&self) -> Result<PlanOutcome> {
        let mut plan = String::new();
        for step in &self.plan_stage.steps {
            match step.action {
                Action::Init => self.run_init(step)?,
                Action::Plan => plan = self.run_plan(step)?,
                Action::Run => self.run_command(step)?,
                Action::Apply => debug!("skipping apply step in plan stage"),
            }
        }
        Ok(PlanOutcome::completed(plan))
    }

    #[instrument(skip_all, fields(project = %self.project.label()))]
    fn apply(&self) -> Result<bool> {
        let plan_file = match self.deps.storage {
            Some(storage) => storage
                .retrieve_plan(
                    &self.deps.paths.local_plan_file_path(),
                    &self.deps.paths.stored_plan_file_path(),
                )
                .context("error retrieving plan")?,
            None => None,
        };
        debug!(plan_file = ?plan_file, "plan file resolved");

        for step in &self.apply_stage.steps {
            match step.action {
                Action::Init => self.run_init(step)?,
                Action::Apply => self.run_apply(step, plan_file.as_deref())?,
                Action::Run => self.run_command(step)?,
                Action::Plan => debug!("skipping plan step in apply stage"),
            }
        }
        Ok(true)
    }
}
