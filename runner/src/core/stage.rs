//! Step and stage model for plan/apply pipelines.
//!
//! A stage is an ordered list of steps. Steps are immutable once built and
//! carry a closed [`Action`]; unknown action names are rejected when a step is
//! parsed, so the interpreter never has to guess what an action means.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// What a single step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Initialize the working directory (providers, backend).
    Init,
    /// Compute a plan and persist the plan artifact.
    Plan,
    /// Apply a previously stored (or freshly computed) plan.
    Apply,
    /// Run an arbitrary shell command in the project directory.
    Run,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Run => "run",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "init" => Ok(Self::Init),
            "plan" => Ok(Self::Plan),
            "apply" => Ok(Self::Apply),
            "run" => Ok(Self::Run),
            other => Err(anyhow!(
                "unknown step action {other:?} (expected init, plan, apply or run)"
            )),
        }
    }
}

/// One unit of work within a stage.
///
/// `value` and `shell` are only meaningful for [`Action::Run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub shell: String,
}

impl Step {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            extra_args: Vec::new(),
            value: String::new(),
            shell: String::new(),
        }
    }

    /// Build a step from an action name, rejecting unknown actions.
    pub fn parse(action: &str) -> Result<Self> {
        Ok(Self::new(action.parse()?))
    }

    pub fn run(value: impl Into<String>, shell: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            shell: shell.into(),
            ..Self::new(Action::Run)
        }
    }

    pub fn with_extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Ordered steps for either the plan or the apply phase of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Stage {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// `[init, plan]`, used when a project configures no plan stage.
    pub fn default_plan() -> Self {
        Self::new(vec![Step::new(Action::Init), Step::new(Action::Plan)])
    }

    /// `[init, apply]`, used when a project configures no apply stage.
    pub fn default_apply() -> Self {
        Self::new(vec![Step::new(Action::Init), Step::new(Action::Apply)])
    }

    pub fn actions(&self) -> Vec<Action> {
        self.steps.iter().map(|step| step.action).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stages_are_init_then_operation() {
        assert_eq!(
            Stage::default_plan().actions(),
            vec![Action::Init, Action::Plan]
        );
        assert_eq!(
            Stage::default_apply().actions(),
            vec![Action::Init, Action::Apply]
        );
    }

    #[test]
    fn parse_rejects_unknown_action() {
        let err = Step::parse("destroy").unwrap_err();
        assert!(err.to_string().contains("unknown step action"));
        assert_eq!(Step::parse("run").expect("run").action, Action::Run);
    }

    #[test]
    fn deserialize_rejects_unknown_action() {
        let parsed: std::result::Result<Stage, _> =
            toml::from_str("steps = [{ action = \"init\" }, { action = \"refresh\" }]");
        assert!(parsed.is_err());
    }

    #[test]
    fn deserialize_fills_optional_fields() {
        let stage: Stage = toml::from_str(
            r#"steps = [
                { action = "init", extra_args = ["-upgrade"] },
                { action = "run", value = "make lint", shell = "sh" },
            ]"#,
        )
        .expect("parse stage");

        assert_eq!(
            stage.steps[0],
            Step::new(Action::Init).with_extra_args(["-upgrade"])
        );
        assert_eq!(stage.steps[1], Step::run("make lint", "sh"));
    }
}
