//! Project configuration stored in `plan-runner.toml`, plus the execution
//! settings taken from the pipeline environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::project::ProjectIdentity;
use crate::core::stage::{Action, Stage};
use crate::core::types::EnvOverlay;

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "plan-runner.toml";

/// Project configuration (TOML).
///
/// Missing sections fall back to defaults; a missing `[plan]` or `[apply]`
/// section means the default stage for that phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectConfig {
    pub project: ProjectIdentity,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Stage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply: Option<Stage>,

    pub env: EnvConfig,
    pub storage: StorageConfig,
    pub lock: LockConfig,
    pub terraform: TerraformConfig,
    pub execution: ExecutionConfig,
    pub report: ReportConfig,
}

/// Environment overlays, kept apart so state credentials never reach `run` steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvConfig {
    /// Applied to `init`.
    pub state: EnvOverlay,
    /// Applied to `plan` and `apply`.
    pub command: EnvOverlay,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Plan store root. Unset disables plan storage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockConfig {
    pub dir: PathBuf,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".plan-runner/locks"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TerraformConfig {
    pub binary: String,
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            binary: "terraform".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Wall-clock limit for each tool or command invocation.
    pub timeout_secs: u64,
    /// Captured stdout/stderr beyond this many bytes is dropped.
    pub output_limit_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportConfig {
    /// Markdown file to append reports to. Unset prints to stdout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl ProjectConfig {
    pub fn validate(&self) -> Result<()> {
        if self.project.name.trim().is_empty() {
            return Err(anyhow!("project.name must be set"));
        }
        if self.execution.timeout_secs == 0 {
            return Err(anyhow!("execution.timeout_secs must be > 0"));
        }
        if self.execution.output_limit_bytes == 0 {
            return Err(anyhow!("execution.output_limit_bytes must be > 0"));
        }
        if self.terraform.binary.trim().is_empty() {
            return Err(anyhow!("terraform.binary must be non-empty"));
        }
        for (phase, stage) in [("plan", &self.plan), ("apply", &self.apply)] {
            let Some(stage) = stage else { continue };
            for (index, step) in stage.steps.iter().enumerate() {
                if step.action == Action::Run && step.value.trim().is_empty() {
                    return Err(anyhow!(
                        "{phase}.steps[{index}]: run step needs a non-empty value"
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// A missing file is an error: unlike tunables, the project identity has no
/// sensible default.
pub fn load_config(path: &Path) -> Result<ProjectConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ProjectConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ProjectConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

/// Settings the pipeline provides through its environment.
///
/// Read once at startup and handed to the executor, which never consults the
/// process environment itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSettings {
    /// Prefix `run` steps with a virtualenv activation (`ACTIVATE_VENV=true`).
    pub activate_venv: bool,
    /// Workspace checkout root (`GITHUB_WORKSPACE`), home of `.venv`.
    pub workspace_root: PathBuf,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            activate_venv: false,
            workspace_root: PathBuf::from("."),
        }
    }
}

impl ExecutionSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            activate_venv: lookup("ACTIVATE_VENV").as_deref() == Some("true"),
            workspace_root: lookup("GITHUB_WORKSPACE")
                .filter(|root| !root.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
        }
    }

    /// Command that activates the workspace virtualenv.
    pub fn venv_activation(&self) -> String {
        format!("source {}/.venv/bin/activate", self.workspace_root.display())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::core::stage::Step;

    const SAMPLE: &str = r#"
[project]
namespace = "org/repo"
name = "prod"
path = "infra/prod"

[plan]
steps = [
    { action = "init", extra_args = ["-upgrade"] },
    { action = "run", value = "tflint", shell = "bash" },
    { action = "plan" },
]

[env.state]
AWS_PROFILE = "state"

[env.command]
TF_VAR_env = "prod"

[storage]
dir = ".plans"
"#;

    #[test]
    fn load_parses_sections_and_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(DEFAULT_CONFIG_PATH);
        fs::write(&path, SAMPLE).expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(
            cfg.project,
            ProjectIdentity::new("org/repo", "prod", "infra/prod")
        );
        let plan = cfg.plan.expect("plan stage");
        assert_eq!(plan.actions(), vec![Action::Init, Action::Run, Action::Plan]);
        assert_eq!(plan.steps[1], Step::run("tflint", "bash"));
        assert_eq!(cfg.apply, None);
        assert_eq!(cfg.env.state.get("AWS_PROFILE").map(String::as_str), Some("state"));
        assert_eq!(cfg.env.command.get("TF_VAR_env").map(String::as_str), Some("prod"));
        assert_eq!(cfg.storage.dir, Some(PathBuf::from(".plans")));
        assert_eq!(cfg.lock, LockConfig::default());
        assert_eq!(cfg.execution, ExecutionConfig::default());
        assert_eq!(cfg.report.path, None);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join(DEFAULT_CONFIG_PATH);
        let cfg = ProjectConfig {
            project: ProjectIdentity::new("org/repo", "dev", "."),
            apply: Some(Stage::default_apply()),
            ..ProjectConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn missing_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_config(&temp.path().join("missing.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("missing.toml"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let base = ProjectConfig {
            project: ProjectIdentity::new("org/repo", "prod", "."),
            ..ProjectConfig::default()
        };
        assert!(base.validate().is_ok());

        let unnamed = ProjectConfig {
            project: ProjectIdentity::new("org/repo", " ", "."),
            ..base.clone()
        };
        assert!(unnamed.validate().is_err());

        let mut zero_timeout = base.clone();
        zero_timeout.execution.timeout_secs = 0;
        assert!(zero_timeout.validate().is_err());

        let empty_run = ProjectConfig {
            apply: Some(Stage::new(vec![Step::run("  ", "bash")])),
            ..base
        };
        let err = empty_run.validate().unwrap_err();
        assert!(err.to_string().contains("apply.steps[0]"));
    }

    #[test]
    fn unknown_action_fails_to_load() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(DEFAULT_CONFIG_PATH);
        fs::write(
            &path,
            "[project]\nname = \"prod\"\n[plan]\nsteps = [{ action = \"destroy\" }]\n",
        )
        .expect("write");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn settings_read_venv_flag_and_workspace() {
        let env: HashMap<&str, &str> =
            HashMap::from([("ACTIVATE_VENV", "true"), ("GITHUB_WORKSPACE", "/work")]);
        let settings = ExecutionSettings::from_lookup(|key| env.get(key).map(|v| v.to_string()));
        assert!(settings.activate_venv);
        assert_eq!(settings.venv_activation(), "source /work/.venv/bin/activate");

        let off = ExecutionSettings::from_lookup(|key| {
            (key == "ACTIVATE_VENV").then(|| "1".to_string())
        });
        assert_eq!(off, ExecutionSettings::default());
    }
}
