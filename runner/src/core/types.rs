//! Shared types passed between the executor and its collaborators.
//!
//! These are plain data plus the typed failure of an external invocation; they
//! carry no I/O and compare structurally so tests can assert on them directly.

use std::collections::BTreeMap;

use thiserror::Error;

/// Extra environment variables for one tool invocation.
pub type EnvOverlay = BTreeMap<String, String>;

/// Captured output of a tool or command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

/// Output of a successful plan invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOutput {
    /// Whether the plan proposes any change.
    pub non_empty_change: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Failure of an external tool or command, with whatever output was captured.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("`{command}` exited with status {}", display_code(.code))]
    Exit {
        command: String,
        code: Option<i32>,
        output: ToolOutput,
    },
    #[error("`{command}` timed out after {timeout_secs}s")]
    Timeout {
        command: String,
        timeout_secs: u64,
        output: ToolOutput,
    },
    #[error("`{command}` could not be started: {reason}")]
    Launch { command: String, reason: String },
}

impl ToolError {
    /// Non-zero exit with captured output.
    pub fn exit(
        command: impl Into<String>,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::Exit {
            command: command.into(),
            code,
            output: ToolOutput::new(stdout, stderr),
        }
    }

    pub fn output(&self) -> Option<&ToolOutput> {
        match self {
            Self::Exit { output, .. } | Self::Timeout { output, .. } => Some(output),
            Self::Launch { .. } => None,
        }
    }

    pub fn stdout(&self) -> &str {
        self.output().map_or("", |output| output.stdout.as_str())
    }

    pub fn stderr(&self) -> &str {
        self.output().map_or("", |output| output.stderr.as_str())
    }
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |code| code.to_string())
}

/// Result of a plan operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOutcome {
    /// True only when every step of the stage completed.
    pub success: bool,
    /// Sanitized plan text from the last `plan` step, empty if none ran.
    pub plan: String,
}

impl PlanOutcome {
    pub fn completed(plan: String) -> Self {
        Self {
            success: true,
            plan,
        }
    }

    /// The neutral result returned when another party holds the project lock.
    pub fn skipped() -> Self {
        Self::default()
    }
}
