//! Command runner for `run` steps.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::core::types::{ToolError, ToolOutput};
use crate::io::process::run_tool;

/// Shell used when a `run` step does not name one.
pub const DEFAULT_SHELL: &str = "bash";

/// Runs a list of command lines through a shell.
pub trait CommandRunner {
    fn run(
        &self,
        workdir: &Path,
        shell: &str,
        commands: &[String],
    ) -> Result<ToolOutput, ToolError>;
}

/// Joins the command lines into one script and runs `<shell> -e -c <script>`.
///
/// `-e` makes the first failing line fail the whole step.
#[derive(Debug, Clone)]
pub struct ShellCommandRunner {
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ShellCommandRunner {
    pub fn new(timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            timeout,
            output_limit_bytes,
        }
    }
}

impl CommandRunner for ShellCommandRunner {
    #[instrument(skip_all, fields(workdir = %workdir.display(), shell = %shell))]
    fn run(
        &self,
        workdir: &Path,
        shell: &str,
        commands: &[String],
    ) -> Result<ToolOutput, ToolError> {
        let shell = if shell.trim().is_empty() {
            DEFAULT_SHELL
        } else {
            shell
        };
        let script = commands.join("\n");
        debug!(lines = commands.len(), "running script");

        let mut cmd = Command::new(shell);
        cmd.arg("-e").arg("-c").arg(&script).current_dir(workdir);
        run_tool(cmd, shell, self.timeout, self.output_limit_bytes)?.into_success()
    }
}
