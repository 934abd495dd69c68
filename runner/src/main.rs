//! Locked plan/apply runner for a single infrastructure project.
//!
//! Reads `plan-runner.toml`, takes the project lock and runs the configured
//! plan or apply stage through the local `terraform` binary.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use plan_runner::core::project::ProjectIdentity;
use plan_runner::exit_codes;
use plan_runner::io::config::{DEFAULT_CONFIG_PATH, ExecutionSettings};
use plan_runner::logging;
use plan_runner::pipeline::{
    InitOptions, RunContext, RunOutcome, default_holder, init_config, run_apply, run_lock,
    run_plan, run_unlock,
};

#[derive(Parser)]
#[command(
    name = "plan-runner",
    version,
    about = "Locked plan/apply runner for infrastructure projects"
)]
struct Cli {
    /// Project config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Lock holder id. Defaults to `GITHUB_RUN_ID`, else the process id.
    #[arg(long, global = true)]
    holder: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter config if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = "")]
        namespace: String,
        #[arg(long, default_value = "default")]
        name: String,
        /// Project directory, relative to the config file.
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },
    /// Lock the project, run the plan stage and report the plan.
    Plan,
    /// Lock the project and run the apply stage.
    Apply,
    /// Take the project lock without running anything.
    Lock,
    /// Release the project lock regardless of holder.
    Unlock,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let operation: fn(&RunContext) -> Result<RunOutcome> = match cli.command {
        Command::Init {
            force,
            namespace,
            name,
            path,
        } => {
            let opts = InitOptions {
                force,
                project: ProjectIdentity::new(namespace, name, path),
            };
            if !init_config(&cli.config, &opts)? {
                eprintln!("{} exists; use --force to overwrite", cli.config.display());
            }
            return Ok(exit_codes::OK);
        }
        Command::Plan => run_plan,
        Command::Apply => run_apply,
        Command::Lock => run_lock,
        Command::Unlock => |ctx| run_unlock(ctx).map(|()| RunOutcome::Completed),
    };

    let holder = cli.holder.unwrap_or_else(default_holder);
    let ctx = RunContext::load(&cli.config, holder, ExecutionSettings::from_env())?;
    Ok(match operation(&ctx)? {
        RunOutcome::Completed => exit_codes::OK,
        RunOutcome::Locked => {
            eprintln!("project {} is locked by another holder", ctx.config.project.label());
            exit_codes::LOCKED
        }
    })
}
