//! Locked plan/apply stage runner for infrastructure-as-code projects.
//!
//! For one project, this crate interprets an ordered list of steps (`init`,
//! `plan`, `apply`, `run`) behind a per-project lock, keeps the generated plan
//! artifact in a store between the two phases and trims raw tool output down
//! to the part worth showing a reviewer. The layout keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (stage model, artifact naming,
//!   output sanitizing, comment formatting). No I/O.
//! - **[`io`]**: Side-effecting adapters (processes, terraform, plan store,
//!   lock files, reporters, config). Each sits behind a trait so tests can
//!   swap it out.
//!
//! [`executor`] and [`locking`] couple the two through those traits;
//! [`pipeline`] wires the local adapters together for the CLI.

pub mod core;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod locking;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
