//! Side-effecting adapters behind the executor's collaborator traits.

pub mod commands;
pub mod config;
pub mod lock;
pub mod process;
pub mod reporter;
pub mod storage;
pub mod terraform;
