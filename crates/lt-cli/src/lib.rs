//! Listening session tracker CLI library.
//!
//! This crate wires the session engine and reconciler to the `SQLite` store
//! and exposes them as the `lt` command.

mod cli;
pub mod commands;
mod config;
pub mod sink;

pub use cli::{Cli, Commands, KindArg, UsageAction};
pub use config::Config;
