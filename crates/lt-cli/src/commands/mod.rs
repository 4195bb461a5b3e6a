//! CLI subcommand implementations.

pub mod backfill;
pub mod run;
pub mod sessions;
pub mod status;
pub mod usage;
