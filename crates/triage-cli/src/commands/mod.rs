//! Subcommand implementations.

pub mod check;
pub mod resolve;
pub mod scan;
