//! Subcommand implementations.

pub(crate) mod completions;
pub(crate) mod monitor;
pub(crate) mod pins;
pub(crate) mod ports;
pub(crate) mod probe;
