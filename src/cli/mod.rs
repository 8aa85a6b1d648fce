//! Command-line interface over the gateway entry points

pub mod commands;
pub mod error;
