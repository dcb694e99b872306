//! Command handlers for the `ledger` binary

pub mod commands;

pub use commands::*;
