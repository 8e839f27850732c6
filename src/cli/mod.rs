//! CLI module for turnloop - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for starting, inspecting
//! and cancelling loops, plus the host hook handler.

pub mod commands;

pub use commands::Cli;
