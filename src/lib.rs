//! Turnloop - a turn-end driven iteration controller
//!
//! Turnloop keeps an interactive assistant improving a set of target files one
//! iteration at a time. Each time the host's turn ends, the controller claims
//! the loop belonging to that session, gathers evaluator and feedback signals,
//! advances the iteration and hands back the next prompt.

pub mod agents;
pub mod config;
pub mod controller;
pub mod coordination;
pub mod domain;
pub mod engine;
pub mod error;
pub mod hook;
pub mod id;
pub mod prompt;
pub mod signals;
pub mod snapshot;
pub mod sources;
pub mod storage;

pub use error::{Result, TurnloopError};
