//! Signal collection: hook commands, their logs and feedback artifacts.

pub mod collector;
pub mod command;

pub use collector::{
    Signal, SignalCollector, SignalContext, SignalSource, append_log, last_logged_run, log_header, read_tail, tail_lines,
};
pub use command::{CommandConfig, CommandRun, run_command};
