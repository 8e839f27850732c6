//! External content-generation engine
//!
//! The engine is a black box that applies one change to the target set given
//! a goal. It runs either synchronously inside the turn-end pass or detached
//! in the background, in which case later passes poll it via `probe_job`.

mod job;
mod shell;

use async_trait::async_trait;

use crate::domain::job::JobState;
use crate::error::Result;
use crate::signals::SignalContext;
use crate::storage::LoopPaths;

pub use job::{is_process_running, probe_job};
pub use shell::ShellEngine;

/// Environment variable pointing at the goal file handed to the engine
pub const ENV_GOAL_FILE: &str = "TURNLOOP_GOAL_FILE";

/// One "apply a change" request
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub goal: String,
    pub context: SignalContext,
    pub paths: LoopPaths,
}

/// Result of a finished engine run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutcome {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Bounded tail of the engine log for this run
    pub log_tail: String,
}

impl EngineOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    pub fn exit_label(&self) -> String {
        match (self.timed_out, self.exit_code) {
            (true, _) => "timeout".to_string(),
            (false, Some(code)) => code.to_string(),
            (false, None) => "unknown".to_string(),
        }
    }
}

/// Trait for engines that apply one change per iteration
#[async_trait]
pub trait ContentEngine: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Fail with `DependencyMissing` when the engine cannot run at all
    fn check_available(&self) -> Result<()>;

    /// Apply one change and wait for it
    async fn apply(&self, request: &EngineRequest) -> Result<EngineOutcome>;

    /// Start one change in the background and return the job handle
    async fn launch(&self, request: &EngineRequest) -> Result<JobState>;

    /// Outcome of a background job that `probe_job` reported finished
    fn collect(&self, request: &EngineRequest, job: &JobState) -> EngineOutcome;
}
