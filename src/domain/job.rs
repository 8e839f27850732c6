//! Background engine job tracking
//!
//! When the external engine runs in the background, the controller records a
//! job handle per loop and polls it on later turn-end events.

use serde::{Deserialize, Serialize};

/// State of the background engine job for one loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// No job launched for the current iteration
    #[default]
    Idle,
    /// Job launched and not yet observed finishing
    Running { pid: u32, started_at: u64 },
    /// Job exited; `exit_code` is `None` if it died without reporting one
    Finished { exit_code: Option<i32>, finished_at: u64 },
}

impl JobState {
    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Running { .. })
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Finished { .. })
    }

    /// Short label for status output
    pub fn label(&self) -> String {
        match self {
            JobState::Idle => "idle".to_string(),
            JobState::Running { pid, .. } => format!("running (pid {})", pid),
            JobState::Finished { exit_code: Some(code), .. } => format!("finished (exit {})", code),
            JobState::Finished { exit_code: None, .. } => "finished (no exit code)".to_string(),
        }
    }
}
