//! Liveness probe for background engine jobs.

use std::fs;

use log::debug;
use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::domain::job::JobState;
use crate::storage::LoopPaths;

/// Check if a process with the given PID is running
pub fn is_process_running(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // Sending signal 0 checks if the process exists without affecting it
    kill(Pid::from_raw(raw), None).is_ok()
}

/// Refresh a recorded job against the filesystem and process table.
///
/// The exit file wins over liveness; a job that vanished without writing one
/// is `Finished` with no exit code.
pub fn probe_job(job: &JobState, paths: &LoopPaths, now: u64) -> JobState {
    let JobState::Running { pid, .. } = *job else {
        return *job;
    };

    if let Ok(raw) = fs::read_to_string(&paths.engine_exit) {
        let exit_code = raw.trim().parse().ok();
        debug!("Engine job {} finished with {:?}", pid, exit_code);
        return JobState::Finished {
            exit_code,
            finished_at: now,
        };
    }

    if is_process_running(pid) {
        return *job;
    }

    debug!("Engine job {} is gone without an exit status", pid);
    JobState::Finished {
        exit_code: None,
        finished_at: now,
    }
}
