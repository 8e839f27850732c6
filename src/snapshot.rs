//! Change-set preview and optional auto-commit.
//!
//! Everything here is best-effort: outside a git work tree, or when git is
//! missing, the snapshot is simply empty.

use std::fs;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::process::Command;

use crate::domain::loop_record::TargetSet;
use crate::storage::LoopPaths;

const GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Preview of what the loop has changed so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSnapshot {
    /// `git diff --stat` summary
    pub stat: String,
    /// Changed and untracked files under the targets
    pub files: Vec<String>,
}

impl ChangeSnapshot {
    pub fn is_empty(&self) -> bool {
        self.stat.trim().is_empty() && self.files.is_empty()
    }
}

async fn git(dir: &Path, args: &[&str]) -> Option<String> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(GIT_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!("git {:?} could not start: {}", args, e);
            return None;
        }
        Err(_) => {
            warn!("git {:?} timed out", args);
            return None;
        }
    };

    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        debug!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        None
    }
}

fn target_args(targets: &TargetSet) -> Vec<String> {
    targets.all().iter().map(|p| p.display().to_string()).collect()
}

async fn inside_work_tree(dir: &Path) -> bool {
    git(dir, &["rev-parse", "--is-inside-work-tree"])
        .await
        .is_some_and(|out| out.trim() == "true")
}

/// Capture the current change set and write the preview files
pub async fn capture(targets: &TargetSet, paths: &LoopPaths) -> ChangeSnapshot {
    let dir = targets.working_dir();
    if !inside_work_tree(&dir).await {
        return ChangeSnapshot::default();
    }

    let pathspec = target_args(targets);
    let with_paths = |base: &[&'static str]| -> Vec<String> {
        base.iter()
            .map(|s| s.to_string())
            .chain(std::iter::once("--".to_string()))
            .chain(pathspec.iter().cloned())
            .collect()
    };

    let stat_args = with_paths(&["diff", "--stat", "HEAD"]);
    let names_args = with_paths(&["diff", "--name-only", "HEAD"]);
    let untracked_args = with_paths(&["ls-files", "--others", "--exclude-standard", "--full-name"]);

    let stat = run_git(&dir, &stat_args).await.unwrap_or_default();
    let mut files: Vec<String> = run_git(&dir, &names_args)
        .await
        .unwrap_or_default()
        .lines()
        .chain(run_git(&dir, &untracked_args).await.unwrap_or_default().lines())
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    files.sort();
    files.dedup();

    let snapshot = ChangeSnapshot {
        stat: stat.trim_end().to_string(),
        files,
    };

    if let Err(e) = fs::write(&paths.changes_stat, &snapshot.stat) {
        warn!("Failed to write {}: {}", paths.changes_stat.display(), e);
    }
    if let Err(e) = fs::write(&paths.changes_files, snapshot.files.join("\n")) {
        warn!("Failed to write {}: {}", paths.changes_files.display(), e);
    }

    snapshot
}

async fn run_git(dir: &Path, args: &[String]) -> Option<String> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    git(dir, &args).await
}

/// Stage and commit the targets; returns true if a commit was made
pub async fn auto_commit(targets: &TargetSet, message: &str) -> bool {
    let dir = targets.working_dir();
    if !inside_work_tree(&dir).await {
        return false;
    }

    let pathspec = target_args(targets);
    let mut add: Vec<String> = vec!["add".into(), "-A".into(), "--".into()];
    add.extend(pathspec.iter().cloned());
    if run_git(&dir, &add).await.is_none() {
        warn!("Auto-commit skipped: git add failed");
        return false;
    }

    let mut commit: Vec<String> = vec!["commit".into(), "-m".into(), message.to_string(), "--".into()];
    commit.extend(pathspec);
    match run_git(&dir, &commit).await {
        Some(_) => {
            info!("Auto-committed: {}", message);
            true
        }
        None => {
            debug!("Auto-commit made no commit (nothing to commit or git refused)");
            false
        }
    }
}
