//! Per-slug directory store for loop records.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::frontmatter;
use super::write_atomic;
use crate::domain::job::JobState;
use crate::domain::lock::{LockOwner, LockState};
use crate::domain::loop_record::LoopRecord;
use crate::error::{Result, TurnloopError};

pub const STATE_FILE: &str = "state.md";
pub const LOCK_OWNER_FILE: &str = "lock_owner";
pub const LAST_ACTIVITY_FILE: &str = "last_activity";
pub const JOB_FILE: &str = "job.json";
pub const EVAL_LOG: &str = "eval.log";
pub const FEEDBACK_LOG: &str = "feedback.log";
pub const ENGINE_LOG: &str = "engine.log";
pub const ENGINE_EXIT: &str = "engine.exit";
pub const ENGINE_GOAL: &str = "engine_goal.md";
pub const CHANGES_STAT: &str = "changes.stat";
pub const CHANGES_FILES: &str = "changes.files";
pub const AGENT_FEEDBACK: &str = "agent_feedback.md";
pub const ARTIFACTS_DIR: &str = "artifacts";

/// Handle to one persisted record directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHandle {
    slug: String,
    dir: PathBuf,
}

impl RecordHandle {
    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Every file a loop directory may contain
#[derive(Debug, Clone)]
pub struct LoopPaths {
    pub dir: PathBuf,
    pub state: PathBuf,
    pub lock_owner: PathBuf,
    pub last_activity: PathBuf,
    pub job: PathBuf,
    pub eval_log: PathBuf,
    pub feedback_log: PathBuf,
    pub engine_log: PathBuf,
    pub engine_exit: PathBuf,
    pub engine_goal: PathBuf,
    pub changes_stat: PathBuf,
    pub changes_files: PathBuf,
    pub agent_feedback: PathBuf,
    pub artifacts: PathBuf,
}

impl LoopPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            state: dir.join(STATE_FILE),
            lock_owner: dir.join(LOCK_OWNER_FILE),
            last_activity: dir.join(LAST_ACTIVITY_FILE),
            job: dir.join(JOB_FILE),
            eval_log: dir.join(EVAL_LOG),
            feedback_log: dir.join(FEEDBACK_LOG),
            engine_log: dir.join(ENGINE_LOG),
            engine_exit: dir.join(ENGINE_EXIT),
            engine_goal: dir.join(ENGINE_GOAL),
            changes_stat: dir.join(CHANGES_STAT),
            changes_files: dir.join(CHANGES_FILES),
            agent_feedback: dir.join(AGENT_FEEDBACK),
            artifacts: dir.join(ARTIFACTS_DIR),
        }
    }
}

/// Mutable fields of a record; `None` leaves the field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub iteration: Option<u32>,
    pub lock_owner: Option<LockOwner>,
    pub last_activity: Option<u64>,
}

impl RecordPatch {
    /// Confirm `session` as owner and refresh activity
    pub fn claim(session: &str, now: u64) -> Self {
        Self {
            iteration: None,
            lock_owner: Some(LockOwner::Session(session.to_string())),
            last_activity: Some(now),
        }
    }

    /// Advance to `iteration` and refresh activity
    pub fn advance(iteration: u32, now: u64) -> Self {
        Self {
            iteration: Some(iteration),
            lock_owner: None,
            last_activity: Some(now),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.iteration.is_none() && self.lock_owner.is_none() && self.last_activity.is_none()
    }
}

/// Filesystem store rooted at the loop-state directory
#[derive(Debug, Clone)]
pub struct LoopStore {
    root: PathBuf,
}

impl LoopStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Handle for a slug whether or not it exists yet
    pub fn handle(&self, slug: &str) -> RecordHandle {
        RecordHandle {
            slug: slug.to_string(),
            dir: self.root.join(slug),
        }
    }

    pub fn paths(&self, handle: &RecordHandle) -> LoopPaths {
        LoopPaths::new(&handle.dir)
    }

    /// Enumerate record directories, sorted by slug.
    ///
    /// A missing root is the normal "no active loop" case.
    pub fn list(&self) -> Result<Vec<RecordHandle>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut handles = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() || !path.join(STATE_FILE).exists() {
                continue;
            }
            let slug = entry.file_name().to_string_lossy().into_owned();
            handles.push(RecordHandle { slug, dir: path });
        }

        handles.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(handles)
    }

    /// Read a record plus its lock sidecars
    pub fn read(&self, handle: &RecordHandle) -> Result<LoopRecord> {
        let state = LoopPaths::new(&handle.dir).state;
        let content = match fs::read_to_string(&state) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TurnloopError::LoopNotFound(handle.slug.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut record = frontmatter::decode(&handle.slug, &content)?;
        record.lock = self.read_lock(handle);
        Ok(record)
    }

    /// Write a new record directory, replacing any previous one for the slug
    pub fn create(&self, record: &LoopRecord) -> Result<RecordHandle> {
        let handle = self.handle(&record.slug);
        let paths = self.paths(&handle);

        fs::create_dir_all(&paths.artifacts)?;
        for stale in [&paths.job, &paths.engine_exit] {
            remove_if_exists(stale)?;
        }

        // list() accepts a directory once state.md exists, so the lock goes first
        write_atomic(&paths.lock_owner, &record.lock.owner.to_token())?;
        match record.lock.last_activity {
            Some(ts) => write_atomic(&paths.last_activity, &ts.to_string())?,
            None => remove_if_exists(&paths.last_activity)?,
        }
        write_atomic(&paths.state, &frontmatter::encode(record)?)?;

        debug!("Created loop record {} at {}", handle.slug, handle.dir.display());
        Ok(handle)
    }

    /// Apply a patch to the mutable fields.
    ///
    /// Fails when the record directory has been removed; writes never
    /// recreate a cancelled loop.
    pub fn write(&self, handle: &RecordHandle, patch: &RecordPatch) -> Result<()> {
        if !handle.dir.is_dir() {
            return Err(TurnloopError::LoopNotFound(handle.slug.clone()));
        }
        let paths = self.paths(handle);

        if let Some(iteration) = patch.iteration {
            let content = fs::read_to_string(&paths.state)?;
            let mut record = frontmatter::decode(&handle.slug, &content)?;
            record.iteration = iteration;
            write_atomic(&paths.state, &frontmatter::encode(&record)?)?;
        }
        if let Some(owner) = &patch.lock_owner {
            write_atomic(&paths.lock_owner, &owner.to_token())?;
        }
        if let Some(ts) = patch.last_activity {
            write_atomic(&paths.last_activity, &ts.to_string())?;
        }
        Ok(())
    }

    /// Remove a record and everything in its directory.
    ///
    /// Returns `false` when there was nothing to remove.
    pub fn delete(&self, handle: &RecordHandle) -> Result<bool> {
        match fs::remove_dir_all(&handle.dir) {
            Ok(()) => {
                debug!("Deleted loop record {}", handle.slug);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the owner and last-activity sidecars; missing values read as empty
    pub fn read_lock(&self, handle: &RecordHandle) -> LockState {
        let paths = self.paths(handle);
        let owner = fs::read_to_string(&paths.lock_owner)
            .map(|raw| LockOwner::parse(&raw))
            .unwrap_or_default();
        let last_activity = fs::read_to_string(&paths.last_activity)
            .ok()
            .and_then(|raw| raw.trim().parse().ok());
        LockState { owner, last_activity }
    }

    /// Read the background job state; anything unreadable is `Idle`
    pub fn read_job(&self, handle: &RecordHandle) -> JobState {
        let path = self.paths(handle).job;
        match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable job state for {}: {}", handle.slug, e);
                JobState::Idle
            }),
            Err(_) => JobState::Idle,
        }
    }

    pub fn write_job(&self, handle: &RecordHandle, job: &JobState) -> Result<()> {
        if !handle.dir.is_dir() {
            return Err(TurnloopError::LoopNotFound(handle.slug.clone()));
        }
        let paths = self.paths(handle);
        if matches!(job, JobState::Idle) {
            remove_if_exists(&paths.engine_exit)?;
        }
        write_atomic(&paths.job, &serde_json::to_string_pretty(job)?)
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
