//! Loop record and related types
//!
//! A LoopRecord is the persisted state for one target set: how far the loop
//! has come, what it is trying to achieve, and which hooks feed it signals.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::lock::{LockOwner, LockState};
use crate::error::{Result, TurnloopError};
use crate::id::{loop_slug, pending_token};

/// Sentinel written for optional fields that are not configured
pub const ABSENT_SENTINEL: &str = "none";

/// Who makes the change each iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InferenceMode {
    /// The host's own assistant edits the targets after reading the prompt
    #[default]
    #[serde(rename = "local")]
    LocalAssistant,
    /// A configured external engine applies the change
    #[serde(rename = "external")]
    ExternalEngine,
}

impl InferenceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceMode::LocalAssistant => "local",
            InferenceMode::ExternalEngine => "external",
        }
    }
}

impl fmt::Display for InferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InferenceMode {
    type Err = TurnloopError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "local" | "local-assistant" => Ok(InferenceMode::LocalAssistant),
            "external" | "external-engine" => Ok(InferenceMode::ExternalEngine),
            other => Err(TurnloopError::Validation(format!(
                "unknown inference mode '{}' (expected local or external)",
                other
            ))),
        }
    }
}

/// An optional hook command
///
/// `Command("")` is a configured-but-empty hook and is distinct from `Absent`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Hook {
    #[default]
    Absent,
    Command(String),
}

impl Hook {
    /// Read a persisted field, mapping the sentinel back to `Absent`
    pub fn from_field(value: Option<String>) -> Self {
        match value {
            None => Hook::Absent,
            Some(v) if v == ABSENT_SENTINEL => Hook::Absent,
            Some(v) => Hook::Command(v),
        }
    }

    /// Value to persist for this hook
    pub fn to_field(&self) -> String {
        match self {
            Hook::Absent => ABSENT_SENTINEL.to_string(),
            Hook::Command(cmd) => cmd.clone(),
        }
    }

    /// The command to run, if there is something to run
    pub fn command(&self) -> Option<&str> {
        match self {
            Hook::Command(cmd) if !cmd.trim().is_empty() => Some(cmd.as_str()),
            _ => None,
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, Hook::Command(_))
    }
}

impl From<Option<String>> for Hook {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(cmd) => Hook::Command(cmd),
            None => Hook::Absent,
        }
    }
}

/// Evaluator/feedback configuration for a loop
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hooks {
    /// Advisory command run before each change
    pub evaluator: Hook,
    /// Signal-producing command run after each change
    pub feedback: Hook,
    /// Artifact the feedback command is expected to leave behind
    pub feedback_image: Option<PathBuf>,
    /// Named agent asked to review each change
    pub feedback_agent: Option<String>,
}

/// The directories and files a loop works on
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetSet {
    pub dirs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
}

impl TargetSet {
    /// Build a target set; entries are sorted and de-duplicated
    pub fn new(mut dirs: Vec<PathBuf>, mut files: Vec<PathBuf>) -> Self {
        dirs.sort();
        dirs.dedup();
        files.sort();
        files.dedup();
        Self { dirs, files }
    }

    /// Resolve user-supplied paths against `base` and canonicalize them.
    ///
    /// Fails when the set is empty or any entry is missing or of the wrong kind.
    pub fn resolve(dirs: &[PathBuf], files: &[PathBuf], base: &Path) -> Result<Self> {
        if dirs.is_empty() && files.is_empty() {
            return Err(TurnloopError::Validation(
                "at least one target directory or file is required".to_string(),
            ));
        }

        let canonical = |p: &PathBuf| -> Result<PathBuf> {
            let joined = if p.is_absolute() { p.clone() } else { base.join(p) };
            joined
                .canonicalize()
                .map_err(|_| TurnloopError::Validation(format!("target does not exist: {}", joined.display())))
        };

        let mut resolved_dirs = Vec::with_capacity(dirs.len());
        for dir in dirs {
            let path = canonical(dir)?;
            if !path.is_dir() {
                return Err(TurnloopError::Validation(format!(
                    "target directory is not a directory: {}",
                    path.display()
                )));
            }
            resolved_dirs.push(path);
        }

        let mut resolved_files = Vec::with_capacity(files.len());
        for file in files {
            let path = canonical(file)?;
            if !path.is_file() {
                return Err(TurnloopError::Validation(format!(
                    "target file is not a regular file: {}",
                    path.display()
                )));
            }
            resolved_files.push(path);
        }

        Ok(Self::new(resolved_dirs, resolved_files))
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.files.is_empty()
    }

    /// All targets, directories first
    pub fn all(&self) -> Vec<&Path> {
        self.dirs
            .iter()
            .chain(self.files.iter())
            .map(PathBuf::as_path)
            .collect()
    }

    /// Stable identifier for this set
    pub fn slug(&self) -> String {
        loop_slug(&self.all())
    }

    /// Check that every target still exists with the right kind
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(TurnloopError::Validation("target set is empty".to_string()));
        }
        if let Some(missing) = self.dirs.iter().find(|d| !d.is_dir()) {
            return Err(TurnloopError::Validation(format!(
                "target directory no longer exists: {}",
                missing.display()
            )));
        }
        if let Some(missing) = self.files.iter().find(|f| !f.is_file()) {
            return Err(TurnloopError::Validation(format!(
                "target file no longer exists: {}",
                missing.display()
            )));
        }
        Ok(())
    }

    /// Directory commands run from
    pub fn working_dir(&self) -> PathBuf {
        if let Some(dir) = self.dirs.first() {
            return dir.clone();
        }
        self.files
            .first()
            .and_then(|f| f.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Human-readable summary, e.g. `src/, README.md`
    pub fn display(&self) -> String {
        let mut parts: Vec<String> = self.dirs.iter().map(|d| format!("{}/", d.display())).collect();
        parts.extend(self.files.iter().map(|f| f.display().to_string()));
        parts.join(", ")
    }

    /// Newline separated list for command environments
    pub fn env_value(&self) -> String {
        self.all()
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Persisted iteration state for one target set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopRecord {
    //=== Identity ===
    /// Derived from the target set
    pub slug: String,

    //=== Progress ===
    /// Current iteration (starts at 1)
    pub iteration: u32,

    /// Budget; 0 means unbounded
    pub max_iterations: u32,

    //=== Behavior ===
    pub goal: String,
    pub targets: TargetSet,
    pub hooks: Hooks,
    pub mode: InferenceMode,

    //=== Bookkeeping ===
    /// Unix seconds at `start`
    pub created_at: u64,

    /// Free-form body kept below the front matter
    pub notes: String,

    /// Ownership metadata (stored in sidecars, not the front matter)
    pub lock: LockState,
}

impl LoopRecord {
    /// Create the initial record written by `start`
    pub fn new(
        goal: impl Into<String>,
        targets: TargetSet,
        hooks: Hooks,
        mode: InferenceMode,
        max_iterations: u32,
        now: u64,
    ) -> Self {
        let goal = goal.into();
        let slug = targets.slug();
        let notes = format!("# Improvement loop\n\n{}\n", goal.trim());
        Self {
            slug,
            iteration: 1,
            max_iterations,
            goal,
            targets,
            hooks,
            mode,
            created_at: now,
            notes,
            lock: LockState {
                owner: LockOwner::parse(&pending_token(now)),
                last_activity: Some(now),
            },
        }
    }

    /// True once the iteration count has run past a bounded budget
    pub fn budget_exhausted(&self) -> bool {
        self.max_iterations > 0 && self.iteration > self.max_iterations
    }

    /// Progress label, e.g. `2/3` or `2 (unbounded)`
    pub fn progress_label(&self) -> String {
        progress_label(self.iteration, self.max_iterations)
    }
}

/// Progress label for an iteration against a budget
pub fn progress_label(iteration: u32, max_iterations: u32) -> String {
    if max_iterations == 0 {
        format!("{} (unbounded)", iteration)
    } else {
        format!("{}/{}", iteration, max_iterations)
    }
}
