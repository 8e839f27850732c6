//! Front-matter codec for loop state files.
//!
//! A state file is a YAML block between `---` fences followed by free-form
//! body text. Optional hook fields are written as the `none` sentinel so that
//! "not configured" stays distinct from "configured empty".

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::domain::loop_record::{ABSENT_SENTINEL, Hook, Hooks, InferenceMode, LoopRecord, TargetSet};
use crate::domain::lock::LockState;
use crate::error::{Result, TurnloopError};

const FENCE: &str = "---";

#[derive(Debug, Default, Deserialize)]
struct RawFrontMatter {
    iteration: Option<Value>,
    max_iterations: Option<Value>,
    goal: Option<String>,
    target_dirs: Option<Vec<String>>,
    target_files: Option<Vec<String>>,
    eval_cmd: Option<String>,
    feedback_cmd: Option<String>,
    feedback_image: Option<String>,
    feedback_agent: Option<String>,
    inference_mode: Option<String>,
    created_at: Option<u64>,
}

#[derive(Debug, Serialize)]
struct FrontMatterOut<'a> {
    iteration: u32,
    max_iterations: u32,
    goal: &'a str,
    target_dirs: Vec<String>,
    target_files: Vec<String>,
    eval_cmd: String,
    feedback_cmd: String,
    feedback_image: String,
    feedback_agent: String,
    inference_mode: &'static str,
    created_at: u64,
}

/// Split a document into (front matter, body).
///
/// Returns `None` when the document does not open with a fence or the block
/// is never closed.
pub fn split(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FENCE {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }
    None
}

/// Parse a state file into a record (lock metadata left at its default).
pub fn decode(slug: &str, content: &str) -> Result<LoopRecord> {
    let (yaml, body) = split(content).ok_or_else(|| TurnloopError::corruption(slug, "missing front matter"))?;

    if yaml.trim().is_empty() {
        return Err(TurnloopError::corruption(slug, "empty front matter"));
    }

    let raw: RawFrontMatter =
        serde_yaml::from_str(yaml).map_err(|e| TurnloopError::corruption(slug, format!("invalid front matter: {}", e)))?;

    let iteration = parse_count(slug, "iteration", raw.iteration)?;
    let max_iterations = parse_count(slug, "max_iterations", raw.max_iterations)?;

    let goal = raw
        .goal
        .filter(|g| !g.trim().is_empty())
        .ok_or_else(|| TurnloopError::corruption(slug, "goal is missing"))?;

    let dirs: Vec<PathBuf> = raw.target_dirs.unwrap_or_default().into_iter().map(PathBuf::from).collect();
    let files: Vec<PathBuf> = raw.target_files.unwrap_or_default().into_iter().map(PathBuf::from).collect();
    let targets = TargetSet::new(dirs, files);
    if targets.is_empty() {
        return Err(TurnloopError::corruption(slug, "target set is empty"));
    }

    let mode = match raw.inference_mode.as_deref() {
        None => InferenceMode::default(),
        Some(m) => m
            .parse()
            .map_err(|_| TurnloopError::corruption(slug, format!("unknown inference_mode '{}'", m)))?,
    };

    let hooks = Hooks {
        evaluator: Hook::from_field(raw.eval_cmd),
        feedback: Hook::from_field(raw.feedback_cmd),
        feedback_image: optional_field(raw.feedback_image).map(PathBuf::from),
        feedback_agent: optional_field(raw.feedback_agent),
    };

    Ok(LoopRecord {
        slug: slug.to_string(),
        iteration,
        max_iterations,
        goal,
        targets,
        hooks,
        mode,
        created_at: raw.created_at.unwrap_or(0),
        notes: body.trim_start_matches('\n').to_string(),
        lock: LockState::default(),
    })
}

/// Render a record as a state file.
pub fn encode(record: &LoopRecord) -> Result<String> {
    let out = FrontMatterOut {
        iteration: record.iteration,
        max_iterations: record.max_iterations,
        goal: &record.goal,
        target_dirs: record.targets.dirs.iter().map(|p| p.display().to_string()).collect(),
        target_files: record.targets.files.iter().map(|p| p.display().to_string()).collect(),
        eval_cmd: record.hooks.evaluator.to_field(),
        feedback_cmd: record.hooks.feedback.to_field(),
        feedback_image: record
            .hooks
            .feedback_image
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ABSENT_SENTINEL.to_string()),
        feedback_agent: record
            .hooks
            .feedback_agent
            .clone()
            .unwrap_or_else(|| ABSENT_SENTINEL.to_string()),
        inference_mode: record.mode.as_str(),
        created_at: record.created_at,
    };

    let yaml = serde_yaml::to_string(&out)?;
    Ok(format!("{}\n{}{}\n\n{}", FENCE, yaml, FENCE, record.notes))
}

fn optional_field(value: Option<String>) -> Option<String> {
    value.filter(|v| v != ABSENT_SENTINEL && !v.is_empty())
}

fn parse_count(slug: &str, field: &str, value: Option<Value>) -> Result<u32> {
    let parsed = match &value {
        Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Some(Value::String(s)) => s.trim().parse::<u32>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| match value {
        None => TurnloopError::corruption(slug, format!("{} is missing", field)),
        Some(_) => TurnloopError::corruption(slug, format!("{} is not a non-negative integer", field)),
    })
}
