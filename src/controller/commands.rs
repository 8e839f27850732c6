//! Operator commands: start, status and cancel.

use std::path::PathBuf;

use log::{info, warn};
use serde::Serialize;

use super::{IterationController, PassSignals};
use crate::agents::{find_agent, find_agents};
use crate::domain::loop_record::{Hook, Hooks, InferenceMode, LoopRecord, TargetSet, progress_label};
use crate::error::{Result, TurnloopError};
use crate::id::now_secs;
use crate::prompt::RenderedPrompt;

/// Result of a command that may legitimately find nothing to act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Success(T),
    NothingToDo(String),
}

/// Arguments for `start`
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    pub goal: String,
    pub dirs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
    /// Falls back to the configured default; `Some(0)` is unbounded
    pub max_iterations: Option<u32>,
    pub mode: InferenceMode,
    pub eval_cmd: Option<String>,
    pub feedback_cmd: Option<String>,
    pub feedback_image: Option<PathBuf>,
    pub feedback_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub slug: String,
    /// An earlier loop on the same targets was replaced
    pub replaced: bool,
    /// Prompt for iteration 1
    pub prompt: RenderedPrompt,
    pub warnings: Vec<String>,
}

/// One row of `status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopSummary {
    pub slug: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub goal: String,
    pub targets: String,
    pub mode: String,
    pub owner: String,
    pub idle_secs: Option<u64>,
    pub job: String,
}

impl LoopSummary {
    pub fn progress(&self) -> String {
        progress_label(self.iteration, self.max_iterations)
    }
}

/// Which loops `cancel` removes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelTarget {
    /// Exact slug, or an unambiguous prefix of one
    Slug(String),
    All,
}

impl IterationController {
    /// Create (or replace) the loop for a target set and return its first prompt
    pub async fn start(&self, request: StartRequest) -> Result<StartOutcome> {
        self.start_at(request, now_secs()).await
    }

    pub async fn start_at(&self, request: StartRequest, now: u64) -> Result<StartOutcome> {
        let goal = request.goal.trim();
        if goal.is_empty() {
            return Err(TurnloopError::Validation("a goal is required".to_string()));
        }
        let targets = TargetSet::resolve(&request.dirs, &request.files, &self.project_dir)?;

        if request.mode == InferenceMode::ExternalEngine {
            self.engine.check_available()?;
        }

        let mut warnings = Vec::new();
        if let Some(name) = &request.feedback_agent {
            let catalog = find_agents(&self.config.agents.search_paths);
            if find_agent(&catalog, name).is_none() {
                let message = format!("feedback agent '{}' was not found in the agent catalog", name);
                warn!("{}", message);
                warnings.push(message);
            }
        }

        let hooks = Hooks {
            evaluator: Hook::from_field(request.eval_cmd),
            feedback: Hook::from_field(request.feedback_cmd),
            feedback_image: request.feedback_image,
            feedback_agent: request.feedback_agent,
        };
        let max_iterations = request
            .max_iterations
            .unwrap_or(self.config.loops.default_max_iterations);
        let record = LoopRecord::new(goal, targets, hooks, request.mode, max_iterations, now);

        let existing = self.store.handle(&record.slug);
        let replaced = self.store.delete(&existing)?;
        if replaced {
            info!("Replacing existing loop {}", record.slug);
        }

        let handle = self.store.create(&record)?;
        let paths = self.store.paths(&handle);
        let input = self.prompt_input(&record, &paths, record.iteration, PassSignals::default());
        let prompt = self.assembler.assemble(&input)?;

        info!(
            "Started loop {} on {} ({})",
            record.slug,
            record.targets.display(),
            progress_label(record.iteration, record.max_iterations)
        );
        Ok(StartOutcome {
            slug: record.slug,
            replaced,
            prompt,
            warnings,
        })
    }

    /// Summaries of every readable loop, sorted by slug
    pub fn status(&self) -> Result<Outcome<Vec<LoopSummary>>> {
        let now = now_secs();
        let mut summaries = Vec::new();

        for handle in self.store.list()? {
            let record = match self.store.read(&handle) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping loop {} in status: {}", handle.slug(), e);
                    continue;
                }
            };
            summaries.push(LoopSummary {
                slug: record.slug.clone(),
                iteration: record.iteration,
                max_iterations: record.max_iterations,
                goal: record.goal.trim().to_string(),
                targets: record.targets.display(),
                mode: record.mode.as_str().to_string(),
                owner: record.lock.owner.to_string(),
                idle_secs: record.lock.idle_secs(now),
                job: self.store.read_job(&handle).label(),
            });
        }

        if summaries.is_empty() {
            return Ok(Outcome::NothingToDo("no active loops".to_string()));
        }
        Ok(Outcome::Success(summaries))
    }

    /// Delete the selected loops; returns how many were removed
    pub fn cancel(&self, target: CancelTarget) -> Result<Outcome<usize>> {
        let handles = self.store.list()?;

        let selected = match &target {
            CancelTarget::All => handles,
            CancelTarget::Slug(wanted) => {
                let wanted = wanted.trim();
                if wanted.is_empty() {
                    return Err(TurnloopError::Validation("a loop slug is required".to_string()));
                }
                if let Some(exact) = handles.iter().find(|h| h.slug() == wanted) {
                    vec![exact.clone()]
                } else {
                    let matches: Vec<_> = handles.into_iter().filter(|h| h.slug().starts_with(wanted)).collect();
                    if matches.len() > 1 {
                        let names: Vec<&str> = matches.iter().map(|h| h.slug()).collect();
                        return Err(TurnloopError::Validation(format!(
                            "'{}' matches {} loops: {}",
                            wanted,
                            matches.len(),
                            names.join(", ")
                        )));
                    }
                    matches
                }
            }
        };

        let mut removed = 0;
        for handle in &selected {
            if self.store.delete(handle)? {
                info!("Cancelled loop {}", handle.slug());
                removed += 1;
            }
        }

        if removed == 0 {
            let reason = match target {
                CancelTarget::All => "no active loops".to_string(),
                CancelTarget::Slug(slug) => format!("no loop matches '{}'", slug.trim()),
            };
            return Ok(Outcome::NothingToDo(reason));
        }
        Ok(Outcome::Success(removed))
    }
}
