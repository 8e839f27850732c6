//! Iteration controller.
//!
//! Drives one loop per turn-end event: claim a record for the calling
//! session, gather signals, advance the iteration and hand back the next
//! prompt. The same controller backs the `start`, `status` and `cancel`
//! commands.

mod commands;
mod state;
mod turn_end;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;

use crate::agents::{find_agent, find_agents};
use crate::config::Config;
use crate::domain::loop_record::LoopRecord;
use crate::engine::{ContentEngine, EngineOutcome, EngineRequest, ShellEngine};
use crate::error::Result;
use crate::prompt::{AgentView, PromptAssembler, PromptInput, SignalView};
use crate::signals::{Signal, SignalCollector, SignalContext};
use crate::sources::list_sources;
use crate::storage::{LoopPaths, LoopStore, RecordHandle};

pub use commands::{CancelTarget, LoopSummary, Outcome, StartOutcome, StartRequest};
pub use state::ControllerState;
pub use turn_end::TurnEndReport;

/// Signals gathered during one pass, ready for the prompt
#[derive(Debug, Clone, Default)]
struct PassSignals {
    evaluator: Option<SignalView>,
    engine: Option<SignalView>,
    feedback: Option<SignalView>,
    change_stat: Option<String>,
}

pub struct IterationController {
    store: LoopStore,
    config: Config,
    engine: Arc<dyn ContentEngine>,
    collector: SignalCollector,
    assembler: PromptAssembler,
    project_dir: PathBuf,
}

impl IterationController {
    /// Controller using the configured shell engine
    pub fn new(config: Config, project_dir: impl Into<PathBuf>) -> Result<Self> {
        let engine = Arc::new(ShellEngine::new(&config.engine, config.signals.tail_lines));
        Self::with_engine(config, project_dir, engine)
    }

    /// Controller with a caller-supplied engine
    pub fn with_engine(
        config: Config,
        project_dir: impl Into<PathBuf>,
        engine: Arc<dyn ContentEngine>,
    ) -> Result<Self> {
        let project_dir = project_dir.into();
        let store = LoopStore::new(config.storage.resolve_state_dir(&project_dir));
        let collector = SignalCollector::new(&config.signals);
        let assembler = PromptAssembler::new()?;

        Ok(Self {
            store,
            config,
            engine,
            collector,
            assembler,
            project_dir,
        })
    }

    pub fn store(&self) -> &LoopStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Delete a record whose loop cannot continue
    fn end_loop(&self, handle: &RecordHandle, reason: &str, warnings: &mut Vec<String>) {
        match self.store.delete(handle) {
            Ok(_) => note(warnings, format!("loop {} ended: {}", handle.slug(), reason)),
            Err(e) => note(
                warnings,
                format!("loop {} ended ({}) but could not be removed: {}", handle.slug(), reason, e),
            ),
        }
    }

    fn engine_request(&self, record: &LoopRecord, context: SignalContext, paths: &LoopPaths) -> EngineRequest {
        EngineRequest {
            goal: record.goal.clone(),
            context,
            paths: paths.clone(),
        }
    }

    /// Prompt input for `iteration` of `record`
    fn prompt_input(
        &self,
        record: &LoopRecord,
        paths: &LoopPaths,
        iteration: u32,
        signals: PassSignals,
    ) -> PromptInput {
        let listing = list_sources(&record.targets, &self.config.prompt.ignore_file);
        let context = SignalContext::new(record, paths);
        let artifacts = self
            .collector
            .artifacts(&record.hooks, &context, paths)
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        let agent = record
            .hooks
            .feedback_agent
            .as_deref()
            .map(|name| self.agent_view(name, paths));

        PromptInput {
            slug: record.slug.clone(),
            goal: record.goal.clone(),
            iteration,
            max_iterations: record.max_iterations,
            targets: record.targets.display(),
            mode: record.mode,
            files: listing.preview(self.config.prompt.max_listed_files).to_vec(),
            files_total: listing.total(),
            change_stat: signals.change_stat,
            evaluator: signals.evaluator,
            engine: signals.engine,
            feedback: signals.feedback,
            artifacts,
            agent_feedback: self.collector.agent_feedback(paths),
            agent,
        }
    }

    fn agent_view(&self, name: &str, paths: &LoopPaths) -> AgentView {
        let catalog = find_agents(&self.config.agents.search_paths);
        let description = find_agent(&catalog, name).and_then(|agent| agent.description.clone());
        AgentView {
            name: name.to_string(),
            description,
            notes_path: paths.agent_feedback.display().to_string(),
        }
    }
}

/// Log a warning and keep it for the caller
fn note(warnings: &mut Vec<String>, message: String) {
    warn!("{}", message);
    warnings.push(message);
}

fn signal_view(signal: &Signal) -> SignalView {
    SignalView {
        exit: signal.exit_label.clone(),
        tail: signal.tail.clone(),
    }
}

fn outcome_view(outcome: &EngineOutcome) -> SignalView {
    SignalView {
        exit: outcome.exit_label(),
        tail: outcome.log_tail.clone(),
    }
}
