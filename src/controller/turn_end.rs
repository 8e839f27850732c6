//! The turn-end pass.
//!
//! Every failure is handled inside the pass: a loop that cannot continue is
//! deleted, anything transient is skipped for this event, and the host is
//! allowed to stop. The pass itself never fails.

use log::{debug, info};

use super::{IterationController, PassSignals, note, outcome_view, signal_view};
use crate::controller::ControllerState;
use crate::coordination::{ClaimKind, LockCandidate, resolve};
use crate::domain::job::JobState;
use crate::domain::loop_record::{InferenceMode, LoopRecord, progress_label};
use crate::domain::Directive;
use crate::engine::probe_job;
use crate::error::{Result, TurnloopError};
use crate::id::now_secs;
use crate::prompt::{CompletionInput, RenderedPrompt, SignalView, WaitingInput};
use crate::signals::{Signal, SignalContext, last_logged_run};
use crate::snapshot;
use crate::storage::{LoopPaths, RecordHandle, RecordPatch};

/// What one turn-end pass decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnEndReport {
    pub state: ControllerState,
    pub slug: Option<String>,
    pub directive: Directive,
    /// Operator-facing diagnostics (skipped records, deleted loops, ...)
    pub warnings: Vec<String>,
}

impl TurnEndReport {
    fn allow(slug: Option<String>, warnings: Vec<String>) -> Self {
        Self {
            state: ControllerState::NoLoop,
            slug,
            directive: Directive::Allow,
            warnings,
        }
    }

    fn block(state: ControllerState, slug: String, prompt: RenderedPrompt, warnings: Vec<String>) -> Self {
        Self {
            state,
            slug: Some(slug),
            directive: Directive::block(prompt.text, prompt.status),
            warnings,
        }
    }
}

type PassResult = Result<Option<(ControllerState, RenderedPrompt)>>;

impl IterationController {
    /// Handle the host's turn-end event for `session`
    pub async fn on_turn_end(&self, session: &str) -> TurnEndReport {
        self.on_turn_end_at(session, now_secs()).await
    }

    /// Same as [`on_turn_end`](Self::on_turn_end) with an explicit clock
    pub async fn on_turn_end_at(&self, session: &str, now: u64) -> TurnEndReport {
        let mut warnings = Vec::new();
        let session = session.trim();
        if session.is_empty() {
            debug!("Turn end without a session id; nothing to do");
            return TurnEndReport::allow(None, warnings);
        }

        let Some((handle, record)) = self.claim(session, now, &mut warnings) else {
            return TurnEndReport::allow(None, warnings);
        };
        let slug = handle.slug().to_string();

        match self.run_claimed(&handle, record, now, &mut warnings).await {
            Ok(Some((state, prompt))) => TurnEndReport::block(state, slug, prompt, warnings),
            Ok(None) => TurnEndReport::allow(Some(slug), warnings),
            Err(TurnloopError::LoopNotFound(_)) => {
                note(&mut warnings, format!("loop {} was removed during the pass", slug));
                TurnEndReport::allow(Some(slug), warnings)
            }
            Err(e) if e.is_fatal_to_loop() => {
                self.end_loop(&handle, &e.to_string(), &mut warnings);
                TurnEndReport::allow(Some(slug), warnings)
            }
            Err(e) => {
                note(&mut warnings, format!("skipping loop {} this turn: {}", slug, e));
                TurnEndReport::allow(Some(slug), warnings)
            }
        }
    }

    /// Select, claim and verify one record for this session
    fn claim(&self, session: &str, now: u64, warnings: &mut Vec<String>) -> Option<(RecordHandle, LoopRecord)> {
        let handles = match self.store.list() {
            Ok(handles) => handles,
            Err(e) => {
                note(
                    warnings,
                    format!("cannot list loops in {}: {}", self.store.root().display(), e),
                );
                return None;
            }
        };

        let mut records = Vec::with_capacity(handles.len());
        for handle in handles {
            match self.store.read(&handle) {
                Ok(record) => records.push((handle, record)),
                Err(TurnloopError::LoopNotFound(_)) => continue,
                Err(e) if e.is_fatal_to_loop() => self.end_loop(&handle, &e.to_string(), warnings),
                Err(e) => note(warnings, format!("skipping unreadable loop {}: {}", handle.slug(), e)),
            }
        }
        if records.is_empty() {
            debug!("No active loops");
            return None;
        }

        let candidates: Vec<LockCandidate> = records
            .iter()
            .map(|(handle, record)| LockCandidate::new(handle.slug(), record.lock.clone()))
            .collect();
        let result = resolve(&candidates, session, now, &self.config.lock);
        for warning in &result.warnings {
            note(warnings, warning.to_string());
        }

        let claim = result.claim?;
        let state = match claim.kind {
            ClaimKind::PendingUpgrade => ControllerState::ClaimPending,
            _ => ControllerState::Claimed,
        };
        debug!("{}: {} ({:?})", claim.slug, state, claim.kind);

        let (handle, mut record) = records.into_iter().find(|(handle, _)| handle.slug() == claim.slug)?;
        if let Err(e) = self.store.write(&handle, &RecordPatch::claim(session, now)) {
            note(warnings, format!("could not claim loop {}: {}", claim.slug, e));
            return None;
        }

        // Another session may have written between our read and our write
        let lock = self.store.read_lock(&handle);
        if !lock.owner.is_session(session) {
            note(
                warnings,
                format!("loop {} was claimed by {} first; leaving it", claim.slug, lock.owner),
            );
            return None;
        }
        record.lock = lock;
        Some((handle, record))
    }

    async fn run_claimed(
        &self,
        handle: &RecordHandle,
        record: LoopRecord,
        now: u64,
        warnings: &mut Vec<String>,
    ) -> PassResult {
        let paths = self.store.paths(handle);

        if let Err(e) = record.targets.validate() {
            self.end_loop(handle, &e.to_string(), warnings);
            return Ok(None);
        }

        debug!("{}: {}", record.slug, ControllerState::BudgetCheck);
        if record.budget_exhausted() {
            return self.complete(handle, &record, &paths).await.map(Some);
        }

        if record.mode == InferenceMode::ExternalEngine && self.config.engine.background {
            return self.run_background(handle, &record, &paths, now).await.map(Some);
        }
        self.run_inline(handle, &record, &paths, now).await.map(Some)
    }

    /// Budget spent: summarize, then remove the record
    async fn complete(
        &self,
        handle: &RecordHandle,
        record: &LoopRecord,
        paths: &LoopPaths,
    ) -> Result<(ControllerState, RenderedPrompt)> {
        let changes = snapshot::capture(&record.targets, paths).await;
        let prompt = self.assembler.completion(&CompletionInput {
            slug: record.slug.clone(),
            goal: record.goal.clone(),
            iteration: record.iteration,
            max_iterations: record.max_iterations,
            change_stat: Some(changes.stat),
        })?;

        self.store.delete(handle)?;
        info!(
            "Loop {} complete after {} iteration(s)",
            record.slug,
            record.iteration.saturating_sub(1)
        );
        Ok((ControllerState::Terminated, prompt))
    }

    /// Evaluator, optional synchronous engine run, then advance
    async fn run_inline(
        &self,
        handle: &RecordHandle,
        record: &LoopRecord,
        paths: &LoopPaths,
        now: u64,
    ) -> Result<(ControllerState, RenderedPrompt)> {
        let context = SignalContext::new(record, paths);
        let mut signals = PassSignals {
            evaluator: hook_view(self.collector.run_evaluator(&record.hooks, &context, paths).await)?,
            ..PassSignals::default()
        };

        if record.mode == InferenceMode::ExternalEngine {
            self.engine.check_available()?;
            let request = self.engine_request(record, context.clone(), paths);
            signals.engine = Some(match self.engine.apply(&request).await {
                Ok(outcome) => outcome_view(&outcome),
                Err(e) if e.is_fatal_to_loop() => return Err(e),
                Err(e) => failure_view(self.engine.name(), &e),
            });
        }

        self.advance(handle, record, paths, &context, now, signals, false).await
    }

    /// Background engine: launch, wait, or collect and advance
    async fn run_background(
        &self,
        handle: &RecordHandle,
        record: &LoopRecord,
        paths: &LoopPaths,
        now: u64,
    ) -> Result<(ControllerState, RenderedPrompt)> {
        let context = SignalContext::new(record, paths);
        let job = probe_job(&self.store.read_job(handle), paths, now);

        match job {
            JobState::Running { .. } => {
                debug!("{}: engine job {}", record.slug, job.label());
                self.waiting(record, &job, now)
            }
            JobState::Finished { .. } => {
                let request = self.engine_request(record, context.clone(), paths);
                let outcome = self.engine.collect(&request, &job);
                info!("Loop {}: engine job {}", record.slug, job.label());

                let evaluator = if record.hooks.evaluator.is_configured() {
                    last_logged_run(&paths.eval_log, self.collector.tail_lines())
                        .map(|(exit, tail)| SignalView { exit, tail })
                } else {
                    None
                };
                let signals = PassSignals {
                    evaluator,
                    engine: Some(outcome_view(&outcome)),
                    ..PassSignals::default()
                };
                self.advance(handle, record, paths, &context, now, signals, true).await
            }
            JobState::Idle => {
                // Evaluator output is logged and picked up once the job finishes
                hook_view(self.collector.run_evaluator(&record.hooks, &context, paths).await)?;
                self.engine.check_available()?;

                let request = self.engine_request(record, context.clone(), paths);
                let job = self.engine.launch(&request).await?;
                self.store.write_job(handle, &job)?;
                info!("Loop {}: launched {} ({})", record.slug, self.engine.name(), job.label());
                self.waiting(record, &job, now)
            }
        }
    }

    fn waiting(
        &self,
        record: &LoopRecord,
        job: &JobState,
        now: u64,
    ) -> Result<(ControllerState, RenderedPrompt)> {
        let (pid, elapsed_secs) = match job {
            JobState::Running { pid, started_at } => (*pid, now.saturating_sub(*started_at)),
            _ => (0, 0),
        };
        let prompt = self.assembler.waiting(&WaitingInput {
            slug: record.slug.clone(),
            iteration: record.iteration,
            max_iterations: record.max_iterations,
            pid,
            elapsed_secs,
        })?;
        Ok((ControllerState::WaitingExternal, prompt))
    }

    /// Feedback, change snapshot, optional commit, iteration bump, prompt
    #[allow(clippy::too_many_arguments)]
    async fn advance(
        &self,
        handle: &RecordHandle,
        record: &LoopRecord,
        paths: &LoopPaths,
        context: &SignalContext,
        now: u64,
        mut signals: PassSignals,
        reset_job: bool,
    ) -> Result<(ControllerState, RenderedPrompt)> {
        signals.feedback = hook_view(self.collector.run_feedback(&record.hooks, context, paths).await)?;

        let changes = snapshot::capture(&record.targets, paths).await;
        if self.config.git.auto_commit {
            let message = format!("turnloop {}: iteration {}", record.slug, record.progress_label());
            snapshot::auto_commit(&record.targets, &message).await;
        }
        signals.change_stat = Some(changes.stat);

        let next = record.iteration.saturating_add(1);
        self.store.write(handle, &RecordPatch::advance(next, now))?;
        if reset_job {
            self.store.write_job(handle, &JobState::Idle)?;
        }
        info!(
            "Loop {} advanced to iteration {}",
            record.slug,
            progress_label(next, record.max_iterations)
        );

        let input = self.prompt_input(record, paths, next, signals);
        let prompt = self.assembler.assemble(&input)?;
        Ok((ControllerState::Advancing, prompt))
    }
}

/// Hook results feed the prompt; only a loop-ending error stops the pass
fn hook_view(result: Result<Option<Signal>>) -> Result<Option<SignalView>> {
    match result {
        Ok(signal) => Ok(signal.as_ref().map(signal_view)),
        Err(e) if e.is_fatal_to_loop() => Err(e),
        Err(e) => Ok(Some(failure_view("hook", &e))),
    }
}

fn failure_view(name: &str, error: &TurnloopError) -> SignalView {
    SignalView {
        exit: "error".to_string(),
        tail: format!("{} failed: {}", name, error),
    }
}
