//! Turn-end lifecycle integration tests
//!
//! Drives the controller through start and repeated turn-end events with an
//! explicit clock, covering budgets, ownership between sessions and the
//! background engine path.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tempfile::TempDir;
use turnloop::config::Config;
use turnloop::controller::{CancelTarget, ControllerState, IterationController, Outcome, StartRequest};
use turnloop::coordination::{OrphanPolicy, OwnershipPolicy};
use turnloop::domain::{Directive, InferenceMode, JobState, LockOwner};
use turnloop::engine::{ContentEngine, EngineOutcome, EngineRequest};
use turnloop::error::{Result, TurnloopError};
use turnloop::id::now_secs;

struct Fixture {
    temp: TempDir,
    controller: IterationController,
}

impl Fixture {
    fn new(config: Config) -> Self {
        let temp = TempDir::new().unwrap();
        for dir in ["docs", "src"] {
            fs::create_dir_all(temp.path().join(dir)).unwrap();
            fs::write(temp.path().join(dir).join("notes.md"), "# Notes\n").unwrap();
        }
        let controller = IterationController::new(config, temp.path()).unwrap();
        Self { temp, controller }
    }

    fn with_engine(config: Config, engine: Arc<dyn ContentEngine>) -> Self {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("docs")).unwrap();
        fs::write(temp.path().join("docs/notes.md"), "# Notes\n").unwrap();
        let controller = IterationController::with_engine(config, temp.path(), engine).unwrap();
        Self { temp, controller }
    }

    fn request(&self, dir: &str, max: u32) -> StartRequest {
        StartRequest {
            goal: "Make the notes clearer".to_string(),
            dirs: vec![self.temp.path().join(dir)],
            max_iterations: Some(max),
            ..StartRequest::default()
        }
    }

    async fn start(&self, dir: &str, max: u32, now: u64) -> String {
        self.controller.start_at(self.request(dir, max), now).await.unwrap().slug
    }

    fn iteration(&self, slug: &str) -> u32 {
        let store = self.controller.store();
        store.read(&store.handle(slug)).unwrap().iteration
    }

    fn exists(&self, slug: &str) -> bool {
        self.controller.store().handle(slug).dir().exists()
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.agents.search_paths = Vec::new();
    config
}

#[tokio::test]
async fn test_three_iteration_budget_lifecycle() {
    let fx = Fixture::new(config());
    let slug = fx.start("docs", 3, 1_000).await;

    for (i, now) in [1_001, 1_002, 1_003].into_iter().enumerate() {
        let report = fx.controller.on_turn_end_at("sess-a", now).await;
        assert_eq!(report.state, ControllerState::Advancing);
        assert!(report.directive.is_block());
        assert_eq!(fx.iteration(&slug), i as u32 + 2);
    }

    let done = fx.controller.on_turn_end_at("sess-a", 1_004).await;
    assert_eq!(done.state, ControllerState::Terminated);
    match &done.directive {
        Directive::Block { reason, status } => {
            assert!(status.contains("complete after 3 iteration(s)"));
            assert!(reason.contains("Make the notes clearer"));
        }
        Directive::Allow => panic!("completion should be emitted"),
    }
    assert!(!fx.exists(&slug));

    let after = fx.controller.on_turn_end_at("sess-a", 1_005).await;
    assert_eq!(after.state, ControllerState::NoLoop);
    assert_eq!(after.directive, Directive::Allow);
}

#[tokio::test]
async fn test_unbounded_loop_keeps_going() {
    let fx = Fixture::new(config());
    let slug = fx.start("docs", 0, 1_000).await;

    for now in 1_001..1_013 {
        let report = fx.controller.on_turn_end_at("sess-a", now).await;
        assert_eq!(report.state, ControllerState::Advancing);
    }
    assert_eq!(fx.iteration(&slug), 13);
}

#[tokio::test]
async fn test_two_sessions_disjoint_targets() {
    let fx = Fixture::new(config());
    let docs = fx.start("docs", 5, 1_000).await;
    let first = fx.controller.on_turn_end_at("sess-a", 1_001).await;
    assert_eq!(first.slug.as_deref(), Some(docs.as_str()));

    let src = fx.start("src", 5, 1_010).await;
    let second = fx.controller.on_turn_end_at("sess-b", 1_011).await;
    assert_eq!(second.slug.as_deref(), Some(src.as_str()));
    assert_eq!(second.state, ControllerState::Advancing);

    let third = fx.controller.on_turn_end_at("sess-a", 1_012).await;
    assert_eq!(third.slug.as_deref(), Some(docs.as_str()));

    assert_eq!(fx.iteration(&docs), 3);
    assert_eq!(fx.iteration(&src), 2);
}

#[tokio::test]
async fn test_owner_of_later_slug_leaves_fresh_start_alone() {
    let fx = Fixture::new(config());
    let src = fx.start("src", 5, 1_000).await;
    let first = fx.controller.on_turn_end_at("sess-a", 1_001).await;
    assert_eq!(first.slug.as_deref(), Some(src.as_str()));

    // "docs" sorts before "src", so it is listed first
    let docs = fx.start("docs", 5, 1_010).await;
    let again = fx.controller.on_turn_end_at("sess-a", 1_012).await;
    assert_eq!(again.slug.as_deref(), Some(src.as_str()));
    assert_eq!(fx.iteration(&src), 3);
    assert_eq!(fx.iteration(&docs), 1);

    let store = fx.controller.store();
    assert!(matches!(store.read_lock(&store.handle(&docs)).owner, LockOwner::Pending(_)));

    let other = fx.controller.on_turn_end_at("sess-b", 1_013).await;
    assert_eq!(other.slug.as_deref(), Some(docs.as_str()));
    assert_eq!(other.state, ControllerState::Advancing);
    assert_eq!(fx.iteration(&docs), 2);
    assert!(store.read_lock(&store.handle(&docs)).owner.is_session("sess-b"));
    assert_eq!(fx.iteration(&src), 3);
}

#[tokio::test]
async fn test_pending_claim_window() {
    let fresh = Fixture::new(config());
    let slug = fresh.start("docs", 3, 1_000).await;
    let report = fresh.controller.on_turn_end_at("sess-a", 1_002).await;
    assert_eq!(report.slug.as_deref(), Some(slug.as_str()));
    assert_eq!(fresh.iteration(&slug), 2);

    let stale = Fixture::new(config());
    let slug = stale.start("docs", 3, 1_000).await;
    let report = stale.controller.on_turn_end_at("sess-a", 1_040).await;
    assert_eq!(report.state, ControllerState::NoLoop);
    assert!(report.warnings.iter().any(|w| w.contains("pending claim")));
    assert_eq!(stale.iteration(&slug), 1);
}

#[tokio::test]
async fn test_foreign_session_does_not_interfere() {
    let fx = Fixture::new(config());
    let slug = fx.start("docs", 3, 1_000).await;
    fx.controller.on_turn_end_at("sess-a", 1_001).await;

    let report = fx.controller.on_turn_end_at("sess-b", 1_002).await;
    assert_eq!(report.state, ControllerState::NoLoop);
    assert_eq!(report.directive, Directive::Allow);
    assert!(report.warnings.iter().any(|w| w.contains("owned by session sess-a")));

    let store = fx.controller.store();
    let record = store.read(&store.handle(&slug)).unwrap();
    assert_eq!(record.iteration, 2);
    assert!(record.lock.owner.is_session("sess-a"));
    assert_eq!(record.lock.last_activity, Some(1_001));
}

#[tokio::test]
async fn test_stale_takeover_policy() {
    let mut cfg = config();
    cfg.lock.ownership = OwnershipPolicy::StaleTakeover;
    let fx = Fixture::new(cfg);
    let slug = fx.start("docs", 5, 1_000).await;
    fx.controller.on_turn_end_at("sess-a", 1_001).await;

    let early = fx.controller.on_turn_end_at("sess-b", 1_500).await;
    assert_eq!(early.state, ControllerState::NoLoop);

    let late = fx.controller.on_turn_end_at("sess-b", 2_000).await;
    assert_eq!(late.state, ControllerState::Advancing);
    assert!(late.warnings.iter().any(|w| w.contains("taken over from session sess-a")));

    let store = fx.controller.store();
    assert!(store.read_lock(&store.handle(&slug)).owner.is_session("sess-b"));
}

#[tokio::test]
async fn test_resume_ceiling_requires_restart() {
    let fx = Fixture::new(config());
    let slug = fx.start("docs", 5, 1_000).await;
    fx.controller.on_turn_end_at("sess-a", 1_001).await;

    let report = fx.controller.on_turn_end_at("sess-a", 1_001 + 1_800).await;
    assert_eq!(report.state, ControllerState::NoLoop);
    assert!(report.warnings.iter().any(|w| w.contains("restart it to resume")));
    assert_eq!(fx.iteration(&slug), 2);
}

#[tokio::test]
async fn test_orphan_policy() {
    let strict = Fixture::new(config());
    let slug = strict.start("docs", 5, 1_000).await;
    let paths = strict.controller.store().paths(&strict.controller.store().handle(&slug));
    fs::write(&paths.lock_owner, "").unwrap();
    let report = strict.controller.on_turn_end_at("sess-a", 1_001).await;
    assert_eq!(report.state, ControllerState::NoLoop);
    assert!(report.warnings.iter().any(|w| w.contains("has no owner")));

    let mut cfg = config();
    cfg.lock.orphan_policy = OrphanPolicy::Permissive;
    let permissive = Fixture::new(cfg);
    let slug = permissive.start("docs", 5, 1_000).await;
    let paths = permissive
        .controller
        .store()
        .paths(&permissive.controller.store().handle(&slug));
    fs::write(&paths.lock_owner, "").unwrap();
    let report = permissive.controller.on_turn_end_at("sess-a", 1_001).await;
    assert_eq!(report.state, ControllerState::Advancing);
}

#[tokio::test]
async fn test_corrupted_record_is_deleted() {
    let fx = Fixture::new(config());
    let slug = fx.start("docs", 3, 1_000).await;
    let paths = fx.controller.store().paths(&fx.controller.store().handle(&slug));
    fs::write(&paths.state, "---\niteration: lots\n---\n").unwrap();

    let report = fx.controller.on_turn_end_at("sess-a", 1_001).await;
    assert_eq!(report.state, ControllerState::NoLoop);
    assert!(report.warnings.iter().any(|w| w.contains("Corrupted loop record")));
    assert!(!fx.exists(&slug));
}

#[tokio::test]
async fn test_missing_target_ends_loop() {
    let fx = Fixture::new(config());
    let slug = fx.start("docs", 3, 1_000).await;
    fs::remove_dir_all(fx.temp.path().join("docs")).unwrap();

    let report = fx.controller.on_turn_end_at("sess-a", 1_001).await;
    assert_eq!(report.directive, Directive::Allow);
    assert!(!fx.exists(&slug));
}

#[tokio::test]
async fn test_cancel_mid_loop() {
    let fx = Fixture::new(config());
    fx.start("docs", 3, 1_000).await;
    fx.controller.on_turn_end_at("sess-a", 1_001).await;

    assert_eq!(fx.controller.cancel(CancelTarget::All).unwrap(), Outcome::Success(1));
    let report = fx.controller.on_turn_end_at("sess-a", 1_002).await;
    assert_eq!(report.state, ControllerState::NoLoop);
    assert!(matches!(fx.controller.status().unwrap(), Outcome::NothingToDo(_)));
}

#[tokio::test]
async fn test_hook_signals_reach_prompt() {
    let fx = Fixture::new(config());
    let mut request = fx.request("docs", 3);
    request.eval_cmd = Some("echo score-42; exit 3".to_string());
    request.feedback_cmd = Some("echo looks-good".to_string());
    let slug = fx.controller.start_at(request, 1_000).await.unwrap().slug;

    let report = fx.controller.on_turn_end_at("sess-a", 1_001).await;
    let reason = report.directive.reason().unwrap();
    assert!(reason.contains("Evaluator signal (exit 3)"));
    assert!(reason.contains("score-42"));
    assert!(reason.contains("looks-good"));

    let paths = fx.controller.store().paths(&fx.controller.store().handle(&slug));
    let log = fs::read_to_string(&paths.eval_log).unwrap();
    assert!(log.starts_with("=== evaluator iteration 1 (exit 3)"));
}

#[tokio::test]
async fn test_external_mode_requires_engine() {
    let mut cfg = config();
    cfg.engine.command = "turnloop-test-engine-that-does-not-exist".to_string();
    let fx = Fixture::new(cfg);
    let mut request = fx.request("docs", 3);
    request.mode = InferenceMode::ExternalEngine;

    let err = fx.controller.start_at(request, 1_000).await.unwrap_err();
    assert!(matches!(err, TurnloopError::DependencyMissing(_)));
    assert!(fx.controller.store().list().unwrap().is_empty());
}

/// Engine that "runs" as the test process until an exit file appears
struct FakeEngine {
    launches: AtomicUsize,
}

#[async_trait]
impl ContentEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    fn check_available(&self) -> Result<()> {
        Ok(())
    }

    async fn apply(&self, _request: &EngineRequest) -> Result<EngineOutcome> {
        Ok(EngineOutcome {
            exit_code: Some(0),
            timed_out: false,
            log_tail: "applied inline".to_string(),
        })
    }

    async fn launch(&self, _request: &EngineRequest) -> Result<JobState> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(JobState::Running {
            pid: std::process::id(),
            started_at: now_secs(),
        })
    }

    fn collect(&self, _request: &EngineRequest, job: &JobState) -> EngineOutcome {
        let exit_code = match job {
            JobState::Finished { exit_code, .. } => *exit_code,
            _ => None,
        };
        EngineOutcome {
            exit_code,
            timed_out: false,
            log_tail: "applied in background".to_string(),
        }
    }
}

#[tokio::test]
async fn test_background_engine_waits_then_advances() {
    let mut cfg = config();
    cfg.engine.background = true;
    let engine = Arc::new(FakeEngine {
        launches: AtomicUsize::new(0),
    });
    let fx = Fixture::with_engine(cfg, engine.clone());
    let mut request = fx.request("docs", 3);
    request.mode = InferenceMode::ExternalEngine;
    let slug = fx.controller.start_at(request, 1_000).await.unwrap().slug;
    let store = fx.controller.store();
    let handle = store.handle(&slug);

    let launched = fx.controller.on_turn_end_at("sess-a", 1_001).await;
    assert_eq!(launched.state, ControllerState::WaitingExternal);
    assert!(launched.directive.is_block());
    assert!(store.read_job(&handle).is_running());
    assert_eq!(fx.iteration(&slug), 1);

    let still = fx.controller.on_turn_end_at("sess-a", 1_002).await;
    assert_eq!(still.state, ControllerState::WaitingExternal);
    assert_eq!(engine.launches.load(Ordering::SeqCst), 1);
    assert_eq!(fx.iteration(&slug), 1);

    fs::write(&store.paths(&handle).engine_exit, "0\n").unwrap();
    let finished = fx.controller.on_turn_end_at("sess-a", 1_003).await;
    assert_eq!(finished.state, ControllerState::Advancing);
    assert!(finished.directive.reason().unwrap().contains("applied in background"));
    assert_eq!(fx.iteration(&slug), 2);
    assert_eq!(store.read_job(&handle), JobState::Idle);
    assert!(!store.paths(&handle).engine_exit.exists());

    let relaunched = fx.controller.on_turn_end_at("sess-a", 1_004).await;
    assert_eq!(relaunched.state, ControllerState::WaitingExternal);
    assert_eq!(engine.launches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_synchronous_engine_outcome_reaches_prompt() {
    let engine = Arc::new(FakeEngine {
        launches: AtomicUsize::new(0),
    });
    let fx = Fixture::with_engine(config(), engine.clone());
    let mut request = fx.request("docs", 3);
    request.mode = InferenceMode::ExternalEngine;
    let slug = fx.controller.start_at(request, 1_000).await.unwrap().slug;

    let report = fx.controller.on_turn_end_at("sess-a", 1_001).await;
    assert_eq!(report.state, ControllerState::Advancing);
    assert!(report.directive.reason().unwrap().contains("applied inline"));
    assert_eq!(engine.launches.load(Ordering::SeqCst), 0);
    assert_eq!(fx.iteration(&slug), 2);
}

#[tokio::test]
async fn test_restart_resets_progress() {
    let fx = Fixture::new(config());
    let slug = fx.start("docs", 3, 1_000).await;
    fx.controller.on_turn_end_at("sess-a", 1_001).await;
    assert_eq!(fx.iteration(&slug), 2);

    let again = fx.controller.start_at(fx.request("docs", 3), 1_100).await.unwrap();
    assert!(again.replaced);
    assert_eq!(fx.iteration(&slug), 1);

    // New pending claim; any session may pick it up again
    let report = fx.controller.on_turn_end_at("sess-b", 1_101).await;
    assert_eq!(report.slug.as_deref(), Some(slug.as_str()));
}
