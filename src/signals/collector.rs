//! Evaluator and feedback hooks around an iteration.
//!
//! Every run is appended in full to its per-loop log; only the tail of the
//! latest run is handed to the prompt.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};

use super::command::{CommandConfig, CommandRun, run_command};
use crate::config::SignalsConfig;
use crate::domain::loop_record::{Hook, Hooks, LoopRecord};
use crate::error::Result;
use crate::storage::LoopPaths;

pub const ENV_SLUG: &str = "TURNLOOP_SLUG";
pub const ENV_ITERATION: &str = "TURNLOOP_ITERATION";
pub const ENV_MAX_ITERATIONS: &str = "TURNLOOP_MAX_ITERATIONS";
pub const ENV_TARGETS: &str = "TURNLOOP_TARGETS";
pub const ENV_LOOP_DIR: &str = "TURNLOOP_LOOP_DIR";
pub const ENV_ARTIFACT_DIR: &str = "TURNLOOP_ARTIFACT_DIR";

/// Loop metadata exposed to every command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalContext {
    pub slug: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub targets: String,
    pub loop_dir: PathBuf,
    pub artifact_dir: PathBuf,
    pub working_dir: PathBuf,
}

impl SignalContext {
    pub fn new(record: &LoopRecord, paths: &LoopPaths) -> Self {
        Self {
            slug: record.slug.clone(),
            iteration: record.iteration,
            max_iterations: record.max_iterations,
            targets: record.targets.env_value(),
            loop_dir: paths.dir.clone(),
            artifact_dir: paths.artifacts.clone(),
            working_dir: record.targets.working_dir(),
        }
    }

    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            (ENV_SLUG.to_string(), self.slug.clone()),
            (ENV_ITERATION.to_string(), self.iteration.to_string()),
            (ENV_MAX_ITERATIONS.to_string(), self.max_iterations.to_string()),
            (ENV_TARGETS.to_string(), self.targets.clone()),
            (ENV_LOOP_DIR.to_string(), self.loop_dir.display().to_string()),
            (ENV_ARTIFACT_DIR.to_string(), self.artifact_dir.display().to_string()),
        ]
    }
}

/// Which hook produced a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    Evaluator,
    Feedback,
}

impl SignalSource {
    pub fn name(&self) -> &'static str {
        match self {
            SignalSource::Evaluator => "evaluator",
            SignalSource::Feedback => "feedback",
        }
    }
}

/// Advisory output from one hook run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub source: SignalSource,
    pub exit_label: String,
    pub success: bool,
    /// Bounded tail of the run's combined output
    pub tail: String,
}

pub struct SignalCollector {
    tail_lines: usize,
    timeout_ms: u64,
}

impl SignalCollector {
    pub fn new(config: &SignalsConfig) -> Self {
        Self {
            tail_lines: config.tail_lines,
            timeout_ms: config.timeout_ms,
        }
    }

    pub fn tail_lines(&self) -> usize {
        self.tail_lines
    }

    /// Run the evaluator, if one is configured
    pub async fn run_evaluator(&self, hooks: &Hooks, ctx: &SignalContext, paths: &LoopPaths) -> Result<Option<Signal>> {
        self.run_hook(SignalSource::Evaluator, &hooks.evaluator, &paths.eval_log, ctx)
            .await
    }

    /// Run the feedback command, if one is configured
    pub async fn run_feedback(&self, hooks: &Hooks, ctx: &SignalContext, paths: &LoopPaths) -> Result<Option<Signal>> {
        self.run_hook(SignalSource::Feedback, &hooks.feedback, &paths.feedback_log, ctx)
            .await
    }

    async fn run_hook(&self, source: SignalSource, hook: &Hook, log: &Path, ctx: &SignalContext) -> Result<Option<Signal>> {
        let Some(command) = hook.command() else {
            return Ok(None);
        };

        let config = CommandConfig::new(command)
            .envs(ctx.env())
            .timeout_ms(self.timeout_ms)
            .current_dir(&ctx.working_dir);

        debug!("Running {} for {}: {}", source.name(), ctx.slug, command);
        let run = run_command(&config).await?;
        if !run.success() {
            warn!(
                "{} for {} exited with {} (recorded as a signal)",
                source.name(),
                ctx.slug,
                run.exit_label()
            );
        }

        record_run(log, source.name(), ctx.iteration, &run, Utc::now());

        Ok(Some(Signal {
            source,
            exit_label: run.exit_label(),
            success: run.success(),
            tail: tail_lines(&run.output, self.tail_lines),
        }))
    }

    /// Feedback artifacts: the configured image plus anything dropped in `artifacts/`
    pub fn artifacts(&self, hooks: &Hooks, ctx: &SignalContext, paths: &LoopPaths) -> Vec<PathBuf> {
        let mut found = Vec::new();

        if let Some(image) = &hooks.feedback_image {
            let image = if image.is_absolute() {
                image.clone()
            } else {
                ctx.working_dir.join(image)
            };
            if image.is_file() {
                found.push(image);
            } else {
                debug!("Configured feedback image {} not present", image.display());
            }
        }

        if let Ok(entries) = fs::read_dir(&paths.artifacts) {
            let mut dropped: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file())
                .collect();
            dropped.sort();
            for path in dropped {
                if !found.contains(&path) {
                    found.push(path);
                }
            }
        }

        found
    }

    /// Free-text review notes left for the next iteration
    pub fn agent_feedback(&self, paths: &LoopPaths) -> Option<String> {
        read_tail(&paths.agent_feedback, self.tail_lines)
    }
}

/// Header line written before each run in a log
pub fn log_header(name: &str, iteration: u32, exit_label: &str, at: DateTime<Utc>) -> String {
    format!(
        "=== {} iteration {} (exit {}) {} ===",
        name,
        iteration,
        exit_label,
        at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

fn record_run(log: &Path, name: &str, iteration: u32, run: &CommandRun, at: DateTime<Utc>) {
    let header = log_header(name, iteration, &run.exit_label(), at);
    if let Err(e) = append_log(log, &header, &run.output) {
        warn!("Failed to append {} log {}: {}", name, log.display(), e);
    }
}

/// Append a header and body to a log file
pub fn append_log(path: &Path, header: &str, body: &str) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", header)?;
    file.write_all(body.as_bytes())?;
    if !body.is_empty() && !body.ends_with('\n') {
        writeln!(file)?;
    }
    Ok(())
}

/// Last `n` lines of `text`
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Bounded tail of a file; `None` if it is missing or blank
pub fn read_tail(path: &Path, n: usize) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let tail = tail_lines(&content, n);
    if tail.trim().is_empty() { None } else { Some(tail) }
}

/// Exit label and bounded tail of the most recent run recorded in a log
pub fn last_logged_run(path: &Path, n: usize) -> Option<(String, String)> {
    let content = fs::read_to_string(path).ok()?;
    let lines: Vec<&str> = content.lines().collect();
    let (start, exit_label) = lines
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, line)| parse_log_header(line).map(|exit| (i, exit)))?;

    let body = lines[start + 1..].join("\n");
    Some((exit_label, tail_lines(&body, n)))
}

/// Exit label of a line written by [`log_header`]; `None` for anything else
fn parse_log_header(line: &str) -> Option<String> {
    let inner = line.strip_prefix("=== ")?.strip_suffix(" ===")?;
    let (head, stamp) = inner.rsplit_once(") ")?;
    DateTime::parse_from_rfc3339(stamp).ok()?;
    let (head, exit_label) = head.rsplit_once(" (exit ")?;
    let (name, iteration) = head.rsplit_once(" iteration ")?;
    if name.is_empty() || iteration.parse::<u32>().is_err() {
        return None;
    }
    Some(exit_label.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::loop_record::{InferenceMode, TargetSet};
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        record: LoopRecord,
        paths: LoopPaths,
    }

    fn fixture(hooks: Hooks) -> Fixture {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("docs");
        fs::create_dir_all(&target).unwrap();
        let loop_dir = temp.path().join("loops").join("docs");
        let paths = LoopPaths::new(&loop_dir);
        fs::create_dir_all(&paths.artifacts).unwrap();

        let record = LoopRecord::new(
            "goal",
            TargetSet::new(vec![target], vec![]),
            hooks,
            InferenceMode::LocalAssistant,
            3,
            0,
        );
        Fixture {
            _temp: temp,
            record,
            paths,
        }
    }

    fn collector(tail: usize) -> SignalCollector {
        SignalCollector::new(&SignalsConfig {
            tail_lines: tail,
            timeout_ms: 5000,
        })
    }

    #[test]
    fn test_tail_lines() {
        assert_eq!(tail_lines("a\nb\nc\nd\n", 2), "c\nd");
        assert_eq!(tail_lines("a\nb", 10), "a\nb");
        assert_eq!(tail_lines("", 5), "");
    }

    #[test]
    fn test_log_header_format() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(
            log_header("evaluator", 2, "0", at),
            "=== evaluator iteration 2 (exit 0) 2024-05-01T12:00:00Z ==="
        );
    }

    #[test]
    fn test_append_log_and_read_tail() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("eval.log");
        append_log(&log, "=== one ===", "first").unwrap();
        append_log(&log, "=== two ===", "second\n").unwrap();

        let content = fs::read_to_string(&log).unwrap();
        assert_eq!(content, "=== one ===\nfirst\n=== two ===\nsecond\n");
        assert_eq!(read_tail(&log, 2).unwrap(), "=== two ===\nsecond");
        assert!(read_tail(&temp.path().join("missing"), 2).is_none());
    }

    #[test]
    fn test_context_env() {
        let fx = fixture(Hooks::default());
        let ctx = SignalContext::new(&fx.record, &fx.paths);
        let env = ctx.env();
        assert!(env.contains(&(ENV_ITERATION.to_string(), "1".to_string())));
        assert!(env.contains(&(ENV_MAX_ITERATIONS.to_string(), "3".to_string())));
        assert!(env.iter().any(|(k, v)| k == ENV_SLUG && v == &fx.record.slug));
    }

    #[tokio::test]
    async fn test_absent_hook_produces_no_signal() {
        let fx = fixture(Hooks::default());
        let ctx = SignalContext::new(&fx.record, &fx.paths);
        let signal = collector(80).run_evaluator(&fx.record.hooks, &ctx, &fx.paths).await.unwrap();
        assert!(signal.is_none());
        assert!(!fx.paths.eval_log.exists());
    }

    #[tokio::test]
    async fn test_evaluator_output_is_logged_and_tailed() {
        let fx = fixture(Hooks {
            evaluator: Hook::Command("for i in 1 2 3 4 5; do echo line$i; done; echo iter=$TURNLOOP_ITERATION".to_string()),
            ..Hooks::default()
        });
        let ctx = SignalContext::new(&fx.record, &fx.paths);
        let signal = collector(2)
            .run_evaluator(&fx.record.hooks, &ctx, &fx.paths)
            .await
            .unwrap()
            .unwrap();

        assert!(signal.success);
        assert_eq!(signal.tail, "line5\niter=1");
        let log = fs::read_to_string(&fx.paths.eval_log).unwrap();
        assert!(log.starts_with("=== evaluator iteration 1 (exit 0)"));
        assert!(log.contains("line1"));
    }

    #[tokio::test]
    async fn test_failing_feedback_is_a_signal() {
        let fx = fixture(Hooks {
            feedback: Hook::Command("echo broken; exit 2".to_string()),
            ..Hooks::default()
        });
        let ctx = SignalContext::new(&fx.record, &fx.paths);
        let signal = collector(80)
            .run_feedback(&fx.record.hooks, &ctx, &fx.paths)
            .await
            .unwrap()
            .unwrap();

        assert!(!signal.success);
        assert_eq!(signal.exit_label, "2");
        assert_eq!(signal.source, SignalSource::Feedback);
        assert!(fs::read_to_string(&fx.paths.feedback_log).unwrap().contains("(exit 2)"));
    }

    #[test]
    fn test_artifacts_configured_and_dropped() {
        let fx = fixture(Hooks {
            feedback_image: Some(PathBuf::from("shot.png")),
            ..Hooks::default()
        });
        let ctx = SignalContext::new(&fx.record, &fx.paths);
        fs::write(ctx.working_dir.join("shot.png"), "png").unwrap();
        fs::write(fx.paths.artifacts.join("b.txt"), "b").unwrap();
        fs::write(fx.paths.artifacts.join("a.png"), "a").unwrap();

        let found = collector(80).artifacts(&fx.record.hooks, &ctx, &fx.paths);
        assert_eq!(found.len(), 3);
        assert!(found[0].ends_with("shot.png"));
        assert!(found[1].ends_with("a.png"));
        assert!(found[2].ends_with("b.txt"));
    }

    #[test]
    fn test_missing_configured_artifact_is_skipped() {
        let fx = fixture(Hooks {
            feedback_image: Some(PathBuf::from("/nowhere/shot.png")),
            ..Hooks::default()
        });
        let ctx = SignalContext::new(&fx.record, &fx.paths);
        assert!(collector(80).artifacts(&fx.record.hooks, &ctx, &fx.paths).is_empty());
    }

    #[test]
    fn test_agent_feedback() {
        let fx = fixture(Hooks::default());
        let c = collector(80);
        assert!(c.agent_feedback(&fx.paths).is_none());
        fs::write(&fx.paths.agent_feedback, "Headings are inconsistent.\n").unwrap();
        assert_eq!(c.agent_feedback(&fx.paths).unwrap(), "Headings are inconsistent.");
    }

    #[test]
    fn test_last_logged_run_picks_latest_section() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("eval.log");
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        append_log(&log, &log_header("evaluator", 1, "1", at), "old failure\n").unwrap();
        append_log(&log, &log_header("evaluator", 2, "0", at), "score: 9\nall good\n").unwrap();

        let (exit, tail) = last_logged_run(&log, 80).unwrap();
        assert_eq!(exit, "0");
        assert_eq!(tail, "score: 9\nall good");
        assert!(last_logged_run(&temp.path().join("missing.log"), 80).is_none());
    }

    #[test]
    fn test_last_logged_run_ignores_banner_lines_in_output() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("eval.log");
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        append_log(&log, &log_header("evaluator", 3, "2", at), "=== lint ===\nwarning: x\n=== tests ===\nfailed\n").unwrap();

        let (exit, tail) = last_logged_run(&log, 80).unwrap();
        assert_eq!(exit, "2");
        assert_eq!(tail, "=== lint ===\nwarning: x\n=== tests ===\nfailed");
    }
}
