//! Engine backed by a shell command such as `gptdiff-apply`.

use std::process::Stdio;

use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};

use super::{ContentEngine, ENV_GOAL_FILE, EngineOutcome, EngineRequest};
use crate::config::EngineConfig;
use crate::domain::job::JobState;
use crate::error::{Result, TurnloopError};
use crate::id::now_secs;
use crate::signals::collector::log_header;
use crate::signals::command::spawn_error;
use crate::signals::{CommandConfig, append_log, read_tail, run_command, tail_lines};
use crate::storage::write_atomic;

pub struct ShellEngine {
    command: String,
    timeout_ms: u64,
    tail_lines: usize,
}

impl ShellEngine {
    pub fn new(config: &EngineConfig, tail_lines: usize) -> Self {
        Self {
            command: config.command.clone(),
            timeout_ms: config.timeout_ms,
            tail_lines,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// First word of the command line
    fn program(&self) -> Option<&str> {
        self.command.split_whitespace().next()
    }

    fn command_config(&self, request: &EngineRequest) -> Result<CommandConfig> {
        write_atomic(&request.paths.engine_goal, &request.goal)?;
        Ok(CommandConfig::new(&self.command)
            .envs(request.context.env())
            .env(ENV_GOAL_FILE, request.paths.engine_goal.display().to_string())
            .timeout_ms(self.timeout_ms)
            .current_dir(&request.context.working_dir))
    }
}

#[async_trait]
impl ContentEngine for ShellEngine {
    fn name(&self) -> &str {
        self.program().unwrap_or("engine")
    }

    fn check_available(&self) -> Result<()> {
        let program = self
            .program()
            .ok_or_else(|| TurnloopError::DependencyMissing("engine.command is empty".to_string()))?;
        which::which("sh")
            .map_err(|_| TurnloopError::DependencyMissing("sh not found on PATH".to_string()))?;
        which::which(program)
            .map_err(|_| TurnloopError::DependencyMissing(format!("{} not found on PATH", program)))?;
        Ok(())
    }

    async fn apply(&self, request: &EngineRequest) -> Result<EngineOutcome> {
        let config = self.command_config(request)?;
        info!("Applying change for {} with {}", request.context.slug, self.name());

        let run = run_command(&config).await?;
        let header = log_header("engine", request.context.iteration, &run.exit_label(), Utc::now());
        if let Err(e) = append_log(&request.paths.engine_log, &header, &run.output) {
            warn!("Failed to append engine log: {}", e);
        }

        Ok(EngineOutcome {
            exit_code: run.exit_code,
            timed_out: run.timed_out,
            log_tail: tail_lines(&run.output, self.tail_lines),
        })
    }

    async fn launch(&self, request: &EngineRequest) -> Result<JobState> {
        let config = self.command_config(request)?;
        let paths = &request.paths;

        let header = log_header("engine", request.context.iteration, "launched", Utc::now());
        append_log(&paths.engine_log, &header, "")?;

        // The wrapper records the exit status so later passes need not own the child
        let exit_tmp = paths.engine_exit.with_extension("tmp");
        let wrapped = format!(
            "{{ {}\n}} >> {} 2>&1; echo $? > {} && mv {} {}",
            self.command,
            shell_quote(&paths.engine_log.display().to_string()),
            shell_quote(&exit_tmp.display().to_string()),
            shell_quote(&exit_tmp.display().to_string()),
            shell_quote(&paths.engine_exit.display().to_string()),
        );

        let mut cmd = CommandConfig {
            command: wrapped,
            ..config
        }
        .build()?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);

        let child = cmd.spawn().map_err(spawn_error)?;
        let pid = child
            .id()
            .ok_or_else(|| TurnloopError::Storage("engine exited before its pid was read".to_string()))?;
        info!("Launched {} for {} as pid {}", self.name(), request.context.slug, pid);

        Ok(JobState::Running {
            pid,
            started_at: now_secs(),
        })
    }

    fn collect(&self, request: &EngineRequest, job: &JobState) -> EngineOutcome {
        let exit_code = match job {
            JobState::Finished { exit_code, .. } => *exit_code,
            _ => None,
        };
        EngineOutcome {
            exit_code,
            timed_out: false,
            log_tail: read_tail(&request.paths.engine_log, self.tail_lines).unwrap_or_default(),
        }
    }
}

fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::probe_job;
    use crate::signals::SignalContext;
    use crate::storage::LoopPaths;
    use std::fs;
    use tempfile::TempDir;

    fn request(temp: &TempDir) -> EngineRequest {
        let target = temp.path().join("src");
        fs::create_dir_all(&target).unwrap();
        let paths = LoopPaths::new(&temp.path().join("loop"));
        fs::create_dir_all(&paths.artifacts).unwrap();
        EngineRequest {
            goal: "Add examples to the guide".to_string(),
            context: SignalContext {
                slug: "src-000000000000".to_string(),
                iteration: 2,
                max_iterations: 5,
                targets: target.display().to_string(),
                loop_dir: paths.dir.clone(),
                artifact_dir: paths.artifacts.clone(),
                working_dir: target,
            },
            paths,
        }
    }

    fn engine(command: &str) -> ShellEngine {
        ShellEngine::new(
            &EngineConfig {
                command: command.to_string(),
                background: false,
                timeout_ms: 5000,
            },
            80,
        )
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/tmp/a b"), "'/tmp/a b'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_check_available() {
        assert!(engine("sh -c true").check_available().is_ok());

        let err = engine("turnloop-no-such-engine --go").check_available().unwrap_err();
        assert!(matches!(err, TurnloopError::DependencyMissing(_)));
        assert!(err.to_string().contains("turnloop-no-such-engine"));

        assert!(engine("   ").check_available().is_err());
    }

    #[test]
    fn test_name_is_program() {
        assert_eq!(engine("gptdiff-apply --model x").name(), "gptdiff-apply");
    }

    #[tokio::test]
    async fn test_apply_reads_goal_file() {
        let temp = TempDir::new().unwrap();
        let request = request(&temp);

        let outcome = engine("cat \"$TURNLOOP_GOAL_FILE\"; echo iteration=$TURNLOOP_ITERATION")
            .apply(&request)
            .await
            .unwrap();

        assert!(outcome.success());
        assert!(outcome.log_tail.contains("Add examples to the guide"));
        assert!(outcome.log_tail.contains("iteration=2"));
        let log = fs::read_to_string(&request.paths.engine_log).unwrap();
        assert!(log.starts_with("=== engine iteration 2 (exit 0)"));
    }

    #[tokio::test]
    async fn test_apply_failure_is_reported() {
        let temp = TempDir::new().unwrap();
        let outcome = engine("echo nope; exit 4").apply(&request(&temp)).await.unwrap();
        assert!(!outcome.success());
        assert_eq!(outcome.exit_label(), "4");
    }

    #[tokio::test]
    async fn test_launch_and_probe() {
        let temp = TempDir::new().unwrap();
        let request = request(&temp);
        let engine = engine("echo background-run; exit 0");

        let job = engine.launch(&request).await.unwrap();
        assert!(job.is_running());

        let mut state = job;
        for _ in 0..100 {
            state = probe_job(&job, &request.paths, 99);
            if state.is_finished() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        assert_eq!(
            state,
            JobState::Finished {
                exit_code: Some(0),
                finished_at: 99
            }
        );
        let outcome = engine.collect(&request, &state);
        assert!(outcome.success());
        assert!(outcome.log_tail.contains("background-run"));
        assert!(!request.paths.engine_exit.with_extension("tmp").exists());
    }
}
