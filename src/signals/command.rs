//! Shell command runner for hooks and the external engine.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;

use crate::error::{Result, TurnloopError};

/// Configuration for one shell command run
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// The command line passed to `sh -c`
    pub command: String,
    /// Environment variables to set
    pub env: Vec<(String, String)>,
    /// Timeout in milliseconds (default: 30000)
    pub timeout_ms: u64,
    /// Working directory; inherits the current one when unset
    pub working_dir: Option<PathBuf>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            env: Vec::new(),
            timeout_ms: 30000,
            working_dir: None,
        }
    }
}

impl CommandConfig {
    /// Create a new command config with the given command
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Add several environment variables
    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    /// Set the timeout in milliseconds
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Set the working directory
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Build the `sh -c` invocation without spawning it
    pub fn build(&self) -> Result<Command> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.command);

        if let Some(dir) = &self.working_dir {
            if !dir.is_dir() {
                return Err(TurnloopError::Validation(format!(
                    "working directory does not exist: {}",
                    dir.display()
                )));
            }
            cmd.current_dir(dir);
        }

        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        Ok(cmd)
    }
}

/// Result of one finished (or timed out) command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRun {
    pub command: String,
    /// `None` when killed by a signal or timed out
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// stdout followed by stderr
    pub output: String,
    pub duration_ms: u64,
}

impl CommandRun {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Short exit description for log headers
    pub fn exit_label(&self) -> String {
        match (self.timed_out, self.exit_code) {
            (true, _) => "timeout".to_string(),
            (false, Some(code)) => code.to_string(),
            (false, None) => "signal".to_string(),
        }
    }
}

/// Map a spawn failure of `sh` itself to a missing dependency
pub(crate) fn spawn_error(e: std::io::Error) -> TurnloopError {
    if e.kind() == ErrorKind::NotFound {
        TurnloopError::DependencyMissing("sh not found; hook and engine commands need a POSIX shell".to_string())
    } else {
        TurnloopError::Io(e)
    }
}

/// Run a command to completion, capturing combined output.
///
/// Non-zero exits and timeouts are reported in the returned `CommandRun`;
/// only failing to start the shell is an error.
pub async fn run_command(config: &CommandConfig) -> Result<CommandRun> {
    let mut cmd = config.build()?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let child = cmd.spawn().map_err(spawn_error)?;

    // Apply timeout
    let timeout = tokio::time::Duration::from_millis(config.timeout_ms);
    let run = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => {
            let output = result?;
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.is_empty() {
                if !text.is_empty() && !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&stderr);
            }
            CommandRun {
                command: config.command.clone(),
                exit_code: output.status.code(),
                timed_out: false,
                output: text,
                duration_ms: started.elapsed().as_millis() as u64,
            }
        }
        Err(_) => CommandRun {
            command: config.command.clone(),
            exit_code: None,
            timed_out: true,
            output: format!("Command timed out after {}ms", config.timeout_ms),
            duration_ms: started.elapsed().as_millis() as u64,
        },
    };

    Ok(run)
}
