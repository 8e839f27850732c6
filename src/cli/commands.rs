//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - start: begin an improvement loop on a target set
//! - status: list active loops
//! - cancel: remove one loop or all of them
//! - hook: handle the host's turn-end event (JSON on stdin)
//! - agents: list the feedback-agent catalog

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use turnloop::domain::InferenceMode;

/// Turnloop - keep an assistant iterating on a target set, one turn at a time
#[derive(Parser, Debug)]
#[command(name = "turnloop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Project directory that holds the loop state (defaults to the current directory)
    #[arg(short = 'C', long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start (or restart) a loop and print the first prompt
    Start(StartArgs),

    /// List active loops
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Cancel a loop by slug (or unique prefix), or every loop with --all
    Cancel {
        /// Loop slug or prefix
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        slug: Option<String>,

        /// Cancel all loops
        #[arg(short, long)]
        all: bool,
    },

    /// Handle a turn-end event from the host (reads JSON on stdin)
    Hook {
        /// Session id to use when the event does not carry one
        #[arg(long)]
        session: Option<String>,
    },

    /// List feedback agents found in the configured search paths
    Agents {
        /// Include descriptions
        #[arg(long, conflicts_with_all = ["agent", "json"])]
        catalog: bool,

        /// Print the full prompt of one agent
        #[arg(long, value_name = "NAME", conflicts_with = "json")]
        agent: Option<String>,

        /// Print name, description, model, prompt and source as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct StartArgs {
    /// What the loop should achieve
    #[arg(required = true, num_args = 1..)]
    pub goal: Vec<String>,

    /// Target directory (repeatable)
    #[arg(short, long = "dir")]
    pub dirs: Vec<PathBuf>,

    /// Target file (repeatable)
    #[arg(short, long = "file")]
    pub files: Vec<PathBuf>,

    /// Iteration budget; 0 means unbounded
    #[arg(short, long)]
    pub max_iterations: Option<u32>,

    /// Who makes each change
    #[arg(long, value_enum, default_value_t = ModeArg::Local)]
    pub mode: ModeArg,

    /// Evaluator command run before each change
    #[arg(long)]
    pub eval_cmd: Option<String>,

    /// Feedback command run after each change
    #[arg(long)]
    pub feedback_cmd: Option<String>,

    /// Image produced by the feedback command
    #[arg(long)]
    pub feedback_image: Option<PathBuf>,

    /// Review agent consulted after each change
    #[arg(long)]
    pub feedback_agent: Option<String>,
}

impl StartArgs {
    /// Goal words joined back into one string
    pub fn goal_text(&self) -> String {
        self.goal.join(" ")
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    /// The host's own assistant makes the change
    Local,
    /// The configured external engine makes the change
    External,
}

impl From<ModeArg> for InferenceMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Local => InferenceMode::LocalAssistant,
            ModeArg::External => InferenceMode::ExternalEngine,
        }
    }
}
