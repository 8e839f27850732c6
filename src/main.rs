use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

mod cli;

use cli::Cli;
use cli::commands::{Commands, StartArgs};
use turnloop::agents::{agent_prompt, catalog_json, find_agents};
use turnloop::config::Config;
use turnloop::controller::{CancelTarget, IterationController, Outcome, StartRequest};
use turnloop::hook::{HookInput, HookResponse};

fn setup_logging(config: &Config) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(env!("CARGO_PKG_NAME"))
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("turnloop.log");

    // Setup env_logger with file output; RUST_LOG wins over the config level
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let level = config.log_level.as_deref().unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn resolve_project_dir(explicit: Option<&Path>, hook_cwd: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    if let Some(cwd) = hook_cwd.filter(|c| !c.trim().is_empty()) {
        return Ok(PathBuf::from(cwd));
    }
    std::env::current_dir().context("Failed to determine current directory")
}

fn controller(cli: &Cli, config: Config) -> Result<IterationController> {
    let project_dir = resolve_project_dir(cli.project_dir.as_deref(), None)?;
    IterationController::new(config, project_dir).context("Failed to create controller")
}

async fn run_application(cli: &Cli, config: Config) -> Result<()> {
    info!("Starting application: {:?}", cli.command);

    if cli.is_verbose() {
        eprintln!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Start(args) => handle_start_command(&controller(cli, config)?, args).await,
        Commands::Status { json } => handle_status_command(&controller(cli, config)?, *json, cli.is_verbose()),
        Commands::Cancel { slug, all } => handle_cancel_command(&controller(cli, config)?, slug.as_deref(), *all),
        Commands::Agents { catalog, agent, json } => handle_agents_command(&config, *catalog, agent.as_deref(), *json),
        Commands::Hook { session } => {
            handle_hook_command(cli, session.as_deref(), config).await;
            Ok(())
        }
    }
}

async fn handle_start_command(controller: &IterationController, args: &StartArgs) -> Result<()> {
    info!("Starting loop: {:?}", args);
    let request = StartRequest {
        goal: args.goal_text(),
        dirs: args.dirs.clone(),
        files: args.files.clone(),
        max_iterations: args.max_iterations,
        mode: args.mode.into(),
        eval_cmd: args.eval_cmd.clone(),
        feedback_cmd: args.feedback_cmd.clone(),
        feedback_image: args.feedback_image.clone(),
        feedback_agent: args.feedback_agent.clone(),
    };

    let outcome = controller.start(request).await.context("Failed to start loop")?;
    for warning in &outcome.warnings {
        eprintln!("{} {}", "Warning:".yellow(), warning);
    }
    let verb = if outcome.replaced { "Restarted:" } else { "Started:" };
    eprintln!("{} {}", verb.green(), outcome.slug);
    eprintln!("{}", outcome.prompt.status.dimmed());
    println!("{}", outcome.prompt.text);
    Ok(())
}

fn handle_status_command(controller: &IterationController, json: bool, verbose: bool) -> Result<()> {
    info!("Listing loops");
    let rows = match controller.status().context("Failed to read loop state")? {
        Outcome::Success(rows) => rows,
        Outcome::NothingToDo(reason) => {
            if json {
                println!("[]");
            } else {
                println!("{}", reason.yellow());
            }
            return Ok(());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for row in &rows {
        let idle = row
            .idle_secs
            .map(|secs| format!("{}s", secs))
            .unwrap_or_else(|| "?".to_string());
        println!(
            "{}  {}  {}  owner={}  idle={}  job={}",
            row.slug.cyan(),
            row.progress().bold(),
            row.mode,
            row.owner,
            idle,
            row.job
        );
        println!("    targets: {}", row.targets);
        if verbose {
            println!("    goal: {}", row.goal);
        } else if let Some(first) = row.goal.lines().next() {
            println!("    goal: {}", first);
        }
    }
    Ok(())
}

fn handle_cancel_command(controller: &IterationController, slug: Option<&str>, all: bool) -> Result<()> {
    let target = match (all, slug) {
        (true, _) => CancelTarget::All,
        (false, Some(slug)) => CancelTarget::Slug(slug.to_string()),
        (false, None) => eyre::bail!("Specify a loop slug or --all"),
    };
    info!("Cancelling: {:?}", target);

    match controller.cancel(target).context("Failed to cancel")? {
        Outcome::Success(count) => println!("{} {} loop(s)", "Cancelled:".red(), count),
        Outcome::NothingToDo(reason) => println!("{}", reason.yellow()),
    }
    Ok(())
}

fn handle_agents_command(config: &Config, catalog: bool, agent: Option<&str>, json: bool) -> Result<()> {
    let agents = find_agents(&config.agents.search_paths);
    if let Some(name) = agent {
        println!("{}", agent_prompt(&agents, name)?);
        return Ok(());
    }
    if json {
        println!("{}", catalog_json(&agents)?);
        return Ok(());
    }
    if agents.is_empty() {
        println!("{}", "No agents found".yellow());
        return Ok(());
    }
    for agent in &agents {
        if catalog {
            println!("{}", agent.catalog_line());
        } else {
            println!("{}", agent.name);
        }
    }
    Ok(())
}

/// Turn-end handler: never fails, prints JSON only to keep the host working
async fn handle_hook_command(cli: &Cli, session: Option<&str>, config: Config) {
    let mut raw = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut raw) {
        eprintln!("turnloop: failed to read hook input: {}", e);
        return;
    }
    let input = match HookInput::parse(&raw) {
        Ok(input) => input,
        Err(e) => {
            eprintln!("turnloop: ignoring malformed hook input: {}", e);
            return;
        }
    };

    let controller = match resolve_project_dir(cli.project_dir.as_deref(), input.cwd.as_deref())
        .and_then(|dir| IterationController::new(config, dir).context("Failed to create controller"))
    {
        Ok(controller) => controller,
        Err(e) => {
            eprintln!("turnloop: {:#}", e);
            return;
        }
    };

    let session_id = if input.session_id.trim().is_empty() {
        session.unwrap_or_default()
    } else {
        input.session_id.as_str()
    };
    info!(
        "Turn end for {:?} (continuation: {})",
        session_id,
        input.is_continuation()
    );
    if cli.is_verbose() {
        let kind = if input.is_continuation() {
            "continuing a blocked stop"
        } else {
            "first stop"
        };
        eprintln!("turnloop: turn end for session {:?} ({})", session_id, kind);
    }
    let report = controller.on_turn_end(session_id).await;
    info!("Turn end for {:?}: {} {:?}", session_id, report.state, report.slug);
    for warning in &report.warnings {
        eprintln!("turnloop: {}", warning);
    }

    if let Some(response) = HookResponse::from_directive(&report.directive) {
        match response.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("turnloop: failed to encode hook response: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();
    let is_hook = matches!(cli.command, Commands::Hook { .. });

    // Load configuration; the hook must never fail the host's turn
    let config = match Config::load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) if is_hook => {
            eprintln!("turnloop: {:#}; using defaults", e);
            Config::default()
        }
        Err(e) => return Err(e.wrap_err("Failed to load configuration")),
    };

    if let Err(e) = setup_logging(&config) {
        if !is_hook {
            return Err(e.wrap_err("Failed to setup logging"));
        }
        eprintln!("turnloop: {:#}", e);
    }

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, config).await.context("Application failed")?;

    Ok(())
}
