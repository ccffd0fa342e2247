//! `playfile` command line: run, validate and list playfile tasks.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::warn;

use playfile::core::invariants::{unknown_agent_refs, unresolved_context_refs};
use playfile::events::{EventSink, FanOut, TracingSink};
use playfile::exit_codes;
use playfile::io::agent::CliAgentClient;
use playfile::io::config::load_config;
use playfile::io::playfile::{DEFAULT_PLAYFILE, load_playfile};
use playfile::io::run_log::RunLog;
use playfile::io::validation::ShellValidationRunner;
use playfile::logging;
use playfile::report::{ConsolePresenter, RunSummary, error_chain, render_report};
use playfile::task::{TaskError, TaskRunner};
use playfile::workflow::Playfile;

#[derive(Parser)]
#[command(
    name = "playfile",
    version,
    about = "Run multi-step agent workflows declared in a playfile"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a task's steps in order.
    Run {
        /// Task id to run.
        task: String,
        /// Playfile to load.
        #[arg(short, long, default_value = DEFAULT_PLAYFILE)]
        file: PathBuf,
        /// Input for `{{ inputs.<key> }}` placeholders, as `key=value`. Repeatable.
        #[arg(short, long = "input", value_parser = parse_input)]
        inputs: Vec<(String, String)>,
        /// File whose contents are added to every step prompt as project context.
        #[arg(long)]
        context_file: Option<PathBuf>,
        /// Runner config (defaults to `.playfile/config.toml` next to the playfile).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Do not record events under `.playfile/runs/`.
        #[arg(long)]
        no_run_log: bool,
    },
    /// Check a playfile against the schema and semantic rules.
    Validate {
        #[arg(short, long, default_value = DEFAULT_PLAYFILE)]
        file: PathBuf,
    },
    /// List tasks with their descriptions and step counts.
    List {
        #[arg(short, long, default_value = DEFAULT_PLAYFILE)]
        file: PathBuf,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            task,
            file,
            inputs,
            context_file,
            config,
            no_run_log,
        } => cmd_run(&RunArgs {
            task,
            file,
            inputs: inputs.into_iter().collect(),
            context_file,
            config,
            no_run_log,
        }),
        Command::Validate { file } => cmd_validate(&file),
        Command::List { file } => cmd_list(&file),
    }
}

struct RunArgs {
    task: String,
    file: PathBuf,
    inputs: BTreeMap<String, String>,
    context_file: Option<PathBuf>,
    config: Option<PathBuf>,
    no_run_log: bool,
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let playfile = load_playfile(&args.file)?;
    let base_dir = base_dir(&args.file);
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| base_dir.join(".playfile").join("config.toml"));
    let config = load_config(&config_path)?;
    let task = playfile.task(&args.task).ok_or_else(|| {
        anyhow!(
            "task '{}' not found; available tasks: {}",
            args.task,
            playfile.task_ids().join(", ")
        )
    })?;
    let project_context = match &args.context_file {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("read context file {}", path.display()))?,
        ),
        None => None,
    };

    let agent_client = CliAgentClient::new(config.agent.clone(), &base_dir);
    let validator =
        ShellValidationRunner::new(config.validation_timeout(), config.validation_output_limit_bytes);
    let presenter = ConsolePresenter::stderr();
    let run_log = if args.no_run_log {
        None
    } else {
        Some(RunLog::create(&base_dir, &task.id)?)
    };

    let mut sinks = FanOut::new().with(&TracingSink).with(&presenter);
    if let Some(log) = &run_log {
        sinks = sinks.with(log as &dyn EventSink);
    }

    let mut runner = TaskRunner::new(&playfile, &base_dir, &agent_client, &validator, &sinks, &config);
    if let Some(text) = &project_context {
        runner = runner.with_project_context(text);
    }
    if let Some(log) = &run_log {
        runner = runner.with_log_dir(log.paths().logs_dir.clone());
    }

    let result = runner.run(task, &args.inputs);

    if let Some(log) = &run_log {
        let summary = RunSummary::new(log.run_id(), &task.id, log.elapsed_ms(), &result);
        if let Err(err) = log.write_summary(&summary) {
            warn!(err = %format!("{err:#}"), "failed to write run summary");
        }
        eprintln!("run log: {}", log.paths().dir.display());
    }

    match &result {
        Ok(report) => {
            print!("{}", render_report(report));
            Ok(exit_codes::OK)
        }
        Err(err @ TaskError::Configuration(_)) => {
            eprintln!("{}", error_chain(err));
            Ok(exit_codes::INVALID)
        }
        Err(err @ TaskError::Step { .. }) => {
            eprintln!("{}", error_chain(err));
            Ok(exit_codes::TASK_FAILED)
        }
    }
}

fn cmd_validate(file: &Path) -> Result<i32> {
    let playfile = load_playfile(file)?;
    let errors = unknown_agent_refs(&playfile);
    if !errors.is_empty() {
        bail!("invalid playfile {}:\n- {}", file.display(), errors.join("\n- "));
    }
    for task in &playfile.tasks {
        for warning in unresolved_context_refs(task) {
            eprintln!("warning: {warning}");
        }
    }
    println!(
        "{} is valid: {} agent(s), {} task(s)",
        file.display(),
        playfile.agents.len(),
        playfile.tasks.len()
    );
    Ok(exit_codes::OK)
}

fn cmd_list(file: &Path) -> Result<i32> {
    let playfile = load_playfile(file)?;
    print!("{}", render_task_list(&playfile));
    Ok(exit_codes::OK)
}

fn render_task_list(playfile: &Playfile) -> String {
    if playfile.tasks.is_empty() {
        return "no tasks defined\n".to_string();
    }
    let width = playfile
        .tasks
        .iter()
        .map(|task| task.id.len())
        .max()
        .unwrap_or(0);
    playfile
        .tasks
        .iter()
        .map(|task| {
            format!(
                "{:<width$}  {} ({} step(s))\n",
                task.id,
                task.description,
                task.steps.len()
            )
        })
        .collect()
}

/// Directory containing the playfile; relative paths resolve against it.
fn base_dir(file: &Path) -> PathBuf {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn parse_input(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("input key cannot be empty in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}
