//! CLI command definitions and handlers

mod analyze;
mod init;
mod prompt;
mod rules;
mod run;
mod status;

use crate::config::{load_config_file, load_project_config, ProjectConfig};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Process exit codes
pub mod exit {
    /// Clean analysis, or a run that completed with every gate passing
    pub const OK: i32 = 0;
    /// Violations found but not executed
    pub const VIOLATIONS: i32 = 1;
    /// The user aborted the run
    pub const ABORTED: i32 = 2;
    /// The run ended at, or with an unresolved, failed verification
    pub const BLOCKED: i32 = 3;
    /// The command itself failed (bad path, unreadable config, ...)
    pub const ERROR: i32 = 4;
}

/// Parse and validate workers count (1-64)
fn parse_workers(s: &str) -> Result<usize, String> {
    let n: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if n == 0 {
        Err("workers must be at least 1".to_string())
    } else if n > 64 {
        Err("workers cannot exceed 64".to_string())
    } else {
        Ok(n)
    }
}

/// Parse a 1-based phase number
fn parse_phase(s: &str) -> Result<usize, String> {
    let n: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid phase number", s))?;
    if n == 0 {
        Err("phases are numbered from 1".to_string())
    } else {
        Ok(n)
    }
}

/// archplan - architectural conformance checks and phased refactoring
#[derive(Parser, Debug)]
#[command(name = "archplan")]
#[command(
    version,
    about = "Check a codebase against architectural rules and apply the fixes in verified phases",
    long_about = "archplan parses a repository into a module graph, classifies every file into \
an architectural layer and evaluates a pack of conformance rules. Violations are turned \
into a plan of ordered change units, grouped into priority phases, which can be applied \
interactively with a build/test gate between phases.",
    after_help = "\
Examples:
  archplan analyze                      Analyze the current directory
  archplan analyze path/to/repo -f json JSON output for scripting
  archplan plan --category layering     Plan fixes for layering rules only
  archplan run --verify-cmd 'cargo test'  Apply the plan, verifying each phase
  archplan run --yes                    Apply everything without prompts
  archplan status                       Summary of the last run"
)]
pub struct Cli {
    /// Path to repository (default: current directory)
    #[arg(global = true, default_value = ".")]
    pub path: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    /// Number of parallel workers (1-64)
    #[arg(long, global = true, value_parser = parse_workers)]
    pub workers: Option<usize>,

    /// Config file (default: archplan.toml or .archplanrc.json in the repository)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the module graph and report rule violations and health
    Analyze {
        /// Only rules in this category (repeatable)
        #[arg(long = "category", short = 'c')]
        categories: Vec<String>,

        /// Only this rule id (repeatable)
        #[arg(long = "rule")]
        rules: Vec<String>,

        /// Output format: text, json, markdown (or md)
        #[arg(long, short = 'f', default_value = "text", value_parser = ["text", "json", "markdown", "md"])]
        format: String,

        /// Evaluate every file even on very large repositories
        #[arg(long)]
        no_sampling: bool,
    },

    /// Synthesize a phased refactoring plan without touching any file
    Plan {
        #[arg(long = "category", short = 'c')]
        categories: Vec<String>,

        /// Output format: text, json, markdown (or md)
        #[arg(long, short = 'f', default_value = "text", value_parser = ["text", "json", "markdown", "md"])]
        format: String,

        /// Also write the rendered plan to this file
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Apply the plan phase by phase
    Run {
        #[arg(long = "category", short = 'c')]
        categories: Vec<String>,

        /// Print the plan and stop
        #[arg(long)]
        dry_run: bool,

        /// Start at this phase (1-based); earlier pending units are skipped
        #[arg(long, value_parser = parse_phase)]
        resume_phase: Option<usize>,

        /// Apply everything without prompting; abort on the first failure
        #[arg(long, short = 'y')]
        yes: bool,

        /// Verification command, run after every phase
        #[arg(long)]
        verify_cmd: Option<String>,

        /// Verification timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// List registered rules
    Rules {
        #[arg(long = "category", short = 'c')]
        categories: Vec<String>,
    },

    /// Show the summary of the persisted run
    Status,

    /// Write a commented archplan.toml template
    Init,
}

/// Run the parsed command; returns the process exit code
pub fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Init => init::run(&cli.path),
        Commands::Status => status::run(&cli.path),
        Commands::Rules { ref categories } => {
            let config = load_config(&cli.path, cli.config.as_deref())?;
            rules::run(&cli.path, &config, categories)
        }
        Commands::Analyze {
            ref categories,
            ref rules,
            ref format,
            no_sampling,
        } => {
            let config = load_config(&cli.path, cli.config.as_deref())?;
            analyze::analyze(
                &cli.path,
                &config,
                categories,
                rules,
                format,
                no_sampling,
                cli.workers,
            )
        }
        Commands::Plan {
            ref categories,
            ref format,
            ref output,
        } => {
            let config = load_config(&cli.path, cli.config.as_deref())?;
            analyze::plan(
                &cli.path,
                &config,
                categories,
                format,
                output.as_deref(),
                cli.workers,
            )
        }
        Commands::Run {
            ref categories,
            dry_run,
            resume_phase,
            yes,
            ref verify_cmd,
            timeout,
        } => {
            let mut config = load_config(&cli.path, cli.config.as_deref())?;
            if let Some(cmd) = verify_cmd {
                config.verify.command = split_command(cmd)?;
            }
            if timeout.is_some() {
                config.verify.timeout_secs = timeout;
            }
            if let Some(workers) = cli.workers {
                config.execution.workers = Some(workers);
            }
            run::run(
                &cli.path,
                &config,
                run::RunOptions {
                    categories: categories.clone(),
                    dry_run,
                    resume_phase,
                    yes,
                },
            )
        }
    }
}

/// Explicit `--config` file, or the repository's own config
fn load_config(repo: &Path, explicit: Option<&Path>) -> Result<ProjectConfig> {
    match explicit {
        Some(path) => load_config_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(load_project_config(repo)),
    }
}

/// Split a shell-like command line on whitespace, honoring single and
/// double quotes. No shell is involved when the command runs.
fn split_command(line: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_arg = false;
    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                in_arg = true;
            }
            None if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            None => {
                current.push(c);
                in_arg = true;
            }
        }
    }
    if quote.is_some() {
        anyhow::bail!("Unterminated quote in command: {}", line);
    }
    if in_arg {
        args.push(current);
    }
    Ok(args)
}
