// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

/// Command-line arguments for `caseflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "caseflow",
    version,
    about = "Validate and run case models.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CASEFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Parse + validate a model file and print its plan item tree.
    Validate {
        /// Path to the model file (TOML).
        model: PathBuf,
    },

    /// Start a case on an in-memory engine, apply steps, print the result.
    Run {
        /// Path to the model file (TOML).
        model: PathBuf,

        /// Case key to start; defaults to the first case in the file.
        #[arg(long = "case", value_name = "KEY")]
        case_key: Option<String>,

        /// Initial case variable; the value is read as JSON, else as a string.
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_assignment)]
        vars: Vec<(String, Value)>,

        /// Step to apply after the start, in order.
        ///
        /// `trigger:<item>`, `start:<item>`, `enable:<item>`,
        /// `disable:<item>`, `suspend:<item>`, `resume:<item>`,
        /// `terminate:<item>`, `complete-stage:<item>`,
        /// `force-complete-stage:<item>`, `set:<name>=<value>`,
        /// `signal:<name>`, `jobs`, `complete-case`, `force-complete-case`,
        /// `terminate-case`.
        #[arg(long = "step", value_name = "OP[:ARG]")]
        steps: Vec<Step>,

        /// Also print the recorded history events.
        #[arg(long)]
        history: bool,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// One scripted operation of `caseflow run`.
///
/// Item arguments name a model item id; the step applies to its newest
/// live instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Trigger(String),
    Start(String),
    Enable(String),
    Disable(String),
    Suspend(String),
    Resume(String),
    Terminate(String),
    CompleteStage(String),
    ForceCompleteStage(String),
    Set(String, Value),
    Signal(String),
    /// Run every queued job, timers included, regardless of due time.
    Jobs,
    CompleteCase,
    ForceCompleteCase,
    TerminateCase,
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (op, arg) = match s.split_once(':') {
            Some((op, arg)) => (op.trim(), Some(arg.trim())),
            None => (s.trim(), None),
        };
        let required = |op: &str| match arg {
            Some(arg) if !arg.is_empty() => Ok(arg.to_string()),
            _ => Err(format!("step '{op}' needs an argument, e.g. '{op}:<item>'")),
        };

        match op {
            "trigger" => Ok(Step::Trigger(required(op)?)),
            "start" => Ok(Step::Start(required(op)?)),
            "enable" => Ok(Step::Enable(required(op)?)),
            "disable" => Ok(Step::Disable(required(op)?)),
            "suspend" => Ok(Step::Suspend(required(op)?)),
            "resume" => Ok(Step::Resume(required(op)?)),
            "terminate" => Ok(Step::Terminate(required(op)?)),
            "complete-stage" => Ok(Step::CompleteStage(required(op)?)),
            "force-complete-stage" => Ok(Step::ForceCompleteStage(required(op)?)),
            "set" => {
                let (name, value) = parse_assignment(&required(op)?)?;
                Ok(Step::Set(name, value))
            }
            "signal" => Ok(Step::Signal(required(op)?)),
            "jobs" => Ok(Step::Jobs),
            "complete-case" => Ok(Step::CompleteCase),
            "force-complete-case" => Ok(Step::ForceCompleteCase),
            "terminate-case" => Ok(Step::TerminateCase),
            other => Err(format!("unknown step '{other}'")),
        }
    }
}

/// Parse `name=value`. The value is read as JSON when it parses, so
/// `n=3` gives a number and `ok=true` a boolean; anything else is a string.
pub fn parse_assignment(s: &str) -> Result<(String, Value), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing variable name in '{s}'"));
    }
    let value = value.trim();
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
