use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::PathBuf;
use sweep_runner::{ExitPolicy, HarnessConfig, HarnessError};
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sweep",
    version,
    about = "Run an evaluator repeatedly and report per-position min/max"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExitPolicyArg {
    #[value(name = "fail")]
    Fail,
    #[value(name = "warn")]
    Warn,
    #[value(name = "ignore")]
    Ignore,
}

impl From<ExitPolicyArg> for ExitPolicy {
    fn from(value: ExitPolicyArg) -> Self {
        match value {
            ExitPolicyArg::Fail => ExitPolicy::Fail,
            ExitPolicyArg::Warn => ExitPolicy::Warn,
            ExitPolicyArg::Ignore => ExitPolicy::Ignore,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
struct ConfigArgs {
    /// YAML or JSON harness config; flags and environment override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, env = "SWEEP_EVALUATOR")]
    evaluator: Option<PathBuf>,
    #[arg(long, env = "SWEEP_TRIALS")]
    trials: Option<usize>,
    #[arg(long, env = "SWEEP_ARITY")]
    arity: Option<usize>,
    #[arg(long, env = "SWEEP_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,
    #[arg(long, value_enum)]
    exit_policy: Option<ExitPolicyArg>,
    #[arg(long)]
    allow_non_finite: bool,
    #[arg(long, env = "SWEEP_JOBS")]
    jobs: Option<usize>,
    /// Keep every parsed sample; `run --json` then includes per-trial records.
    #[arg(long)]
    keep_samples: bool,
    /// Arguments passed to the evaluator.
    #[arg(last = true)]
    evaluator_args: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    Run {
        #[command(flatten)]
        config: ConfigArgs,
        /// Write one JSON record per trial, including its parsed sample.
        #[arg(long)]
        samples_out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    Describe {
        #[command(flatten)]
        config: ConfigArgs,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                let (code, details) = error_details(&err);
                emit_json(&json_error(code, format!("{:#}", err), details));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            config,
            samples_out,
            json,
        } => {
            let mut resolved = resolve_config(&config)?;
            if samples_out.is_some() {
                resolved.keep_samples = true;
            }
            let summary = sweep_runner::run_harness(&resolved)?;
            if let Some(path) = &samples_out {
                sweep_runner::write_samples_jsonl(path, &summary)
                    .with_context(|| format!("writing samples to {}", path.display()))?;
            }
            if json {
                return Ok(Some(sweep_runner::summary_to_json(
                    &summary,
                    resolved.keep_samples,
                )));
            }
            print!("{}", sweep_runner::render_text(&summary.state));
        }
        Commands::Describe { config, json } => {
            let resolved = resolve_config(&config)?;
            resolved.validate()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "config": serde_json::to_value(&resolved)?,
                })));
            }
            print_config(&resolved);
        }
    }
    Ok(None)
}

fn resolve_config(args: &ConfigArgs) -> Result<HarnessConfig> {
    let mut config = match (&args.config, &args.evaluator) {
        (Some(path), _) => HarnessConfig::from_file(path)?,
        (None, Some(evaluator)) => HarnessConfig::new(evaluator),
        (None, None) => {
            return Err(anyhow!(
                "no evaluator configured: pass --evaluator, set SWEEP_EVALUATOR, or use --config"
            ))
        }
    };
    if let Some(evaluator) = &args.evaluator {
        config.evaluator = evaluator.clone();
    }
    if let Some(trials) = args.trials {
        config.trial_count = trials;
    }
    if let Some(arity) = args.arity {
        config.arity = arity;
    }
    if let Some(timeout) = args.timeout_secs {
        config.timeout_secs = Some(timeout);
    }
    if let Some(policy) = args.exit_policy {
        config.exit_policy = policy.into();
    }
    if args.allow_non_finite {
        config.allow_non_finite = true;
    }
    if let Some(jobs) = args.jobs {
        config.jobs = jobs;
    }
    if args.keep_samples {
        config.keep_samples = true;
    }
    if !args.evaluator_args.is_empty() {
        config.args = args.evaluator_args.clone();
    }
    Ok(config)
}

fn print_config(config: &HarnessConfig) {
    println!("evaluator: {}", config.evaluator.display());
    if !config.args.is_empty() {
        println!("args: {:?}", config.args);
    }
    println!("trials: {}", config.trial_count);
    println!("arity: {}", config.arity);
    match config.timeout_secs {
        Some(secs) => println!("timeout_secs: {}", secs),
        None => println!("timeout_secs: none"),
    }
    println!("exit_policy: {}", config.exit_policy);
    println!("allow_non_finite: {}", config.allow_non_finite);
    println!("jobs: {}", config.jobs);
    println!("keep_samples: {}", config.keep_samples);
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn error_details(err: &anyhow::Error) -> (&'static str, Value) {
    match err.downcast_ref::<HarnessError>() {
        Some(harness) => (
            harness.code(),
            json!({ "trial": harness.trial_index() }),
        ),
        None => ("command_failed", json!({})),
    }
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. } | Commands::Describe { json, .. } => *json,
    }
}
