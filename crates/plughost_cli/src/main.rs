//! Command-line front end for the plughost lifecycle manager.
//!
//! # Responsibility
//! - Resolve host configuration from file, environment, and flags.
//! - Run one lifecycle operation and print its structured result as JSON.
//!
//! # Invariants
//! - Every invocation scans the bundle directory first and shuts the host
//!   down before exiting.
//! - Exit status is 1 whenever the printed result reports failure.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use plughost_core::{
    init_logging, init_stderr_logging, BundleSource, ConfigMap, ExtensionFactories, HostConfig,
    LifecycleController, LifecycleError, OperationResult,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Install, run, and manage host extensions.
#[derive(Parser, Debug)]
#[command(name = "plughost")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Managed bundle directory.
    #[arg(long, global = true)]
    bundle_dir: Option<PathBuf>,

    /// JSON host configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write rolling logs to this directory instead of stderr.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// trace|debug|info|warn|error
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered extensions.
    List,
    /// Show one extension.
    Get { name: String },
    /// Install a bundle file.
    Install { path: PathBuf },
    /// Uninstall an extension and delete its bundle.
    Uninstall { name: String },
    /// Replace an extension with a new bundle.
    Update { name: String, path: PathBuf },
    /// Allow an extension to execute.
    Enable { name: String },
    /// Block an extension from executing.
    Disable { name: String },
    /// Execute an extension with a JSON object of parameters.
    Execute { name: String, params: Option<String> },
    /// Show an extension's configuration, or replace it with a JSON object.
    Config { name: String, configuration: Option<String> },
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    let logging = match &config.log_dir {
        Some(dir) => init_logging(&config.log_level, &absolute(dir)?.to_string_lossy()),
        None => init_stderr_logging(&config.log_level),
    };
    logging
        .map_err(anyhow::Error::msg)
        .context("failed to initialize logging")?;

    let controller = LifecycleController::new(&config, ExtensionFactories::with_builtins());
    let scanned = controller
        .load_all()
        .context("failed to scan bundle directory")?;
    info!(
        "event=cli_start module=cli status=ok bundle_dir={} loaded={}",
        config.bundle_dir.display(),
        scanned.iter().filter(|entry| entry.result.is_success()).count()
    );

    let outcome = run(&controller, args.command);
    controller.shutdown();
    let result = outcome?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn resolve_config(args: &Args) -> Result<HostConfig> {
    let mut config = match &args.config {
        Some(path) => HostConfig::from_file(path)?,
        None => HostConfig::default(),
    }
    .with_env_overrides();

    if let Some(dir) = &args.bundle_dir {
        config.bundle_dir = dir.clone();
    }
    if let Some(dir) = &args.log_dir {
        config.log_dir = Some(dir.clone());
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

fn run(controller: &LifecycleController, command: Command) -> Result<OperationResult> {
    let result = match command {
        Command::List => {
            let extensions = controller.list();
            OperationResult::success_with_data(
                format!("{} extension(s)", extensions.len()),
                serde_json::to_value(extensions)?,
            )
        }
        Command::Get { name } => match controller.get(&name) {
            Some(info) => OperationResult::success_with_data(
                format!("found {name}"),
                serde_json::to_value(info)?,
            ),
            None => OperationResult::failure(&LifecycleError::NotFound(name)),
        },
        Command::Install { path } => controller.install(BundleSource::from_path(path)),
        Command::Uninstall { name } => controller.uninstall(&name),
        Command::Update { name, path } => controller.update(&name, BundleSource::from_path(path)),
        Command::Enable { name } => controller.enable(&name),
        Command::Disable { name } => controller.disable(&name),
        Command::Execute { name, params } => {
            controller.execute(&name, parse_object(params.as_deref(), "params")?)
        }
        Command::Config {
            name,
            configuration: None,
        } => controller.get_configuration(&name),
        Command::Config {
            name,
            configuration: Some(raw),
        } => controller.set_configuration(&name, parse_object(Some(&raw), "configuration")?),
    };
    Ok(result)
}

fn parse_object(raw: Option<&str>, what: &str) -> Result<ConfigMap> {
    let Some(raw) = raw else {
        return Ok(ConfigMap::new());
    };
    match serde_json::from_str::<Value>(raw).with_context(|| format!("{what} is not valid JSON"))? {
        Value::Object(map) => Ok(map),
        other => bail!("{what} must be a JSON object, got {other}"),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()
        .context("failed to resolve current directory")?
        .join(path))
}
