pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use markup_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};
use markup_core::domain::estimate::EstimateStatus;
use markup_core::pricing::reconcile::PriceBasis;

use crate::commands::explain::ExplainArgs;
use crate::commands::CommandResult;
use crate::commands::reconcile::ReconcileArgs;

#[derive(Debug, Parser)]
#[command(
    name = "markup",
    about = "Job estimate markup reconciliation CLI",
    long_about = "Resolve pricing multipliers for exported job estimates, apply branch tax, \
                  score recorded prices against expected prices, and summarize per branch.",
    after_help = "Examples:\n  markup reconcile --input estimates.json\n  \
                  markup reconcile --input estimates.json --json --status sold\n  \
                  markup explain --input estimates.json --id 4417\n  \
                  markup config --log-level debug"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a markup.toml config file")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override the configured log level")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Resolve, reconcile, and aggregate every estimate in an export")]
    Reconcile {
        #[arg(long, help = "Estimate export (JSON array or API envelope)")]
        input: PathBuf,
        #[arg(long, help = "Emit the full machine-readable batch report")]
        json: bool,
        #[arg(long, help = "Only keep estimates whose branch matches this name")]
        branch: Option<String>,
        #[arg(long = "status", help = "Keep estimates with this status (repeatable)")]
        statuses: Vec<EstimateStatus>,
        #[arg(long, help = "Compare against final_price or adjusted_price")]
        price_basis: Option<PriceBasis>,
    },
    #[command(about = "Show the rule trace, tax, and reconciliation for one estimate")]
    Explain {
        #[arg(long, help = "Estimate export (JSON array or API envelope)")]
        input: PathBuf,
        #[arg(long, help = "Estimate id to explain")]
        id: String,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config {
        #[arg(long = "status", help = "Preview a status filter override (repeatable)")]
        statuses: Vec<EstimateStatus>,
        #[arg(long, help = "Preview a price basis override")]
        price_basis: Option<PriceBasis>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Reconcile { .. } => "reconcile",
            Self::Explain { .. } => "explain",
            Self::Config { .. } => "config",
        }
    }

    fn overrides(&self) -> ConfigOverrides {
        match self {
            Self::Reconcile { statuses, price_basis, .. }
            | Self::Config { statuses, price_basis } => ConfigOverrides {
                statuses: (!statuses.is_empty()).then(|| statuses.clone()),
                price_basis: *price_basis,
                ..ConfigOverrides::default()
            },
            Self::Explain { .. } => ConfigOverrides::default(),
        }
    }
}

impl Cli {
    fn load_options(&self, overrides: ConfigOverrides) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides { log_level: self.log_level.clone(), ..overrides },
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let options = cli.load_options(cli.command.overrides());

    let result = match commands::load_config(cli.command.name(), options.clone()) {
        Ok(config) => {
            if let Err(error) = init_logging(&config) {
                eprintln!("logging disabled: {error:#}");
            }
            dispatch(cli.command, &config, &options)
        }
        Err(failure) => failure,
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

fn dispatch(command: Command, config: &AppConfig, options: &LoadOptions) -> CommandResult {
    match command {
        Command::Reconcile { input, json, branch, .. } => {
            commands::reconcile::run(&ReconcileArgs { input, json, branch }, config)
        }
        Command::Explain { input, id } => {
            commands::explain::run(&ExplainArgs { input, id }, config)
        }
        Command::Config { .. } => CommandResult::ok(commands::config::run(config, options)),
    }
}

/// Logs go to stderr so stdout stays parseable.
fn init_logging(config: &AppConfig) -> anyhow::Result<()> {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let installed = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|error| anyhow!("{error}")).context("install tracing subscriber")
}
