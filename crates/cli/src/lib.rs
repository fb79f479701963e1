pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use matchgate_core::config::{AppConfig, LoadOptions};

#[derive(Debug, Parser)]
#[command(
    name = "matchgate",
    about = "Matchgate invoice matching and approval CLI",
    long_about = "Match invoices against purchase orders and goods receipts, plan approval workflows, and inspect configuration.",
    after_help = "Examples:\n  matchgate match --bundle invoice.json --three-way\n  matchgate plan --bundle invoice.json --tier basic --risk 0.2\n  matchgate config"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to matchgate.toml (defaults to ./matchgate.toml)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Match the bundle's invoice and print the match result as JSON")]
    Match {
        #[arg(long, help = "JSON document bundle: invoice, purchase_orders, receipts")]
        bundle: PathBuf,
        #[arg(long, help = "Tolerance profile key (ERP or company id)")]
        profile: Option<String>,
        #[arg(long, help = "Also compare against goods receipts")]
        three_way: bool,
    },
    #[command(about = "Match the bundle's invoice and plan its approval workflow")]
    Plan {
        #[arg(long, help = "JSON document bundle: invoice, purchase_orders, receipts")]
        bundle: PathBuf,
        #[arg(long, help = "Company tier whose approval thresholds apply")]
        tier: String,
        #[arg(long, default_value_t = 0.0, help = "Externally computed fraud/risk score in [0, 1]")]
        risk: f64,
        #[arg(long, help = "Tolerance profile key (ERP or company id)")]
        profile: Option<String>,
        #[arg(long, help = "Also compare against goods receipts")]
        three_way: bool,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
}

fn init_logging(config: &AppConfig) {
    use matchgate_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_max_level(log_level);

    let installed = match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
    if installed.is_err() {
        tracing::debug!(event_name = "system.cli.logging_already_initialized", "subscriber exists");
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(LoadOptions {
        config_path: cli.config.clone(),
        require_file: cli.config.is_some(),
        ..LoadOptions::default()
    }) {
        Ok(config) => config,
        Err(error) => {
            let result = commands::CommandResult::failure(
                command_name(&cli.command),
                "config_validation",
                error.to_string(),
                2,
            );
            println!("{}", result.output);
            return result.exit();
        }
    };
    init_logging(&config);

    let result = match cli.command {
        Command::Match { bundle, profile, three_way } => {
            commands::matching::run(&config, &bundle, profile.as_deref(), three_way)
        }
        Command::Plan { bundle, tier, risk, profile, three_way } => commands::plan::run(
            &config,
            &bundle,
            commands::plan::PlanArgs { tier, risk, profile, three_way },
        ),
        Command::Config => {
            commands::CommandResult::text(commands::config::run(&config, cli.config.as_deref()))
        }
    };

    println!("{}", result.output);
    result.exit()
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Match { .. } => "match",
        Command::Plan { .. } => "plan",
        Command::Config => "config",
    }
}
