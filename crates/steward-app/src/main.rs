//! Steward application binary - composition root.
//!
//! 1. Parse the CLI and load configuration from TOML
//! 2. Initialise tracing
//! 3. Either print the configuration or replay a script against a simulated
//!    browser, printing one JSON line per batch outcome

mod cli;
mod script;
mod session;
mod sim;

use clap::Parser;
use steward_core::StewardConfig;

use crate::cli::{CliArgs, Command};
use crate::script::{Script, ScriptRunner};
use crate::session::Session;

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let config = if config_file.exists() {
        StewardConfig::load(&config_file)?
    } else {
        StewardConfig::default()
    };
    init_tracing(&args.resolve_log_level(&config));

    tracing::info!("Starting Steward v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), exists = config_file.exists(), "Configuration resolved");

    match args.command {
        Command::Config { write } => {
            print!("{}", config.to_toml_string()?);
            if write {
                config.save(&config_file)?;
            }
        }
        Command::Run { script } => {
            let parsed = Script::load(&script)?;
            let session = Session::new(&config)?;

            let result = ScriptRunner::new(&session).run(&parsed).await;
            session.service.shutdown();

            for report in result? {
                println!("{}", serde_json::to_string(&report)?);
            }
            for summary in session.service.task_summaries() {
                tracing::info!(
                    task_id = %summary.id,
                    title = %summary.title,
                    state = %summary.state,
                    "Task summary"
                );
            }
            tracing::info!(
                entries = session.journal.len(),
                open_tabs = session.browser.tab_ids().len(),
                "Session finished"
            );
        }
    }

    Ok(())
}
