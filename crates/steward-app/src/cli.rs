//! CLI argument definitions for the Steward binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use steward_core::StewardConfig;

/// Steward: runs browser action batches for automation tasks.
#[derive(Parser, Debug)]
#[command(name = "steward", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a JSON script of tasks and batches against a simulated browser.
    Run {
        /// Script file to replay.
        #[arg(short = 's', long = "script")]
        script: PathBuf,
    },
    /// Print the effective configuration.
    Config {
        /// Write the effective configuration to the config path.
        #[arg(long)]
        write: bool,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > STEWARD_CONFIG env var > ~/.steward/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        match self.config {
            Some(ref p) => p.clone(),
            None => StewardConfig::default_path(),
        }
    }

    /// Resolve the log filter directive.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config: &StewardConfig) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config.general.log_level.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let args = CliArgs::try_parse_from(["steward", "run", "--script", "demo.json"]).unwrap();
        match args.command {
            Command::Run { script } => assert_eq!(script, PathBuf::from("demo.json")),
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(args.config.is_none());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args =
            CliArgs::try_parse_from(["steward", "config", "-c", "/tmp/s.toml", "-l", "debug"])
                .unwrap();
        assert!(matches!(args.command, Command::Config { write: false }));
        assert_eq!(args.resolve_config_path(), PathBuf::from("/tmp/s.toml"));
        assert_eq!(args.resolve_log_level(&StewardConfig::default()), "debug");
    }

    #[test]
    fn test_log_level_falls_back_to_config() {
        let args = CliArgs::try_parse_from(["steward", "config", "--write"]).unwrap();
        let mut config = StewardConfig::default();
        config.general.log_level = "warn".to_string();
        assert_eq!(args.resolve_log_level(&config), "warn");
    }

    #[test]
    fn test_run_requires_script() {
        assert!(CliArgs::try_parse_from(["steward", "run"]).is_err());
    }
}
