//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for Estuary using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// Estuary - clinical ingestion pipeline
#[derive(Parser, Debug)]
#[command(name = "estuary")]
#[command(version, about, long_about = None)]
#[command(author = "Estuary Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "estuary.toml", env = "ESTUARY_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "ESTUARY_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the configured ingestion jobs
    Run(commands::run::RunArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),

    /// Initialize a new configuration file
    Init(commands::init::InitArgs),

    /// Work the concept review queue
    Review(commands::review::ReviewArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use commands::review::ReviewCommand;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["estuary", "run"]);
        assert_eq!(cli.config, "estuary.toml");
        assert!(matches!(cli.command, Commands::Run(_)));
    }

    #[test]
    fn test_cli_parse_run_with_jobs() {
        let cli = Cli::parse_from(["estuary", "run", "--dry-run", "--job", "a", "--job", "b"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.dry_run);
        assert_eq!(args.job, vec!["a", "b"]);
    }

    #[test]
    fn test_cli_parse_with_config_and_log_level() {
        let cli = Cli::parse_from(["estuary", "--config", "custom.toml", "--log-level", "debug", "run"]);
        assert_eq!(cli.config, "custom.toml");
        assert_eq!(cli.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_cli_parse_validate_config() {
        let cli = Cli::parse_from(["estuary", "validate-config"]);
        assert!(matches!(cli.command, Commands::ValidateConfig(_)));
    }

    #[test]
    fn test_cli_parse_init() {
        let cli = Cli::parse_from(["estuary", "init", "--output", "x.toml", "--force"]);
        let Commands::Init(args) = cli.command else {
            panic!("expected init");
        };
        assert_eq!(args.output, "x.toml");
        assert!(args.force);
    }

    #[test]
    fn test_cli_parse_review_approve_with_override() {
        let id = uuid::Uuid::new_v4().to_string();
        let cli = Cli::parse_from(["estuary", "review", "approve", &id, "--concept", "3004249"]);
        let Commands::Review(args) = cli.command else {
            panic!("expected review");
        };
        match args.command {
            ReviewCommand::Approve { id: parsed, concept } => {
                assert_eq!(parsed.to_string(), id);
                assert_eq!(concept, Some(3004249));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_review_id() {
        assert!(Cli::try_parse_from(["estuary", "review", "reject", "not-a-uuid"]).is_err());
    }
}
