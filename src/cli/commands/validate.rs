//! Validate config command implementation
//!
//! This module implements the `validate-config` command for validating
//! the Estuary configuration file.

use crate::config::load_config;
use crate::config::schema::{EstuaryConfig, StoreBackend};
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        // load_config validates after applying overrides
        match load_config(config_path) {
            Ok(config) => {
                println!("✅ Configuration is valid");
                println!();
                print_summary(&config);
                Ok(0)
            }
            Err(e) => {
                println!("❌ Configuration validation failed");
                println!("   Error: {e}");
                println!();
                Ok(2)
            }
        }
    }
}

fn print_summary(config: &EstuaryConfig) {
    println!("Configuration Summary:");
    println!("  Application: {}", config.application.name);
    println!("  Log Level: {}", config.application.log_level);
    println!("  Dry Run: {}", config.application.dry_run);

    match config.engine.store_backend {
        StoreBackend::Memory => println!("  Store Backend: memory (nothing is persisted)"),
        StoreBackend::PostgreSQL => {
            if let Some(ref pg_config) = config.postgresql {
                use secrecy::ExposeSecret;
                println!("  Store Backend: PostgreSQL");
                println!(
                    "  PostgreSQL Connection: {}",
                    pg_config
                        .connection_string
                        .expose_secret()
                        .as_ref()
                        .split('@')
                        .next_back()
                        .unwrap_or("***")
                );
                println!("  Max Connections: {}", pg_config.max_connections);
            }
        }
    }

    println!("  Mappings Directory: {}", config.mappings.directory);
    println!(
        "  Concept Thresholds: approve >= {}, review >= {}",
        config.concepts.auto_approve_threshold, config.concepts.review_threshold
    );
    println!(
        "  Vocabulary: {}",
        config.concepts.vocabulary_file.as_deref().unwrap_or("(store backend)")
    );
    println!("  Reasoning Stage: {}", if config.concepts.reasoning.enabled { "enabled" } else { "disabled" });
    println!("  Jobs: {}", config.jobs.len());
    for job in &config.jobs {
        println!(
            "    - {} ({} via {}, mappings '{}'{})",
            job.name,
            job.resource_type,
            job.source.connector,
            job.mapping_ref,
            if job.auto_start { "" } else { ", manual start" }
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_valid_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.toml");
        std::fs::write(&good, "[application]\nlog_level = \"debug\"\n").unwrap();
        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[application]\nlog_level = \"loud\"\n").unwrap();

        let args = ValidateArgs {};
        assert_eq!(args.execute(good.to_str().unwrap()).await.unwrap(), 0);
        assert_eq!(args.execute(bad.to_str().unwrap()).await.unwrap(), 2);
        assert_eq!(args.execute("/nonexistent/estuary.toml").await.unwrap(), 2);
    }
}
