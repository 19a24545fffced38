//! Review command implementation
//!
//! Lists, approves and rejects concept review queue items in the configured
//! store. Only a persistent backend keeps the queue between processes.

use crate::adapters::database::create_stores;
use crate::adapters::vocabulary::create_vocabulary;
use crate::config::load_config;
use crate::config::schema::StoreBackend;
use crate::core::concept::ConceptResolver;
use crate::domain::concept::{ReviewItem, ReviewStatus};
use crate::domain::errors::{EstuaryError, StoreError};
use crate::domain::ids::ReviewId;
use clap::{Args, Subcommand};

/// Arguments for the review command
#[derive(Args, Debug)]
pub struct ReviewArgs {
    #[command(subcommand)]
    pub command: ReviewCommand,
}

/// Review queue operations
#[derive(Subcommand, Debug)]
pub enum ReviewCommand {
    /// List queue items
    List {
        /// pending | approved | rejected (all statuses when omitted)
        #[arg(long)]
        status: Option<ReviewStatus>,

        /// Maximum number of items to show
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Approve an item, caching its mapping
    Approve {
        /// Review item id
        id: ReviewId,

        /// Map to this concept instead of the suggested one
        #[arg(long)]
        concept: Option<i64>,
    },

    /// Reject an item
    Reject {
        /// Review item id
        id: ReviewId,
    },
}

impl ReviewArgs {
    /// Execute the review command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Failed to load configuration file");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        if config.engine.store_backend == StoreBackend::Memory {
            println!("⚠️  The memory store backend keeps no review queue between runs");
        }

        let resolver = match build_resolver(&config).await {
            Ok(r) => r,
            Err(e) => {
                println!("❌ Failed to connect to the concept store");
                println!("   Error: {e}");
                return Ok(5);
            }
        };

        let outcome = match &self.command {
            ReviewCommand::List { status, limit } => {
                tracing::info!(status = ?status, limit, "Listing review queue");
                resolver.list_reviews(*status, *limit).await.map(|items| {
                    print_items(&items);
                })
            }
            ReviewCommand::Approve { id, concept } => {
                tracing::info!(review_id = %id, override_concept_id = ?concept, "Approving review item");
                resolver.approve_review(*id, *concept).await.map(|mapping| {
                    println!(
                        "✅ Approved {}: {} → {} ({})",
                        id, mapping.key, mapping.concept_id, mapping.concept_name
                    );
                })
            }
            ReviewCommand::Reject { id } => {
                tracing::info!(review_id = %id, "Rejecting review item");
                resolver.reject_review(*id).await.map(|item| {
                    println!("✅ Rejected {}: {}", id, item.key);
                })
            }
        };

        match outcome {
            Ok(()) => Ok(0),
            Err(e @ (EstuaryError::Validation(_) | EstuaryError::Store(StoreError::NotFound(_)))) => {
                println!("❌ {e}");
                Ok(1)
            }
            Err(e) => {
                println!("❌ Review operation failed");
                println!("   Error: {e}");
                Ok(5)
            }
        }
    }
}

async fn build_resolver(config: &crate::config::EstuaryConfig) -> crate::domain::Result<ConceptResolver> {
    let stores = create_stores(config).await?;
    let vocabulary = create_vocabulary(config).await?;
    ConceptResolver::from_config(&config.concepts, stores.concepts, vocabulary)
}

fn print_items(items: &[ReviewItem]) {
    if items.is_empty() {
        println!("No review items found.");
        return;
    }

    println!("📋 Review Queue ({} items)", items.len());
    println!();
    for item in items {
        println!("  {} [{}]", item.id, item.status);
        println!("    Source: {}", item.key);
        if let Some(display) = &item.source_display {
            println!("    Display: {display}");
        }
        println!(
            "    Suggested: {} {} ({:.2}, {})",
            item.suggestion.concept_id,
            item.suggestion.concept_name,
            item.suggestion.confidence,
            item.suggestion.stage
        );
        for alternative in &item.alternatives {
            println!(
                "      alt: {} {} ({:.2})",
                alternative.concept_id, alternative.concept_name, alternative.score
            );
        }
        if let Some(decided) = item.decided_concept_id {
            println!("    Decided: {decided}");
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_item_on_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("estuary.toml");
        std::fs::write(&path, "").unwrap();

        let args = ReviewArgs {
            command: ReviewCommand::Reject { id: ReviewId::generate() },
        };
        assert_eq!(args.execute(path.to_str().unwrap()).await.unwrap(), 1);

        let args = ReviewArgs {
            command: ReviewCommand::List {
                status: Some(ReviewStatus::Pending),
                limit: 10,
            },
        };
        assert_eq!(args.execute(path.to_str().unwrap()).await.unwrap(), 0);
    }
}
