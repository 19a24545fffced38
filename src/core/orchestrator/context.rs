//! Engine context
//!
//! Every shared collaborator is built once at startup and handed to each job
//! through an `Arc<EngineContext>`.

use crate::adapters::database::factory::{create_stores, Stores};
use crate::adapters::mapping::file::FileMappingRepository;
use crate::adapters::mapping::MappingRepository;
use crate::adapters::source::SourceRegistry;
use crate::adapters::vocabulary::{create_vocabulary, VocabularyStore};
use crate::config::schema::EstuaryConfig;
use crate::core::analytic::AnalyticCascade;
use crate::core::concept::ConceptResolver;
use crate::core::identity::IdentityResolver;
use crate::core::persist::PersistenceFanOut;
use crate::core::transform::TransformEngine;
use crate::domain::context::ResultExt;
use crate::domain::Result;
use std::sync::Arc;
use std::time::Duration;

/// Loop pacing and shutdown settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Pause between loop iterations
    pub iteration_delay: Duration,
    /// How long a graceful shutdown waits for jobs to stop
    pub shutdown_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            iteration_delay: Duration::ZERO,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &EstuaryConfig) -> Self {
        Self {
            iteration_delay: config.engine.iteration_delay(),
            shutdown_timeout: Duration::from_secs(config.engine.shutdown_timeout_secs),
        }
    }
}

/// Shared collaborators of all jobs
pub struct EngineContext {
    pub stores: Stores,
    pub sources: Arc<SourceRegistry>,
    pub mappings: Arc<dyn MappingRepository>,
    pub transform: Arc<TransformEngine>,
    pub identity: Arc<IdentityResolver>,
    pub concepts: Arc<ConceptResolver>,
    pub fan_out: Arc<PersistenceFanOut>,
    pub settings: EngineSettings,
}

impl EngineContext {
    /// Builds the context described by a configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the stores, vocabulary or concept resolver cannot
    /// be created.
    pub async fn from_config(config: &EstuaryConfig) -> Result<Self> {
        let stores = create_stores(config)
            .await
            .context("Failed to create destination stores")?;
        let vocabulary = create_vocabulary(config)
            .await
            .context("Failed to load the concept vocabulary")?;
        let mappings: Arc<dyn MappingRepository> =
            Arc::new(FileMappingRepository::new(&config.mappings.directory));

        Self::assemble(
            config,
            stores,
            vocabulary,
            mappings,
            Arc::new(SourceRegistry::with_builtin()),
        )
    }

    /// Wires a context from already-built adapters
    ///
    /// # Errors
    ///
    /// Returns an error if the concept resolver cannot be built from
    /// `config.concepts`.
    pub fn assemble(
        config: &EstuaryConfig,
        stores: Stores,
        vocabulary: Arc<dyn VocabularyStore>,
        mappings: Arc<dyn MappingRepository>,
        sources: Arc<SourceRegistry>,
    ) -> Result<Self> {
        let identity = Arc::new(IdentityResolver::new());
        let concepts = Arc::new(ConceptResolver::from_config(
            &config.concepts,
            stores.concepts.clone(),
            vocabulary,
        )?);
        let analytic = Arc::new(AnalyticCascade::new(
            stores.documents.clone(),
            identity.clone(),
            concepts.clone(),
        ));
        let fan_out = Arc::new(PersistenceFanOut::new(stores.documents.clone(), Some(analytic)));

        tracing::debug!(
            store = stores.documents.backend_name(),
            connectors = ?sources.connectors(),
            "Engine context assembled"
        );

        Ok(Self {
            stores,
            sources,
            mappings,
            transform: Arc::new(TransformEngine::default()),
            identity,
            concepts,
            fan_out,
            settings: EngineSettings::from_config(config),
        })
    }
}
