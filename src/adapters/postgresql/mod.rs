//! PostgreSQL integration
//!
//! This module provides the PostgreSQL document store, concept store and
//! vocabulary backend.

pub mod adapter;
pub mod client;
pub mod models;
pub mod vocabulary;

pub use adapter::PostgreSQLAdapter;
pub use client::PostgreSQLClient;
pub use vocabulary::PostgreSQLVocabulary;
