//! Property Enrichment Pipeline Library
//!
//! This library provides the core functionality for the construction-permit
//! enrichment pipeline: permit intake, canonical property identity
//! resolution, multi-source attribute enrichment, windowed permit metrics,
//! investment-priority scoring and owner contact linkage, plus the HTTP
//! surface that fronts it.
//!
//! # Modules
//!
//! - `adapters`: Per-source enrichment stages (parcel, tax, deed, valuation).
//! - `circuit_breaker`: Circuit breaker for external source calls.
//! - `config`: Configuration management.
//! - `contacts`: Owner name normalization and contact linkage.
//! - `db`: Database connection and pool management.
//! - `db_storage`: Database storage operations and the merge policy.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `identity`: Canonical borough-block-lot property keys.
//! - `metrics`: Trailing-window permit metrics.
//! - `models`: Core data models.
//! - `pipeline`: Stage orchestration.
//! - `scoring`: Component and composite scoring.
//! - `sources`: External source HTTP clients.

pub mod adapters;
pub mod circuit_breaker;
pub mod config;
pub mod contacts;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod identity;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod scoring;
pub mod sources;
