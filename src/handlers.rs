use crate::config::Config;
use crate::contacts::normalize_owner_name;
use crate::db_storage::PropertyStorage;
use crate::errors::{AppError, ResultExt};
use crate::identity::Bbl;
use crate::models::*;
use crate::pipeline::{self, RunSummary};
use crate::sources::SourceClients;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use moka::future::Cache;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 500;

/// Shared application state injected into handlers.
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Application configuration.
    pub config: Config,
    /// Clients for the external property-data sources.
    pub sources: SourceClients,
    /// Cache for normalized owner name -> contact records (24 hour TTL).
    /// Serves the dashboard's owner lookup without hitting the database on
    /// every request.
    pub contact_cache: Cache<String, Vec<OwnerContact>>,
}

impl AppState {
    fn storage(&self) -> PropertyStorage {
        PropertyStorage::new(self.db.clone())
    }
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "property-pipeline",
            "version": "0.1.0"
        })),
    )
}

/// POST /api/v1/permits
///
/// Permit intake from the upstream scraper. Rows are stored as delivered;
/// duplicate external references are dropped silently. Linking to
/// properties happens in the next pipeline run, not here.
pub async fn ingest_permits(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PermitIntakeRequest>,
) -> Result<Json<PermitIntakeResponse>, AppError> {
    tracing::info!("POST /permits - {} rows", request.permits.len());

    if request.permits.is_empty() {
        return Err(AppError::BadRequest(
            "At least one permit row required".to_string(),
        ));
    }

    let storage = state.storage();
    let mut stored = 0;
    for row in &request.permits {
        if storage.insert_permit(row).await? {
            stored += 1;
        }
    }

    tracing::info!(
        "Permit intake: {} received, {} stored, {} duplicates",
        request.permits.len(),
        stored,
        request.permits.len() - stored
    );

    Ok(Json(PermitIntakeResponse {
        received: request.permits.len(),
        stored,
    }))
}

/// POST /api/v1/pipeline/run
///
/// Triggers a full pipeline run and returns the per-stage counts. Runs
/// inline; the caller is expected to be a scheduler, not an interactive
/// user.
pub async fn run_pipeline(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PipelineRunParams>,
) -> Result<Json<RunSummary>, AppError> {
    tracing::info!(
        "POST /pipeline/run - force_refresh={}",
        params.force_refresh
    );

    let storage = state.storage();
    let summary = pipeline::run(
        &storage,
        &state.sources,
        &state.config,
        params.force_refresh,
    )
    .await;

    Ok(Json(summary))
}

/// GET /api/v1/properties
///
/// Scored property list for the dashboard, best composite first.
pub async fn list_properties(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PropertyQueryParams>,
) -> Result<Json<Vec<Property>>, AppError> {
    tracing::info!("GET /properties - params: {:?}", params);

    if let Some(ref tier) = params.tier {
        if !matches!(tier.as_str(), "A" | "B" | "C" | "D") {
            return Err(AppError::BadRequest(format!(
                "Unknown tier '{}': expected A, B, C or D",
                tier
            )));
        }
    }
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let properties = state
        .storage()
        .properties_by_tier(params.tier.as_deref(), limit)
        .await?;
    Ok(Json(properties))
}

/// GET /api/v1/properties/:bbl
///
/// One property with its derived metrics and every linked contact,
/// ambiguous matches included.
pub async fn get_property(
    State(state): State<Arc<AppState>>,
    Path(bbl): Path<String>,
) -> Result<Json<PropertyDetail>, AppError> {
    tracing::info!("GET /properties/{}", bbl);

    // Reject malformed keys before touching the database.
    Bbl::parse(&bbl)?;

    let storage = state.storage();
    let property = storage
        .property_by_bbl(&bbl)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Property {} not found", bbl)))?;
    let metrics = storage.metrics_for(&bbl).await?;
    let contacts = storage
        .contacts_for_property(&bbl)
        .await
        .context("Failed to load linked contacts")?;

    Ok(Json(PropertyDetail {
        property,
        metrics,
        contacts,
    }))
}

/// GET /api/v1/properties/:bbl/transactions
///
/// The property's recorded document history, newest first, with parties.
pub async fn get_property_transactions(
    State(state): State<Arc<AppState>>,
    Path(bbl): Path<String>,
) -> Result<Json<Vec<TransactionDetail>>, AppError> {
    tracing::info!("GET /properties/{}/transactions", bbl);

    Bbl::parse(&bbl)?;

    let storage = state.storage();
    if storage.property_by_bbl(&bbl).await?.is_none() {
        return Err(AppError::NotFound(format!("Property {} not found", bbl)));
    }

    let transactions = storage.transactions_for(&bbl).await?;
    let mut details = Vec::with_capacity(transactions.len());
    for transaction in transactions {
        let parties = storage.parties_for(transaction.id).await?;
        details.push(TransactionDetail {
            transaction,
            parties,
        });
    }

    Ok(Json(details))
}

/// GET /api/v1/owners/:name/contacts
///
/// Contact records for an owner name, normalized before lookup so any
/// spelling of the same name hits the same records.
pub async fn get_owner_contacts(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<OwnerContact>>, AppError> {
    let normalized = normalize_owner_name(&name);
    tracing::info!("GET /owners/{}/contacts", normalized);

    if normalized.is_empty() {
        return Err(AppError::BadRequest("Owner name required".to_string()));
    }

    if let Some(cached) = state.contact_cache.get(&normalized).await {
        tracing::debug!("Contact cache hit for '{}'", normalized);
        return Ok(Json(cached));
    }

    let contacts = state.storage().contacts_by_name(&normalized).await?;
    state
        .contact_cache
        .insert(normalized, contacts.clone())
        .await;

    Ok(Json(contacts))
}
