/// Pipeline orchestration.
///
/// Stage order is fixed by data dependencies: identity resolution creates
/// the property rows every later stage keys on; the parcel and tax stages
/// are independent of each other and run concurrently; the valuation stage
/// wants the parcel address for its primary query; metrics aggregates the
/// permits identity linked; contacts needs the owner names the parcel and
/// tax stages wrote; scoring consumes everything. A stage that errors
/// wholesale is recorded and the run continues, since later stages still
/// improve whatever data exists.
use crate::adapters;
use crate::config::Config;
use crate::contacts;
use crate::db_storage::PropertyStorage;
use crate::errors::AppError;
use crate::identity::Bbl;
use crate::metrics;
use crate::scoring;
use crate::sources::SourceClients;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-stage outcome counts, returned to the caller and logged.
#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub stage: String,
    /// Candidates the stage selected.
    pub attempted: usize,
    /// Processed to completion, including normal source misses.
    pub succeeded: usize,
    pub failed: usize,
    /// Not attempted, e.g. after a source tripped its circuit breaker.
    pub skipped: usize,
}

impl StageSummary {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
        }
    }

    /// A stage that errored before processing anything.
    pub fn errored(stage: &str) -> Self {
        let mut summary = Self::new(stage);
        summary.failed = 1;
        summary
    }
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub force_refresh: bool,
    pub stages: Vec<StageSummary>,
}

/// Resolves unlinked permits to canonical property keys.
///
/// Creates the property row on first sight of a key and writes the key back
/// onto the permit. Malformed locations are counted and left unlinked; they
/// are picked up again if a later intake corrects them, never retried with
/// guesses.
pub async fn run_identity_stage(storage: &PropertyStorage) -> Result<StageSummary, AppError> {
    let mut summary = StageSummary::new("identity");
    let permits = storage.unlinked_permits().await?;
    summary.attempted = permits.len();

    for permit in &permits {
        let resolved = Bbl::from_raw(
            permit.borough_raw.as_deref(),
            permit.block_raw.as_deref(),
            permit.lot_raw.as_deref(),
        );
        let bbl = match resolved {
            Ok(bbl) => bbl,
            Err(e) => {
                tracing::warn!("Cannot resolve permit {}: {}", permit.id, e);
                summary.failed += 1;
                continue;
            }
        };

        let key = bbl.to_string();
        let outcome = async {
            let created = storage
                .get_or_create_property(
                    &key,
                    bbl.borough.code() as i16,
                    bbl.block as i32,
                    bbl.lot as i32,
                    permit.address_raw.as_deref(),
                )
                .await?;
            if created {
                tracing::debug!("New property {} from permit {}", key, permit.id);
            }
            storage.link_permit(permit.id, &key).await
        }
        .await;

        match outcome {
            Ok(()) => summary.succeeded += 1,
            Err(e) => {
                tracing::warn!("Failed to link permit {} to {}: {}", permit.id, key, e);
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        "Identity stage: {} permits, {} linked, {} unresolvable",
        summary.attempted,
        summary.succeeded,
        summary.failed
    );
    Ok(summary)
}

fn stage_result(name: &str, result: Result<StageSummary, AppError>) -> StageSummary {
    match result {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!("{} stage aborted: {}", name, e);
            StageSummary::errored(name)
        }
    }
}

/// Runs the full pipeline once. Safe to re-run at any time: every stage is
/// idempotent over already-processed data.
pub async fn run(
    storage: &PropertyStorage,
    sources: &SourceClients,
    config: &Config,
    force_refresh: bool,
) -> RunSummary {
    let started_at = Utc::now();
    tracing::info!("Pipeline run started (force_refresh={})", force_refresh);
    let mut stages = Vec::new();

    stages.push(stage_result(
        "identity",
        run_identity_stage(storage).await,
    ));

    let (parcel, tax) = tokio::join!(
        adapters::run_parcel_stage(storage, &sources.parcel, force_refresh),
        adapters::run_tax_stage(storage, &sources.tax, force_refresh),
    );
    stages.push(stage_result("parcel", parcel));
    stages.push(stage_result("tax", tax));

    stages.push(stage_result(
        "deed",
        adapters::run_deed_stage(storage, &sources.deed, force_refresh).await,
    ));

    // Primary must finish before the fallback candidate query runs, so the
    // fallback never precedes the primary for any property.
    stages.push(stage_result(
        "valuation_primary",
        adapters::run_valuation_primary_stage(storage, &sources.valuation_primary, force_refresh)
            .await,
    ));
    stages.push(stage_result(
        "valuation_fallback",
        adapters::run_valuation_fallback_stage(storage, &sources.valuation_fallback).await,
    ));

    stages.push(stage_result(
        "metrics",
        metrics::run_metrics_stage(storage, config.metrics_window_years).await,
    ));

    stages.push(stage_result(
        "contacts",
        contacts::run_contact_stage(storage, &sources.contacts).await,
    ));

    stages.push(stage_result(
        "scoring",
        scoring::run_scoring_stage(storage, &config.scoring_weights).await,
    ));

    let finished_at = Utc::now();
    tracing::info!(
        "Pipeline run finished in {}s",
        (finished_at - started_at).num_seconds()
    );

    RunSummary {
        started_at,
        finished_at,
        force_refresh,
        stages,
    }
}
