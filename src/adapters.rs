/// Source adapters: one stage per external source.
///
/// Each stage selects its candidates (properties with at least one of its
/// target fields still null), fetches per property behind a circuit breaker,
/// and writes through the monotonic merge path in `db_storage`. Per-property
/// failures are logged and counted, never fatal to the batch. A source with
/// no record for a property is a normal miss, counted as a success.
use crate::circuit_breaker::{create_source_circuit_breaker, record_outcome};
use crate::db_storage::PropertyStorage;
use crate::errors::AppError;
use crate::identity::Bbl;
use crate::models::{DeedDocument, Property, ValuationRecord};
use crate::pipeline::StageSummary;
use crate::sources::{
    DeedRegistryClient, ParcelRegistryClient, TaxAssessmentClient, ValuationClient,
};
use bigdecimal::BigDecimal;
use failsafe::CircuitBreaker;

// ============ Parcel registry ============

pub async fn run_parcel_stage(
    storage: &PropertyStorage,
    client: &ParcelRegistryClient,
    force: bool,
) -> Result<StageSummary, AppError> {
    let mut summary = StageSummary::new("parcel");
    let breaker = create_source_circuit_breaker();
    let candidates = storage.parcel_candidates(force).await?;
    summary.attempted = candidates.len();

    for property in &candidates {
        if !breaker.is_call_permitted() {
            summary.skipped += 1;
            continue;
        }
        let outcome = async {
            let bbl = Bbl::parse(&property.bbl)?;
            let fetched = client.fetch(&bbl).await;
            record_outcome(&breaker, fetched.is_ok());
            if let Some(record) = fetched? {
                storage.apply_parcel(property, &record, force).await?;
            }
            Ok::<(), AppError>(())
        }
        .await;
        tally(&mut summary, &property.bbl, outcome);
    }

    log_summary(&summary);
    Ok(summary)
}

// ============ Tax assessment ============

pub async fn run_tax_stage(
    storage: &PropertyStorage,
    client: &TaxAssessmentClient,
    force: bool,
) -> Result<StageSummary, AppError> {
    let mut summary = StageSummary::new("tax");
    let breaker = create_source_circuit_breaker();
    let candidates = storage.tax_candidates(force).await?;
    summary.attempted = candidates.len();

    for property in &candidates {
        if !breaker.is_call_permitted() {
            summary.skipped += 1;
            continue;
        }
        let outcome = async {
            let bbl = Bbl::parse(&property.bbl)?;
            let fetched = client.fetch(&bbl).await;
            record_outcome(&breaker, fetched.is_ok());
            if let Some(record) = fetched? {
                storage.apply_tax(property, &record, force).await?;
            }
            Ok::<(), AppError>(())
        }
        .await;
        tally(&mut summary, &property.bbl, outcome);
    }

    log_summary(&summary);
    Ok(summary)
}

// ============ Deed registry ============

fn is_deed(doc_type: &str) -> bool {
    doc_type.to_uppercase().contains("DEED")
}

fn is_mortgage(doc_type: &str) -> bool {
    let upper = doc_type.to_uppercase();
    upper.contains("MORTGAGE") || upper.contains("MTGE")
}

/// Latest document among those matching the predicate: latest doc_date wins,
/// same-day ties go to the larger doc_id (recorded later).
pub fn select_latest<'a>(
    documents: &'a [DeedDocument],
    predicate: impl Fn(&DeedDocument) -> bool,
) -> Option<&'a DeedDocument> {
    documents
        .iter()
        .filter(|d| predicate(d))
        .max_by_key(|d| (d.doc_date, d.doc_id))
}

/// Mailing address of the acquiring party on a deed, when recorded.
fn buyer_mailing_address(doc: &DeedDocument) -> Option<String> {
    doc.parties
        .iter()
        .find(|p| {
            let role = p.role.to_uppercase();
            role.contains("BUYER") || role.contains("GRANTEE")
        })
        .and_then(|p| p.mailing_address.clone())
}

pub async fn run_deed_stage(
    storage: &PropertyStorage,
    client: &DeedRegistryClient,
    force: bool,
) -> Result<StageSummary, AppError> {
    let mut summary = StageSummary::new("deed");
    let breaker = create_source_circuit_breaker();
    let candidates = storage.deed_candidates(force).await?;
    summary.attempted = candidates.len();

    for property in &candidates {
        if !breaker.is_call_permitted() {
            summary.skipped += 1;
            continue;
        }
        let outcome = async {
            let bbl = Bbl::parse(&property.bbl)?;
            let fetched = client.fetch_documents(&bbl).await;
            record_outcome(&breaker, fetched.is_ok());
            let documents = fetched?;

            // The full document history is kept; the property row only
            // receives the latest deed and mortgage.
            for doc in &documents {
                storage.insert_transaction(&property.bbl, doc).await?;
            }

            let latest_deed = select_latest(&documents, |d| is_deed(&d.doc_type));
            let latest_mortgage = select_latest(&documents, |d| is_mortgage(&d.doc_type));
            if latest_deed.is_none() && latest_mortgage.is_none() {
                return Ok(());
            }

            storage
                .apply_deed(
                    property,
                    latest_deed.map(|d| d.doc_date),
                    latest_deed.and_then(|d| d.doc_amount.clone()),
                    latest_mortgage.and_then(|d| d.doc_amount.clone()),
                    latest_deed.and_then(buyer_mailing_address),
                    force,
                )
                .await
        }
        .await;
        tally(&mut summary, &property.bbl, outcome);
    }

    log_summary(&summary);
    Ok(summary)
}

// ============ Valuation ============

/// Annualized rent from a per-unit monthly estimate; single-unit assumption
/// when the unit count is unknown.
fn annualize_rent(rent_per_unit: &BigDecimal, unit_count: Option<i32>) -> BigDecimal {
    let units = unit_count.filter(|u| *u > 0).unwrap_or(1);
    rent_per_unit * BigDecimal::from(12 * units as i64)
}

async fn apply_valuation_record(
    storage: &PropertyStorage,
    property: &Property,
    record: &ValuationRecord,
    source_tag: &str,
    force: bool,
) -> Result<(), AppError> {
    let rent_annual = record
        .estimated_rent_per_unit
        .as_ref()
        .map(|rent| annualize_rent(rent, property.unit_count));
    storage
        .apply_valuation(
            property,
            record.estimated_value.clone(),
            record.estimated_rent_per_unit.clone(),
            rent_annual,
            source_tag,
            force,
        )
        .await
}

pub async fn run_valuation_primary_stage(
    storage: &PropertyStorage,
    primary: &ValuationClient,
    force: bool,
) -> Result<StageSummary, AppError> {
    let mut summary = StageSummary::new("valuation_primary");
    let breaker = create_source_circuit_breaker();
    let candidates = storage.valuation_primary_candidates(force).await?;
    summary.attempted = candidates.len();

    for property in &candidates {
        if !breaker.is_call_permitted() {
            summary.skipped += 1;
            continue;
        }
        let outcome = async {
            let bbl = Bbl::parse(&property.bbl)?;
            let fetched = primary.fetch(property.address.as_deref(), &bbl).await;
            record_outcome(&breaker, fetched.is_ok());
            if let Some(record) = fetched? {
                apply_valuation_record(storage, property, &record, primary.source_tag, force)
                    .await?;
            }
            Ok::<(), AppError>(())
        }
        .await;
        tally(&mut summary, &property.bbl, outcome);
    }

    log_summary(&summary);
    Ok(summary)
}

/// Fallback valuation pass, reported as its own stage so the counts stand
/// on their own. Must run strictly after the primary pass has completed:
/// its candidate query only sees properties the primary left without a
/// value. Fallback never force-writes, so a primary value is never
/// overwritten.
pub async fn run_valuation_fallback_stage(
    storage: &PropertyStorage,
    fallback: &ValuationClient,
) -> Result<StageSummary, AppError> {
    let mut summary = StageSummary::new("valuation_fallback");
    let breaker = create_source_circuit_breaker();
    let candidates = storage.valuation_fallback_candidates().await?;
    summary.attempted = candidates.len();

    for property in &candidates {
        if !breaker.is_call_permitted() {
            summary.skipped += 1;
            continue;
        }
        let outcome = async {
            let bbl = Bbl::parse(&property.bbl)?;
            let fetched = fallback.fetch(property.address.as_deref(), &bbl).await;
            record_outcome(&breaker, fetched.is_ok());
            if let Some(record) = fetched? {
                apply_valuation_record(storage, property, &record, fallback.source_tag, false)
                    .await?;
            }
            Ok::<(), AppError>(())
        }
        .await;
        tally(&mut summary, &property.bbl, outcome);
    }

    log_summary(&summary);
    Ok(summary)
}

fn tally(summary: &mut StageSummary, bbl: &str, outcome: Result<(), AppError>) {
    match outcome {
        Ok(()) => summary.succeeded += 1,
        Err(e) => {
            tracing::warn!("{} stage failed for {}: {}", summary.stage, bbl, e);
            summary.failed += 1;
        }
    }
}

fn log_summary(summary: &StageSummary) {
    tracing::info!(
        "{} stage: {} attempted, {} succeeded, {} failed, {} skipped",
        summary.stage,
        summary.attempted,
        summary.succeeded,
        summary.failed,
        summary.skipped
    );
}
