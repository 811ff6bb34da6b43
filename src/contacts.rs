/// Owner contact linkage.
///
/// Contacts are keyed by normalized owner name, not by property: one owner
/// may hold many properties and one name may match several contact records.
/// The linkage deliberately preserves that ambiguity. A property links to a
/// contact when either of its owner-name fields normalizes to the contact's
/// name.
use crate::circuit_breaker::{create_source_circuit_breaker, record_outcome};
use crate::db_storage::PropertyStorage;
use crate::errors::AppError;
use crate::models::{ContactRecord, Property};
use crate::pipeline::StageSummary;
use crate::sources::ContactEnrichmentClient;
use failsafe::CircuitBreaker;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use std::collections::BTreeMap;

/// Canonical owner-name form: uppercase, interior whitespace collapsed to
/// single spaces, leading and trailing whitespace dropped.
pub fn normalize_owner_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Validates and normalizes a US phone number to E.164, e.g. "+12125551234".
/// Returns None for anything that does not parse as a valid number.
pub fn normalize_us_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match phonenumber::parse(Some(CountryId::US), trimmed) {
        Ok(number) if phonenumber::is_valid(&number) => {
            Some(number.format().mode(Mode::E164).to_string())
        }
        _ => None,
    }
}

fn normalized_record(record: &ContactRecord) -> ContactRecord {
    let mut normalized = record.clone();
    normalized.phone = record.phone.as_deref().and_then(normalize_us_phone);
    normalized
}

/// Groups properties by every normalized owner name they carry, via either
/// owner field. Two unrelated properties sharing a name end up under the
/// same entry and will receive the same contact set; that ambiguity is kept
/// deliberately. BTreeMap keeps the fetch order stable across runs.
pub fn group_properties_by_owner(properties: &[Property]) -> BTreeMap<String, Vec<String>> {
    let mut by_name: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for property in properties {
        for raw in [&property.current_owner_name, &property.owner_name_rpad]
            .into_iter()
            .flatten()
        {
            let name = normalize_owner_name(raw);
            if name.is_empty() {
                continue;
            }
            let bbls = by_name.entry(name).or_default();
            if !bbls.contains(&property.bbl) {
                bbls.push(property.bbl.clone());
            }
        }
    }
    by_name
}

/// Fetches contacts per distinct normalized owner name and links them to
/// every property carrying that name. Fetch failures leave the name
/// unlinked for the next run; linkage itself is idempotent.
pub async fn run_contact_stage(
    storage: &PropertyStorage,
    client: &ContactEnrichmentClient,
) -> Result<StageSummary, AppError> {
    let mut summary = StageSummary::new("contacts");
    let breaker = create_source_circuit_breaker();

    let properties = storage.contact_candidates().await?;
    let by_name = group_properties_by_owner(&properties);

    summary.attempted = by_name.len();

    for (name, bbls) in &by_name {
        if !breaker.is_call_permitted() {
            summary.skipped += 1;
            continue;
        }

        let fetched = client.fetch(name).await;
        record_outcome(&breaker, fetched.is_ok());

        let records = match fetched {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Contact lookup failed for '{}': {}", name, e);
                summary.failed += 1;
                continue;
            }
        };

        let outcome = async {
            for record in &records {
                let record = normalized_record(record);
                // Records with neither phone nor email carry nothing
                // actionable.
                if record.phone.is_none() && record.email.is_none() {
                    continue;
                }
                let contact_id = storage.upsert_contact(name, &record).await?;
                for bbl in bbls {
                    storage.link_contact(bbl, contact_id, name).await?;
                }
            }
            Ok::<(), AppError>(())
        }
        .await;

        match outcome {
            Ok(()) => summary.succeeded += 1,
            Err(e) => {
                tracing::warn!("Failed to store contacts for '{}': {}", name, e);
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        "Contact stage: {} owner names, {} succeeded, {} failed, {} skipped",
        summary.attempted,
        summary.succeeded,
        summary.failed,
        summary.skipped
    );
    Ok(summary)
}
