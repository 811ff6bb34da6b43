/// Permit activity aggregation over a trailing window.
///
/// The metrics table is a materialized view over permits: recomputation is
/// total replacement, never incremental, so the stage is safe to re-run at
/// any time and always reflects current permit state.
use crate::db_storage::PropertyStorage;
use crate::errors::AppError;
use crate::models::{Permit, PropertyMetrics};
use crate::pipeline::StageSummary;
use bigdecimal::BigDecimal;
use chrono::{Months, NaiveDate, Utc};
use std::collections::HashMap;

/// Start of the trailing window, inclusive.
pub fn window_start(today: NaiveDate, years: u32) -> NaiveDate {
    today
        .checked_sub_months(Months::new(years * 12))
        .unwrap_or(today)
}

/// Aggregates one property's windowed permits.
///
/// Missing costs count as zero, not as exclusion. The dominant work type is
/// the most frequent in the window; ties break by the most recent filing
/// date among the tied types, then alphabetically so recomputation is
/// reproducible.
pub fn aggregate(bbl: &str, permits: &[Permit]) -> PropertyMetrics {
    let total_cost: BigDecimal = permits
        .iter()
        .filter_map(|p| p.cost.clone())
        .sum();

    let last_filed_date = permits.iter().filter_map(|p| p.filed_date).max();

    let mut by_type: HashMap<&str, (usize, Option<NaiveDate>)> = HashMap::new();
    for permit in permits {
        let Some(work_type) = permit.work_type.as_deref() else {
            continue;
        };
        let entry = by_type.entry(work_type).or_insert((0, None));
        entry.0 += 1;
        if permit.filed_date > entry.1 {
            entry.1 = permit.filed_date;
        }
    }

    let mut ranked: Vec<(&str, usize, Option<NaiveDate>)> = by_type
        .into_iter()
        .map(|(work_type, (count, latest))| (work_type, count, latest))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then(b.2.cmp(&a.2))
            .then(a.0.cmp(b.0))
    });
    let dominant_work_type = ranked.first().map(|(work_type, _, _)| work_type.to_string());

    PropertyMetrics {
        bbl: bbl.to_string(),
        permit_count: permits.len() as i64,
        total_cost,
        last_filed_date,
        dominant_work_type,
        computed_at: Utc::now(),
    }
}

/// Recomputes metrics for every property.
pub async fn run_metrics_stage(
    storage: &PropertyStorage,
    window_years: u32,
) -> Result<StageSummary, AppError> {
    let mut summary = StageSummary::new("metrics");
    let start = window_start(Utc::now().date_naive(), window_years);
    let properties = storage.all_properties().await?;
    summary.attempted = properties.len();

    for property in &properties {
        match storage.permits_in_window(&property.bbl, start).await {
            Ok(permits) => {
                let metrics = aggregate(&property.bbl, &permits);
                match storage.replace_metrics(&metrics).await {
                    Ok(()) => summary.succeeded += 1,
                    Err(e) => {
                        tracing::warn!("Failed to store metrics for {}: {}", property.bbl, e);
                        summary.failed += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Failed to load permits for {}: {}", property.bbl, e);
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        "Metrics stage: {} attempted, {} succeeded, {} failed (window from {})",
        summary.attempted,
        summary.succeeded,
        summary.failed,
        start
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;
    use uuid::Uuid;

    fn permit(cost: Option<&str>, work_type: Option<&str>, filed: Option<&str>) -> Permit {
        Permit {
            id: Uuid::new_v4(),
            external_ref: None,
            bbl: Some("3-05008-0064".to_string()),
            borough_raw: None,
            block_raw: None,
            lot_raw: None,
            address_raw: None,
            cost: cost.map(|c| BigDecimal::from_str(c).unwrap()),
            work_type: work_type.map(str::to_string),
            filed_date: filed.map(|f| NaiveDate::parse_from_str(f, "%Y-%m-%d").unwrap()),
            latitude: None,
            longitude: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn missing_cost_counts_as_zero() {
        let permits = vec![
            permit(Some("1000"), Some("PLUMBING"), Some("2026-01-01")),
            permit(None, Some("PLUMBING"), Some("2026-02-01")),
        ];
        let m = aggregate("3-05008-0064", &permits);
        assert_eq!(m.permit_count, 2);
        assert_eq!(m.total_cost, BigDecimal::from_str("1000").unwrap());
    }

    #[test]
    fn tracks_most_recent_filing() {
        let permits = vec![
            permit(Some("1"), Some("GENERAL"), Some("2024-06-01")),
            permit(Some("1"), Some("GENERAL"), Some("2025-03-15")),
        ];
        let m = aggregate("x", &permits);
        assert_eq!(
            m.last_filed_date,
            Some(NaiveDate::parse_from_str("2025-03-15", "%Y-%m-%d").unwrap())
        );
    }

    #[test]
    fn dominant_work_type_is_most_frequent() {
        let permits = vec![
            permit(None, Some("ELECTRICAL"), Some("2025-01-01")),
            permit(None, Some("PLUMBING"), Some("2025-02-01")),
            permit(None, Some("PLUMBING"), Some("2025-03-01")),
        ];
        let m = aggregate("x", &permits);
        assert_eq!(m.dominant_work_type.as_deref(), Some("PLUMBING"));
    }

    #[test]
    fn frequency_ties_break_by_most_recent_filing() {
        let permits = vec![
            permit(None, Some("ELECTRICAL"), Some("2025-01-01")),
            permit(None, Some("ELECTRICAL"), Some("2025-06-01")),
            permit(None, Some("PLUMBING"), Some("2025-02-01")),
            permit(None, Some("PLUMBING"), Some("2025-07-01")),
        ];
        let m = aggregate("x", &permits);
        // Both appear twice; PLUMBING filed most recently within the tie.
        assert_eq!(m.dominant_work_type.as_deref(), Some("PLUMBING"));
    }

    #[test]
    fn untyped_permits_still_counted_but_never_dominant() {
        let permits = vec![
            permit(Some("500"), None, Some("2025-01-01")),
            permit(None, Some("DEMOLITION"), Some("2025-02-01")),
        ];
        let m = aggregate("x", &permits);
        assert_eq!(m.permit_count, 2);
        assert_eq!(m.dominant_work_type.as_deref(), Some("DEMOLITION"));
    }

    #[test]
    fn empty_window_yields_zeroes() {
        let m = aggregate("x", &[]);
        assert_eq!(m.permit_count, 0);
        assert_eq!(m.total_cost, BigDecimal::from(0));
        assert!(m.last_filed_date.is_none());
        assert!(m.dominant_work_type.is_none());
    }

    #[test]
    fn window_start_is_three_years_back() {
        let today = NaiveDate::parse_from_str("2026-08-27", "%Y-%m-%d").unwrap();
        assert_eq!(
            window_start(today, 3),
            NaiveDate::parse_from_str("2023-08-27", "%Y-%m-%d").unwrap()
        );
    }
}
