/// Scoring engine: three component scores, a weighted composite, a tier
/// letter and a short rationale. Everything here is a pure function of the
/// merged attributes, the windowed metrics and the linked contacts; the
/// stage recomputes all of it wholesale on every run.
use crate::config::ScoringWeights;
use crate::db_storage::PropertyStorage;
use crate::errors::AppError;
use crate::models::{OwnerContact, Property, PropertyMetrics};
use crate::pipeline::StageSummary;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{Datelike, Months, NaiveDate, Utc};

/// Score used when valuation inputs are missing. Deliberately not zero:
/// absent data must not read as "worst possible".
pub const NULL_INPUT_FALLBACK_SCORE: f64 = 50.0;

/// Bonus for a purchase within the recency window combined with positive
/// estimated appreciation.
pub const RECENT_PURCHASE_BONUS: f64 = 15.0;
pub const RECENT_PURCHASE_YEARS: u32 = 3;

/// Trailing permit spend per unit at which the renovation spend component
/// bottoms out. A configuration default, not a sourced constant.
pub const SPEND_PER_UNIT_SCALE: f64 = 25_000.0;

const CONTACT_BASE_CREDIT: f64 = 40.0;
const CONTACT_MOBILE_CREDIT: f64 = 30.0;
const CONTACT_VERIFIED_CREDIT: f64 = 30.0;

fn clamp_score(raw: f64) -> f64 {
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(0.0, 100.0)
}

/// estimated_value - mortgage_amount; null whenever either operand is null.
/// Never defaults to zero.
pub fn estimated_equity(
    estimated_value: Option<&BigDecimal>,
    mortgage_amount: Option<&BigDecimal>,
) -> Option<BigDecimal> {
    match (estimated_value, mortgage_amount) {
        (Some(value), Some(mortgage)) => Some(value - mortgage),
        _ => None,
    }
}

/// Affordability: increasing in equity, decreasing in mortgage-to-value.
/// A purchase within the last `RECENT_PURCHASE_YEARS` with positive
/// estimated appreciation earns a fixed bonus. Missing value or mortgage
/// yields the null-input fallback.
pub fn affordability_score(
    estimated_value: Option<f64>,
    mortgage_amount: Option<f64>,
    purchase_price: Option<f64>,
    purchase_date: Option<NaiveDate>,
    today: NaiveDate,
) -> f64 {
    let (Some(value), Some(mortgage)) = (estimated_value, mortgage_amount) else {
        return NULL_INPUT_FALLBACK_SCORE;
    };
    if value <= 0.0 {
        return NULL_INPUT_FALLBACK_SCORE;
    }

    let equity = value - mortgage;
    let mut score = clamp_score(equity / value * 100.0);

    if let (Some(price), Some(date)) = (purchase_price, purchase_date) {
        let recent = date
            .checked_add_months(Months::new(RECENT_PURCHASE_YEARS * 12))
            .map(|cutoff| cutoff >= today)
            .unwrap_or(false);
        if recent && value > price {
            score = clamp_score(score + RECENT_PURCHASE_BONUS);
        }
    }

    score
}

/// Renovation need: increasing in building age, decreasing in trailing
/// permit spend per unit. Many units with minimal trailing spend scores
/// high. Unknown year built falls back to the null-input constant for the
/// age component.
pub fn renovation_score(
    year_built: Option<i32>,
    unit_count: Option<i32>,
    trailing_spend: f64,
    today: NaiveDate,
) -> f64 {
    let age_component = match year_built {
        Some(built) if built <= today.year() => {
            clamp_score((today.year() - built) as f64)
        }
        _ => NULL_INPUT_FALLBACK_SCORE,
    };

    let units = unit_count.filter(|u| *u > 0).unwrap_or(1) as f64;
    let spend_per_unit = trailing_spend.max(0.0) / units;
    let spend_component = clamp_score(100.0 - spend_per_unit / SPEND_PER_UNIT_SCALE * 100.0);

    clamp_score(0.6 * age_component + 0.4 * spend_component)
}

/// Contact quality: base credit for any linked contact, more for a mobile
/// phone, more for a verified record. No linked contacts is the floor.
pub fn contact_quality_score(contacts: &[OwnerContact]) -> f64 {
    if contacts.is_empty() {
        return 0.0;
    }

    let mut score = CONTACT_BASE_CREDIT;
    let has_mobile = contacts.iter().any(|c| {
        c.phone.is_some()
            && c.phone_type
                .as_deref()
                .map(|t| {
                    let t = t.to_lowercase();
                    t.contains("mobile") || t.contains("cell")
                })
                .unwrap_or(false)
    });
    if has_mobile {
        score += CONTACT_MOBILE_CREDIT;
    }
    if contacts.iter().any(|c| c.is_verified) {
        score += CONTACT_VERIFIED_CREDIT;
    }
    clamp_score(score)
}

pub fn composite_score(
    weights: &ScoringWeights,
    affordability: f64,
    renovation: f64,
    contact: f64,
) -> f64 {
    clamp_score(
        weights.affordability * affordability
            + weights.renovation * renovation
            + weights.contact * contact,
    )
}

/// Tier thresholds: A = [80,100], B = [60,80), C = [40,60), D = [0,40).
pub fn tier_for(composite: f64) -> &'static str {
    if composite >= 80.0 {
        "A"
    } else if composite >= 60.0 {
        "B"
    } else if composite >= 40.0 {
        "C"
    } else {
        "D"
    }
}

fn affordability_phrase(score: f64) -> &'static str {
    if score >= 60.0 {
        "high owner equity"
    } else if score >= 40.0 {
        "moderate equity position"
    } else {
        "thin owner equity"
    }
}

fn renovation_phrase(score: f64) -> &'static str {
    if score >= 60.0 {
        "aging building with little recent permit spend"
    } else if score >= 40.0 {
        "some renovation potential"
    } else {
        "recently improved building"
    }
}

fn contact_phrase(score: f64) -> &'static str {
    if score >= 60.0 {
        "verified owner contact on file"
    } else if score > 0.0 {
        "owner contact available"
    } else {
        "no owner contact found"
    }
}

/// Short explanation citing the one or two dominant weighted contributors.
/// Human-readable output only; never an input to ranking.
pub fn build_rationale(
    weights: &ScoringWeights,
    affordability: f64,
    renovation: f64,
    contact: f64,
) -> String {
    let mut contributions = [
        (
            weights.affordability * affordability,
            affordability_phrase(affordability),
        ),
        (
            weights.renovation * renovation,
            renovation_phrase(renovation),
        ),
        (weights.contact * contact, contact_phrase(contact)),
    ];
    contributions.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    format!("{}; {}", contributions[0].1, contributions[1].1)
}

fn to_f64(value: Option<&BigDecimal>) -> Option<f64> {
    value.and_then(|v| v.to_f64())
}

/// Everything derived for one property in a scoring pass.
pub struct PropertyScores {
    pub equity: Option<BigDecimal>,
    pub affordability: f64,
    pub renovation: f64,
    pub contact: f64,
    pub composite: f64,
    pub tier: &'static str,
    pub rationale: String,
}

pub fn score_property(
    weights: &ScoringWeights,
    property: &Property,
    metrics: Option<&PropertyMetrics>,
    contacts: &[OwnerContact],
    today: NaiveDate,
) -> PropertyScores {
    let equity = estimated_equity(
        property.estimated_value.as_ref(),
        property.mortgage_amount.as_ref(),
    );

    let affordability = affordability_score(
        to_f64(property.estimated_value.as_ref()),
        to_f64(property.mortgage_amount.as_ref()),
        to_f64(property.purchase_price.as_ref()),
        property.purchase_date,
        today,
    );

    let trailing_spend = metrics
        .map(|m| m.total_cost.to_f64().unwrap_or(0.0))
        .unwrap_or(0.0);
    let renovation = renovation_score(
        property.year_built,
        property.unit_count,
        trailing_spend,
        today,
    );

    let contact = contact_quality_score(contacts);
    let composite = composite_score(weights, affordability, renovation, contact);

    PropertyScores {
        equity,
        affordability,
        renovation,
        contact,
        composite,
        tier: tier_for(composite),
        rationale: build_rationale(weights, affordability, renovation, contact),
    }
}

/// Rescores every property. Stale scores after a metrics or valuation
/// update are corrected here, never patched in place.
pub async fn run_scoring_stage(
    storage: &PropertyStorage,
    weights: &ScoringWeights,
) -> Result<StageSummary, AppError> {
    let mut summary = StageSummary::new("scoring");
    let today = Utc::now().date_naive();
    let properties = storage.all_properties().await?;
    summary.attempted = properties.len();

    for property in &properties {
        let outcome = async {
            let metrics = storage.metrics_for(&property.bbl).await?;
            let contacts = storage.contacts_for_property(&property.bbl).await?;
            let scores = score_property(weights, property, metrics.as_ref(), &contacts, today);
            storage
                .update_scores(
                    &property.bbl,
                    scores.equity.clone(),
                    scores.affordability,
                    scores.renovation,
                    scores.contact,
                    scores.composite,
                    scores.tier,
                    &scores.rationale,
                )
                .await
        }
        .await;

        match outcome {
            Ok(()) => summary.succeeded += 1,
            Err(e) => {
                tracing::warn!("Scoring failed for {}: {}", property.bbl, e);
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        "Scoring stage: {} attempted, {} succeeded, {} failed",
        summary.attempted,
        summary.succeeded,
        summary.failed
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;
    use uuid::Uuid;

    fn contact(phone_type: Option<&str>, verified: bool) -> OwnerContact {
        OwnerContact {
            id: Uuid::new_v4(),
            normalized_name: "ACME HOLDINGS LLC".to_string(),
            phone: phone_type.map(|_| "+12124567890".to_string()),
            phone_type: phone_type.map(str::to_string),
            email: None,
            is_verified: verified,
            source: None,
            created_at: Utc::now(),
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn missing_valuation_yields_fallback_not_zero() {
        let today = date("2026-08-27");
        assert_eq!(
            affordability_score(None, Some(100_000.0), None, None, today),
            NULL_INPUT_FALLBACK_SCORE
        );
        assert_eq!(
            affordability_score(Some(500_000.0), None, None, None, today),
            NULL_INPUT_FALLBACK_SCORE
        );
    }

    #[test]
    fn affordability_increases_with_equity() {
        let today = date("2026-08-27");
        let low = affordability_score(Some(500_000.0), Some(450_000.0), None, None, today);
        let high = affordability_score(Some(500_000.0), Some(100_000.0), None, None, today);
        assert!(high > low);
    }

    #[test]
    fn recent_appreciating_purchase_gets_bonus() {
        let today = date("2026-08-27");
        let base = affordability_score(Some(500_000.0), Some(250_000.0), None, None, today);
        let bonused = affordability_score(
            Some(500_000.0),
            Some(250_000.0),
            Some(400_000.0),
            Some(date("2025-01-15")),
            today,
        );
        assert_eq!(bonused, base + RECENT_PURCHASE_BONUS);

        // Old purchase: no bonus even with appreciation.
        let old = affordability_score(
            Some(500_000.0),
            Some(250_000.0),
            Some(400_000.0),
            Some(date("2015-01-15")),
            today,
        );
        assert_eq!(old, base);
    }

    #[test]
    fn underwater_property_floors_at_zero() {
        let today = date("2026-08-27");
        let score = affordability_score(Some(300_000.0), Some(400_000.0), None, None, today);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn renovation_favors_old_buildings_with_no_spend() {
        let today = date("2026-08-27");
        let old_quiet = renovation_score(Some(1910), Some(20), 0.0, today);
        let new_busy = renovation_score(Some(2020), Some(20), 2_000_000.0, today);
        assert!(old_quiet > new_busy);
        assert!(old_quiet >= 90.0);
    }

    #[test]
    fn renovation_decreases_with_spend_per_unit() {
        let today = date("2026-08-27");
        let quiet = renovation_score(Some(1950), Some(10), 10_000.0, today);
        let busy = renovation_score(Some(1950), Some(10), 200_000.0, today);
        assert!(quiet > busy);
    }

    #[test]
    fn contact_floor_and_credits() {
        assert_eq!(contact_quality_score(&[]), 0.0);

        let landline_only = vec![contact(Some("landline"), false)];
        assert_eq!(contact_quality_score(&landline_only), 40.0);

        let mobile = vec![contact(Some("mobile"), false)];
        assert_eq!(contact_quality_score(&mobile), 70.0);

        let mobile_verified = vec![contact(Some("mobile"), true)];
        assert_eq!(contact_quality_score(&mobile_verified), 100.0);
    }

    #[test]
    fn tiers_partition_the_composite_range() {
        assert_eq!(tier_for(100.0), "A");
        assert_eq!(tier_for(80.0), "A");
        assert_eq!(tier_for(79.999), "B");
        assert_eq!(tier_for(60.0), "B");
        assert_eq!(tier_for(59.999), "C");
        assert_eq!(tier_for(40.0), "C");
        assert_eq!(tier_for(39.999), "D");
        assert_eq!(tier_for(0.0), "D");
    }

    #[test]
    fn equity_is_null_unless_both_operands_present() {
        let value = BigDecimal::from_str("500000").unwrap();
        let mortgage = BigDecimal::from_str("320000").unwrap();
        assert_eq!(
            estimated_equity(Some(&value), Some(&mortgage)),
            Some(BigDecimal::from_str("180000").unwrap())
        );
        assert_eq!(estimated_equity(Some(&value), None), None);
        assert_eq!(estimated_equity(None, Some(&mortgage)), None);
        assert_eq!(estimated_equity(None, None), None);
    }

    #[test]
    fn rationale_cites_dominant_components() {
        let weights = ScoringWeights::default();
        let rationale = build_rationale(&weights, 90.0, 85.0, 0.0);
        assert!(rationale.contains("high owner equity"));
        assert!(rationale.contains("aging building"));
        assert!(!rationale.contains("no owner contact"));
    }
}
