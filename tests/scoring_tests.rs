/// Scenario tests for the scoring engine: full properties through
/// `score_property`, checking tiers and rationale, not just the component
/// functions.
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use property_pipeline::config::ScoringWeights;
use property_pipeline::models::{OwnerContact, Property, PropertyMetrics};
use property_pipeline::scoring::score_property;
use std::str::FromStr;
use uuid::Uuid;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn money(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

fn bare_property(bbl: &str) -> Property {
    Property {
        bbl: bbl.to_string(),
        borough: 3,
        block: 5008,
        lot: 64,
        address: Some("123 MAIN ST".to_string()),
        current_owner_name: Some("ACME HOLDINGS LLC".to_string()),
        owner_name_rpad: None,
        building_class: Some("C1".to_string()),
        land_use_code: None,
        unit_count: Some(8),
        floor_count: Some(4),
        gross_sqft: Some(6400),
        year_built: Some(1920),
        purchase_date: None,
        purchase_price: None,
        mortgage_amount: None,
        mailing_address: None,
        estimated_value: None,
        estimated_rent_per_unit: None,
        estimated_rent_annual: None,
        valuation_source: None,
        estimated_equity: None,
        score_affordability: None,
        score_renovation: None,
        score_contact: None,
        score_composite: None,
        tier: None,
        score_rationale: None,
        created_at: Utc::now(),
        updated_at: None,
    }
}

fn metrics(bbl: &str, total_cost: &str) -> PropertyMetrics {
    PropertyMetrics {
        bbl: bbl.to_string(),
        permit_count: 2,
        total_cost: money(total_cost),
        last_filed_date: Some(date("2025-06-01")),
        dominant_work_type: Some("PLUMBING".to_string()),
        computed_at: Utc::now(),
    }
}

fn verified_mobile_contact() -> OwnerContact {
    OwnerContact {
        id: Uuid::new_v4(),
        normalized_name: "ACME HOLDINGS LLC".to_string(),
        phone: Some("+12124567890".to_string()),
        phone_type: Some("mobile".to_string()),
        email: Some("owner@example.com".to_string()),
        is_verified: true,
        source: Some("vendor-a".to_string()),
        created_at: Utc::now(),
    }
}

#[test]
fn strong_candidate_lands_in_tier_a() {
    // Old building, no recent permit spend, high equity, verified mobile
    // contact: the archetypal outreach target.
    let today = date("2026-08-27");
    let mut property = bare_property("3-05008-0064");
    property.estimated_value = Some(money("2000000"));
    property.mortgage_amount = Some(money("200000"));

    let scores = score_property(
        &ScoringWeights::default(),
        &property,
        Some(&metrics("3-05008-0064", "5000")),
        &[verified_mobile_contact()],
        today,
    );

    assert_eq!(scores.tier, "A");
    assert!(scores.composite >= 80.0);
    assert_eq!(scores.equity, Some(money("1800000")));
}

#[test]
fn unreachable_owner_drags_the_composite_down() {
    let today = date("2026-08-27");
    let mut property = bare_property("3-05008-0064");
    property.estimated_value = Some(money("2000000"));
    property.mortgage_amount = Some(money("200000"));

    let with_contact = score_property(
        &ScoringWeights::default(),
        &property,
        None,
        &[verified_mobile_contact()],
        today,
    );
    let without_contact =
        score_property(&ScoringWeights::default(), &property, None, &[], today);

    assert!(with_contact.composite > without_contact.composite);
    assert_eq!(without_contact.contact, 0.0);
    assert!(without_contact.rationale.len() > 0);
}

#[test]
fn unenriched_property_is_scorable_with_fallbacks() {
    // Nothing but the key columns: valuation fallback keeps it mid-range
    // rather than condemning it to zero.
    let today = date("2026-08-27");
    let mut property = bare_property("4-00100-0001");
    property.estimated_value = None;
    property.mortgage_amount = None;
    property.year_built = None;
    property.current_owner_name = None;

    let scores = score_property(&ScoringWeights::default(), &property, None, &[], today);

    assert!(scores.equity.is_none());
    assert!(scores.affordability > 0.0);
    assert!((0.0..=100.0).contains(&scores.composite));
    assert!(matches!(scores.tier, "A" | "B" | "C" | "D"));
}

#[test]
fn heavy_recent_spend_lowers_renovation_need() {
    let today = date("2026-08-27");
    let mut property = bare_property("3-05008-0064");
    property.estimated_value = Some(money("1000000"));
    property.mortgage_amount = Some(money("500000"));

    let quiet = score_property(
        &ScoringWeights::default(),
        &property,
        Some(&metrics("3-05008-0064", "0")),
        &[],
        today,
    );
    let busy = score_property(
        &ScoringWeights::default(),
        &property,
        Some(&metrics("3-05008-0064", "1600000")),
        &[],
        today,
    );

    assert!(quiet.renovation > busy.renovation);
    assert!(quiet.composite > busy.composite);
}
