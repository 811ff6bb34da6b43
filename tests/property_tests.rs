/// Property-based tests using proptest
/// Tests invariants that should hold for all inputs
use proptest::prelude::*;
use property_pipeline::config::ScoringWeights;
use property_pipeline::contacts::{normalize_owner_name, normalize_us_phone};
use property_pipeline::identity::Bbl;
use property_pipeline::scoring::{
    affordability_score, composite_score, contact_quality_score, renovation_score, tier_for,
};

// Property: key parsing never panics, whatever the input
proptest! {
    #[test]
    fn key_parsing_never_panics(key in "\\PC*") {
        let _ = Bbl::parse(&key);
    }

    #[test]
    fn raw_field_parsing_never_panics(
        borough in "\\PC*",
        block in "\\PC*",
        lot in "\\PC*"
    ) {
        let _ = Bbl::from_raw(Some(&borough), Some(&block), Some(&lot));
    }

    #[test]
    fn valid_keys_round_trip(
        borough in 1u8..=5u8,
        block in 1u32..=99_999u32,
        lot in 1u32..=9_999u32
    ) {
        let bbl = Bbl::from_raw(
            Some(&borough.to_string()),
            Some(&block.to_string()),
            Some(&lot.to_string()),
        ).unwrap();
        let rendered = bbl.to_string();
        // Fixed-width rendering: B-BBBBB-LLLL
        prop_assert_eq!(rendered.len(), 12);
        prop_assert_eq!(Bbl::parse(&rendered).unwrap(), bbl);
    }
}

// Property: owner name normalization is idempotent and spelling-insensitive
proptest! {
    #[test]
    fn normalization_never_panics(name in "\\PC*") {
        let _ = normalize_owner_name(&name);
    }

    #[test]
    fn normalization_is_idempotent(name in "\\PC*") {
        let once = normalize_owner_name(&name);
        prop_assert_eq!(normalize_owner_name(&once), once);
    }

    #[test]
    fn normalized_names_have_no_double_spaces(name in "\\PC*") {
        let normalized = normalize_owner_name(&name);
        prop_assert!(!normalized.contains("  "));
        prop_assert_eq!(normalized.trim(), normalized.as_str());
    }
}

// Property: phone validation never panics
proptest! {
    #[test]
    fn phone_validation_never_panics(phone in "\\PC*") {
        let _ = normalize_us_phone(&phone);
    }

    #[test]
    fn normalized_phones_are_e164(digits in "[2-9][0-9]{9}") {
        if let Some(normalized) = normalize_us_phone(&digits) {
            prop_assert!(normalized.starts_with("+1"));
            prop_assert!(normalized[1..].chars().all(|c| c.is_ascii_digit()));
        }
    }
}

// Property: every score stays within [0, 100] for any input
proptest! {
    #[test]
    fn affordability_stays_bounded(
        value in proptest::option::of(-1e12f64..1e12),
        mortgage in proptest::option::of(-1e12f64..1e12),
        price in proptest::option::of(0f64..1e12)
    ) {
        let today = chrono::NaiveDate::from_ymd_opt(2026, 8, 27).unwrap();
        let score = affordability_score(value, mortgage, price, None, today);
        prop_assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn renovation_stays_bounded(
        year_built in proptest::option::of(1600i32..2100),
        units in proptest::option::of(-10i32..500),
        spend in -1e9f64..1e12
    ) {
        let today = chrono::NaiveDate::from_ymd_opt(2026, 8, 27).unwrap();
        let score = renovation_score(year_built, units, spend, today);
        prop_assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn composite_stays_bounded_and_tiered(
        a in 0f64..=100.0,
        r in 0f64..=100.0,
        c in 0f64..=100.0
    ) {
        let weights = ScoringWeights::default();
        let composite = composite_score(&weights, a, r, c);
        prop_assert!((0.0..=100.0).contains(&composite));
        prop_assert!(matches!(tier_for(composite), "A" | "B" | "C" | "D"));
    }
}

#[test]
fn empty_contacts_score_zero() {
    assert_eq!(contact_quality_score(&[]), 0.0);
}
