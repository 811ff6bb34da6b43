use std::env;

use bigdecimal::BigDecimal;
use property_pipeline::db::Database;
use property_pipeline::db_storage::PropertyStorage;
use property_pipeline::models::{ContactRecord, ParcelRecord, PermitIntakeRow};
use std::str::FromStr;
use uuid::Uuid;

/// Integration smoke tests for the storage merge policy.
/// Marked ignored to avoid running against production by accident; set
/// TEST_DATABASE_URL to run (the schema from schema.sql must be applied).

async fn connect() -> anyhow::Result<PropertyStorage> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;
    let db = Database::new(&db_url).await?;
    Ok(PropertyStorage::new(db.pool.clone()))
}

/// Unique key per run so repeated test runs never collide.
fn unique_bbl() -> String {
    let block = 10_000 + (Uuid::new_v4().as_u128() % 80_000) as u32;
    let lot = 1 + (Uuid::new_v4().as_u128() % 9_000) as u32;
    format!("5-{:05}-{:04}", block, lot)
}

#[tokio::test]
#[ignore]
async fn permit_intake_deduplicates_on_external_ref() -> anyhow::Result<()> {
    let storage = connect().await?;

    let row = PermitIntakeRow {
        external_ref: Some(format!("test-{}", Uuid::new_v4())),
        borough: Some("5".to_string()),
        block: Some("123".to_string()),
        lot: Some("45".to_string()),
        address: Some("1 TEST PL".to_string()),
        cost: Some(BigDecimal::from_str("15000")?),
        work_type: Some("PLUMBING".to_string()),
        filed_date: None,
        latitude: None,
        longitude: None,
    };

    let first = storage.insert_permit(&row).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let second = storage.insert_permit(&row).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;

    assert!(first);
    assert!(!second);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn populated_fields_survive_later_writes() -> anyhow::Result<()> {
    let storage = connect().await?;
    let bbl = unique_bbl();

    storage
        .get_or_create_property(&bbl, 5, 12345, 678, None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let property = storage
        .property_by_bbl(&bbl)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .expect("property just created");

    let first = ParcelRecord {
        owner_name: Some("FIRST OWNER LLC".to_string()),
        address: Some("1 FIRST AVE".to_string()),
        building_class: None,
        land_use_code: None,
        unit_count: Some(4),
        floor_count: None,
        gross_sqft: None,
        year_built: Some(1930),
    };
    storage
        .apply_parcel(&property, &first, false)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    // Second write: conflicting owner must not replace the first, but the
    // still-null building class must fill in.
    let property = storage
        .property_by_bbl(&bbl)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .unwrap();
    let second = ParcelRecord {
        owner_name: Some("SECOND OWNER LLC".to_string()),
        address: None,
        building_class: Some("C1".to_string()),
        land_use_code: None,
        unit_count: None,
        floor_count: None,
        gross_sqft: None,
        year_built: None,
    };
    storage
        .apply_parcel(&property, &second, false)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let final_row = storage
        .property_by_bbl(&bbl)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .unwrap();
    assert_eq!(final_row.current_owner_name.as_deref(), Some("FIRST OWNER LLC"));
    assert_eq!(final_row.building_class.as_deref(), Some("C1"));
    assert_eq!(final_row.unit_count, Some(4));
    Ok(())
}

#[tokio::test]
#[ignore]
async fn force_refresh_overwrites_populated_fields() -> anyhow::Result<()> {
    let storage = connect().await?;
    let bbl = unique_bbl();

    storage
        .get_or_create_property(&bbl, 5, 22222, 333, None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let property = storage
        .property_by_bbl(&bbl)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .unwrap();

    let first = ParcelRecord {
        owner_name: Some("STALE OWNER".to_string()),
        address: None,
        building_class: None,
        land_use_code: None,
        unit_count: None,
        floor_count: None,
        gross_sqft: None,
        year_built: None,
    };
    storage
        .apply_parcel(&property, &first, false)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let property = storage
        .property_by_bbl(&bbl)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .unwrap();
    let corrected = ParcelRecord {
        owner_name: Some("CORRECTED OWNER".to_string()),
        address: None,
        building_class: None,
        land_use_code: None,
        unit_count: None,
        floor_count: None,
        gross_sqft: None,
        year_built: None,
    };
    storage
        .apply_parcel(&property, &corrected, true)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let final_row = storage
        .property_by_bbl(&bbl)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .unwrap();
    assert_eq!(
        final_row.current_owner_name.as_deref(),
        Some("CORRECTED OWNER")
    );
    Ok(())
}

#[tokio::test]
#[ignore]
async fn populated_value_leaves_the_valuation_candidate_sets() -> anyhow::Result<()> {
    let storage = connect().await?;
    let bbl = unique_bbl();
    storage
        .get_or_create_property(&bbl, 5, 44444, 555, None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    // Still null: a candidate for both the primary and the fallback pass,
    // on this run and every later one.
    let primary = storage
        .valuation_primary_candidates(false)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(primary.iter().any(|p| p.bbl == bbl));
    let fallback = storage
        .valuation_fallback_candidates()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(fallback.iter().any(|p| p.bbl == bbl));

    let property = storage
        .property_by_bbl(&bbl)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .expect("property just created");
    storage
        .apply_valuation(
            &property,
            Some(BigDecimal::from_str("750000")?),
            Some(BigDecimal::from_str("2100")?),
            Some(BigDecimal::from_str("25200")?),
            "primary",
            false,
        )
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    // Populated: never re-selected by either valuation pass again.
    let primary = storage
        .valuation_primary_candidates(false)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(!primary.iter().any(|p| p.bbl == bbl));
    let fallback = storage
        .valuation_fallback_candidates()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(!fallback.iter().any(|p| p.bbl == bbl));
    Ok(())
}

#[tokio::test]
#[ignore]
async fn contact_upsert_and_link_are_idempotent() -> anyhow::Result<()> {
    let storage = connect().await?;
    let bbl = unique_bbl();
    storage
        .get_or_create_property(&bbl, 5, 33333, 444, None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let name = format!("TEST OWNER {}", Uuid::new_v4());
    let record = ContactRecord {
        phone: Some("+12124567890".to_string()),
        phone_type: Some("mobile".to_string()),
        email: Some("owner@example.com".to_string()),
        verified: true,
        source: Some("vendor-a".to_string()),
    };

    let first_id = storage
        .upsert_contact(&name, &record)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let second_id = storage
        .upsert_contact(&name, &record)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(first_id, second_id);

    storage
        .link_contact(&bbl, first_id, &name)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    storage
        .link_contact(&bbl, first_id, &name)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let linked = storage
        .contacts_for_property(&bbl)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(linked.len(), 1);
    assert!(linked[0].is_verified);
    Ok(())
}
