use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============ Database Models ============

/// A property, keyed by its canonical borough-block-lot identifier.
///
/// Attributes are grouped by provenance. Owner names from different sources
/// are kept in separate fields and never collapsed to a single "true owner".
/// Every attribute except the key columns is independently nullable; source
/// fields are only ever written null -> value (see `db_storage`), derived
/// fields (valuation-dependent equity, scores) are recomputed wholesale.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Property {
    /// Canonical property key, e.g. "3-05008-0064".
    pub bbl: String,
    pub borough: i16,
    pub block: i32,
    pub lot: i32,
    pub address: Option<String>,

    /// Owner name as reported by the parcel registry.
    pub current_owner_name: Option<String>,
    /// Owner name as reported by the tax assessment roll.
    pub owner_name_rpad: Option<String>,

    pub building_class: Option<String>,
    pub land_use_code: Option<String>,
    pub unit_count: Option<i32>,
    pub floor_count: Option<i32>,
    pub gross_sqft: Option<i32>,
    pub year_built: Option<i32>,

    pub purchase_date: Option<NaiveDate>,
    pub purchase_price: Option<BigDecimal>,
    pub mortgage_amount: Option<BigDecimal>,
    pub mailing_address: Option<String>,

    pub estimated_value: Option<BigDecimal>,
    pub estimated_rent_per_unit: Option<BigDecimal>,
    pub estimated_rent_annual: Option<BigDecimal>,
    pub valuation_source: Option<String>,
    /// estimated_value - mortgage_amount; null whenever either operand is null.
    pub estimated_equity: Option<BigDecimal>,

    pub score_affordability: Option<f64>,
    pub score_renovation: Option<f64>,
    pub score_contact: Option<f64>,
    pub score_composite: Option<f64>,
    pub tier: Option<String>,
    pub score_rationale: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A construction permit as delivered by the permit source.
///
/// Read-only to the pipeline except for the `bbl` linkage field, which the
/// identity resolver writes once.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Permit {
    pub id: Uuid,
    /// Row identifier in the upstream permit system, used for intake dedup.
    pub external_ref: Option<String>,
    /// Resolved canonical property key; null until the resolver links it.
    pub bbl: Option<String>,
    pub borough_raw: Option<String>,
    pub block_raw: Option<String>,
    pub lot_raw: Option<String>,
    pub address_raw: Option<String>,
    pub cost: Option<BigDecimal>,
    pub work_type: Option<String>,
    pub filed_date: Option<NaiveDate>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Trailing-window permit activity per property. Recomputed in full on every
/// run; a materialized view, not an independently mutated table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PropertyMetrics {
    pub bbl: String,
    pub permit_count: i64,
    pub total_cost: BigDecimal,
    pub last_filed_date: Option<NaiveDate>,
    /// Most frequent work type in the window; ties broken by the most recent
    /// filing date among the tied types.
    pub dominant_work_type: Option<String>,
    pub computed_at: DateTime<Utc>,
}

/// A contact record keyed by normalized owner name, not by property.
/// One owner may hold many properties; the property relationship is a
/// many-to-many name match (see `property_contacts`).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OwnerContact {
    pub id: Uuid,
    pub normalized_name: String,
    pub phone: Option<String>,
    pub phone_type: Option<String>,
    pub email: Option<String>,
    pub is_verified: bool,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A recorded document from the deed/transaction registry.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub bbl: String,
    pub doc_id: i64,
    pub doc_type: String,
    pub doc_date: NaiveDate,
    pub doc_amount: Option<BigDecimal>,
    pub created_at: DateTime<Utc>,
}

/// A party on a transaction, tagged with its role. Parties are stored as
/// delivered: ungrouped, never deduplicated, never collapsed to "the" owner.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TransactionParty {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub role: String,
    pub name: Option<String>,
    pub mailing_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============ External Source Payloads ============

/// Parcel registry record: physical attributes plus its view of the owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParcelRecord {
    pub owner_name: Option<String>,
    pub address: Option<String>,
    pub building_class: Option<String>,
    pub land_use_code: Option<String>,
    pub unit_count: Option<i32>,
    pub floor_count: Option<i32>,
    pub gross_sqft: Option<i32>,
    pub year_built: Option<i32>,
}

/// Tax assessment record. Non-coverage (tax-exempt, government parcels) is
/// high and expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxAssessmentRecord {
    pub owner_name: Option<String>,
}

/// One recorded document from the deed registry, with its parties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeedDocument {
    pub doc_id: i64,
    pub doc_type: String,
    pub doc_date: NaiveDate,
    pub doc_amount: Option<BigDecimal>,
    #[serde(default)]
    pub parties: Vec<DeedParty>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeedParty {
    pub role: String,
    pub name: Option<String>,
    pub mailing_address: Option<String>,
}

/// Market valuation record from either the primary or fallback source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationRecord {
    pub estimated_value: Option<BigDecimal>,
    pub estimated_rent_per_unit: Option<BigDecimal>,
}

/// One contact record from the contact-enrichment vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRecord {
    pub phone: Option<String>,
    pub phone_type: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub verified: bool,
    pub source: Option<String>,
}

// ============ API Request/Response Models ============

/// One raw permit row from the permit scraper.
#[derive(Debug, Clone, Deserialize)]
pub struct PermitIntakeRow {
    pub external_ref: Option<String>,
    pub borough: Option<String>,
    pub block: Option<String>,
    pub lot: Option<String>,
    pub address: Option<String>,
    pub cost: Option<BigDecimal>,
    pub work_type: Option<String>,
    pub filed_date: Option<NaiveDate>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct PermitIntakeRequest {
    pub permits: Vec<PermitIntakeRow>,
}

#[derive(Debug, Serialize)]
pub struct PermitIntakeResponse {
    pub received: usize,
    pub stored: usize,
}

/// Query parameters for the property list surface.
#[derive(Debug, Deserialize)]
pub struct PropertyQueryParams {
    pub tier: Option<String>,
    pub limit: Option<i64>,
}

/// Query parameters for the pipeline trigger.
#[derive(Debug, Deserialize)]
pub struct PipelineRunParams {
    /// Permits adapters to overwrite already-populated source fields.
    /// Out-of-band use only, e.g. after a documented upstream bug fix.
    #[serde(default)]
    pub force_refresh: bool,
}

/// Property detail for the dashboard: the row plus its derived metrics and
/// all linked contacts (ambiguous matches included, by design).
#[derive(Debug, Serialize)]
pub struct PropertyDetail {
    pub property: Property,
    pub metrics: Option<PropertyMetrics>,
    pub contacts: Vec<OwnerContact>,
}

/// A transaction with its parties, for the read surface.
#[derive(Debug, Serialize)]
pub struct TransactionDetail {
    pub transaction: Transaction,
    pub parties: Vec<TransactionParty>,
}
