/// Database storage for the enrichment pipeline.
///
/// This is the single write path for property attributes, and the place the
/// merge policy lives: a source field is only ever written when it is
/// currently null (`COALESCE(existing, incoming)`), unless the caller passes
/// an explicit force-refresh flag (`COALESCE(incoming, existing)`). An
/// adapter trying to overwrite a populated field without force is a no-op,
/// logged as a warning, never an error. Derived fields (metrics, equity,
/// scores) are replaced wholesale.
use crate::errors::AppError;
use crate::models::{
    ContactRecord, DeedDocument, OwnerContact, ParcelRecord, Permit, PermitIntakeRow, Property,
    PropertyMetrics, TaxAssessmentRecord, Transaction, TransactionParty,
};
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

pub struct PropertyStorage {
    pool: PgPool,
}

/// Logs an adapter write that would overwrite a populated field with a
/// different value. The write itself is already a no-op via COALESCE.
fn warn_blocked<T: PartialEq + std::fmt::Debug>(
    bbl: &str,
    field: &str,
    current: &Option<T>,
    incoming: &Option<T>,
) {
    if let (Some(cur), Some(inc)) = (current, incoming) {
        if cur != inc {
            tracing::warn!(
                "Inconsistent merge attempt on {} field {}: keeping {:?}, ignoring {:?}",
                bbl,
                field,
                cur,
                inc
            );
        }
    }
}

impl PropertyStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ============ Permit intake & identity ============

    /// Stores one raw permit row; duplicate `external_ref`s are ignored.
    /// Returns true if a row was inserted.
    pub async fn insert_permit(&self, row: &PermitIntakeRow) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO permits (
                id, external_ref, borough_raw, block_raw, lot_raw, address_raw,
                cost, work_type, filed_date, latitude, longitude
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (external_ref) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.external_ref)
        .bind(&row.borough)
        .bind(&row.block)
        .bind(&row.lot)
        .bind(&row.address)
        .bind(&row.cost)
        .bind(&row.work_type)
        .bind(row.filed_date)
        .bind(row.latitude)
        .bind(row.longitude)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Permits not yet linked to a property key.
    pub async fn unlinked_permits(&self) -> Result<Vec<Permit>, AppError> {
        let permits =
            sqlx::query_as::<_, Permit>("SELECT * FROM permits WHERE bbl IS NULL ORDER BY created_at")
                .fetch_all(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        Ok(permits)
    }

    /// Creates the property row for a key if absent. Returns true when a new
    /// row was created. Properties are never deleted afterwards.
    pub async fn get_or_create_property(
        &self,
        bbl: &str,
        borough: i16,
        block: i32,
        lot: i32,
        address: Option<&str>,
    ) -> Result<bool, AppError> {
        let existing = sqlx::query_as::<_, (String,)>("SELECT bbl FROM properties WHERE bbl = $1")
            .bind(bbl)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        if existing.is_some() {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO properties (bbl, borough, block, lot, address)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (bbl) DO NOTHING
            "#,
        )
        .bind(bbl)
        .bind(borough)
        .bind(block)
        .bind(lot)
        .bind(address)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(true)
    }

    /// Writes the resolved key back onto a permit. The only permit field this
    /// pipeline ever writes.
    pub async fn link_permit(&self, permit_id: Uuid, bbl: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE permits SET bbl = $2 WHERE id = $1")
            .bind(permit_id)
            .bind(bbl)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    // ============ Retry-by-missing-field candidate selection ============
    //
    // A property is a candidate for an adapter iff at least one of that
    // adapter's target fields is still null. Populated properties are never
    // re-queried; properties the source genuinely has no record for stay
    // null and are re-queried every run (accepted cost of the predicate).
    // With force=true every property is a candidate.

    pub async fn parcel_candidates(&self, force: bool) -> Result<Vec<Property>, AppError> {
        let predicate = if force {
            "TRUE"
        } else {
            "current_owner_name IS NULL OR building_class IS NULL OR land_use_code IS NULL \
             OR unit_count IS NULL OR floor_count IS NULL OR gross_sqft IS NULL \
             OR year_built IS NULL OR address IS NULL"
        };
        self.candidates(predicate).await
    }

    pub async fn tax_candidates(&self, force: bool) -> Result<Vec<Property>, AppError> {
        let predicate = if force { "TRUE" } else { "owner_name_rpad IS NULL" };
        self.candidates(predicate).await
    }

    pub async fn deed_candidates(&self, force: bool) -> Result<Vec<Property>, AppError> {
        let predicate = if force {
            "TRUE"
        } else {
            "purchase_date IS NULL OR purchase_price IS NULL \
             OR mortgage_amount IS NULL OR mailing_address IS NULL"
        };
        self.candidates(predicate).await
    }

    pub async fn valuation_primary_candidates(&self, force: bool) -> Result<Vec<Property>, AppError> {
        let predicate = if force {
            "TRUE"
        } else {
            "estimated_value IS NULL OR estimated_rent_per_unit IS NULL"
        };
        self.candidates(predicate).await
    }

    /// The fallback source only ever sees properties the primary left without
    /// a value; it must never run before the primary for the same property.
    pub async fn valuation_fallback_candidates(&self) -> Result<Vec<Property>, AppError> {
        self.candidates("estimated_value IS NULL").await
    }

    pub async fn contact_candidates(&self) -> Result<Vec<Property>, AppError> {
        self.candidates("current_owner_name IS NOT NULL OR owner_name_rpad IS NOT NULL")
            .await
    }

    async fn candidates(&self, predicate: &str) -> Result<Vec<Property>, AppError> {
        let query = format!("SELECT * FROM properties WHERE {} ORDER BY bbl", predicate);
        let properties = sqlx::query_as::<_, Property>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(properties)
    }

    pub async fn all_properties(&self) -> Result<Vec<Property>, AppError> {
        self.candidates("TRUE").await
    }

    // ============ Monotonic adapter writes ============

    pub async fn apply_parcel(
        &self,
        property: &Property,
        record: &ParcelRecord,
        force: bool,
    ) -> Result<(), AppError> {
        if !force {
            warn_blocked(
                &property.bbl,
                "current_owner_name",
                &property.current_owner_name,
                &record.owner_name,
            );
            warn_blocked(
                &property.bbl,
                "building_class",
                &property.building_class,
                &record.building_class,
            );
            warn_blocked(
                &property.bbl,
                "land_use_code",
                &property.land_use_code,
                &record.land_use_code,
            );
            warn_blocked(
                &property.bbl,
                "unit_count",
                &property.unit_count,
                &record.unit_count,
            );
            warn_blocked(
                &property.bbl,
                "floor_count",
                &property.floor_count,
                &record.floor_count,
            );
            warn_blocked(
                &property.bbl,
                "gross_sqft",
                &property.gross_sqft,
                &record.gross_sqft,
            );
            warn_blocked(
                &property.bbl,
                "year_built",
                &property.year_built,
                &record.year_built,
            );
        }

        let sql = if force {
            r#"
            UPDATE properties SET
                current_owner_name = COALESCE($2, current_owner_name),
                address            = COALESCE($3, address),
                building_class     = COALESCE($4, building_class),
                land_use_code      = COALESCE($5, land_use_code),
                unit_count         = COALESCE($6, unit_count),
                floor_count        = COALESCE($7, floor_count),
                gross_sqft         = COALESCE($8, gross_sqft),
                year_built         = COALESCE($9, year_built),
                updated_at = now()
            WHERE bbl = $1
            "#
        } else {
            r#"
            UPDATE properties SET
                current_owner_name = COALESCE(current_owner_name, $2),
                address            = COALESCE(address, $3),
                building_class     = COALESCE(building_class, $4),
                land_use_code      = COALESCE(land_use_code, $5),
                unit_count         = COALESCE(unit_count, $6),
                floor_count        = COALESCE(floor_count, $7),
                gross_sqft         = COALESCE(gross_sqft, $8),
                year_built         = COALESCE(year_built, $9),
                updated_at = now()
            WHERE bbl = $1
            "#
        };

        sqlx::query(sql)
            .bind(&property.bbl)
            .bind(&record.owner_name)
            .bind(&record.address)
            .bind(&record.building_class)
            .bind(&record.land_use_code)
            .bind(record.unit_count)
            .bind(record.floor_count)
            .bind(record.gross_sqft)
            .bind(record.year_built)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    pub async fn apply_tax(
        &self,
        property: &Property,
        record: &TaxAssessmentRecord,
        force: bool,
    ) -> Result<(), AppError> {
        if !force {
            warn_blocked(
                &property.bbl,
                "owner_name_rpad",
                &property.owner_name_rpad,
                &record.owner_name,
            );
        }

        let sql = if force {
            "UPDATE properties SET owner_name_rpad = COALESCE($2, owner_name_rpad), updated_at = now() WHERE bbl = $1"
        } else {
            "UPDATE properties SET owner_name_rpad = COALESCE(owner_name_rpad, $2), updated_at = now() WHERE bbl = $1"
        };

        sqlx::query(sql)
            .bind(&property.bbl)
            .bind(&record.owner_name)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn apply_deed(
        &self,
        property: &Property,
        purchase_date: Option<NaiveDate>,
        purchase_price: Option<BigDecimal>,
        mortgage_amount: Option<BigDecimal>,
        mailing_address: Option<String>,
        force: bool,
    ) -> Result<(), AppError> {
        if !force {
            warn_blocked(
                &property.bbl,
                "purchase_date",
                &property.purchase_date,
                &purchase_date,
            );
            warn_blocked(
                &property.bbl,
                "purchase_price",
                &property.purchase_price,
                &purchase_price,
            );
            warn_blocked(
                &property.bbl,
                "mortgage_amount",
                &property.mortgage_amount,
                &mortgage_amount,
            );
            warn_blocked(
                &property.bbl,
                "mailing_address",
                &property.mailing_address,
                &mailing_address,
            );
        }

        let sql = if force {
            r#"
            UPDATE properties SET
                purchase_date   = COALESCE($2, purchase_date),
                purchase_price  = COALESCE($3, purchase_price),
                mortgage_amount = COALESCE($4, mortgage_amount),
                mailing_address = COALESCE($5, mailing_address),
                updated_at = now()
            WHERE bbl = $1
            "#
        } else {
            r#"
            UPDATE properties SET
                purchase_date   = COALESCE(purchase_date, $2),
                purchase_price  = COALESCE(purchase_price, $3),
                mortgage_amount = COALESCE(mortgage_amount, $4),
                mailing_address = COALESCE(mailing_address, $5),
                updated_at = now()
            WHERE bbl = $1
            "#
        };

        sqlx::query(sql)
            .bind(&property.bbl)
            .bind(purchase_date)
            .bind(purchase_price)
            .bind(mortgage_amount)
            .bind(mailing_address)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    pub async fn apply_valuation(
        &self,
        property: &Property,
        estimated_value: Option<BigDecimal>,
        rent_per_unit: Option<BigDecimal>,
        rent_annual: Option<BigDecimal>,
        source_tag: &str,
        force: bool,
    ) -> Result<(), AppError> {
        if !force {
            warn_blocked(
                &property.bbl,
                "estimated_value",
                &property.estimated_value,
                &estimated_value,
            );
            warn_blocked(
                &property.bbl,
                "estimated_rent_per_unit",
                &property.estimated_rent_per_unit,
                &rent_per_unit,
            );
        }

        let sql = if force {
            r#"
            UPDATE properties SET
                estimated_value         = COALESCE($2, estimated_value),
                estimated_rent_per_unit = COALESCE($3, estimated_rent_per_unit),
                estimated_rent_annual   = COALESCE($4, estimated_rent_annual),
                valuation_source        = COALESCE($5, valuation_source),
                updated_at = now()
            WHERE bbl = $1
            "#
        } else {
            r#"
            UPDATE properties SET
                estimated_value         = COALESCE(estimated_value, $2),
                estimated_rent_per_unit = COALESCE(estimated_rent_per_unit, $3),
                estimated_rent_annual   = COALESCE(estimated_rent_annual, $4),
                valuation_source        = COALESCE(valuation_source, $5),
                updated_at = now()
            WHERE bbl = $1
            "#
        };

        sqlx::query(sql)
            .bind(&property.bbl)
            .bind(estimated_value)
            .bind(rent_per_unit)
            .bind(rent_annual)
            .bind(source_tag)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    // ============ Transactions ============

    /// Inserts a recorded document; re-runs hit the (bbl, doc_id) conflict
    /// and skip both the document and its parties, so parties are never
    /// duplicated. Returns the new transaction id when inserted.
    pub async fn insert_transaction(
        &self,
        bbl: &str,
        doc: &DeedDocument,
    ) -> Result<Option<Uuid>, AppError> {
        let inserted = sqlx::query_as::<_, (Uuid,)>(
            r#"
            INSERT INTO transactions (id, bbl, doc_id, doc_type, doc_date, doc_amount)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (bbl, doc_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bbl)
        .bind(doc.doc_id)
        .bind(&doc.doc_type)
        .bind(doc.doc_date)
        .bind(&doc.doc_amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        let Some((transaction_id,)) = inserted else {
            return Ok(None);
        };

        for party in &doc.parties {
            sqlx::query(
                r#"
                INSERT INTO transaction_parties (id, transaction_id, role, name, mailing_address)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(transaction_id)
            .bind(&party.role)
            .bind(&party.name)
            .bind(&party.mailing_address)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        }

        Ok(Some(transaction_id))
    }

    // ============ Metrics (derived, replaced wholesale) ============

    pub async fn permits_in_window(
        &self,
        bbl: &str,
        window_start: NaiveDate,
    ) -> Result<Vec<Permit>, AppError> {
        let permits = sqlx::query_as::<_, Permit>(
            "SELECT * FROM permits WHERE bbl = $1 AND filed_date >= $2",
        )
        .bind(bbl)
        .bind(window_start)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(permits)
    }

    pub async fn replace_metrics(&self, metrics: &PropertyMetrics) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO property_metrics (bbl, permit_count, total_cost, last_filed_date, dominant_work_type, computed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (bbl) DO UPDATE
            SET permit_count = EXCLUDED.permit_count,
                total_cost = EXCLUDED.total_cost,
                last_filed_date = EXCLUDED.last_filed_date,
                dominant_work_type = EXCLUDED.dominant_work_type,
                computed_at = EXCLUDED.computed_at
            "#,
        )
        .bind(&metrics.bbl)
        .bind(metrics.permit_count)
        .bind(&metrics.total_cost)
        .bind(metrics.last_filed_date)
        .bind(&metrics.dominant_work_type)
        .bind(metrics.computed_at)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    // ============ Contacts ============

    /// Stores a contact record, deduplicated on (name, phone, email).
    /// Returns the contact id either way.
    pub async fn upsert_contact(
        &self,
        normalized_name: &str,
        record: &ContactRecord,
    ) -> Result<Uuid, AppError> {
        let inserted = sqlx::query_as::<_, (Uuid,)>(
            r#"
            INSERT INTO owner_contacts (id, normalized_name, phone, phone_type, email, is_verified, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (normalized_name, COALESCE(phone, ''), COALESCE(email, '')) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(normalized_name)
        .bind(&record.phone)
        .bind(&record.phone_type)
        .bind(&record.email)
        .bind(record.verified)
        .bind(&record.source)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        if let Some((id,)) = inserted {
            return Ok(id);
        }

        // Insert hit the dedup index; fetch the existing row.
        let existing = sqlx::query_as::<_, (Uuid,)>(
            r#"
            SELECT id FROM owner_contacts
            WHERE normalized_name = $1
              AND COALESCE(phone, '') = COALESCE($2, '')
              AND COALESCE(email, '') = COALESCE($3, '')
            LIMIT 1
            "#,
        )
        .bind(normalized_name)
        .bind(&record.phone)
        .bind(&record.email)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(existing.0)
    }

    /// Links a contact to a property. Idempotent; re-running the linkage
    /// stage never duplicates links.
    pub async fn link_contact(
        &self,
        bbl: &str,
        contact_id: Uuid,
        matched_name: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO property_contacts (bbl, contact_id, matched_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (bbl, contact_id) DO NOTHING
            "#,
        )
        .bind(bbl)
        .bind(contact_id)
        .bind(matched_name)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    pub async fn contacts_for_property(&self, bbl: &str) -> Result<Vec<OwnerContact>, AppError> {
        let contacts = sqlx::query_as::<_, OwnerContact>(
            r#"
            SELECT oc.* FROM owner_contacts oc
            INNER JOIN property_contacts pc ON pc.contact_id = oc.id
            WHERE pc.bbl = $1
            ORDER BY oc.created_at
            "#,
        )
        .bind(bbl)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(contacts)
    }

    pub async fn contacts_by_name(
        &self,
        normalized_name: &str,
    ) -> Result<Vec<OwnerContact>, AppError> {
        let contacts = sqlx::query_as::<_, OwnerContact>(
            "SELECT * FROM owner_contacts WHERE normalized_name = $1 ORDER BY created_at",
        )
        .bind(normalized_name)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(contacts)
    }

    // ============ Scores (derived, replaced wholesale) ============

    #[allow(clippy::too_many_arguments)]
    pub async fn update_scores(
        &self,
        bbl: &str,
        estimated_equity: Option<BigDecimal>,
        affordability: f64,
        renovation: f64,
        contact: f64,
        composite: f64,
        tier: &str,
        rationale: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE properties SET
                estimated_equity = $2,
                score_affordability = $3,
                score_renovation = $4,
                score_contact = $5,
                score_composite = $6,
                tier = $7,
                score_rationale = $8,
                updated_at = now()
            WHERE bbl = $1
            "#,
        )
        .bind(bbl)
        .bind(estimated_equity)
        .bind(affordability)
        .bind(renovation)
        .bind(contact)
        .bind(composite)
        .bind(tier)
        .bind(rationale)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    // ============ Read surfaces (dashboard/API, read-only) ============

    pub async fn property_by_bbl(&self, bbl: &str) -> Result<Option<Property>, AppError> {
        let property = sqlx::query_as::<_, Property>("SELECT * FROM properties WHERE bbl = $1")
            .bind(bbl)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(property)
    }

    pub async fn properties_by_tier(
        &self,
        tier: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Property>, AppError> {
        let properties = match tier {
            Some(t) => {
                sqlx::query_as::<_, Property>(
                    "SELECT * FROM properties WHERE tier = $1 ORDER BY score_composite DESC NULLS LAST LIMIT $2",
                )
                .bind(t)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, Property>(
                    "SELECT * FROM properties ORDER BY score_composite DESC NULLS LAST LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(AppError::DatabaseError)?;
        Ok(properties)
    }

    pub async fn metrics_for(&self, bbl: &str) -> Result<Option<PropertyMetrics>, AppError> {
        let metrics =
            sqlx::query_as::<_, PropertyMetrics>("SELECT * FROM property_metrics WHERE bbl = $1")
                .bind(bbl)
                .fetch_optional(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        Ok(metrics)
    }

    pub async fn transactions_for(&self, bbl: &str) -> Result<Vec<Transaction>, AppError> {
        let transactions = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE bbl = $1 ORDER BY doc_date DESC, doc_id DESC",
        )
        .bind(bbl)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(transactions)
    }

    pub async fn parties_for(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<TransactionParty>, AppError> {
        let parties = sqlx::query_as::<_, TransactionParty>(
            "SELECT * FROM transaction_parties WHERE transaction_id = $1 ORDER BY created_at",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(parties)
    }
}
