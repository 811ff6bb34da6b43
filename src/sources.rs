/// HTTP clients for the external property-data sources.
///
/// Every client follows the same contract: a lookup returns `Ok(None)` (or an
/// empty list) when the source has no record for the key — that is a normal
/// terminal state, not an error — and `AppError::SourceUnavailable` only for
/// transport or protocol failures.
use crate::config::Config;
use crate::errors::AppError;
use crate::identity::Bbl;
use crate::models::{
    ContactRecord, DeedDocument, ParcelRecord, TaxAssessmentRecord, ValuationRecord,
};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

fn build_client() -> Result<Client, AppError> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| AppError::SourceUnavailable(format!("Failed to create HTTP client: {}", e)))
}

/// Shared zero-or-one response handling: 404 means no record.
async fn read_optional<T: DeserializeOwned>(
    source: &str,
    response: reqwest::Response,
) -> Result<Option<T>, AppError> {
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(AppError::SourceUnavailable(format!(
            "{} returned status {}: {}",
            source, status, body
        )));
    }
    let parsed = response.json::<T>().await.map_err(|e| {
        AppError::SourceUnavailable(format!("Failed to parse {} response: {}", source, e))
    })?;
    Ok(Some(parsed))
}

pub struct ParcelRegistryClient {
    client: Client,
    base_url: String,
}

impl ParcelRegistryClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client()?,
            base_url: config.parcel_registry_url.clone(),
        })
    }

    /// One-to-one lookup by canonical property key.
    pub async fn fetch(&self, bbl: &Bbl) -> Result<Option<ParcelRecord>, AppError> {
        let url = format!("{}/parcels/{}", self.base_url, bbl);
        tracing::debug!("Parcel registry lookup: {}", url);
        let response = self.client.get(&url).send().await.map_err(|e| {
            AppError::SourceUnavailable(format!("Parcel registry request failed: {}", e))
        })?;
        read_optional("parcel registry", response).await
    }
}

pub struct TaxAssessmentClient {
    client: Client,
    base_url: String,
}

impl TaxAssessmentClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client()?,
            base_url: config.tax_assessment_url.clone(),
        })
    }

    /// One-to-one lookup by canonical property key. Misses are common
    /// (tax-exempt and government parcels) and are not faults.
    pub async fn fetch(&self, bbl: &Bbl) -> Result<Option<TaxAssessmentRecord>, AppError> {
        let url = format!("{}/assessments/{}", self.base_url, bbl);
        tracing::debug!("Tax assessment lookup: {}", url);
        let response = self.client.get(&url).send().await.map_err(|e| {
            AppError::SourceUnavailable(format!("Tax assessment request failed: {}", e))
        })?;
        read_optional("tax assessment", response).await
    }
}

pub struct DeedRegistryClient {
    client: Client,
    base_url: String,
}

impl DeedRegistryClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client()?,
            base_url: config.deed_registry_url.clone(),
        })
    }

    /// Fetches all recorded documents for a property.
    ///
    /// The registry contract requires borough, block and lot as three
    /// separate query parameters; it rejects a combined identifier.
    pub async fn fetch_documents(&self, bbl: &Bbl) -> Result<Vec<DeedDocument>, AppError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/documents", self.base_url),
            &[
                ("borough", bbl.borough.code().to_string()),
                ("block", bbl.block.to_string()),
                ("lot", bbl.lot.to_string()),
            ],
        )
        .map_err(|e| AppError::SourceUnavailable(format!("Failed to build URL: {}", e)))?;

        tracing::debug!("Deed registry lookup: {}", url);
        let response = self.client.get(url).send().await.map_err(|e| {
            AppError::SourceUnavailable(format!("Deed registry request failed: {}", e))
        })?;
        let documents: Option<Vec<DeedDocument>> =
            read_optional("deed registry", response).await?;
        Ok(documents.unwrap_or_default())
    }
}

pub struct ValuationClient {
    client: Client,
    base_url: String,
    /// Provenance tag recorded on the property ("primary" / "fallback").
    pub source_tag: &'static str,
}

impl ValuationClient {
    pub fn primary(config: &Config) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client()?,
            base_url: config.valuation_primary_url.clone(),
            source_tag: "primary",
        })
    }

    pub fn fallback(config: &Config) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client()?,
            base_url: config.valuation_fallback_url.clone(),
            source_tag: "fallback",
        })
    }

    /// Queries by street address when the property has one, otherwise by
    /// property key.
    pub async fn fetch(
        &self,
        address: Option<&str>,
        bbl: &Bbl,
    ) -> Result<Option<ValuationRecord>, AppError> {
        let params: Vec<(&str, String)> = match address {
            Some(addr) if !addr.trim().is_empty() => vec![("address", addr.to_string())],
            _ => vec![("bbl", bbl.to_string())],
        };
        let url =
            reqwest::Url::parse_with_params(&format!("{}/valuations", self.base_url), &params)
                .map_err(|e| AppError::SourceUnavailable(format!("Failed to build URL: {}", e)))?;

        tracing::debug!("Valuation ({}) lookup: {}", self.source_tag, url);
        let response = self.client.get(url).send().await.map_err(|e| {
            AppError::SourceUnavailable(format!(
                "Valuation ({}) request failed: {}",
                self.source_tag, e
            ))
        })?;
        read_optional("valuation", response).await
    }
}

pub struct ContactEnrichmentClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ContactEnrichmentClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client()?,
            base_url: config.contact_enrichment_url.clone(),
            token: config.contact_enrichment_token.clone(),
        })
    }

    /// Queried by normalized owner name; returns zero or more contacts.
    pub async fn fetch(&self, normalized_name: &str) -> Result<Vec<ContactRecord>, AppError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/contacts", self.base_url),
            &[("owner", normalized_name)],
        )
        .map_err(|e| AppError::SourceUnavailable(format!("Failed to build URL: {}", e)))?;

        tracing::debug!("Contact enrichment lookup for '{}'", normalized_name);
        let mut request = self.client.get(url);
        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        let response = request.send().await.map_err(|e| {
            AppError::SourceUnavailable(format!("Contact enrichment request failed: {}", e))
        })?;
        let contacts: Option<Vec<ContactRecord>> =
            read_optional("contact enrichment", response).await?;
        Ok(contacts.unwrap_or_default())
    }
}

/// All external source clients, constructed once at startup.
pub struct SourceClients {
    pub parcel: ParcelRegistryClient,
    pub tax: TaxAssessmentClient,
    pub deed: DeedRegistryClient,
    pub valuation_primary: ValuationClient,
    pub valuation_fallback: ValuationClient,
    pub contacts: ContactEnrichmentClient,
}

impl SourceClients {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        Ok(Self {
            parcel: ParcelRegistryClient::new(config)?,
            tax: TaxAssessmentClient::new(config)?,
            deed: DeedRegistryClient::new(config)?,
            valuation_primary: ValuationClient::primary(config)?,
            valuation_fallback: ValuationClient::fallback(config)?,
            contacts: ContactEnrichmentClient::new(config)?,
        })
    }
}
