use serde::Deserialize;

/// Weights for the composite priority score.
///
/// These are configuration defaults, not reverse-engineered business
/// constants; override via SCORE_WEIGHT_* environment variables. The three
/// weights must sum to 1.0.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScoringWeights {
    pub affordability: f64,
    pub renovation: f64,
    pub contact: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            affordability: 0.40,
            renovation: 0.35,
            contact: 0.25,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub parcel_registry_url: String,
    pub tax_assessment_url: String,
    pub deed_registry_url: String,
    pub valuation_primary_url: String,
    pub valuation_fallback_url: String,
    pub contact_enrichment_url: String,
    pub contact_enrichment_token: Option<String>,
    pub scoring_weights: ScoringWeights,
    /// Trailing window for permit metrics, in years.
    pub metrics_window_years: u32,
}

fn require_url(var: &str) -> anyhow::Result<String> {
    let raw = std::env::var(var)
        .map_err(|_| anyhow::anyhow!("{} environment variable required", var))?;
    if raw.trim().is_empty() {
        anyhow::bail!("{} cannot be empty", var);
    }
    let parsed = url::Url::parse(&raw).map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", var, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!("{} must start with http:// or https://", var);
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn weight_from_env(var: &str, default: f64) -> anyhow::Result<f64> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<f64>()
            .map_err(|_| anyhow::anyhow!("{} must be a number", var)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = ScoringWeights::default();
        let scoring_weights = ScoringWeights {
            affordability: weight_from_env("SCORE_WEIGHT_AFFORDABILITY", defaults.affordability)?,
            renovation: weight_from_env("SCORE_WEIGHT_RENOVATION", defaults.renovation)?,
            contact: weight_from_env("SCORE_WEIGHT_CONTACT", defaults.contact)?,
        };
        let weight_sum =
            scoring_weights.affordability + scoring_weights.renovation + scoring_weights.contact;
        if (weight_sum - 1.0).abs() > 1e-6 {
            anyhow::bail!(
                "scoring weights must sum to 1.0, got {} (affordability={}, renovation={}, contact={})",
                weight_sum,
                scoring_weights.affordability,
                scoring_weights.renovation,
                scoring_weights.contact
            );
        }

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            parcel_registry_url: require_url("PARCEL_REGISTRY_URL")?,
            tax_assessment_url: require_url("TAX_ASSESSMENT_URL")?,
            deed_registry_url: require_url("DEED_REGISTRY_URL")?,
            valuation_primary_url: require_url("VALUATION_PRIMARY_URL")?,
            valuation_fallback_url: require_url("VALUATION_FALLBACK_URL")?,
            contact_enrichment_url: require_url("CONTACT_ENRICHMENT_URL")?,
            contact_enrichment_token: std::env::var("CONTACT_ENRICHMENT_TOKEN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            scoring_weights,
            metrics_window_years: std::env::var("METRICS_WINDOW_YEARS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("METRICS_WINDOW_YEARS must be a positive integer"))?,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Parcel registry: {}", config.parcel_registry_url);
        tracing::debug!("Deed registry: {}", config.deed_registry_url);
        tracing::debug!(
            "Valuation: primary {} fallback {}",
            config.valuation_primary_url,
            config.valuation_fallback_url
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
