/// Property identity resolution.
///
/// Derives the canonical borough-block-lot key from raw permit location
/// fields, creates the property row if absent, and writes the key back onto
/// the permit. Malformed locations fail per-record with
/// `AppError::MalformedLocation`; they are counted and skipped, never
/// retried automatically.
use crate::errors::AppError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The five boroughs, by registry code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Borough {
    Manhattan = 1,
    Bronx = 2,
    Brooklyn = 3,
    Queens = 4,
    StatenIsland = 5,
}

impl Borough {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Accepts the registry digit ("1".."5") or the borough name,
    /// case-insensitively.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_uppercase().as_str() {
            "1" | "MANHATTAN" => Ok(Borough::Manhattan),
            "2" | "BRONX" => Ok(Borough::Bronx),
            "3" | "BROOKLYN" => Ok(Borough::Brooklyn),
            "4" | "QUEENS" => Ok(Borough::Queens),
            "5" | "STATEN ISLAND" => Ok(Borough::StatenIsland),
            other => Err(AppError::MalformedLocation(format!(
                "unknown borough '{}'",
                other
            ))),
        }
    }

    pub fn from_code(code: u8) -> Result<Self, AppError> {
        match code {
            1 => Ok(Borough::Manhattan),
            2 => Ok(Borough::Bronx),
            3 => Ok(Borough::Brooklyn),
            4 => Ok(Borough::Queens),
            5 => Ok(Borough::StatenIsland),
            other => Err(AppError::MalformedLocation(format!(
                "borough code {} out of range",
                other
            ))),
        }
    }
}

/// Canonical property key: borough + block + lot.
///
/// Rendered as "B-BBBBB-LLLL" (block zero-padded to 5 digits, lot to 4),
/// e.g. borough=3, block=5008, lot=64 -> "3-05008-0064".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bbl {
    pub borough: Borough,
    pub block: u32,
    pub lot: u32,
}

const BLOCK_MAX: u32 = 99_999;
const LOT_MAX: u32 = 9_999;

impl Bbl {
    /// Validates and composes a key from the raw fields a permit carries.
    ///
    /// Block and lot must be all-digit strings within the registry's digit
    /// bounds (block 1-5 digits, lot 1-4 digits) and positive.
    pub fn from_raw(
        borough: Option<&str>,
        block: Option<&str>,
        lot: Option<&str>,
    ) -> Result<Self, AppError> {
        let borough = Borough::parse(
            borough.ok_or_else(|| AppError::MalformedLocation("missing borough".to_string()))?,
        )?;
        let block = parse_bounded(block, "block", 5, BLOCK_MAX)?;
        let lot = parse_bounded(lot, "lot", 4, LOT_MAX)?;
        Ok(Self {
            borough,
            block,
            lot,
        })
    }

    /// Parses a canonical "B-BBBBB-LLLL" string back into its components.
    /// Used by the deed adapter, whose source requires the three parts as
    /// separate query parameters.
    pub fn parse(key: &str) -> Result<Self, AppError> {
        let mut parts = key.split('-');
        let (b, blk, lt) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(b), Some(blk), Some(lt), None) => (b, blk, lt),
            _ => {
                return Err(AppError::MalformedLocation(format!(
                    "'{}' is not a canonical property key",
                    key
                )))
            }
        };
        Self::from_raw(Some(b), Some(blk), Some(lt))
    }
}

impl fmt::Display for Bbl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:05}-{:04}", self.borough.code(), self.block, self.lot)
    }
}

fn parse_bounded(
    raw: Option<&str>,
    field: &str,
    max_digits: usize,
    max_value: u32,
) -> Result<u32, AppError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::MalformedLocation(format!("missing {}", field)))?;

    let digits = Regex::new(r"^[0-9]+$").unwrap();
    if !digits.is_match(raw) {
        return Err(AppError::MalformedLocation(format!(
            "{} '{}' is not numeric",
            field, raw
        )));
    }
    if raw.len() > max_digits {
        return Err(AppError::MalformedLocation(format!(
            "{} '{}' exceeds {} digits",
            field, raw, max_digits
        )));
    }

    let value: u32 = raw
        .parse()
        .map_err(|_| AppError::MalformedLocation(format!("{} '{}' is not numeric", field, raw)))?;
    if value == 0 || value > max_value {
        return Err(AppError::MalformedLocation(format!(
            "{} {} out of range 1..={}",
            field, value, max_value
        )));
    }
    Ok(value)
}
