use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hours after local delivery time at which a load is considered expired
const EXPIRY_GRACE_HOURS: i64 = 36;

/// Lifecycle status of a load
///
/// Unknown values written by other collaborators are carried through
/// untouched rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum LoadStatus {
    #[default]
    Active,
    Draft,
    Archived,
    Available,
    InTransit,
    Completed,
    Other(String),
}

impl LoadStatus {
    pub fn as_str(&self) -> &str {
        match self {
            LoadStatus::Active => "active",
            LoadStatus::Draft => "draft",
            LoadStatus::Archived => "archived",
            LoadStatus::Available => "available",
            LoadStatus::InTransit => "in-transit",
            LoadStatus::Completed => "completed",
            LoadStatus::Other(s) => s,
        }
    }

    /// Parse a status, case-insensitively
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_lowercase().as_str() {
            "active" => LoadStatus::Active,
            "draft" => LoadStatus::Draft,
            "archived" => LoadStatus::Archived,
            "available" => LoadStatus::Available,
            "in-transit" | "in_transit" => LoadStatus::InTransit,
            "completed" => LoadStatus::Completed,
            _ => LoadStatus::Other(trimmed.to_string()),
        }
    }
}

impl From<String> for LoadStatus {
    fn from(raw: String) -> Self {
        LoadStatus::parse(&raw)
    }
}

impl From<LoadStatus> for String {
    fn from(status: LoadStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// City/state/zip triple
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub zip: String,
}

/// Store-resident load record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRecord {
    pub id: String,
    pub created_by: String,
    #[serde(default)]
    pub shipper_id: Option<String>,
    #[serde(default)]
    pub status: LoadStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub pickup_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery_date_local: Option<String>,
    #[serde(default, rename = "deliveryTZ")]
    pub delivery_tz: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rate: f64,
    #[serde(default, rename = "rateTotalUSD")]
    pub rate_total_usd: Option<f64>,
    #[serde(default)]
    pub rpm: Option<f64>,
    #[serde(default)]
    pub distance_miles: Option<f64>,
    #[serde(default)]
    pub weight_lbs: Option<f64>,
    #[serde(default)]
    pub equipment_type: String,
    #[serde(default)]
    pub origin: Location,
    #[serde(default)]
    pub destination: Location,
    #[serde(default)]
    pub contact_name: String,
    #[serde(default)]
    pub contact_email: String,
    #[serde(default)]
    pub contact_phone: String,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub primary_photo: String,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at_ms: Option<i64>,
}

impl LoadRecord {
    /// A fresh active record with every optional field empty
    pub fn new(id: impl Into<String>, created_by: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_by: created_by.into(),
            shipper_id: None,
            status: LoadStatus::Active,
            created_at,
            pickup_date: None,
            delivery_date: None,
            delivery_date_local: None,
            delivery_tz: None,
            title: String::new(),
            description: String::new(),
            rate: 0.0,
            rate_total_usd: None,
            rpm: None,
            distance_miles: None,
            weight_lbs: None,
            equipment_type: String::new(),
            origin: Location::default(),
            destination: Location::default(),
            contact_name: String::new(),
            contact_email: String::new(),
            contact_phone: String::new(),
            photos: Vec::new(),
            primary_photo: String::new(),
            is_archived: false,
            archived_at: None,
            expires_at_ms: None,
        }
    }

    /// Mark the record archived at `at`; no-op if it already is
    pub fn mark_archived(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_archived {
            return false;
        }
        self.is_archived = true;
        self.archived_at = Some(at);
        true
    }

    /// Recompute the advisory expiry from the local delivery pair
    pub fn refresh_expiry(&mut self) {
        self.expires_at_ms = match (&self.delivery_date_local, &self.delivery_tz) {
            (Some(local), Some(tz)) => expires_at_ms(local, tz),
            _ => None,
        };
    }
}

/// Advisory expiry: local delivery time in `tz` plus the grace period, as epoch millis.
///
/// Returns `None` when the zone is unknown, the timestamp does not parse,
/// or the local time falls in a DST gap.
pub fn expires_at_ms(delivery_local: &str, tz: &str) -> Option<i64> {
    let zone: Tz = tz.trim().parse().ok()?;
    let naive = parse_naive_local(delivery_local.trim())?;

    let local = match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        // Ambiguous (DST fall-back): take the earlier instant
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => return None,
    };

    Some((local + Duration::hours(EXPIRY_GRACE_HOURS)).timestamp_millis())
}

fn parse_naive_local(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Fuel type of a driver's vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuelType {
    Diesel,
    Gasoline,
}

impl FuelType {
    /// `gas`/`gasoline` map to gasoline; everything else is diesel
    pub fn resolve(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_lowercase()) {
            Some(s) if s == "gas" || s == "gasoline" => FuelType::Gasoline,
            _ => FuelType::Diesel,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FuelType::Diesel => "diesel",
            FuelType::Gasoline => "gasoline",
        }
    }
}

/// Driver vehicle profile used for fuel analytics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverFuelProfile {
    #[serde(default)]
    pub mpg_rated: Option<f64>,
    #[serde(default)]
    pub fuel_type: Option<String>,
}
