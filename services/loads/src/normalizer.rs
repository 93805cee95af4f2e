use crate::error::{LoadError, LoadResult};
use crate::model::{LoadRecord, LoadStatus, Location};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::{debug, instrument};
use uuid::Uuid;

/// An already-parsed import row
pub type RawRow = Map<String, Value>;

/// Statuses an import may set; anything else becomes `active`
const IMPORT_STATUSES: &[&str] = &["active", "draft", "archived"];

/// Canonical fields recognized in import rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowField {
    Rate,
    Status,
    OriginCity,
    OriginState,
    OriginZip,
    DestCity,
    DestState,
    DestZip,
    PickupDate,
    DeliveryDate,
    DeliveryDateLocal,
    DeliveryTz,
    Weight,
    DistanceMiles,
    EquipmentType,
    Title,
    Description,
    ContactName,
    ContactEmail,
    ContactPhone,
    ShipperId,
}

impl RowField {
    /// Row keys consulted for this field, in priority order
    pub const fn aliases(self) -> &'static [&'static str] {
        match self {
            RowField::Rate => &["rate", "rateTotalUSD"],
            RowField::Status => &["status"],
            RowField::OriginCity => &["originCity", "pickupCity"],
            RowField::OriginState => &["originState", "pickupState"],
            RowField::OriginZip => &["originZip", "pickupZip"],
            RowField::DestCity => &["destCity", "dropoffCity"],
            RowField::DestState => &["destState", "dropoffState"],
            RowField::DestZip => &["destZip", "dropoffZip"],
            RowField::PickupDate => &["pickupDate"],
            RowField::DeliveryDate => &["deliveryDate"],
            RowField::DeliveryDateLocal => &["deliveryDateLocal"],
            RowField::DeliveryTz => &["deliveryTZ", "deliveryTz"],
            RowField::Weight => &["weight", "weightLbs"],
            RowField::DistanceMiles => &["distanceMiles", "miles"],
            RowField::EquipmentType => &["equipmentType", "truckType"],
            RowField::Title => &["title"],
            RowField::Description => &["description"],
            RowField::ContactName => &["contactName"],
            RowField::ContactEmail => &["contactEmail"],
            RowField::ContactPhone => &["contactPhone"],
            RowField::ShipperId => &["shipperId"],
        }
    }
}

/// Convert an import row into a canonical record owned by `owner_id`.
///
/// Each field is resolved through its alias chain; the first key holding a
/// non-empty value wins. Malformed values degrade to defaults and the only
/// hard failure is an empty owner id.
#[instrument(skip(row, now))]
pub fn normalize(row: &RawRow, owner_id: &str, now: DateTime<Utc>) -> LoadResult<LoadRecord> {
    let owner_id = owner_id.trim();
    if owner_id.is_empty() {
        return Err(LoadError::MissingOwner);
    }

    let mut record = LoadRecord::new(Uuid::new_v4().to_string(), owner_id, now);

    record.status = resolve_status(row);
    record.rate = number_field(row, RowField::Rate).unwrap_or(0.0);
    record.weight_lbs = number_field(row, RowField::Weight);
    record.distance_miles = number_field(row, RowField::DistanceMiles);
    record.pickup_date = date_field(row, RowField::PickupDate);
    record.delivery_date = date_field(row, RowField::DeliveryDate);
    record.delivery_date_local = text_field(row, RowField::DeliveryDateLocal);
    record.delivery_tz = text_field(row, RowField::DeliveryTz);
    record.shipper_id = text_field(row, RowField::ShipperId);
    record.equipment_type = string_field(row, RowField::EquipmentType);

    record.origin = Location {
        city: string_field(row, RowField::OriginCity),
        state: string_field(row, RowField::OriginState),
        zip: string_field(row, RowField::OriginZip),
    };
    record.destination = Location {
        city: string_field(row, RowField::DestCity),
        state: string_field(row, RowField::DestState),
        zip: string_field(row, RowField::DestZip),
    };

    record.title = text_field(row, RowField::Title)
        .unwrap_or_else(|| synthesize_title(&record.equipment_type, record.rate));
    record.description = string_field(row, RowField::Description);
    record.contact_name = string_field(row, RowField::ContactName);
    record.contact_email = string_field(row, RowField::ContactEmail);
    record.contact_phone = string_field(row, RowField::ContactPhone);

    record.refresh_expiry();

    debug!(load_id = %record.id, status = %record.status, "Normalized import row");

    Ok(record)
}

/// Normalize every row of an import batch
pub fn normalize_batch(rows: &[RawRow], owner_id: &str, now: DateTime<Utc>) -> LoadResult<Vec<LoadRecord>> {
    let records = rows
        .iter()
        .map(|row| normalize(row, owner_id, now))
        .collect::<LoadResult<Vec<_>>>()?;

    metrics::counter!("loads.import.rows").increment(records.len() as u64);

    Ok(records)
}

/// First non-empty value along the field's alias chain
fn resolve<'a>(row: &'a RawRow, field: RowField) -> Option<&'a Value> {
    field
        .aliases()
        .iter()
        .filter_map(|key| row.get(*key))
        .find(|value| match value {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text_field(row: &RawRow, field: RowField) -> Option<String> {
    resolve(row, field).and_then(value_as_text)
}

fn string_field(row: &RawRow, field: RowField) -> String {
    text_field(row, field).unwrap_or_default()
}

/// `None` when the field is absent, otherwise the parsed number (0 if unparseable)
fn number_field(row: &RawRow, field: RowField) -> Option<f64> {
    resolve(row, field)
        .and_then(value_as_text)
        .map(|text| parse_number(&text))
}

/// Keep only digits and `.`, then parse; anything unparseable is 0
pub fn parse_number(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return 0.0;
    }

    cleaned.parse::<f64>().ok().filter(|n| n.is_finite()).unwrap_or(0.0)
}

fn date_field(row: &RawRow, field: RowField) -> Option<DateTime<Utc>> {
    match resolve(row, field)? {
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => parse_date(s),
        _ => None,
    }
}

/// Lenient date parsing; naive values are taken as UTC
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
    ];
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y", "%Y/%m/%d"];

    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn resolve_status(row: &RawRow) -> LoadStatus {
    let raw = text_field(row, RowField::Status)
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    if IMPORT_STATUSES.contains(&raw.as_str()) {
        LoadStatus::parse(&raw)
    } else {
        LoadStatus::Active
    }
}

fn synthesize_title(equipment_type: &str, rate: f64) -> String {
    let base = if equipment_type.is_empty() {
        "Load".to_string()
    } else {
        format!("{equipment_type} Load")
    };

    if rate > 0.0 {
        format!("{base} - ${rate}")
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> RawRow {
        value.as_object().cloned().unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_full_row() {
        let input = row(json!({
            "rate": "$2,500.50",
            "status": "DRAFT",
            "originCity": "Dallas",
            "originState": "TX",
            "originZip": 75201,
            "destCity": "Memphis",
            "destState": "TN",
            "destZip": "38103",
            "pickupDate": "2024-04-05",
            "deliveryDate": "2024-04-07T15:30:00Z",
            "weight": "42,000 lbs",
            "equipmentType": "Reefer",
            "title": "  Produce run ",
            "contactName": "Dana",
        }));

        let record = normalize(&input, "owner-1", now()).unwrap();

        assert_eq!(record.created_by, "owner-1");
        assert_eq!(record.created_at, now());
        assert_eq!(record.status, LoadStatus::Draft);
        assert_eq!(record.rate, 2500.50);
        assert_eq!(record.weight_lbs, Some(42000.0));
        assert_eq!(record.origin.zip, "75201");
        assert_eq!(record.destination.city, "Memphis");
        assert_eq!(
            record.pickup_date,
            Some(Utc.with_ymd_and_hms(2024, 4, 5, 0, 0, 0).unwrap())
        );
        assert_eq!(
            record.delivery_date,
            Some(Utc.with_ymd_and_hms(2024, 4, 7, 15, 30, 0).unwrap())
        );
        assert_eq!(record.title, "Produce run");
        assert_eq!(record.contact_name, "Dana");
        assert_eq!(record.contact_email, "");
        assert!(!record.is_archived);
    }

    #[test]
    fn test_alias_fallbacks() {
        let input = row(json!({
            "rateTotalUSD": "1800",
            "pickupCity": "Reno",
            "originState": "NV",
            "dropoffZip": "84101",
            "truckType": "Flatbed",
        }));

        let record = normalize(&input, "owner-1", now()).unwrap();

        assert_eq!(record.rate, 1800.0);
        assert_eq!(record.origin.city, "Reno");
        assert_eq!(record.origin.state, "NV");
        assert_eq!(record.origin.zip, "");
        assert_eq!(record.destination.zip, "84101");
        assert_eq!(record.equipment_type, "Flatbed");
    }

    #[test]
    fn test_primary_key_wins_over_alias() {
        let input = row(json!({ "rate": "900", "rateTotalUSD": "1200", "originCity": "", "pickupCity": "Boise" }));
        let record = normalize(&input, "owner-1", now()).unwrap();

        assert_eq!(record.rate, 900.0);
        // Empty primary falls through to the alias
        assert_eq!(record.origin.city, "Boise");
    }

    #[test]
    fn test_status_allow_list() {
        for (raw, expected) in [
            (json!("Archived"), LoadStatus::Archived),
            (json!("active"), LoadStatus::Active),
            (json!("completed"), LoadStatus::Active),
            (json!("in-transit"), LoadStatus::Active),
            (json!(7), LoadStatus::Active),
            (Value::Null, LoadStatus::Active),
        ] {
            let record = normalize(&row(json!({ "status": raw })), "owner-1", now()).unwrap();
            assert_eq!(record.status, expected);
        }
    }

    #[test]
    fn test_malformed_values_degrade() {
        let input = row(json!({
            "rate": "call for price",
            "weight": "n/a",
            "pickupDate": "soonish",
            "deliveryDate": "2024-13-45",
            "contactPhone": null,
            "origin": { "city": "ignored" },
        }));

        let record = normalize(&input, "owner-1", now()).unwrap();

        assert_eq!(record.rate, 0.0);
        assert_eq!(record.weight_lbs, Some(0.0));
        assert!(record.pickup_date.is_none());
        assert!(record.delivery_date.is_none());
        assert_eq!(record.contact_phone, "");
        assert_eq!(record.origin, Location::default());
        assert_eq!(record.title, "Load");
    }

    #[test]
    fn test_title_synthesis() {
        let with_rate = normalize(&row(json!({ "equipmentType": "Dry Van", "rate": 2500 })), "o", now()).unwrap();
        assert_eq!(with_rate.title, "Dry Van Load - $2500");

        let without_rate = normalize(&row(json!({ "equipmentType": "Dry Van" })), "o", now()).unwrap();
        assert_eq!(without_rate.title, "Dry Van Load");
    }

    #[test]
    fn test_missing_owner_fails_fast() {
        let err = normalize(&RawRow::new(), "  ", now()).unwrap_err();
        assert!(matches!(err, LoadError::MissingOwner));
    }

    #[test]
    fn test_local_delivery_pair_sets_expiry() {
        let input = row(json!({ "deliveryDateLocal": "2024-04-07T08:00", "deliveryTZ": "America/Denver" }));
        let record = normalize(&input, "owner-1", now()).unwrap();

        assert!(record.expires_at_ms.is_some());
        assert_eq!(record.delivery_tz.as_deref(), Some("America/Denver"));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("$1,234.5"), 1234.5);
        assert_eq!(parse_number("-40"), 40.0);
        assert_eq!(parse_number("abc"), 0.0);
        assert_eq!(parse_number("."), 0.0);
        assert_eq!(parse_number("1.2.3"), 0.0);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 9, 0, 0, 0).unwrap();
        assert_eq!(parse_date("2024-01-09"), Some(expected));
        assert_eq!(parse_date("01/09/2024"), Some(expected));
        assert_eq!(parse_date("2024-01-09T00:00:00+00:00"), Some(expected));
        assert!(parse_date("").is_none());
    }

    #[test]
    fn test_batch_propagates_owner_error() {
        let rows = vec![row(json!({ "rate": 1 })), row(json!({ "rate": 2 }))];
        assert_eq!(normalize_batch(&rows, "owner-1", now()).unwrap().len(), 2);
        assert!(normalize_batch(&rows, "", now()).is_err());
    }
}
