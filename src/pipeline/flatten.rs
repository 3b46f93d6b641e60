//! Row Flattener
//!
//! Maps one stored listing detail onto one fixed-schema row. The mapping is pure: the
//! same document always yields the same row, and absent source fields stay absent.

use super::Pipeline;
use crate::runner::{BatchReport, BatchRunner, WorkUnit};
use crate::store::Location;
use crate::EtlError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column order of the flattened table
pub const COLUMNS: [&str; 19] = [
    "ad_id",
    "price",
    "subject",
    "brand",
    "model",
    "model_family",
    "model_year",
    "mileage",
    "fuel",
    "gearbox",
    "horsepower",
    "color",
    "drive_wheels",
    "body_type",
    "first_traffic_date",
    "equipment_count",
    "advertiser_type",
    "region",
    "municipality",
];

/// One flattened listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatRecord {
    pub ad_id: Option<String>,
    pub price: Option<i64>,
    pub subject: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub model_family: Option<String>,
    pub model_year: Option<String>,
    pub mileage: Option<u64>,
    pub fuel: Option<String>,
    pub gearbox: Option<String>,
    pub horsepower: Option<String>,
    pub color: Option<String>,
    pub drive_wheels: Option<String>,
    pub body_type: Option<String>,
    pub first_traffic_date: Option<String>,
    pub equipment_count: Option<u32>,
    pub advertiser_type: Option<String>,
    pub region: Option<String>,
    pub municipality: Option<String>,
}

/// Output field and the parameter ids that feed it, highest priority first
const PARAMETER_FIELDS: &[(&str, &[&str])] = &[
    ("brand", &["car_brand", "cx_make"]),
    ("model", &["cx_model"]),
    ("model_family", &["level_1"]),
    ("model_year", &["regdate"]),
    ("mileage", &["mileage"]),
    ("fuel", &["fuel"]),
    ("gearbox", &["gearbox"]),
    ("horsepower", &["cx_engine_power"]),
    ("color", &["cx_color"]),
    ("drive_wheels", &["cx_drive_wheels"]),
    ("body_type", &["car_chassis_type"]),
    ("first_traffic_date", &["cx_first_time_in_traffic"]),
];

/// Maps a detail document to a row, or `None` if it has no `data` object
pub fn flatten(document: &Value) -> Option<FlatRecord> {
    let data = document.get("data")?.as_object()?;
    let parameters = collect_parameters(data);

    let field = |name: &str| -> Option<String> {
        let (_, ids) = PARAMETER_FIELDS.iter().find(|(f, _)| *f == name)?;
        ids.iter().find_map(|id| parameters.get(*id).cloned())
    };

    Some(FlatRecord {
        ad_id: data.get("ad_id").and_then(scalar_text),
        price: data
            .get("price")
            .and_then(|p| p.get("value"))
            .and_then(integer_value),
        subject: data.get("subject").and_then(scalar_text),
        brand: field("brand"),
        model: field("model"),
        model_family: field("model_family"),
        model_year: field("model_year"),
        mileage: field("mileage").as_deref().and_then(digits_only),
        fuel: field("fuel"),
        gearbox: field("gearbox"),
        horsepower: field("horsepower"),
        color: field("color"),
        drive_wheels: field("drive_wheels"),
        body_type: field("body_type"),
        first_traffic_date: field("first_traffic_date"),
        equipment_count: equipment_count(data),
        advertiser_type: data
            .get("advertiser")
            .and_then(|a| a.get("type"))
            .and_then(scalar_text),
        region: location_name(data, 0),
        municipality: location_name(data, 1),
    })
}

/// Decodes and flattens a stored detail body
pub fn flatten_bytes(key: &str, body: &[u8]) -> Result<FlatRecord, EtlError> {
    let document: Value =
        serde_json::from_slice(body).map_err(|e| EtlError::malformed(key, e.to_string()))?;
    flatten(&document).ok_or_else(|| EtlError::malformed(key, "missing `data` object"))
}

/// `parameter_groups[].parameters[]` as id -> first non-empty value
fn collect_parameters(data: &Map<String, Value>) -> std::collections::HashMap<String, String> {
    let mut parameters = std::collections::HashMap::new();

    let groups = data
        .get("parameter_groups")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for group in groups {
        let params = group
            .get("parameters")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for param in params {
            let Some(id) = param.get("id").and_then(Value::as_str) else {
                continue;
            };
            let Some(value) = param.get("value").and_then(scalar_text) else {
                continue;
            };
            parameters.entry(id.to_string()).or_insert(value);
        }
    }

    parameters
}

/// Non-empty text of a string or number
fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn integer_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => digits_only(s).and_then(|n| i64::try_from(n).ok()),
        _ => None,
    }
}

/// Strips every non-digit and parses what is left; nothing left means no value
fn digits_only(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

fn equipment_count(data: &Map<String, Value>) -> Option<u32> {
    data.get("attributes")?
        .as_array()?
        .iter()
        .filter(|attr| attr.get("id").and_then(Value::as_str) == Some("car_equipment"))
        .last()
        .map(|attr| {
            attr.get("items")
                .and_then(Value::as_array)
                .map_or(0, |items| items.len() as u32)
        })
}

fn location_name(data: &Map<String, Value>, index: usize) -> Option<String> {
    data.get("location")?
        .as_array()?
        .get(index)?
        .get("name")
        .and_then(scalar_text)
}

/// Flattens every stored detail in the details location
///
/// # Returns
///
/// A report whose successes are `(object name, row)`; documents that are not JSON or
/// lack a `data` object are failures.
pub async fn flatten_details(
    pipeline: &Pipeline,
    runner: &BatchRunner,
) -> Result<BatchReport<FlatRecord>, EtlError> {
    let location = pipeline.config.details_location()?;
    let names: Vec<String> = location
        .list_names(pipeline.store.as_ref())
        .await?
        .into_iter()
        .filter(|name| name.ends_with(".json"))
        .collect();

    tracing::info!("Found {} detail files to flatten in {}", names.len(), location);

    let units = names
        .into_iter()
        .map(|name| WorkUnit::new(name.clone(), name))
        .collect();

    let store = pipeline.store.clone();
    let report = runner
        .run("flatten", units, move |name| {
            let store = store.clone();
            let location = location.clone();
            async move { flatten_object(store.as_ref(), &location, &name).await }
        })
        .await;

    Ok(report)
}

async fn flatten_object(
    store: &dyn crate::store::ObjectStore,
    location: &Location,
    name: &str,
) -> Result<FlatRecord, EtlError> {
    let body = location.get(store, name).await?;
    flatten_bytes(&location.key(name), &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detail() -> Value {
        json!({
            "data": {
                "ad_id": 1234567,
                "subject": "Volvo V70 D5 AWD",
                "price": {"value": 129900, "suffix": "kr"},
                "parameter_groups": [
                    {"parameters": [
                        {"id": "cx_make", "value": "Volvo"},
                        {"id": "cx_model", "value": "V70"},
                        {"id": "regdate", "value": "2012"},
                        {"id": "mileage", "value": "18 500 mil"}
                    ]},
                    {"parameters": [
                        {"id": "fuel", "value": "Diesel"},
                        {"id": "gearbox", "value": "Automat"},
                        {"id": "cx_engine_power", "value": "215 hk"},
                        {"id": "level_1", "value": "V70"},
                        {"id": "car_chassis_type", "value": "Kombi"}
                    ]}
                ],
                "attributes": [
                    {"id": "car_equipment", "items": [{"label": "ABS"}, {"label": "AC"}]}
                ],
                "advertiser": {"type": "private"},
                "location": [{"name": "Stockholm"}, {"name": "Solna"}]
            }
        })
    }

    #[test]
    fn test_flatten_full_document() {
        let row = flatten(&detail()).unwrap();

        assert_eq!(row.ad_id.as_deref(), Some("1234567"));
        assert_eq!(row.price, Some(129900));
        assert_eq!(row.subject.as_deref(), Some("Volvo V70 D5 AWD"));
        assert_eq!(row.brand.as_deref(), Some("Volvo"));
        assert_eq!(row.model.as_deref(), Some("V70"));
        assert_eq!(row.model_family.as_deref(), Some("V70"));
        assert_eq!(row.model_year.as_deref(), Some("2012"));
        assert_eq!(row.mileage, Some(18500));
        assert_eq!(row.horsepower.as_deref(), Some("215 hk"));
        assert_eq!(row.body_type.as_deref(), Some("Kombi"));
        assert_eq!(row.equipment_count, Some(2));
        assert_eq!(row.advertiser_type.as_deref(), Some("private"));
        assert_eq!(row.region.as_deref(), Some("Stockholm"));
        assert_eq!(row.municipality.as_deref(), Some("Solna"));
        assert_eq!(row.color, None);
        assert_eq!(row.drive_wheels, None);
    }

    #[test]
    fn test_brand_priority() {
        let doc = json!({"data": {"parameter_groups": [{"parameters": [
            {"id": "cx_make", "value": "Volvo"},
            {"id": "car_brand", "value": "VOLVO"}
        ]}]}});
        assert_eq!(flatten(&doc).unwrap().brand.as_deref(), Some("VOLVO"));

        let doc = json!({"data": {"parameter_groups": [{"parameters": [
            {"id": "car_brand", "value": ""},
            {"id": "cx_make", "value": "Saab"}
        ]}]}});
        assert_eq!(flatten(&doc).unwrap().brand.as_deref(), Some("Saab"));
    }

    #[test]
    fn test_missing_fields_stay_missing() {
        let row = flatten(&json!({"data": {}})).unwrap();
        assert_eq!(row, FlatRecord::default());

        let doc = json!({"data": {"parameter_groups": [{"parameters": [
            {"id": "mileage", "value": "okänd"}
        ]}]}});
        assert_eq!(flatten(&doc).unwrap().mileage, None);
    }

    #[test]
    fn test_missing_data_is_none() {
        assert!(flatten(&json!({"cars": []})).is_none());
        assert!(flatten(&json!({"data": "text"})).is_none());
    }

    #[test]
    fn test_flatten_is_deterministic() {
        assert_eq!(flatten(&detail()), flatten(&detail()));
    }

    #[test]
    fn test_flatten_bytes_errors_are_decode() {
        let err = flatten_bytes("details/1.json", b"<html>").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Decode);

        let err = flatten_bytes("details/2.json", b"{}").unwrap_err();
        assert!(err.to_string().contains("details/2.json"));
    }

    #[test]
    fn test_equipment_without_items_counts_zero() {
        let doc = json!({"data": {"attributes": [{"id": "car_equipment"}]}});
        assert_eq!(flatten(&doc).unwrap().equipment_count, Some(0));
    }

    #[test]
    fn test_repeated_equipment_attribute_last_counts() {
        let doc = json!({"data": {"attributes": [
            {"id": "car_equipment", "items": [{"label": "ABS"}, {"label": "AC"}]},
            {"id": "colour", "items": [{"label": "Red"}]},
            {"id": "car_equipment", "items": [{"label": "ABS"}, {"label": "AC"}, {"label": "Tow bar"}]}
        ]}});
        assert_eq!(flatten(&doc).unwrap().equipment_count, Some(3));
    }
}
