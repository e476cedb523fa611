use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use mongodb::bson::{oid::ObjectId, spec::BinarySubtype, Bson, Document};
use regex::Regex;
use serde::{Deserialize, Deserializer};

/// Canonical hex form of an object identifier, whichever way it was stored.
pub fn object_id_to_hex(value: &Bson) -> Option<String> {
    match value {
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        Bson::String(s) => ObjectId::parse_str(s).ok().map(|oid| oid.to_hex()),
        Bson::Binary(binary) if binary.subtype == BinarySubtype::Generic => {
            let bytes: [u8; 12] = binary.bytes.as_slice().try_into().ok()?;
            Some(ObjectId::from_bytes(bytes).to_hex())
        }
        _ => None,
    }
}

/// Object ids carry their creation second in the leading four bytes.
pub fn object_id_created_at(oid: &ObjectId) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(oid.timestamp().timestamp_millis())
}

/// Flattens a scalar field into the text that ends up in a report cell.
pub fn bson_to_cell(value: &Bson) -> Option<String> {
    match value {
        Bson::Null | Bson::Undefined => None,
        Bson::String(s) => Some(s.clone()),
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        Bson::DateTime(dt) => DateTime::from_timestamp_millis(dt.timestamp_millis())
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Bson::Int32(v) => Some(v.to_string()),
        Bson::Int64(v) => Some(v.to_string()),
        Bson::Double(v) => Some(v.to_string()),
        Bson::Boolean(v) => Some(v.to_string()),
        Bson::Array(values) => Some(
            values
                .iter()
                .filter_map(bson_to_cell)
                .collect::<Vec<_>>()
                .join("; "),
        ),
        other => Some(other.to_string()),
    }
}

pub fn cell(doc: &Document, key: &str) -> Option<String> {
    doc.get(key).and_then(bson_to_cell)
}

pub fn string_list(doc: &Document, key: &str) -> Vec<String> {
    match doc.get(key) {
        Some(Bson::Array(values)) => values.iter().filter_map(bson_to_cell).collect(),
        Some(Bson::Null) | None => Vec::new(),
        Some(other) => bson_to_cell(other).into_iter().collect(),
    }
}

/// Some stored dates look like `2018-03-13T17:13:12.000000+00:00Z`; the offset
/// before the trailing `Z` is dropped so the value parses as RFC 3339.
pub fn normalize_iso8601(date: &str) -> String {
    static OFFSET_BEFORE_Z: OnceLock<Regex> = OnceLock::new();
    let re = OFFSET_BEFORE_Z
        .get_or_init(|| Regex::new(r"(\+\d{2}:\d{2})Z$").expect("static regex is valid"));
    re.replace(date, "$1").into_owned()
}

pub fn parse_iso8601_date(date: &str) -> Option<NaiveDate> {
    let normalized = normalize_iso8601(date.trim());
    DateTime::parse_from_rfc3339(&normalized)
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| NaiveDate::parse_from_str(&normalized, "%Y-%m-%d").ok())
}

// Field readers for typed catalog documents: a null or oddly typed value
// degrades to empty for that field instead of failing the whole cursor.

pub fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Bson>::deserialize(deserializer)?
        .as_ref()
        .and_then(bson_to_cell))
}

pub fn lenient_required_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_string(deserializer).map(Option::unwrap_or_default)
}

pub fn lenient_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Bson>::deserialize(deserializer)? {
        Some(Bson::Array(values)) => values.iter().filter_map(bson_to_cell).collect(),
        Some(other) => bson_to_cell(&other).into_iter().collect(),
        None => Vec::new(),
    })
}

pub fn lenient_i32<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Bson>::deserialize(deserializer)? {
        Some(Bson::Int32(v)) => Some(v),
        Some(Bson::Int64(v)) => i32::try_from(v).ok(),
        Some(Bson::Double(v))
            if v.fract() == 0.0 && v >= f64::from(i32::MIN) && v <= f64::from(i32::MAX) =>
        {
            Some(v as i32)
        }
        Some(Bson::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Treats an explicit null like a missing field.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}
