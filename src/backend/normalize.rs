//! Response normalization shared by both read paths
//!
//! The wallet and institutional APIs evolved separately and disagree on
//! envelopes, field names and number encodings (JSON numbers vs decimal or
//! hex strings). Everything is funnelled through these lenient parsers so
//! the pipeline only ever sees the normalized types.

use chrono::DateTime;
use serde_json::Value;

use crate::types::{
    BackendError, BackendResult, Lab, LabId, LabMetadata, LabOwner, RawStatus, RecordLookup,
    Reservation, ReservationKey,
};

/// Descend into a `data` / `result` envelope if present
fn unwrap_envelope(value: &Value) -> &Value {
    for name in ["data", "result"] {
        if let Some(inner) = value.get(name) {
            if !inner.is_null() {
                return inner;
            }
        }
    }
    value
}

/// First non-null field among `names`
fn field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| value.get(*name))
        .find(|v| !v.is_null())
}

fn string_field(value: &Value, names: &[&str]) -> Option<String> {
    field(value, names).and_then(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn string_list(value: &Value, names: &[&str]) -> Vec<String> {
    match field(value, names) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                other => other
                    .get("url")
                    .or_else(|| other.get("uri"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Unsigned integer from a JSON number, decimal string or `0x` hex string
pub fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x") {
                Some(digits) => u64::from_str_radix(digits, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    }
}

/// Unix seconds from a number, numeric string or RFC 3339 timestamp.
///
/// Zero and negative values mean "unset" on the contract side.
pub fn as_timestamp(value: &Value) -> Option<i64> {
    let seconds = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp()))
        }
        _ => None,
    }?;
    (seconds > 0).then_some(seconds)
}

fn as_status(value: &Value) -> RawStatus {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(RawStatus::from_code)
            .unwrap_or(RawStatus::Unknown(-1)),
        Value::String(s) => RawStatus::from_name(s),
        _ => RawStatus::Unknown(-1),
    }
}

/// Reservation count
pub fn parse_count(value: &Value) -> BackendResult<u64> {
    let body = unwrap_envelope(value);
    as_u64(body)
        .or_else(|| field(body, &["count", "total", "reservationCount"]).and_then(as_u64))
        .ok_or_else(|| BackendError::Decode(format!("missing reservation count in {}", body)))
}

/// Reservation key at an index; empty and all-zero keys mean "none"
pub fn parse_key(value: &Value) -> BackendResult<Option<ReservationKey>> {
    let body = unwrap_envelope(value);
    let raw = match body {
        Value::Null => return Ok(None),
        Value::String(s) => s.as_str(),
        other => match field(other, &["key", "reservationKey"]) {
            Some(Value::String(s)) => s.as_str(),
            Some(_) => return Err(BackendError::Decode("reservation key is not a string".into())),
            None => return Ok(None),
        },
    };

    let digits = raw.trim().trim_start_matches("0x");
    if digits.is_empty() || digits.chars().all(|c| c == '0') {
        return Ok(None);
    }
    ReservationKey::parse(raw)
        .map(Some)
        .map_err(|e| BackendError::Decode(e.to_string()))
}

/// Full reservation; "not found" markers become [`RecordLookup::NotFound`]
pub fn parse_record(key: &ReservationKey, value: &Value) -> BackendResult<RecordLookup> {
    let body = unwrap_envelope(value);
    if body.is_null() {
        return Ok(RecordLookup::NotFound);
    }
    if body.get("notFound").and_then(Value::as_bool) == Some(true)
        || body.get("exists").and_then(Value::as_bool) == Some(false)
    {
        return Ok(RecordLookup::NotFound);
    }

    let record = body.get("reservation").unwrap_or(body);
    if record.is_null() {
        return Ok(RecordLookup::NotFound);
    }
    let lab_id = field(record, &["labId", "tokenId", "lab_id"])
        .and_then(as_u64)
        .ok_or_else(|| BackendError::Decode(format!("reservation {} has no lab id", key.short())))?;

    Ok(RecordLookup::Found(Reservation {
        key: key.clone(),
        lab_id,
        status: field(record, &["status", "state"])
            .map(as_status)
            .unwrap_or(RawStatus::Unknown(-1)),
        start: field(record, &["start", "startTime", "start_time"]).and_then(as_timestamp),
        end: field(record, &["end", "endTime", "end_time"]).and_then(as_timestamp),
        renter: string_field(record, &["renter", "user", "userAddress"]),
        price: string_field(record, &["price"]),
        provider: string_field(record, &["provider", "labProvider"]),
        puc: string_field(record, &["puc", "institutionalUserCode"]),
    }))
}

pub fn parse_lab(lab_id: LabId, value: &Value) -> BackendResult<Lab> {
    let body = unwrap_envelope(value);
    let record = body.get("lab").unwrap_or(body);
    if !record.is_object() {
        return Err(BackendError::Decode(format!("lab {} is not an object", lab_id)));
    }
    let base = record.get("base").unwrap_or(record);

    Ok(Lab {
        id: field(record, &["labId", "id", "tokenId"])
            .and_then(as_u64)
            .unwrap_or(lab_id),
        uri: string_field(base, &["uri", "metadataUri", "tokenURI"]),
        price: string_field(base, &["price"]),
        auth_uri: string_field(base, &["auth", "authURI", "authUri"]),
        owner: string_field(record, &["owner", "provider"]),
    })
}

pub fn parse_metadata(value: &Value) -> BackendResult<LabMetadata> {
    let body = unwrap_envelope(value);
    if !body.is_object() {
        return Err(BackendError::Decode("lab metadata is not an object".into()));
    }

    // Attribute-style metadata keeps the category among its attributes
    let category = string_field(body, &["category"]).or_else(|| {
        body.get("attributes")
            .and_then(Value::as_array)
            .and_then(|attrs| {
                attrs.iter().find(|attr| {
                    attr.get("trait_type").and_then(Value::as_str) == Some("category")
                })
            })
            .and_then(|attr| string_field(attr, &["value"]))
    });

    Ok(LabMetadata {
        name: string_field(body, &["name", "title"]),
        description: string_field(body, &["description"]),
        category,
        images: string_list(body, &["images", "image"]),
        docs: string_list(body, &["docs", "documents"]),
        keywords: string_list(body, &["keywords"]),
    })
}

pub fn parse_owner(value: &Value) -> BackendResult<LabOwner> {
    let body = unwrap_envelope(value);
    let address = match body {
        Value::String(s) => Some(s.trim().to_string()),
        other => string_field(other, &["owner", "address", "wallet"]),
    }
    .filter(|a| !a.is_empty())
    .ok_or_else(|| BackendError::Decode("lab owner has no address".into()))?;

    Ok(LabOwner {
        address,
        name: string_field(body, &["name", "providerName"]),
    })
}
