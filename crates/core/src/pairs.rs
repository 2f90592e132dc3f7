//! Reduce an upstream instrument snapshot to the allow-listed pairs that are
//! open for trading right now.

use crate::allowlist;
use crate::models::{OpenPair, SNAPSHOT_CATEGORIES};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Prefix the broker puts in front of display names.
const NAME_PREFIX: &str = "front.";

/// Commission assumed when the snapshot does not carry one (yields a payout of 0).
const DEFAULT_COMMISSION: f64 = 100.0;

/// Errors raised while walking a malformed snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot is not a mapping")]
    NotAMapping,
    #[error("actives of category '{0}' is not a mapping")]
    ActivesNotAMapping(String),
    #[error("instrument name is not a string: {0}")]
    InvalidName(Value),
    #[error("invalid commission for instrument '{name}': {value}")]
    InvalidCommission { name: String, value: Value },
}

/// Collect allow-listed, enabled, non-suspended instruments with their payout.
///
/// Names appearing in several categories are merged, keeping the highest
/// payout. Entries are returned in first-seen order.
pub fn open_pairs(snapshot: &Value) -> Result<Vec<OpenPair>, SnapshotError> {
    let categories = snapshot.as_object().ok_or(SnapshotError::NotAMapping)?;

    let mut pairs: Vec<OpenPair> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for category in SNAPSHOT_CATEGORIES {
        let Some(actives) = categories
            .get(category)
            .and_then(Value::as_object)
            .and_then(|bucket| bucket.get("actives"))
        else {
            continue;
        };
        let actives = actives
            .as_object()
            .ok_or_else(|| SnapshotError::ActivesNotAMapping(category.to_string()))?;

        for record in actives.values() {
            let Some(pair) = open_pair(record)? else {
                continue;
            };
            match index.get(&pair.name) {
                Some(&i) => {
                    if pair.payout > pairs[i].payout {
                        pairs[i].payout = pair.payout;
                    }
                }
                None => {
                    index.insert(pair.name.clone(), pairs.len());
                    pairs.push(pair);
                }
            }
        }
    }

    tracing::debug!(count = pairs.len(), "Filtered open pairs");
    Ok(pairs)
}

/// Display name with the broker's `front.` prefix removed.
pub fn clean_name(raw: &str) -> String {
    raw.replace(NAME_PREFIX, "")
}

/// Evaluate a single instrument record. `Ok(None)` means it is filtered out.
fn open_pair(record: &Value) -> Result<Option<OpenPair>, SnapshotError> {
    let Some(record) = record.as_object() else {
        return Ok(None);
    };
    if !truthy(record.get("enabled")) || truthy(record.get("is_suspended")) {
        return Ok(None);
    }

    let name = match record.get("name") {
        None => String::new(),
        Some(Value::String(s)) => clean_name(s),
        Some(other) => return Err(SnapshotError::InvalidName(other.clone())),
    };
    if !allowlist::is_allowed(&name) {
        return Ok(None);
    }

    let commission = commission(record, &name)?;
    let payout = (100.0 - commission).trunc() as i64;
    Ok(Some(OpenPair { name, payout }))
}

/// `option.profit.commission`, defaulting when any level is absent.
///
/// An explicit `null` is not absent: it is reported as invalid.
fn commission(record: &Map<String, Value>, name: &str) -> Result<f64, SnapshotError> {
    let invalid = |value: &Value| SnapshotError::InvalidCommission {
        name: name.to_string(),
        value: value.clone(),
    };

    let mut level = record;
    for key in ["option", "profit"] {
        match level.get(key) {
            None => return Ok(DEFAULT_COMMISSION),
            Some(Value::Object(inner)) => level = inner,
            Some(other) => return Err(invalid(other)),
        }
    }

    match level.get("commission") {
        None => Ok(DEFAULT_COMMISSION),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| invalid(&Value::Number(n.clone()))),
        Some(other) => Err(invalid(other)),
    }
}

/// Loose truthiness: null, false, zero, and empty strings/arrays/objects are false.
fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}
