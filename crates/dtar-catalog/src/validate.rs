//! Schema conformance of a raw catalog document.

use std::collections::HashSet;

use serde_json::Value;

use dtar_core::{EntryType, SIZE_SENTINEL};

/// Number of fields in a serialized fingerprint record.
const RECORD_ARITY: usize = 10;

/// Check that a parsed JSON document has the catalog shape: a non-empty
/// `start_point` string, `uids`/`gids` as lists of unique `[id, name]`
/// pairs, and `files` mapping each path to a 10 element record.
///
/// This only checks structure; [`dtar_core::Catalog::validate`] checks
/// that the contents are consistent.
pub fn validate_value(value: &Value) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };

    let root_ok = object
        .get("start_point")
        .and_then(Value::as_str)
        .is_some_and(|root| !root.is_empty());

    root_ok
        && object.get("uids").is_some_and(is_id_table)
        && object.get("gids").is_some_and(is_id_table)
        && object
            .get("files")
            .and_then(Value::as_object)
            .is_some_and(|files| files.values().all(is_record))
}

fn is_id_table(value: &Value) -> bool {
    let Some(pairs) = value.as_array() else {
        return false;
    };

    let mut seen = HashSet::with_capacity(pairs.len());
    pairs.iter().all(|pair| match as_id_pair(pair) {
        Some(pair) => seen.insert(pair),
        None => false,
    })
}

fn as_id_pair(value: &Value) -> Option<(u32, &str)> {
    match value.as_array()?.as_slice() {
        [id, name] => Some((as_u32(id)?, name.as_str()?)),
        _ => None,
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|v| u32::try_from(v).ok())
}

fn is_record(value: &Value) -> bool {
    let Some(fields) = value.as_array() else {
        return false;
    };
    if fields.len() != RECORD_ARITY {
        return false;
    }

    let ids_ok = fields[..3].iter().all(|f| as_u32(f).is_some());
    let size_ok = fields[3].as_i64().is_some_and(|s| s >= SIZE_SENTINEL);
    let mtime_ok = fields[4].is_i64();
    let type_ok = fields[5]
        .as_str()
        .is_some_and(|flag| EntryType::from_type_flag(flag).is_some());
    let strings_ok = fields[6..].iter().all(Value::is_string);

    ids_ok && size_ok && mtime_ok && type_ok && strings_ok
}
