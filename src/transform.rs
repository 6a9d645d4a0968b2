//! Override mapping construction and application.
//!
//! The override file is a positional template: its alphabetic rows line up
//! column-for-column with the base layout's rows, and only `default[0]` and
//! `shifted[0]` of each position are read. Everything else in the base
//! layout passes through untouched, including key alternates past index 0
//! and all top-level fields outside `alphabetic`.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{PatchError, Result};
use crate::layout;

/// Lowercase-folded base letter to `(new_default, new_shifted)`.
pub type LetterMapping = HashMap<char, (String, String)>;

/// Shape check for the override file: `alphabetic` must be rows of arrays
/// and every replacement it supplies must be a single character.
pub fn validate_override(over: &Value) -> Result<()> {
    let rows = layout::alphabetic_rows(over)
        .ok_or_else(|| PatchError::Input("override JSON has no alphabetic rows".into()))?;
    for (ri, row) in rows.iter().enumerate() {
        let Some(row) = row.as_array() else {
            return Err(PatchError::Input(format!(
                "override alphabetic row {ri} is not an array"
            )));
        };
        for (ci, key) in row.iter().enumerate() {
            if let Some((d, s)) = override_pair(key) {
                if layout::single_char(&d).is_none() || layout::single_char(&s).is_none() {
                    return Err(PatchError::Input(format!(
                        "override row {ri} col {ci} must supply single characters, got {d:?}/{s:?}"
                    )));
                }
            }
        }
    }
    Ok(())
}

// Replacement pair one override position supplies, if any. Bare strings
// stand for themselves in both registers; `shifted[0]` falls back to
// `default[0]`; specials and keys without `default[0]` supply nothing.
fn override_pair(key: &Value) -> Option<(String, String)> {
    match key {
        Value::String(s) => Some((s.clone(), s.clone())),
        Value::Object(_) if !layout::is_special(key) => {
            let d = layout::default0(key)?;
            let s = layout::shifted0(key).unwrap_or(d);
            Some((d.to_string(), s.to_string()))
        }
        _ => None,
    }
}

/// Walk base and override alphabetic rows in positional lockstep and
/// associate each base key's letter identity with the override's pair at
/// the same position. Specials and positions the override leaves empty
/// produce no entry, which leaves those base keys untouched.
pub fn build_mapping(base: &Value, over: &Value) -> LetterMapping {
    let mut mapping = LetterMapping::new();
    let Some(base_rows) = layout::alphabetic_rows(base) else {
        return mapping;
    };
    let over_rows = layout::alphabetic_rows(over);

    for (ri, base_row) in base_rows.iter().enumerate() {
        let Some(base_row) = base_row.as_array() else {
            continue;
        };
        let over_row = over_rows
            .and_then(|rows| rows.get(ri))
            .and_then(Value::as_array);
        for (ci, base_key) in base_row.iter().enumerate() {
            if layout::is_special(base_key) {
                continue;
            }
            let Some(letter) = layout::base_letter(base_key) else {
                continue;
            };
            let Some(pair) = over_row.and_then(|r| r.get(ci)).and_then(override_pair) else {
                continue;
            };
            mapping.insert(letter, pair);
        }
    }
    mapping
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyStats {
    /// Keys that had a mapping entry.
    pub touched: usize,
    /// Keys whose content actually changed.
    pub changed: usize,
}

/// Apply the letter mapping in place.
///
/// Object keys keep every alternate past index 0 and every unrelated
/// field; bare-string keys become `{"default": [nd], "shifted": [ns]}`.
pub fn apply_mapping(layoutv: &mut Value, mapping: &LetterMapping) -> ApplyStats {
    let mut stats = ApplyStats::default();
    let Some(rows) = layout::alphabetic_rows_mut(layoutv) else {
        return stats;
    };
    for row in rows.iter_mut() {
        let Some(row) = row.as_array_mut() else {
            continue;
        };
        for key in row.iter_mut() {
            if layout::is_special(key) {
                continue;
            }
            let Some(letter) = layout::base_letter(key) else {
                continue;
            };
            let Some((nd, ns)) = mapping.get(&letter) else {
                continue;
            };
            stats.touched += 1;
            if rewrite_key(key, nd, ns) {
                stats.changed += 1;
            }
        }
    }
    stats
}

fn rewrite_key(key: &mut Value, nd: &str, ns: &str) -> bool {
    match key {
        Value::String(_) => {
            let mut obj = Map::new();
            obj.insert(
                "default".to_string(),
                Value::Array(vec![Value::String(nd.to_string())]),
            );
            obj.insert(
                "shifted".to_string(),
                Value::Array(vec![Value::String(ns.to_string())]),
            );
            *key = Value::Object(obj);
            true
        }
        Value::Object(obj) => {
            let d = set_first_alternate(obj, "default", nd);
            let s = set_first_alternate(obj, "shifted", ns);
            d || s
        }
        _ => false,
    }
}

// Set `field[0]`, growing a missing or empty array to length one; the
// remaining alternates stay where they are.
fn set_first_alternate(obj: &mut Map<String, Value>, field: &str, value: &str) -> bool {
    let entry = obj
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !entry.is_array() {
        *entry = Value::Array(Vec::new());
    }
    let Value::Array(arr) = entry else {
        return false;
    };
    match arr.first_mut() {
        Some(slot) if slot.as_str() == Some(value) => false,
        Some(slot) => {
            *slot = Value::String(value.to_string());
            true
        }
        None => {
            arr.push(Value::String(value.to_string()));
            true
        }
    }
}

/// Compact deterministic serialisation; object insertion order survives.
pub fn to_bytes(v: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(v).map_err(|e| PatchError::Io(std::io::Error::other(e)))
}
