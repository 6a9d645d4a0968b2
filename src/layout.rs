//! Structural accessors for the heterogeneous layout tree.
//!
//! A key in an alphabetic row is either a bare string or an object. Object
//! keys carrying a `special` tag are modifier keys (shift, backspace); the
//! rest carry a `default` alternates array and usually a `shifted` one.
//! Detection is structural, never schema-driven.

use serde_json::Value;

pub fn alphabetic_rows(layout: &Value) -> Option<&Vec<Value>> {
    layout.get("alphabetic")?.as_array()
}

pub fn alphabetic_rows_mut(layout: &mut Value) -> Option<&mut Vec<Value>> {
    layout.get_mut("alphabetic")?.as_array_mut()
}

pub fn is_special(key: &Value) -> bool {
    key.as_object().is_some_and(|o| o.contains_key("special"))
}

/// First `default` alternate of an object key.
pub fn default0(key: &Value) -> Option<&str> {
    key.get("default")?.as_array()?.first()?.as_str()
}

pub fn shifted0(key: &Value) -> Option<&str> {
    key.get("shifted")?.as_array()?.first()?.as_str()
}

/// Base-letter identity of a key: the string itself for bare strings, the
/// first default alternate for objects; lowercase-folded. Specials and
/// multi-character contents have no letter identity.
pub fn base_letter(key: &Value) -> Option<char> {
    let s = match key {
        Value::String(s) => s.as_str(),
        Value::Object(_) if !is_special(key) => default0(key)?,
        _ => return None,
    };
    single_char(s).map(fold_letter)
}

pub fn single_char(s: &str) -> Option<char> {
    let mut it = s.chars();
    let c = it.next()?;
    if it.next().is_some() {
        None
    } else {
        Some(c)
    }
}

pub fn fold_letter(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}
