//! Attribute maps carried by insert and retain operations.
//!
//! A `null` value is meaningful on a retain: it instructs `compose` to strip
//! the key from the text it covers. [`AttrValue::Null`] is therefore a
//! distinct variant, not an absent entry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single attribute value. JSON `null` round-trips to [`AttrValue::Null`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_owned())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

/// Attribute map attached to an op. Ordered so equality and JSON output are
/// stable.
pub type Attributes = BTreeMap<String, AttrValue>;

/// Merge `b` over `a`. `b`'s entries win. When `keep_null` is false, `null`
/// entries are dropped from the result (composing onto an insert resolves
/// removals immediately); when true they survive as removal instructions
/// (composing onto a retain).
pub fn compose_attributes(
    a: Option<&Attributes>,
    b: Option<&Attributes>,
    keep_null: bool,
) -> Option<Attributes> {
    let mut merged = a.cloned().unwrap_or_default();
    if let Some(b) = b {
        for (key, value) in b {
            merged.insert(key.clone(), value.clone());
        }
    }
    if !keep_null {
        merged.retain(|_, value| !value.is_null());
    }
    if merged.is_empty() {
        None
    } else {
        Some(merged)
    }
}

/// Transform `b`'s attributes against `a`'s. With `priority`, keys `a`
/// already set win the conflict and are removed from `b`; without it `b`
/// passes through unchanged.
pub fn transform_attributes(
    a: Option<&Attributes>,
    b: Option<&Attributes>,
    priority: bool,
) -> Option<Attributes> {
    let Some(a) = a else { return b.cloned() };
    let Some(b) = b else { return None };
    if !priority {
        return Some(b.clone());
    }
    let remaining: Attributes = b
        .iter()
        .filter(|(key, _)| !a.contains_key(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if remaining.is_empty() {
        None
    } else {
        Some(remaining)
    }
}

/// Compute the attribute map that undoes `applied` against the values the
/// base document held: `null` for keys `applied` introduced, the base value
/// for keys it changed. Keys `applied` set to their existing value invert to
/// nothing.
pub fn invert_attributes(
    applied: Option<&Attributes>,
    base: Option<&Attributes>,
) -> Option<Attributes> {
    let applied = applied?;
    let mut inverse = Attributes::new();
    for (key, value) in applied {
        let base_value = base.and_then(|b| b.get(key));
        if base_value != Some(value) {
            inverse.insert(
                key.clone(),
                base_value.cloned().unwrap_or(AttrValue::Null),
            );
        }
    }
    if inverse.is_empty() {
        None
    } else {
        Some(inverse)
    }
}

/// The attribute change that turns `a`'s map into `b`'s: `b`'s value where
/// they differ, `null` where `b` dropped a key.
pub fn diff_attributes(a: Option<&Attributes>, b: Option<&Attributes>) -> Option<Attributes> {
    let empty = Attributes::new();
    let a = a.unwrap_or(&empty);
    let b = b.unwrap_or(&empty);
    let mut changed = Attributes::new();
    for key in a.keys().chain(b.keys()) {
        if a.get(key) != b.get(key) {
            changed.insert(
                key.clone(),
                b.get(key).cloned().unwrap_or(AttrValue::Null),
            );
        }
    }
    if changed.is_empty() {
        None
    } else {
        Some(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(entries: &[(&str, AttrValue)]) -> Attributes {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_compose_b_wins() {
        let a = attrs(&[("bold", true.into()), ("font", "serif".into())]);
        let b = attrs(&[("font", "mono".into())]);
        let merged = compose_attributes(Some(&a), Some(&b), false).unwrap();
        assert_eq!(merged.get("font"), Some(&AttrValue::Str("mono".into())));
        assert_eq!(merged.get("bold"), Some(&AttrValue::Bool(true)));
    }

    #[test]
    fn test_compose_drops_null_without_keep() {
        let a = attrs(&[("bold", true.into())]);
        let b = attrs(&[("bold", AttrValue::Null)]);
        assert_eq!(compose_attributes(Some(&a), Some(&b), false), None);
    }

    #[test]
    fn test_compose_keeps_null_as_removal() {
        let b = attrs(&[("bold", AttrValue::Null)]);
        let merged = compose_attributes(None, Some(&b), true).unwrap();
        assert_eq!(merged.get("bold"), Some(&AttrValue::Null));
    }

    #[test]
    fn test_transform_without_priority_passes_through() {
        let a = attrs(&[("bold", true.into())]);
        let b = attrs(&[("bold", false.into()), ("italic", true.into())]);
        assert_eq!(
            transform_attributes(Some(&a), Some(&b), false),
            Some(b.clone())
        );
    }

    #[test]
    fn test_transform_with_priority_drops_conflicts() {
        let a = attrs(&[("bold", true.into())]);
        let b = attrs(&[("bold", false.into()), ("italic", true.into())]);
        let transformed = transform_attributes(Some(&a), Some(&b), true).unwrap();
        assert!(!transformed.contains_key("bold"));
        assert_eq!(transformed.get("italic"), Some(&AttrValue::Bool(true)));
    }

    #[test]
    fn test_transform_all_conflicting_collapses_to_none() {
        let a = attrs(&[("bold", true.into())]);
        let b = attrs(&[("bold", false.into())]);
        assert_eq!(transform_attributes(Some(&a), Some(&b), true), None);
    }

    #[test]
    fn test_invert_added_key_becomes_null() {
        let applied = attrs(&[("bold", true.into())]);
        let inverse = invert_attributes(Some(&applied), None).unwrap();
        assert_eq!(inverse.get("bold"), Some(&AttrValue::Null));
    }

    #[test]
    fn test_invert_changed_key_restores_base() {
        let applied = attrs(&[("font", "mono".into())]);
        let base = attrs(&[("font", "serif".into())]);
        let inverse = invert_attributes(Some(&applied), Some(&base)).unwrap();
        assert_eq!(inverse.get("font"), Some(&AttrValue::Str("serif".into())));
    }

    #[test]
    fn test_invert_unchanged_key_is_dropped() {
        let applied = attrs(&[("bold", true.into())]);
        let base = attrs(&[("bold", true.into())]);
        assert_eq!(invert_attributes(Some(&applied), Some(&base)), None);
    }

    #[test]
    fn test_diff_reports_changes_and_removals() {
        let a = attrs(&[("bold", true.into()), ("font", "serif".into())]);
        let b = attrs(&[("font", "mono".into())]);
        let changed = diff_attributes(Some(&a), Some(&b)).unwrap();
        assert_eq!(changed.get("bold"), Some(&AttrValue::Null));
        assert_eq!(changed.get("font"), Some(&AttrValue::Str("mono".into())));
    }

    #[test]
    fn test_diff_equal_maps_is_none() {
        let a = attrs(&[("bold", true.into())]);
        assert_eq!(diff_attributes(Some(&a), Some(&a)), None);
    }

    #[test]
    fn test_attr_value_json_roundtrip() {
        let original = attrs(&[
            ("bold", true.into()),
            ("indent", 2i64.into()),
            ("link", AttrValue::Null),
            ("node_id", "hello".into()),
        ]);
        let json = serde_json::to_string(&original).unwrap();
        let decoded: Attributes = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, original);
        assert!(json.contains("\"link\":null"));
    }
}
