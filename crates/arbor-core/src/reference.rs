//! Placeholder reference tokens (`@AccountRef1`).
//!
//! A token stands in for the identifier a not-yet-saved record will receive.
//! Matching is always against the whole string.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::record::Record;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^@\w+Ref\d+$").expect("valid token pattern"))
}

/// Returns true iff `value` is a string that is exactly one placeholder token.
pub fn is_unresolved_ref(value: &Value) -> bool {
    value.as_str().is_some_and(is_token)
}

/// String form of [`is_unresolved_ref`].
pub fn is_token(value: &str) -> bool {
    token_pattern().is_match(value)
}

/// Returns true iff any field of any record (nested children included) holds a token.
pub fn has_unresolved_refs(records: &[Record]) -> bool {
    records.iter().any(|record| {
        let mut found = false;
        record.for_each_value(&mut |_, value| {
            found = found || is_unresolved_ref(value);
        });
        found
    })
}

/// Tokens still present in `records`, deduplicated in first-seen order.
pub fn unresolved_refs(records: &[Record]) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for record in records {
        record.for_each_value(&mut |_, value| {
            if let Some(token) = value.as_str().filter(|text| is_token(text)) {
                if !tokens.iter().any(|seen| seen == token) {
                    tokens.push(token.to_string());
                }
            }
        });
    }
    tokens
}

/// Bring a reference id into token form by adding the leading `@` when missing.
pub fn normalize_reference_id(raw: &str) -> String {
    if raw.starts_with('@') {
        raw.to_string()
    } else {
        format!("@{raw}")
    }
}

/// Build the token `@{prefix}{object_type}Ref{n}`.
pub fn format_token(prefix: Option<&str>, object_type: &str, n: usize) -> String {
    format!("@{}{}Ref{}", prefix.unwrap_or_default(), object_type, n)
}
