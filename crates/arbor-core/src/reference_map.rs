use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::Record;
use crate::reference::{is_token, normalize_reference_id};

/// Run-scoped mapping from placeholder token to the identifier the store assigned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceMap {
    entries: BTreeMap<String, String>,
}

/// Outcome of substituting tokens in one set of records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Number of field values replaced by a concrete identifier.
    pub resolved: usize,
    /// Tokens left in place because the map had no entry for them.
    pub unresolved: Vec<String>,
}

impl ReferenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `token -> id`, returning the previous identifier for the token.
    ///
    /// Keys are normalised to the `@` form. Re-inserting the same pair is a no-op.
    pub fn insert(&mut self, token: &str, id: impl Into<String>) -> Option<String> {
        self.entries.insert(normalize_reference_id(token), id.into())
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.entries.get(token).map(String::as_str)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.entries.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(token, id)| (token.as_str(), id.as_str()))
    }

    /// Replace every known token in `record` (nested children included).
    pub fn resolve_record(&self, record: &mut Record) -> Resolution {
        let mut resolution = Resolution::default();
        record.for_each_value_mut(&mut |_, value| {
            let Some(token) = value.as_str().filter(|text| is_token(text)) else {
                return;
            };
            match self.entries.get(token) {
                Some(id) => {
                    *value = Value::String(id.clone());
                    resolution.resolved += 1;
                }
                None => {
                    if !resolution.unresolved.iter().any(|seen| seen == token) {
                        resolution.unresolved.push(token.to_string());
                    }
                }
            }
        });
        resolution
    }

    /// Resolve a whole batch, merging the per-record outcomes.
    pub fn resolve_records(&self, records: &mut [Record]) -> Resolution {
        let mut total = Resolution::default();
        for record in records.iter_mut() {
            let resolution = self.resolve_record(record);
            total.resolved += resolution.resolved;
            for token in resolution.unresolved {
                if !total.unresolved.contains(&token) {
                    total.unresolved.push(token);
                }
            }
        }
        total
    }
}

impl FromIterator<(String, String)> for ReferenceMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (token, id) in iter {
            map.insert(&token, id);
        }
        map
    }
}
