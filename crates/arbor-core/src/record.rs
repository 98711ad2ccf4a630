use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::reference::normalize_reference_id;

/// Key holding record metadata (`type`, `referenceId`, `url`).
pub const ATTRIBUTES_KEY: &str = "attributes";
/// Top-level key naming the token a record will be known as after save.
pub const REFERENCE_ID_KEY: &str = "referenceId";
/// Key holding the record list of a nested child collection.
pub const RECORDS_KEY: &str = "records";
/// Primary identifier field assigned by the store.
pub const ID_FIELD: &str = "Id";

/// A single record: field name to JSON value, optionally carrying nested
/// child collections under relationship-name keys (`{"records": [...]}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

/// A record found below a parent record, with the relationship that holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedRecord {
    pub relationship: String,
    pub record: Record,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Build a record from a JSON value, failing unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Object type from `attributes.type`.
    pub fn object_type(&self) -> Option<&str> {
        map_object_type(&self.0)
    }

    pub fn set_object_type(&mut self, object_type: &str) {
        self.attributes_mut()
            .insert("type".to_string(), Value::String(object_type.to_string()));
    }

    /// Placeholder token for this record, normalised to the `@` form.
    ///
    /// A top-level `referenceId` wins over `attributes.referenceId`.
    pub fn reference_id(&self) -> Option<String> {
        map_reference_id(&self.0)
    }

    /// Store the reference id in `attributes.referenceId`, without the `@`.
    pub fn set_reference_id(&mut self, token: &str) {
        let bare = token.trim_start_matches('@').to_string();
        self.attributes_mut()
            .insert(REFERENCE_ID_KEY.to_string(), Value::String(bare));
    }

    /// Drop one key of `attributes` (e.g. `url`).
    pub fn remove_attribute(&mut self, key: &str) -> Option<Value> {
        self.0
            .get_mut(ATTRIBUTES_KEY)
            .and_then(Value::as_object_mut)
            .and_then(|attributes| attributes.remove(key))
    }

    /// Store-assigned identifier (`Id`), when present as a string.
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    /// Returns true for keys that carry metadata rather than data.
    pub fn is_reserved_key(key: &str) -> bool {
        key == ATTRIBUTES_KEY || key == REFERENCE_ID_KEY
    }

    /// Data fields, excluding metadata keys and nested child collections.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0
            .iter()
            .filter(|(key, value)| !Self::is_reserved_key(key) && child_records(value).is_none())
    }

    /// Relationship names holding nested child collections, in key order.
    pub fn relationships(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|(key, value)| !Self::is_reserved_key(key) && child_records(value).is_some())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Records of one nested child collection.
    pub fn children(&self, relationship: &str) -> Vec<Record> {
        self.0
            .get(relationship)
            .and_then(child_records)
            .map(|records| {
                records
                    .iter()
                    .filter_map(|value| Record::from_value(value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replace (or create) a nested child collection.
    pub fn set_children(&mut self, relationship: &str, children: Vec<Record>) {
        let records: Vec<Value> = children.into_iter().map(Record::into_value).collect();
        let mut collection = Map::new();
        collection.insert(RECORDS_KEY.to_string(), Value::Array(records));
        self.0
            .insert(relationship.to_string(), Value::Object(collection));
    }

    pub fn has_children(&self) -> bool {
        self.0
            .iter()
            .any(|(key, value)| !Self::is_reserved_key(key) && child_records(value).is_some())
    }

    /// Every nested record below this one, depth-first, parents before children.
    pub fn descendants(&self) -> Vec<NestedRecord> {
        let mut out = Vec::new();
        collect_descendants(&self.0, &mut out);
        out
    }

    /// Visit every data field value, nested child records included.
    pub fn for_each_value(&self, visit: &mut impl FnMut(&str, &Value)) {
        visit_values(&self.0, visit);
    }

    /// Visit every data field value mutably, nested child records included.
    pub fn for_each_value_mut(&mut self, visit: &mut impl FnMut(&str, &mut Value)) {
        visit_values_mut(&mut self.0, visit);
    }

    fn attributes_mut(&mut self) -> &mut Map<String, Value> {
        let entry = self
            .0
            .entry(ATTRIBUTES_KEY.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry {
            Value::Object(map) => map,
            _ => unreachable!("attributes entry was just replaced by an object"),
        }
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Records of a child collection value (`{"records": [...]}`), if it is one.
pub fn child_records(value: &Value) -> Option<&Vec<Value>> {
    value.as_object()?.get(RECORDS_KEY)?.as_array()
}

fn child_records_mut(value: &mut Value) -> Option<&mut Vec<Value>> {
    value.as_object_mut()?.get_mut(RECORDS_KEY)?.as_array_mut()
}

fn map_object_type(map: &Map<String, Value>) -> Option<&str> {
    map.get(ATTRIBUTES_KEY)?.get("type")?.as_str()
}

fn map_reference_id(map: &Map<String, Value>) -> Option<String> {
    let raw = map
        .get(REFERENCE_ID_KEY)
        .and_then(Value::as_str)
        .or_else(|| {
            map.get(ATTRIBUTES_KEY)
                .and_then(|attrs| attrs.get(REFERENCE_ID_KEY))
                .and_then(Value::as_str)
        })?;
    if raw.trim().is_empty() {
        return None;
    }
    Some(normalize_reference_id(raw.trim()))
}

fn collect_descendants(map: &Map<String, Value>, out: &mut Vec<NestedRecord>) {
    for (key, value) in map {
        if Record::is_reserved_key(key) {
            continue;
        }
        if let Some(records) = child_records(value) {
            for child in records {
                if let Value::Object(child_map) = child {
                    out.push(NestedRecord {
                        relationship: key.clone(),
                        record: Record(child_map.clone()),
                    });
                    collect_descendants(child_map, out);
                }
            }
        }
    }
}

fn visit_values(map: &Map<String, Value>, visit: &mut impl FnMut(&str, &Value)) {
    for (key, value) in map {
        if Record::is_reserved_key(key) {
            continue;
        }
        match child_records(value) {
            Some(records) => {
                for child in records {
                    if let Value::Object(child_map) = child {
                        visit_values(child_map, visit);
                    }
                }
            }
            None => visit(key, value),
        }
    }
}

fn visit_values_mut(map: &mut Map<String, Value>, visit: &mut impl FnMut(&str, &mut Value)) {
    for (key, value) in map.iter_mut() {
        if Record::is_reserved_key(key) {
            continue;
        }
        if child_records(value).is_some() {
            if let Some(records) = child_records_mut(value) {
                for child in records.iter_mut() {
                    if let Value::Object(child_map) = child {
                        visit_values_mut(child_map, visit);
                    }
                }
            }
        } else {
            visit(key, value);
        }
    }
}

/// Parse the body of a record file: a bare array or `{"records": [...]}`.
pub fn parse_records(value: Value) -> Result<Vec<Record>, String> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove(RECORDS_KEY) {
            Some(Value::Array(items)) => items,
            Some(_) => return Err("'records' must be an array".to_string()),
            None => return Err("expected an array or an object with 'records'".to_string()),
        },
        _ => return Err("expected an array or an object with 'records'".to_string()),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            Record::from_value(item).ok_or_else(|| format!("record {idx} is not an object"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).expect("object")
    }

    #[test]
    fn reference_id_prefers_top_level_key() {
        let rec = record(json!({
            "referenceId": "@AccountRef1",
            "attributes": {"type": "Account", "referenceId": "AccountRef9"},
            "Name": "Acme"
        }));
        assert_eq!(rec.reference_id().as_deref(), Some("@AccountRef1"));
        assert_eq!(rec.object_type(), Some("Account"));
    }

    #[test]
    fn reference_id_from_attributes_is_normalised() {
        let rec = record(json!({"attributes": {"type": "Account", "referenceId": "AccountRef2"}}));
        assert_eq!(rec.reference_id().as_deref(), Some("@AccountRef2"));
    }

    #[test]
    fn fields_skip_metadata_and_children() {
        let rec = record(json!({
            "attributes": {"type": "Account"},
            "Name": "Acme",
            "Contacts": {"records": [{"LastName": "Doe"}]}
        }));
        let names: Vec<&String> = rec.fields().map(|(key, _)| key).collect();
        assert_eq!(names, vec!["Name"]);
        assert_eq!(rec.relationships(), vec!["Contacts".to_string()]);
        assert_eq!(rec.children("Contacts").len(), 1);
    }

    #[test]
    fn descendants_are_depth_first() {
        let rec = record(json!({
            "Name": "Acme",
            "Contacts": {"records": [
                {"referenceId": "ContactRef1", "Cases": {"records": [{"referenceId": "CaseRef1"}]}},
                {"referenceId": "ContactRef2"}
            ]}
        }));
        let refs: Vec<Option<String>> = rec
            .descendants()
            .iter()
            .map(|nested| nested.record.reference_id())
            .collect();
        assert_eq!(
            refs,
            vec![
                Some("@ContactRef1".to_string()),
                Some("@CaseRef1".to_string()),
                Some("@ContactRef2".to_string())
            ]
        );
    }

    #[test]
    fn parse_records_accepts_both_shapes() {
        let bare = parse_records(json!([{"Name": "a"}])).expect("bare array");
        let wrapped = parse_records(json!({"records": [{"Name": "a"}]})).expect("wrapped");
        assert_eq!(bare, wrapped);
        assert!(parse_records(json!({"rows": []})).is_err());
        assert!(parse_records(json!([1])).is_err());
    }
}
