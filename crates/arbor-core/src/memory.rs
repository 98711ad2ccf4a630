use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::outcome::{SaveError, SaveResponse, SaveResultEntry};
use crate::query::QueryShape;
use crate::record::{ATTRIBUTES_KEY, ID_FIELD, Record};
use crate::reference::is_unresolved_ref;
use crate::store::{BulkIngest, ChildRelationship, JobState, JobStatus, ObjectDescribe, QueryStore, TreeStore};

/// How a tree response with failures lists its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStyle {
    /// Every record gets an entry, successes included.
    Detailed,
    /// When anything failed, only the failed records are listed.
    ErrorsOnly,
}

/// In-memory object store implementing the tree, query and bulk primitives.
///
/// Records holding a literal placeholder token are rejected the way the remote
/// store rejects a malformed identifier.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    relationships: BTreeMap<String, Vec<ChildRelationship>>,
    style: ResponseStyle,
    bulk_polls: u32,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Vec<Map<String, Value>>>,
    counters: BTreeMap<String, usize>,
    key_prefixes: BTreeMap<String, String>,
    rejections: BTreeMap<String, SaveError>,
    jobs: BTreeMap<String, Job>,
    save_calls: Vec<(String, usize)>,
}

#[derive(Debug)]
struct Job {
    object_type: String,
    records: Vec<Record>,
    polls_left: u32,
    response: Option<SaveResponse>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            relationships: BTreeMap::new(),
            style: ResponseStyle::Detailed,
            bulk_polls: 1,
        }
    }

    /// Declare that `child` records point at `parent` records through `field`.
    pub fn with_relationship(
        mut self,
        parent: &str,
        relationship_name: &str,
        child: &str,
        field: &str,
    ) -> Self {
        self.relationships
            .entry(parent.to_string())
            .or_default()
            .push(ChildRelationship {
                relationship_name: Some(relationship_name.to_string()),
                child_object: child.to_string(),
                field: field.to_string(),
            });
        self
    }

    pub fn with_response_style(mut self, style: ResponseStyle) -> Self {
        self.style = style;
        self
    }

    /// Identifier prefix for one object type (e.g. `001` for accounts).
    pub fn with_key_prefix(mut self, object_type: &str, prefix: &str) -> Self {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .key_prefixes
            .insert(object_type.to_string(), prefix.to_string());
        self
    }

    /// Number of polls a bulk job stays in progress.
    pub fn with_bulk_polls(mut self, polls: u32) -> Self {
        self.bulk_polls = polls;
        self
    }

    /// Make the next save of the record known as `token` fail with `error`.
    pub fn reject(&self, token: &str, error: SaveError) {
        self.lock()
            .rejections
            .insert(token.trim_start_matches('@').to_string(), error);
    }

    /// Store a record directly, assigning an `Id` when it has none.
    pub fn insert_existing(&self, object_type: &str, record: Record) -> String {
        let mut state = self.lock();
        let mut row = record.into_map();
        row.remove(ATTRIBUTES_KEY);
        let id = match row.get(ID_FIELD).and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => state.next_id(object_type),
        };
        row.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        state.tables.entry(object_type.to_string()).or_default().push(row);
        id
    }

    /// Stored rows of one type, in insertion order, `Id` included.
    pub fn records(&self, object_type: &str) -> Vec<Record> {
        self.lock()
            .tables
            .get(object_type)
            .map(|rows| rows.iter().cloned().map(Record::from_map).collect())
            .unwrap_or_default()
    }

    /// `(object type, top-level record count)` of every tree save received.
    pub fn save_calls(&self) -> Vec<(String, usize)> {
        self.lock().save_calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn child_relationship(&self, parent: &str, name: &str) -> Option<&ChildRelationship> {
        self.relationships.get(parent)?.iter().find(|rel| {
            rel.relationship_name
                .as_deref()
                .is_some_and(|rel_name| rel_name.eq_ignore_ascii_case(name))
        })
    }

    fn save_batch(&self, state: &mut State, object_type: &str, records: &[Record]) -> SaveResponse {
        let mut entries = Vec::new();
        for record in records {
            self.save_record(state, object_type, record, None, &mut entries);
        }

        let has_errors = entries.iter().any(SaveResultEntry::is_failure);
        if has_errors && self.style == ResponseStyle::ErrorsOnly {
            entries.retain(SaveResultEntry::is_failure);
        }
        SaveResponse {
            has_errors,
            results: entries,
        }
    }

    fn save_record(
        &self,
        state: &mut State,
        object_type: &str,
        record: &Record,
        parent: Option<(&str, &str)>,
        entries: &mut Vec<SaveResultEntry>,
    ) {
        let reference_id = record
            .reference_id()
            .map(|token| token.trim_start_matches('@').to_string());

        if let Some(error) = self.validate(state, record, reference_id.as_deref()) {
            entries.push(SaveResultEntry {
                reference_id,
                id: None,
                errors: vec![error],
            });
            for nested in record.descendants() {
                entries.push(SaveResultEntry {
                    reference_id: nested
                        .record
                        .reference_id()
                        .map(|token| token.trim_start_matches('@').to_string()),
                    id: None,
                    errors: vec![SaveError::new(
                        "PROCESSING_HALTED",
                        "parent record was not saved",
                        Vec::new(),
                    )],
                });
            }
            return;
        }

        let id = state.next_id(object_type);
        let mut row: Map<String, Value> = record
            .fields()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if let Some((field, parent_id)) = parent {
            row.insert(field.to_string(), Value::String(parent_id.to_string()));
        }
        row.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        state.tables.entry(object_type.to_string()).or_default().push(row);

        entries.push(SaveResultEntry {
            reference_id,
            id: Some(id.clone()),
            errors: Vec::new(),
        });

        for relationship in record.relationships() {
            let children = record.children(&relationship);
            match self.child_relationship(object_type, &relationship) {
                Some(rel) => {
                    let child_type = rel.child_object.clone();
                    let field = rel.field.clone();
                    for child in &children {
                        let child_type = child.object_type().unwrap_or(&child_type).to_string();
                        self.save_record(state, &child_type, child, Some((field.as_str(), id.as_str())), entries);
                    }
                }
                None => {
                    for child in &children {
                        entries.push(SaveResultEntry {
                            reference_id: child
                                .reference_id()
                                .map(|token| token.trim_start_matches('@').to_string()),
                            id: None,
                            errors: vec![SaveError::new(
                                "INVALID_FIELD",
                                format!("No such relationship '{relationship}' on {object_type}"),
                                vec![relationship.clone()],
                            )],
                        });
                    }
                }
            }
        }
    }

    fn validate(&self, state: &State, record: &Record, reference_id: Option<&str>) -> Option<SaveError> {
        if let Some(error) = reference_id.and_then(|reference| state.rejections.get(reference)) {
            return Some(error.clone());
        }
        record
            .fields()
            .find(|(_, value)| is_unresolved_ref(value))
            .map(|(field, value)| {
                SaveError::new(
                    "INVALID_FIELD",
                    format!(
                        "invalid cross reference id '{}'",
                        value.as_str().unwrap_or_default()
                    ),
                    vec![field.clone()],
                )
            })
    }
}

impl State {
    fn next_id(&mut self, object_type: &str) -> String {
        let known = self.counters.len();
        let prefix = self
            .key_prefixes
            .entry(object_type.to_string())
            .or_insert_with(|| format!("a{known:02}"))
            .clone();
        let counter = self.counters.entry(object_type.to_string()).or_insert(0);
        *counter += 1;
        format!("{prefix}xx{:010}", *counter)
    }
}

#[async_trait]
impl TreeStore for MemoryStore {
    async fn save_tree(&self, object_type: &str, records: &[Record]) -> Result<SaveResponse> {
        let mut state = self.lock();
        state.save_calls.push((object_type.to_string(), records.len()));
        Ok(self.save_batch(&mut state, object_type, records))
    }
}

#[async_trait]
impl QueryStore for MemoryStore {
    async fn query(&self, query: &str) -> Result<Vec<Record>> {
        let shape = QueryShape::parse(query)?;
        if !shape.children.is_empty() {
            return Err(Error::Unsupported(
                "memory store does not evaluate sub-selects".to_string(),
            ));
        }
        let filter = Filter::parse(shape.clause.as_deref())?;

        let state = self.lock();
        let rows = state
            .tables
            .get(&shape.object_type)
            .map(Vec::as_slice)
            .unwrap_or_default();

        Ok(rows
            .iter()
            .filter(|row| filter.matches(row))
            .map(|row| {
                let mut record = Record::new();
                record.set_object_type(&shape.object_type);
                for field in &shape.fields {
                    record.insert(field.clone(), row.get(field).cloned().unwrap_or(Value::Null));
                }
                record
            })
            .collect())
    }

    async fn describe(&self, object_type: &str) -> Result<ObjectDescribe> {
        Ok(ObjectDescribe {
            name: object_type.to_string(),
            child_relationships: self
                .relationships
                .get(object_type)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl BulkIngest for MemoryStore {
    async fn submit(&self, object_type: &str, records: &[Record]) -> Result<String> {
        let mut state = self.lock();
        let job_id = format!("750xx{:010}", state.jobs.len() + 1);
        state.jobs.insert(
            job_id.clone(),
            Job {
                object_type: object_type.to_string(),
                records: records.to_vec(),
                polls_left: self.bulk_polls,
                response: None,
            },
        );
        Ok(job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::Other(format!("unknown job '{job_id}'")))?;

        if job.response.is_none() {
            job.polls_left = job.polls_left.saturating_sub(1);
            if job.polls_left == 0 {
                let object_type = job.object_type.clone();
                let records = std::mem::take(&mut job.records);
                let response = self.save_batch(state, &object_type, &records);
                if let Some(job) = state.jobs.get_mut(job_id) {
                    job.response = Some(response);
                }
            }
        }

        let job = state
            .jobs
            .get(job_id)
            .ok_or_else(|| Error::Other(format!("unknown job '{job_id}'")))?;
        Ok(match &job.response {
            Some(response) => JobStatus {
                id: job_id.to_string(),
                state: JobState::JobComplete,
                records_processed: response.results.len() as u64,
                records_failed: response.results.iter().filter(|entry| entry.is_failure()).count()
                    as u64,
                error_message: None,
            },
            None => JobStatus {
                id: job_id.to_string(),
                state: JobState::InProgress,
                records_processed: 0,
                records_failed: 0,
                error_message: None,
            },
        })
    }

    async fn fetch_results(&self, job_id: &str) -> Result<SaveResponse> {
        let state = self.lock();
        state
            .jobs
            .get(job_id)
            .and_then(|job| job.response.clone())
            .ok_or_else(|| Error::Other(format!("job '{job_id}' has no results yet")))
    }
}

/// The filters the exporter emits: `WHERE f IN (...)` and `WHERE f = '...'`.
#[derive(Debug)]
enum Filter {
    All,
    In { field: String, values: Vec<String> },
}

impl Filter {
    fn parse(clause: Option<&str>) -> Result<Self> {
        let Some(clause) = clause.map(str::trim).filter(|clause| !clause.is_empty()) else {
            return Ok(Filter::All);
        };
        let in_re = Regex::new(r"(?is)^where\s+(\w+)\s+in\s*\((.*)\)$")
            .map_err(|err| Error::Other(err.to_string()))?;
        let eq_re = Regex::new(r"(?is)^where\s+(\w+)\s*=\s*('(?:[^'\\]|\\.)*')$")
            .map_err(|err| Error::Other(err.to_string()))?;

        if let Some(caps) = in_re.captures(clause) {
            return Ok(Filter::In {
                field: caps[1].to_string(),
                values: split_quoted(&caps[2]),
            });
        }
        if let Some(caps) = eq_re.captures(clause) {
            return Ok(Filter::In {
                field: caps[1].to_string(),
                values: split_quoted(&caps[2]),
            });
        }
        Err(Error::Unsupported(format!(
            "memory store cannot evaluate '{clause}'"
        )))
    }

    fn matches(&self, row: &Map<String, Value>) -> bool {
        match self {
            Filter::All => true,
            Filter::In { field, values } => row
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|value| values.iter().any(|candidate| candidate == value)),
        }
    }
}

fn split_quoted(list: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = list.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if quoted => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '\'' if quoted => {
                quoted = false;
                values.push(std::mem::take(&mut current));
            }
            '\'' => quoted = true,
            _ if quoted => current.push(ch),
            _ => {}
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).expect("object")
    }

    #[tokio::test]
    async fn saves_nested_children_with_parent_ids() {
        let store = MemoryStore::new()
            .with_key_prefix("Account", "001")
            .with_relationship("Account", "Contacts", "Contact", "AccountId");

        let response = store
            .save_tree(
                "Account",
                &[record(json!({
                    "attributes": {"type": "Account", "referenceId": "AccountRef1"},
                    "Name": "Acme",
                    "Contacts": {"records": [
                        {"attributes": {"type": "Contact", "referenceId": "ContactRef1"}, "LastName": "Doe"}
                    ]}
                }))],
            )
            .await
            .expect("save");

        assert!(!response.has_errors);
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].id.as_deref(), Some("001xx0000000001"));

        let contacts = store.records("Contact");
        assert_eq!(contacts[0].get("AccountId"), Some(&json!("001xx0000000001")));
    }

    #[tokio::test]
    async fn literal_tokens_and_injected_rejections_fail_per_record() {
        let store = MemoryStore::new().with_response_style(ResponseStyle::ErrorsOnly);
        store.reject("@AccountRef2", SaveError::new("DUPLICATE_VALUE", "dup", vec!["Name".into()]));

        let response = store
            .save_tree(
                "Account",
                &[
                    record(json!({"referenceId": "@AccountRef1", "Name": "ok"})),
                    record(json!({"referenceId": "@AccountRef2", "Name": "dup"})),
                    record(json!({"referenceId": "@AccountRef3", "ParentId": "@AccountRef9"})),
                ],
            )
            .await
            .expect("save");

        assert!(response.has_errors);
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].errors[0].status_code, "DUPLICATE_VALUE");
        assert_eq!(response.results[1].errors[0].fields, vec!["ParentId".to_string()]);
        assert_eq!(store.records("Account").len(), 1);
    }

    #[tokio::test]
    async fn query_filters_by_in_list() {
        let store = MemoryStore::new();
        let first = store.insert_existing("Account", record(json!({"Name": "a"})));
        store.insert_existing("Account", record(json!({"Name": "b"})));

        let rows = store
            .query(&format!("SELECT Id, Name FROM Account WHERE Id IN ('{first}')"))
            .await
            .expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Name"), Some(&json!("a")));
        assert_eq!(rows[0].object_type(), Some("Account"));

        let err = store
            .query("SELECT Id FROM Account WHERE Name LIKE 'a%'")
            .await
            .expect_err("unsupported filter");
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[tokio::test]
    async fn bulk_jobs_complete_after_configured_polls() {
        let store = MemoryStore::new().with_bulk_polls(2);
        let job = store
            .submit("Account", &[record(json!({"referenceId": "AccountRef1", "Name": "a"}))])
            .await
            .expect("submit");

        assert_eq!(store.poll(&job).await.unwrap().state, JobState::InProgress);
        assert!(store.fetch_results(&job).await.is_err());
        assert_eq!(store.poll(&job).await.unwrap().state, JobState::JobComplete);
        let response = store.fetch_results(&job).await.expect("results");
        assert_eq!(response.results[0].reference_id.as_deref(), Some("AccountRef1"));
    }
}
