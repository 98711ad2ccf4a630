use std::sync::Arc;

use arbor_core::{
    GroupOutcome, Record, RecordOutcome, SaveError, SaveResponse, TreeStore,
    normalize_reference_id,
};
use async_trait::async_trait;
use tracing::warn;

use crate::errors::ImportError;

/// Saves the records of one object group and returns the store's answer.
#[async_trait]
pub trait GroupSaver: Send + Sync {
    async fn save_group(
        &self,
        object_type: &str,
        records: &[Record],
    ) -> Result<SaveResponse, ImportError>;
}

#[async_trait]
impl<T: GroupSaver + ?Sized> GroupSaver for Box<T> {
    async fn save_group(
        &self,
        object_type: &str,
        records: &[Record],
    ) -> Result<SaveResponse, ImportError> {
        (**self).save_group(object_type, records).await
    }
}

#[async_trait]
impl<T: GroupSaver + ?Sized> GroupSaver for Arc<T> {
    async fn save_group(
        &self,
        object_type: &str,
        records: &[Record],
    ) -> Result<SaveResponse, ImportError> {
        (**self).save_group(object_type, records).await
    }
}

/// Saves a group with one composite tree call.
#[derive(Debug, Clone)]
pub struct TreeSaver<S> {
    store: S,
}

impl<S: TreeStore> TreeSaver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: TreeStore> GroupSaver for TreeSaver<S> {
    async fn save_group(
        &self,
        object_type: &str,
        records: &[Record],
    ) -> Result<SaveResponse, ImportError> {
        self.store
            .save_tree(object_type, records)
            .await
            .map_err(|source| ImportError::Save {
                object_type: object_type.to_string(),
                source,
            })
    }
}

struct Submitted {
    reference_id: Option<String>,
    object_type: String,
}

enum Slot {
    Saved(String),
    Rejected(Vec<SaveError>),
}

/// Match a save response against the records that produced it.
///
/// Error entries always mark their record failed. Success entries are matched
/// by reference id; entries without one fill the remaining records in request
/// order, nested children depth-first. Records left over are unconfirmed.
pub fn correlate(object_type: &str, records: &[Record], response: SaveResponse) -> GroupOutcome {
    let submitted = submitted_records(object_type, records);
    let mut slots: Vec<Option<Slot>> = submitted.iter().map(|_| None).collect();
    let mut outcome = GroupOutcome::new(object_type);
    let mut anonymous_ids = Vec::new();
    let mut stray_failures = Vec::new();

    for entry in response.results {
        let token = entry.reference_id.as_deref().map(normalize_reference_id);
        let position = token.as_deref().and_then(|token| {
            submitted.iter().enumerate().position(|(idx, record)| {
                slots[idx].is_none() && record.reference_id.as_deref() == Some(token)
            })
        });

        if entry.is_failure() {
            match position {
                Some(idx) => slots[idx] = Some(Slot::Rejected(entry.errors)),
                None => stray_failures.push(RecordOutcome::Failure {
                    reference_id: token.unwrap_or_else(|| "<unknown>".to_string()),
                    object_type: object_type.to_string(),
                    errors: entry.errors,
                }),
            }
            continue;
        }

        let Some(id) = entry.id else {
            continue;
        };
        match (position, token) {
            (Some(idx), _) => slots[idx] = Some(Slot::Saved(id)),
            (None, None) => anonymous_ids.push(id),
            (None, Some(token)) => {
                warn!(object_type, reference_id = %token, "response names an unknown record");
                outcome
                    .warnings
                    .push(format!("{object_type}: response names unknown record {token}"));
            }
        }
    }

    let mut anonymous_ids = anonymous_ids.into_iter();
    for slot in slots.iter_mut().filter(|slot| slot.is_none()) {
        match anonymous_ids.next() {
            Some(id) => *slot = Some(Slot::Saved(id)),
            None => break,
        }
    }

    for (idx, (record, slot)) in submitted.into_iter().zip(slots).enumerate() {
        let reference_id = record
            .reference_id
            .unwrap_or_else(|| format!("{}#{}", record.object_type, idx + 1));
        let object_type = record.object_type;
        outcome.outcomes.push(match slot {
            Some(Slot::Saved(id)) => RecordOutcome::Success {
                reference_id,
                object_type,
                id,
            },
            Some(Slot::Rejected(errors)) => RecordOutcome::Failure {
                reference_id,
                object_type,
                errors,
            },
            None => {
                warn!(object_type = %object_type, reference_id = %reference_id, "save not confirmed");
                outcome.warnings.push(format!(
                    "{reference_id} ({object_type}): store returned no identifier"
                ));
                RecordOutcome::Unconfirmed {
                    reference_id,
                    object_type,
                }
            }
        });
    }
    outcome.outcomes.extend(stray_failures);
    outcome
}

/// Outcomes of a response taken at face value, when the submitted records are unknown.
pub fn summarize_response(object_type: &str, response: SaveResponse) -> GroupOutcome {
    let mut outcome = GroupOutcome::new(object_type);
    for (idx, entry) in response.results.into_iter().enumerate() {
        let reference_id = entry
            .reference_id
            .as_deref()
            .map(normalize_reference_id)
            .unwrap_or_else(|| format!("{object_type}#{}", idx + 1));
        let object_type = object_type.to_string();
        let record = if entry.is_failure() {
            RecordOutcome::Failure {
                reference_id,
                object_type,
                errors: entry.errors,
            }
        } else if let Some(id) = entry.id {
            RecordOutcome::Success {
                reference_id,
                object_type,
                id,
            }
        } else {
            RecordOutcome::Unconfirmed {
                reference_id,
                object_type,
            }
        };
        outcome.outcomes.push(record);
    }
    outcome
}

fn submitted_records(object_type: &str, records: &[Record]) -> Vec<Submitted> {
    let mut submitted = Vec::new();
    for record in records {
        submitted.push(Submitted {
            reference_id: record.reference_id(),
            object_type: record.object_type().unwrap_or(object_type).to_string(),
        });
        for nested in record.descendants() {
            submitted.push(Submitted {
                reference_id: nested.record.reference_id(),
                object_type: nested
                    .record
                    .object_type()
                    .unwrap_or(&nested.relationship)
                    .to_string(),
            });
        }
    }
    submitted
}
