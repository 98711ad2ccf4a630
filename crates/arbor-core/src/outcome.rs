use serde::{Deserialize, Serialize};

use crate::reference::is_token;

/// Field-level error reported by the store for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveError {
    pub status_code: String,
    pub message: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl SaveError {
    pub fn new(status_code: impl Into<String>, message: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            status_code: status_code.into(),
            message: message.into(),
            fields,
        }
    }
}

/// One entry of a tree save response: either an assigned id or a list of errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResultEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<SaveError>,
}

impl SaveResultEntry {
    pub fn success(reference_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            reference_id: Some(reference_id.into()),
            id: Some(id.into()),
            errors: Vec::new(),
        }
    }

    pub fn failure(reference_id: impl Into<String>, errors: Vec<SaveError>) -> Self {
        Self {
            reference_id: Some(reference_id.into()),
            id: None,
            errors,
        }
    }

    pub fn is_failure(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Structured answer of one tree save call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResponse {
    pub has_errors: bool,
    #[serde(default)]
    pub results: Vec<SaveResultEntry>,
}

/// Per-record outcome after correlating a response with the submitted records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordOutcome {
    Success {
        reference_id: String,
        object_type: String,
        id: String,
    },
    Failure {
        reference_id: String,
        object_type: String,
        errors: Vec<SaveError>,
    },
    /// Not listed as failed, but the response carried no identifier for it.
    Unconfirmed {
        reference_id: String,
        object_type: String,
    },
}

impl RecordOutcome {
    pub fn reference_id(&self) -> &str {
        match self {
            RecordOutcome::Success { reference_id, .. }
            | RecordOutcome::Failure { reference_id, .. }
            | RecordOutcome::Unconfirmed { reference_id, .. } => reference_id,
        }
    }

    pub fn object_type(&self) -> &str {
        match self {
            RecordOutcome::Success { object_type, .. }
            | RecordOutcome::Failure { object_type, .. }
            | RecordOutcome::Unconfirmed { object_type, .. } => object_type,
        }
    }
}

/// Outcomes of one object group's save, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOutcome {
    pub object_type: String,
    pub outcomes: Vec<RecordOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl GroupOutcome {
    pub fn new(object_type: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            outcomes: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| matches!(outcome, RecordOutcome::Failure { .. }))
    }

    /// `(token, id)` pairs of every record saved successfully.
    ///
    /// Records labelled `Type#n` for lack of a reference id are skipped.
    pub fn assigned_ids(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            RecordOutcome::Success {
                reference_id, id, ..
            } if is_token(reference_id) => Some((reference_id.as_str(), id.as_str())),
            _ => None,
        })
    }
}
