use serde::{Deserialize, Serialize};

use crate::outcome::{GroupOutcome, RecordOutcome, SaveError};

/// A record the store accepted, with its token and the identifier it received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRecord {
    pub reference_id: String,
    #[serde(rename = "type")]
    pub object_type: String,
    pub id: String,
}

/// A record the store rejected, with every error it reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFailure {
    pub reference_id: String,
    #[serde(rename = "type")]
    pub object_type: String,
    pub errors: Vec<SaveError>,
}

impl RecordFailure {
    /// One line per reported error.
    pub fn messages(&self) -> Vec<String> {
        if self.errors.is_empty() {
            return vec![format!(
                "{} ({}): record failed without detail",
                self.reference_id, self.object_type
            )];
        }
        self.errors
            .iter()
            .map(|error| {
                let fields = if error.fields.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", error.fields.join(", "))
                };
                format!(
                    "{} ({}): {}: {}{}",
                    self.reference_id, self.object_type, error.status_code, error.message, fields
                )
            })
            .collect()
    }
}

/// Aggregated outcome of an import across every object group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub records: Vec<ResolvedRecord>,
    pub failures: Vec<RecordFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unconfirmed: Vec<String>,
    pub object_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ImportResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold group outcomes, keeping first-seen group order.
    pub fn aggregate<'a>(groups: impl IntoIterator<Item = &'a GroupOutcome>) -> Self {
        let mut result = Self::new();
        for group in groups {
            result.absorb(group);
        }
        result
    }

    /// Append one group's outcomes.
    pub fn absorb(&mut self, group: &GroupOutcome) {
        self.note_type(&group.object_type);
        for outcome in &group.outcomes {
            self.note_type(outcome.object_type());
            match outcome {
                RecordOutcome::Success {
                    reference_id,
                    object_type,
                    id,
                } => self.records.push(ResolvedRecord {
                    reference_id: reference_id.clone(),
                    object_type: object_type.clone(),
                    id: id.clone(),
                }),
                RecordOutcome::Failure {
                    reference_id,
                    object_type,
                    errors,
                } => self.failures.push(RecordFailure {
                    reference_id: reference_id.clone(),
                    object_type: object_type.clone(),
                    errors: errors.clone(),
                }),
                RecordOutcome::Unconfirmed { reference_id, .. } => {
                    self.unconfirmed.push(reference_id.clone())
                }
            }
        }
        self.warnings.extend(group.warnings.iter().cloned());
    }

    /// Combine two results, `self` first.
    pub fn merge(mut self, other: ImportResult) -> ImportResult {
        self.records.extend(other.records);
        self.failures.extend(other.failures);
        self.unconfirmed.extend(other.unconfirmed);
        self.warnings.extend(other.warnings);
        for object_type in &other.object_types {
            self.note_type(object_type);
        }
        self
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Human-readable error lines, in failure order.
    pub fn errors(&self) -> Vec<String> {
        self.failures
            .iter()
            .flat_map(RecordFailure::messages)
            .collect()
    }

    pub fn object_types(&self) -> &[String] {
        &self.object_types
    }

    fn note_type(&mut self, object_type: &str) {
        if !object_type.is_empty() && !self.object_types.iter().any(|seen| seen == object_type) {
            self.object_types.push(object_type.to_string());
        }
    }
}

/// Exported record count for one object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeCount {
    #[serde(rename = "type")]
    pub object_type: String,
    pub records: usize,
}

/// Per-type record counts of an export, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub counts: Vec<TypeCount>,
}

impl ExportSummary {
    pub fn record(&mut self, object_type: &str, records: usize) {
        match self
            .counts
            .iter_mut()
            .find(|count| count.object_type == object_type)
        {
            Some(count) => count.records += records,
            None => self.counts.push(TypeCount {
                object_type: object_type.to_string(),
                records,
            }),
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().map(|count| count.records).sum()
    }

    pub fn object_types(&self) -> Vec<&str> {
        self.counts
            .iter()
            .map(|count| count.object_type.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(object_type: &str, outcomes: Vec<RecordOutcome>) -> GroupOutcome {
        GroupOutcome {
            object_type: object_type.to_string(),
            outcomes,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn aggregates_in_group_order_without_touching_inputs() {
        let accounts = group(
            "Account",
            vec![RecordOutcome::Success {
                reference_id: "@AccountRef1".into(),
                object_type: "Account".into(),
                id: "001A".into(),
            }],
        );
        let contacts = group(
            "Contact",
            vec![RecordOutcome::Failure {
                reference_id: "@ContactRef1".into(),
                object_type: "Contact".into(),
                errors: vec![SaveError::new(
                    "INVALID_FIELD",
                    "bad lookup",
                    vec!["AccountId".into()],
                )],
            }],
        );
        let snapshot = contacts.clone();

        let result = ImportResult::aggregate([&accounts, &contacts]);
        assert_eq!(contacts, snapshot);
        assert!(!result.is_success());
        assert_eq!(result.object_types(), ["Account".to_string(), "Contact".to_string()]);
        assert_eq!(result.records.len(), 1);
        assert_eq!(
            result.errors(),
            vec!["@ContactRef1 (Contact): INVALID_FIELD: bad lookup [AccountId]".to_string()]
        );
    }

    #[test]
    fn merge_keeps_distinct_types() {
        let first = ImportResult::aggregate([&group("Account", Vec::new())]);
        let second = ImportResult::aggregate([&group("Account", Vec::new()), &group("Case", Vec::new())]);
        let merged = first.merge(second);
        assert_eq!(merged.object_types, vec!["Account".to_string(), "Case".to_string()]);
        assert!(merged.is_success());
    }

    #[test]
    fn export_summary_folds_counts() {
        let mut summary = ExportSummary::default();
        summary.record("Account", 2);
        summary.record("Contact", 4);
        summary.record("Account", 1);
        assert_eq!(summary.total(), 7);
        assert_eq!(summary.object_types(), vec!["Account", "Contact"]);
        assert_eq!(summary.counts[0].records, 3);
    }
}
