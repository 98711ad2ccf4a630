use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::outcome::SaveResponse;
use crate::record::Record;

/// Composite tree-create primitive of the remote store.
///
/// One call either returns a structured per-record response or fails as a whole.
#[async_trait]
pub trait TreeStore: Send + Sync {
    async fn save_tree(&self, object_type: &str, records: &[Record]) -> Result<SaveResponse>;
}

/// Query and schema-discovery primitive of the remote store.
#[async_trait]
pub trait QueryStore: Send + Sync {
    /// Run a query and return every record, pagination included.
    async fn query(&self, query: &str) -> Result<Vec<Record>>;

    /// Describe an object type's child relationships.
    async fn describe(&self, object_type: &str) -> Result<ObjectDescribe>;
}

/// Asynchronous bulk-ingest jobs.
#[async_trait]
pub trait BulkIngest: Send + Sync {
    /// Create a job for `records` and return its identifier.
    async fn submit(&self, object_type: &str, records: &[Record]) -> Result<String>;

    async fn poll(&self, job_id: &str) -> Result<JobStatus>;

    /// Per-record outcomes of a finished job.
    async fn fetch_results(&self, job_id: &str) -> Result<SaveResponse>;
}

#[async_trait]
impl<T: TreeStore + ?Sized> TreeStore for &T {
    async fn save_tree(&self, object_type: &str, records: &[Record]) -> Result<SaveResponse> {
        (**self).save_tree(object_type, records).await
    }
}

#[async_trait]
impl<T: TreeStore + ?Sized> TreeStore for Arc<T> {
    async fn save_tree(&self, object_type: &str, records: &[Record]) -> Result<SaveResponse> {
        (**self).save_tree(object_type, records).await
    }
}

#[async_trait]
impl<T: QueryStore + ?Sized> QueryStore for &T {
    async fn query(&self, query: &str) -> Result<Vec<Record>> {
        (**self).query(query).await
    }

    async fn describe(&self, object_type: &str) -> Result<ObjectDescribe> {
        (**self).describe(object_type).await
    }
}

#[async_trait]
impl<T: QueryStore + ?Sized> QueryStore for Arc<T> {
    async fn query(&self, query: &str) -> Result<Vec<Record>> {
        (**self).query(query).await
    }

    async fn describe(&self, object_type: &str) -> Result<ObjectDescribe> {
        (**self).describe(object_type).await
    }
}

#[async_trait]
impl<T: BulkIngest + ?Sized> BulkIngest for &T {
    async fn submit(&self, object_type: &str, records: &[Record]) -> Result<String> {
        (**self).submit(object_type, records).await
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus> {
        (**self).poll(job_id).await
    }

    async fn fetch_results(&self, job_id: &str) -> Result<SaveResponse> {
        (**self).fetch_results(job_id).await
    }
}

#[async_trait]
impl<T: BulkIngest + ?Sized> BulkIngest for Arc<T> {
    async fn submit(&self, object_type: &str, records: &[Record]) -> Result<String> {
        (**self).submit(object_type, records).await
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus> {
        (**self).poll(job_id).await
    }

    async fn fetch_results(&self, job_id: &str) -> Result<SaveResponse> {
        (**self).fetch_results(job_id).await
    }
}

/// Relationship metadata for one object type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDescribe {
    pub name: String,
    #[serde(default)]
    pub child_relationships: Vec<ChildRelationship>,
}

impl ObjectDescribe {
    /// Look up a child relationship by name, ignoring ASCII case.
    pub fn child_relationship(&self, name: &str) -> Option<&ChildRelationship> {
        self.child_relationships.iter().find(|rel| {
            rel.relationship_name
                .as_deref()
                .is_some_and(|rel_name| rel_name.eq_ignore_ascii_case(name))
        })
    }
}

/// A child object type pointing at its parent through `field`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRelationship {
    #[serde(rename = "relationshipName", default)]
    pub relationship_name: Option<String>,
    #[serde(rename = "childSObject")]
    pub child_object: String,
    pub field: String,
}

/// Lifecycle state of a bulk job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Open,
    UploadComplete,
    InProgress,
    JobComplete,
    Failed,
    Aborted,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::JobComplete | JobState::Failed | JobState::Aborted)
    }
}

/// Polled status of a bulk job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: String,
    pub state: JobState,
    #[serde(default)]
    pub records_processed: u64,
    #[serde(default)]
    pub records_failed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn describe_parses_remote_shape() {
        let describe: ObjectDescribe = serde_json::from_value(json!({
            "name": "Account",
            "childRelationships": [
                {"relationshipName": "Contacts", "childSObject": "Contact", "field": "AccountId"},
                {"relationshipName": null, "childSObject": "AccountHistory", "field": "AccountId"}
            ]
        }))
        .expect("parse describe");

        let contacts = describe.child_relationship("contacts").expect("relationship");
        assert_eq!(contacts.child_object, "Contact");
        assert_eq!(contacts.field, "AccountId");
        assert!(describe.child_relationship("Histories").is_none());
    }
}
