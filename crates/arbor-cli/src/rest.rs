//! HTTP client for the remote object store's REST API.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use arbor_core::{
    BulkIngest, Error, JobState, JobStatus, ObjectDescribe, QueryStore, REFERENCE_ID_KEY, Record,
    Result, SaveError, SaveResponse, SaveResultEntry, TreeStore,
};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

const BULK_ID_COLUMN: &str = "sf__Id";
const BULK_ERROR_COLUMN: &str = "sf__Error";

/// Tree, query and bulk primitives over the REST API.
pub struct RestClient {
    instance_url: String,
    api_version: String,
    access_token: String,
    client: reqwest::Client,
    /// Records of bulk jobs submitted by this process, for result matching.
    submitted: Mutex<HashMap<String, Vec<Record>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryPage {
    #[serde(default)]
    records: Vec<Record>,
    #[serde(default)]
    next_records_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMessage {
    message: String,
    #[serde(default)]
    error_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestJob {
    id: String,
    state: JobState,
    #[serde(default)]
    number_records_processed: u64,
    #[serde(default)]
    number_records_failed: u64,
    #[serde(default)]
    error_message: Option<String>,
}

impl RestClient {
    pub fn new(
        instance_url: impl Into<String>,
        api_version: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            instance_url: instance_url.into().trim_end_matches('/').to_string(),
            api_version: api_version.into(),
            access_token: access_token.into(),
            client: reqwest::Client::new(),
            submitted: Mutex::new(HashMap::new()),
        }
    }

    fn data_url(&self, path: &str) -> String {
        format!(
            "{}/services/data/v{}{}",
            self.instance_url, self.api_version, path
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.access_token)
    }

    async fn send(&self, request: RequestBuilder) -> Result<(StatusCode, String)> {
        let response = request
            .send()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;
        Ok((status, body))
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let (status, body) = self.send(self.request(Method::GET, url)).await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        Ok(body)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_text(url).await?;
        parse_body(&body)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        payload: &Value,
    ) -> Result<T> {
        let (status, body) = self.send(self.request(method, url).json(payload)).await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        parse_body(&body)
    }

    async fn bulk_results(&self, job_id: &str, kind: &str) -> Result<Vec<HashMap<String, String>>> {
        let body = self
            .get_text(&self.data_url(&format!("/jobs/ingest/{job_id}/{kind}/")))
            .await?;
        let mut reader = csv::Reader::from_reader(body.as_bytes());
        let headers = reader.headers().map_err(csv_error)?.clone();
        let mut rows = Vec::new();
        for row in reader.records() {
            let row = row.map_err(csv_error)?;
            rows.push(
                headers
                    .iter()
                    .zip(row.iter())
                    .map(|(header, value)| (header.to_string(), value.to_string()))
                    .collect(),
            );
        }
        Ok(rows)
    }
}

/// Body of a composite tree call.
///
/// The endpoint only reads `attributes.referenceId` and rejects unknown
/// fields, so a top-level `referenceId` is moved there at every depth.
fn tree_request_body(records: &[Record]) -> Value {
    let records: Vec<Record> = records.iter().map(tree_record).collect();
    json!({ "records": records })
}

fn tree_record(record: &Record) -> Record {
    let mut out = record.clone();
    if let Some(token) = out.reference_id() {
        out.remove(REFERENCE_ID_KEY);
        out.set_reference_id(&token);
    }
    for relationship in out.relationships() {
        let children = out.children(&relationship).iter().map(tree_record).collect();
        out.set_children(&relationship, children);
    }
    out
}

#[async_trait]
impl TreeStore for RestClient {
    async fn save_tree(&self, object_type: &str, records: &[Record]) -> Result<SaveResponse> {
        let url = self.data_url(&format!("/composite/tree/{object_type}"));
        debug!(object_type, records = records.len(), "posting record tree");
        let request = self
            .request(Method::POST, &url)
            .json(&tree_request_body(records));
        let (status, body) = self.send(request).await?;

        match serde_json::from_str::<SaveResponse>(&body) {
            Ok(response) => Ok(response),
            Err(_) if !status.is_success() => Err(api_error(status, &body)),
            Err(err) => Err(Error::Other(format!("unexpected tree response: {err}"))),
        }
    }
}

#[async_trait]
impl QueryStore for RestClient {
    async fn query(&self, query: &str) -> Result<Vec<Record>> {
        let url = reqwest::Url::parse_with_params(&self.data_url("/query"), &[("q", query)])
            .map_err(|err| Error::Other(err.to_string()))?;
        let mut page: QueryPage = self.get_json(url.as_str()).await?;
        let mut records = std::mem::take(&mut page.records);

        while let Some(next) = page.next_records_url.take() {
            page = self
                .get_json(&format!("{}{}", self.instance_url, next))
                .await?;
            records.append(&mut page.records);
        }
        Ok(records)
    }

    async fn describe(&self, object_type: &str) -> Result<ObjectDescribe> {
        self.get_json(&self.data_url(&format!("/sobjects/{object_type}/describe")))
            .await
    }
}

#[async_trait]
impl BulkIngest for RestClient {
    async fn submit(&self, object_type: &str, records: &[Record]) -> Result<String> {
        let job: IngestJob = self
            .send_json(
                Method::POST,
                &self.data_url("/jobs/ingest"),
                &json!({
                    "object": object_type,
                    "operation": "insert",
                    "contentType": "CSV",
                    "lineEnding": "LF",
                }),
            )
            .await?;

        let upload = self
            .request(
                Method::PUT,
                &self.data_url(&format!("/jobs/ingest/{}/batches", job.id)),
            )
            .header(reqwest::header::CONTENT_TYPE, "text/csv")
            .body(records_to_csv(records)?);
        let (status, body) = self.send(upload).await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        let _: IngestJob = self
            .send_json(
                Method::PATCH,
                &self.data_url(&format!("/jobs/ingest/{}", job.id)),
                &json!({ "state": "UploadComplete" }),
            )
            .await?;

        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.id.clone(), records.to_vec());
        Ok(job.id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus> {
        let job: IngestJob = self
            .get_json(&self.data_url(&format!("/jobs/ingest/{job_id}")))
            .await?;
        Ok(JobStatus {
            id: job.id,
            state: job.state,
            records_processed: job.number_records_processed,
            records_failed: job.number_records_failed,
            error_message: job.error_message,
        })
    }

    async fn fetch_results(&self, job_id: &str) -> Result<SaveResponse> {
        let successes = self.bulk_results(job_id, "successfulResults").await?;
        let failures = self.bulk_results(job_id, "failedResults").await?;
        let submitted = self
            .submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id)
            .unwrap_or_default();
        let mut claimed = vec![false; submitted.len()];

        let mut results = Vec::with_capacity(successes.len() + failures.len());
        for row in &successes {
            results.push(SaveResultEntry {
                reference_id: claim_submitted(&submitted, &mut claimed, row),
                id: row.get(BULK_ID_COLUMN).filter(|id| !id.is_empty()).cloned(),
                errors: Vec::new(),
            });
        }
        for row in &failures {
            let raw = row.get(BULK_ERROR_COLUMN).map(String::as_str).unwrap_or_default();
            results.push(SaveResultEntry {
                reference_id: claim_submitted(&submitted, &mut claimed, row),
                id: None,
                errors: vec![parse_bulk_error(raw)],
            });
        }

        Ok(SaveResponse {
            has_errors: !failures.is_empty(),
            results,
        })
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|err| Error::Other(format!("unexpected response: {err}")))
}

fn api_error(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<Vec<ApiMessage>>(body)
        .ok()
        .and_then(|messages| messages.into_iter().next())
        .map(|message| format!("{}: {}", message.error_code, message.message))
        .unwrap_or_else(|| body.trim().to_string());
    Error::Api {
        status: status.as_u16(),
        message,
    }
}

fn csv_error(err: csv::Error) -> Error {
    Error::Other(format!("invalid csv: {err}"))
}

fn records_to_csv(records: &[Record]) -> Result<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for (field, _) in record.fields() {
            if !columns.contains(field) {
                columns.push(field.clone());
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&columns).map_err(csv_error)?;
    for record in records {
        writer
            .write_record(columns.iter().map(|column| cell(record.get(column))))
            .map_err(csv_error)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| Error::Other(err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| Error::Other(err.to_string()))
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

/// Reference id of the first unclaimed submitted record whose fields match `row`.
fn claim_submitted(
    submitted: &[Record],
    claimed: &mut [bool],
    row: &HashMap<String, String>,
) -> Option<String> {
    let idx = submitted.iter().enumerate().position(|(idx, record)| {
        !claimed[idx]
            && row
                .iter()
                .filter(|(column, _)| !column.starts_with("sf__"))
                .all(|(column, value)| cell(record.get(column)) == *value)
    })?;
    claimed[idx] = true;
    submitted[idx].reference_id()
}

/// `CODE:message[:fields]` as written in a failed-results row.
fn parse_bulk_error(raw: &str) -> SaveError {
    match raw.split_once(':') {
        Some((code, rest)) if !code.is_empty() && !code.contains(' ') => {
            let (message, fields) = match rest.rsplit_once(':') {
                Some((message, fields)) if !fields.contains(' ') || fields.trim().ends_with("--") => (
                    message,
                    fields
                        .trim()
                        .trim_end_matches("--")
                        .split(',')
                        .map(str::trim)
                        .filter(|field| !field.is_empty())
                        .map(str::to_string)
                        .collect(),
                ),
                _ => (rest, Vec::new()),
            };
            SaveError::new(code, message.trim(), fields)
        }
        _ => SaveError::new("UNKNOWN_EXCEPTION", raw.trim(), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: Value) -> Record {
        Record::from_value(value).expect("object")
    }

    #[test]
    fn tree_body_moves_reference_ids_into_attributes() {
        let body = tree_request_body(&[record(json!({
            "referenceId": "@AccountRef1",
            "attributes": {"type": "Account"},
            "Name": "Acme",
            "Contacts": {"records": [
                {"referenceId": "@ContactRef1", "attributes": {"type": "Contact"}, "LastName": "Doe"}
            ]}
        }))]);

        let account = &body["records"][0];
        assert_eq!(account["attributes"]["referenceId"], json!("AccountRef1"));
        assert_eq!(account["attributes"]["type"], json!("Account"));
        assert!(account.get("referenceId").is_none());
        assert_eq!(account["Name"], json!("Acme"));

        let contact = &account["Contacts"]["records"][0];
        assert_eq!(contact["attributes"]["referenceId"], json!("ContactRef1"));
        assert!(contact.get("referenceId").is_none());
    }

    #[test]
    fn csv_uses_the_union_of_fields() {
        let csv = records_to_csv(&[
            record(json!({"attributes": {"type": "Account", "referenceId": "AccountRef1"}, "Name": "Acme"})),
            record(json!({"Name": "Globex, Inc", "Site": null, "Zip": 20})),
        ])
        .expect("csv");
        assert_eq!(csv, "Name,Site,Zip\nAcme,,\n\"Globex, Inc\",,20\n");
    }

    #[test]
    fn result_rows_claim_matching_records_once() {
        let submitted = vec![
            record(json!({"attributes": {"referenceId": "AccountRef1"}, "Name": "Acme"})),
            record(json!({"attributes": {"referenceId": "AccountRef2"}, "Name": "Acme"})),
        ];
        let mut claimed = vec![false; 2];
        let row: HashMap<String, String> = [
            ("sf__Id".to_string(), "001A".to_string()),
            ("Name".to_string(), "Acme".to_string()),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            claim_submitted(&submitted, &mut claimed, &row).as_deref(),
            Some("@AccountRef1")
        );
        assert_eq!(
            claim_submitted(&submitted, &mut claimed, &row).as_deref(),
            Some("@AccountRef2")
        );
        assert_eq!(claim_submitted(&submitted, &mut claimed, &row), None);
    }

    #[test]
    fn bulk_errors_split_code_message_and_fields() {
        let error = parse_bulk_error("REQUIRED_FIELD_MISSING:Required fields are missing: [Name]:Name --");
        assert_eq!(error.status_code, "REQUIRED_FIELD_MISSING");
        assert_eq!(error.message, "Required fields are missing: [Name]");
        assert_eq!(error.fields, vec!["Name".to_string()]);

        let error = parse_bulk_error("something broke");
        assert_eq!(error.status_code, "UNKNOWN_EXCEPTION");
    }

    #[test]
    fn api_errors_prefer_structured_messages() {
        let err = api_error(
            StatusCode::UNAUTHORIZED,
            r#"[{"message": "Session expired or invalid", "errorCode": "INVALID_SESSION_ID"}]"#,
        );
        assert_eq!(
            err.to_string(),
            "api error (401): INVALID_SESSION_ID: Session expired or invalid"
        );
    }
}
