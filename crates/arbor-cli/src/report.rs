use std::fmt::Write as _;

use arbor_export::ExportOutput;
use arbor_import::ImportReport;
use arbor_plan::ValidationReport;
use clap::ValueEnum;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("report encoding error: {0}")]
    Encoding(String),
}

/// Output format of command results on stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Human,
    Csv,
    Json,
}

/// Anything a command prints as its result.
pub trait Report: Serialize {
    fn human(&self) -> String;
    fn csv_header(&self) -> Vec<&'static str>;
    fn csv_rows(&self) -> Vec<Vec<String>>;
}

pub fn render<R: Report>(report: &R, format: ReportFormat) -> Result<String, ReportError> {
    match format {
        ReportFormat::Human => Ok(report.human()),
        ReportFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        ReportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            writer.write_record(report.csv_header())?;
            for row in report.csv_rows() {
                writer.write_record(row)?;
            }
            let bytes = writer
                .into_inner()
                .map_err(|err| ReportError::Encoding(err.to_string()))?;
            String::from_utf8(bytes).map_err(|err| ReportError::Encoding(err.to_string()))
        }
    }
}

impl Report for ImportReport {
    fn human(&self) -> String {
        let result = &self.result;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "imported {} record(s) across {}",
            result.records.len(),
            if result.object_types().is_empty() {
                "no object types".to_string()
            } else {
                result.object_types().join(", ")
            }
        );
        if !result.failures.is_empty() {
            let _ = writeln!(out, "failures ({}):", result.failures.len());
            for line in result.errors() {
                let _ = writeln!(out, "  {line}");
            }
        }
        if !result.unconfirmed.is_empty() {
            let _ = writeln!(out, "unconfirmed ({}):", result.unconfirmed.len());
            for token in &result.unconfirmed {
                let _ = writeln!(out, "  {token}");
            }
        }
        for warning in &result.warnings {
            let _ = writeln!(out, "warning: {warning}");
        }
        out
    }

    fn csv_header(&self) -> Vec<&'static str> {
        vec!["status", "reference_id", "type", "id", "errors"]
    }

    fn csv_rows(&self) -> Vec<Vec<String>> {
        let result = &self.result;
        let mut rows: Vec<Vec<String>> = result
            .records
            .iter()
            .map(|record| {
                vec![
                    "success".to_string(),
                    record.reference_id.clone(),
                    record.object_type.clone(),
                    record.id.clone(),
                    String::new(),
                ]
            })
            .collect();
        for failure in &result.failures {
            let errors: Vec<String> = failure
                .errors
                .iter()
                .map(|error| format!("{}: {}", error.status_code, error.message))
                .collect();
            rows.push(vec![
                "failure".to_string(),
                failure.reference_id.clone(),
                failure.object_type.clone(),
                String::new(),
                errors.join("; "),
            ]);
        }
        for token in &result.unconfirmed {
            rows.push(vec![
                "unconfirmed".to_string(),
                token.clone(),
                String::new(),
                String::new(),
                String::new(),
            ]);
        }
        rows
    }
}

impl Report for ExportOutput {
    fn human(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "exported {} record(s)", self.summary.total());
        for count in &self.summary.counts {
            let _ = writeln!(out, "  {}: {}", count.object_type, count.records);
        }
        for file in &self.files {
            let _ = writeln!(out, "wrote {}", file.display());
        }
        if let Some(plan) = &self.plan_path {
            let _ = writeln!(out, "plan {}", plan.display());
        }
        for warning in &self.warnings {
            let _ = writeln!(out, "warning: {warning}");
        }
        out
    }

    fn csv_header(&self) -> Vec<&'static str> {
        vec!["type", "records"]
    }

    fn csv_rows(&self) -> Vec<Vec<String>> {
        self.summary
            .counts
            .iter()
            .map(|count| vec![count.object_type.clone(), count.records.to_string()])
            .collect()
    }
}

impl Report for ValidationReport {
    fn human(&self) -> String {
        if self.errors.is_empty() && self.warnings.is_empty() {
            return "plan is valid\n".to_string();
        }
        let mut out = String::new();
        for issue in self.errors.iter().chain(self.warnings.iter()) {
            let _ = writeln!(out, "{issue}");
        }
        out
    }

    fn csv_header(&self) -> Vec<&'static str> {
        vec!["severity", "code", "path", "message"]
    }

    fn csv_rows(&self) -> Vec<Vec<String>> {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .map(|issue| {
                vec![
                    format!("{:?}", issue.severity).to_lowercase(),
                    issue.code.clone(),
                    issue.path.clone(),
                    issue.message.clone(),
                ]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{ImportResult, RecordFailure, ReferenceMap, ResolvedRecord, SaveError};

    fn import_report() -> ImportReport {
        ImportReport {
            result: ImportResult {
                records: vec![ResolvedRecord {
                    reference_id: "@AccountRef1".to_string(),
                    object_type: "Account".to_string(),
                    id: "001A".to_string(),
                }],
                failures: vec![RecordFailure {
                    reference_id: "@ContactRef1".to_string(),
                    object_type: "Contact".to_string(),
                    errors: vec![SaveError::new(
                        "INVALID_FIELD",
                        "invalid cross reference id",
                        vec!["AccountId".to_string()],
                    )],
                }],
                unconfirmed: Vec::new(),
                object_types: vec!["Account".to_string(), "Contact".to_string()],
                warnings: vec!["Contact: unresolved reference @AccountRef9".to_string()],
            },
            references: ReferenceMap::new(),
        }
    }

    #[test]
    fn human_import_report_lists_failures_and_warnings() {
        let text = render(&import_report(), ReportFormat::Human).expect("render");
        assert!(text.starts_with("imported 1 record(s) across Account, Contact\n"));
        assert!(text.contains(
            "  @ContactRef1 (Contact): INVALID_FIELD: invalid cross reference id [AccountId]"
        ));
        assert!(text.contains("warning: Contact: unresolved reference @AccountRef9"));
    }

    #[test]
    fn csv_import_report_has_one_row_per_record() {
        let text = render(&import_report(), ReportFormat::Csv).expect("render");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "status,reference_id,type,id,errors");
        assert_eq!(lines[1], "success,@AccountRef1,Account,001A,");
        assert_eq!(
            lines[2],
            "failure,@ContactRef1,Contact,,INVALID_FIELD: invalid cross reference id"
        );
    }

    #[test]
    fn json_report_serializes_the_result() {
        let text = render(&import_report(), ReportFormat::Json).expect("render");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["result"]["records"][0]["id"], "001A");
        assert_eq!(value["result"]["failures"][0]["type"], "Contact");
    }

    #[test]
    fn empty_validation_report_reads_as_valid() {
        let text = render(&ValidationReport::default(), ReportFormat::Human).expect("render");
        assert_eq!(text, "plan is valid\n");
    }
}
