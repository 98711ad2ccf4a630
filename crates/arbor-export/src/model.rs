use std::path::PathBuf;

use arbor_core::ExportSummary;
use serde::Serialize;

pub const DEFAULT_MAX_RECORDS_PER_FILE: usize = 200;

/// Options for the export engine.
#[derive(Debug, Clone, Serialize)]
pub struct ExportOptions {
    /// Directory receiving the record files and the plan.
    pub output_dir: PathBuf,
    /// Always write one file per object type plus a plan.
    pub plan: bool,
    /// Inserted after `@` in every generated token.
    pub prefix: Option<String>,
    /// Largest record count still written as a single tree file.
    pub max_records_per_file: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            plan: false,
            prefix: None,
            max_records_per_file: DEFAULT_MAX_RECORDS_PER_FILE,
        }
    }
}

/// What an export wrote.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOutput {
    pub files: Vec<PathBuf>,
    pub plan_path: Option<PathBuf>,
    pub summary: ExportSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
