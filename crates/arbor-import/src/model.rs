use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use arbor_core::{ImportResult, ReferenceMap};
use serde::Serialize;

/// Options for the import engine.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Directory that relative record file paths are resolved against.
    pub base_dir: PathBuf,
    /// Checked before every group save; once set the run stops.
    pub abort: Option<Arc<AtomicBool>>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            abort: None,
        }
    }
}

impl ImportOptions {
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn with_abort(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = Some(abort);
        self
    }
}

/// Aggregated result of an import plus the final reference map.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub result: ImportResult,
    pub references: ReferenceMap,
}
