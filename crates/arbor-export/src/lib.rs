//! Export of record trees into files the importer can load back.
//!
//! A root query selects parent records and child relationships; the exporter
//! replaces store identifiers with placeholder tokens and writes either one
//! nested tree file or a plan with one file per object type.

pub mod anonymize;
pub mod engine;
pub mod errors;
pub mod model;
pub mod planner;
pub mod serializer;

pub use anonymize::{Exported, anonymize};
pub use engine::Exporter;
pub use errors::ExportError;
pub use model::{DEFAULT_MAX_RECORDS_PER_FILE, ExportOptions, ExportOutput};
pub use planner::{Collected, Fetched, ParentLink, collect};
pub use serializer::{Layout, PlannedFile, plan_layout, tree_layout, write_layout};
