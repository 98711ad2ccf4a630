//! Core contracts and helpers for Arbor.
//!
//! This crate defines the record model, placeholder reference tokens, the
//! reference map, save outcomes and their aggregation, and the store traits
//! shared by the import and export engines.

pub mod atomic;
pub mod error;
pub mod graph;
pub mod memory;
pub mod outcome;
pub mod query;
pub mod record;
pub mod reference;
pub mod reference_map;
pub mod result;
pub mod store;

pub use atomic::{write_bytes_atomic, write_json_atomic};
pub use error::{Error, Result};
pub use graph::{DependencyGraph, DependencyReport, DependencySummary};
pub use memory::{MemoryStore, ResponseStyle};
pub use outcome::{GroupOutcome, RecordOutcome, SaveError, SaveResponse, SaveResultEntry};
pub use query::{ChildSelect, ClauseParts, QueryShape, build_query, quote_list};
pub use record::{
    ATTRIBUTES_KEY, ID_FIELD, NestedRecord, RECORDS_KEY, REFERENCE_ID_KEY, Record, parse_records,
};
pub use reference::{
    format_token, has_unresolved_refs, is_token, is_unresolved_ref, normalize_reference_id,
    unresolved_refs,
};
pub use reference_map::{ReferenceMap, Resolution};
pub use result::{ExportSummary, ImportResult, RecordFailure, ResolvedRecord, TypeCount};
pub use store::{
    BulkIngest, ChildRelationship, JobState, JobStatus, ObjectDescribe, QueryStore, TreeStore,
};
