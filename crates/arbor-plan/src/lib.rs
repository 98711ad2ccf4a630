//! Import plan contracts and validation.
//!
//! A plan is an ordered list of object groups. Validation runs a structural
//! pass against the plan JSON Schema, then semantic checks on the parsed plan,
//! and reports every violation at once.

pub mod errors;
pub mod model;
pub mod schema;
pub mod validate;

pub use errors::{IssueSeverity, PlanError, Result, ValidationIssue, ValidationReport};
pub use model::{DataPlan, ObjectGroup};
pub use schema::plan_json_schema;
pub use validate::{
    ValidatedPlan, load_plan, validate_plan, validate_plan_json, validate_plan_semantics,
};

/// Schema validation failure of a plan: the full report of violations.
pub type SchemaValidationError = ValidationReport;
