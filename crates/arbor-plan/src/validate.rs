use std::collections::HashSet;
use std::path::Path;

use jsonschema::JSONSchema;
use jsonschema::error::ValidationErrorKind;
use serde_json::Value;

use crate::errors::{IssueSeverity, PlanError, ValidationIssue, ValidationReport};
use crate::model::{DataPlan, ObjectGroup};
use crate::schema::plan_json_schema;

/// Validated plan with accumulated warnings.
#[derive(Debug, Clone)]
pub struct ValidatedPlan {
    pub plan: DataPlan,
    pub warnings: Vec<ValidationIssue>,
}

/// Validate a plan JSON document against the plan JSON Schema.
pub fn validate_plan_json(plan_json: &Value) -> Result<ValidationReport, PlanError> {
    let schema = serde_json::to_value(plan_json_schema())?;
    let compiled =
        JSONSchema::compile(&schema).map_err(|err| PlanError::Schema(err.to_string()))?;

    let mut report = ValidationReport::default();

    if let Err(errors) = compiled.validate(plan_json) {
        for error in errors {
            let path = normalized_json_pointer(&error.instance_path.to_string());
            let (code, path) = match &error.kind {
                ValidationErrorKind::Required { property } => (
                    "missing_field",
                    join_pointer(&path, property.as_str().unwrap_or_default()),
                ),
                ValidationErrorKind::MinItems { .. } => ("empty_list", path),
                ValidationErrorKind::MinLength { .. } => ("empty_string", path),
                ValidationErrorKind::Type { .. } => ("wrong_type", path),
                _ => ("schema_violation", path),
            };
            report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                code,
                path,
                error.to_string(),
                None,
            ));
        }
    }

    Ok(report)
}

/// Check a structurally valid plan for problems the schema cannot express.
pub fn validate_plan_semantics(plan: &DataPlan) -> ValidationReport {
    let mut report = ValidationReport::default();

    if plan.is_empty() {
        report.push_error(ValidationIssue::new(
            IssueSeverity::Error,
            "plan_empty",
            "/",
            "plan requires at least one object group".to_string(),
            Some("add an object group with sobject and files".to_string()),
        ));
        return report;
    }

    let mut seen_files: HashSet<&str> = HashSet::new();
    for (idx, group) in plan.groups.iter().enumerate() {
        validate_group(idx, group, &mut seen_files, &mut report);
    }
    validate_reference_flow(plan, &mut report);

    report
}

/// Validate the plan end-to-end, returning every issue on failure.
pub fn validate_plan(plan_json: &Value) -> Result<ValidatedPlan, ValidationReport> {
    let structural = match validate_plan_json(plan_json) {
        Ok(report) => report,
        Err(err) => {
            let mut report = ValidationReport::default();
            report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "schema_validation_error",
                "/",
                err.to_string(),
                None,
            ));
            return Err(report);
        }
    };

    if !structural.is_ok() {
        let mut report = structural;
        report.merge(blank_value_errors(plan_json));
        return Err(report);
    }

    let plan: DataPlan = match serde_json::from_value(plan_json.clone()) {
        Ok(plan) => plan,
        Err(err) => {
            let mut report = ValidationReport::default();
            report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "invalid_plan_json",
                "/",
                err.to_string(),
                None,
            ));
            return Err(report);
        }
    };

    let semantic = validate_plan_semantics(&plan);
    if !semantic.is_ok() {
        return Err(semantic);
    }

    Ok(ValidatedPlan {
        plan,
        warnings: semantic.warnings,
    })
}

/// Read and validate a plan file.
pub fn load_plan(path: &Path) -> Result<ValidatedPlan, PlanError> {
    let contents = std::fs::read_to_string(path)?;
    let plan_json: Value = serde_json::from_str(&contents)?;
    validate_plan(&plan_json).map_err(PlanError::Invalid)
}

fn validate_group<'a>(
    idx: usize,
    group: &'a ObjectGroup,
    seen_files: &mut HashSet<&'a str>,
    report: &mut ValidationReport,
) {
    let base_path = format!("/{idx}");

    if group.sobject.trim().is_empty() {
        report.push_error(ValidationIssue::new(
            IssueSeverity::Error,
            "sobject_blank",
            format!("{base_path}/sobject"),
            "sobject must name an object type".to_string(),
            None,
        ));
    }

    let mut group_files: HashSet<&str> = HashSet::new();
    for (file_idx, file) in group.files.iter().enumerate() {
        let file_path = format!("{base_path}/files/{file_idx}");
        if file.trim().is_empty() {
            report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "file_blank",
                file_path,
                "file entries must name a record file".to_string(),
                None,
            ));
            continue;
        }

        if !group_files.insert(file.as_str()) {
            report.push_warning(ValidationIssue::new(
                IssueSeverity::Warning,
                "duplicate_file",
                file_path,
                format!("file '{file}' is listed twice in the same group"),
                Some("remove the duplicate entry; its records would be saved twice".to_string()),
            ));
            continue;
        }

        if !seen_files.insert(file.as_str()) {
            report.push_warning(ValidationIssue::new(
                IssueSeverity::Warning,
                "file_reused",
                file_path.clone(),
                format!("file '{file}' is already loaded by an earlier group"),
                None,
            ));
        }

        let extension = Path::new(file)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
        if !matches!(extension.as_deref(), Some("json") | Some("xml")) {
            report.push_warning(ValidationIssue::new(
                IssueSeverity::Warning,
                "unknown_content_type",
                file_path,
                format!("file '{file}' has no .json extension; it will be parsed as JSON"),
                None,
            ));
        }
    }
}

/// Blank `sobject` and file entries in a raw plan document.
///
/// Runs when the structural pass failed and the plan cannot be parsed, so
/// these errors are still reported alongside the schema violations.
fn blank_value_errors(plan_json: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();
    let Some(groups) = plan_json.as_array() else {
        return report;
    };

    for (idx, group) in groups.iter().enumerate() {
        if let Some(sobject) = group.get("sobject").and_then(Value::as_str) {
            if !sobject.is_empty() && sobject.trim().is_empty() {
                report.push_error(ValidationIssue::new(
                    IssueSeverity::Error,
                    "sobject_blank",
                    format!("/{idx}/sobject"),
                    "sobject must name an object type".to_string(),
                    None,
                ));
            }
        }

        let files = group.get("files").and_then(Value::as_array);
        for (file_idx, file) in files.into_iter().flatten().enumerate() {
            if file.as_str().is_some_and(|file| file.trim().is_empty()) {
                report.push_error(ValidationIssue::new(
                    IssueSeverity::Error,
                    "file_blank",
                    format!("/{idx}/files/{file_idx}"),
                    "file entries must name a record file".to_string(),
                    None,
                ));
            }
        }
    }
    report
}

fn validate_reference_flow(plan: &DataPlan, report: &mut ValidationReport) {
    for (idx, group) in plan.groups.iter().enumerate() {
        if group.resolve_refs && !plan.groups[..idx].iter().any(|earlier| earlier.save_refs) {
            report.push_warning(ValidationIssue::new(
                IssueSeverity::Warning,
                "resolve_refs_without_source",
                format!("/{idx}/resolveRefs"),
                "no earlier group saves references".to_string(),
                Some("tokens can only resolve from a reference seed".to_string()),
            ));
        }

        if group.save_refs && !plan.groups[idx + 1..].iter().any(|later| later.resolve_refs) {
            report.push_warning(ValidationIssue::new(
                IssueSeverity::Warning,
                "save_refs_unused",
                format!("/{idx}/saveRefs"),
                "no later group resolves references".to_string(),
                Some("set resolveRefs on the groups that use these tokens".to_string()),
            ));
        }
    }
}

fn join_pointer(base: &str, segment: &str) -> String {
    if base == "/" {
        format!("/{segment}")
    } else {
        format!("{base}/{segment}")
    }
}

fn normalized_json_pointer(pointer: &str) -> String {
    if pointer.is_empty() {
        "/".to_string()
    } else {
        pointer.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_flags_to_false() {
        let validated = validate_plan(&json!([
            {"sobject": "Account", "files": ["Account.json"]}
        ]))
        .expect("valid plan");
        let group = &validated.plan.groups[0];
        assert!(!group.save_refs);
        assert!(!group.resolve_refs);
    }

    #[test]
    fn blank_sobject_is_a_semantic_error() {
        let report = validate_plan(&json!([{"sobject": "  ", "files": ["a.json"]}]))
            .expect_err("blank sobject");
        assert_eq!(report.error_codes(), vec!["sobject_blank"]);
        assert_eq!(report.errors[0].path, "/0/sobject");
    }

    #[test]
    fn reference_flow_warnings() {
        let validated = validate_plan(&json!([
            {"sobject": "Account", "files": ["Account.json"], "saveRefs": true},
            {"sobject": "Contact", "files": ["Contact.json"]}
        ]))
        .expect("valid plan");
        let codes: Vec<&str> = validated.warnings.iter().map(|w| w.code.as_str()).collect();
        assert_eq!(codes, vec!["save_refs_unused"]);
    }

    #[test]
    fn duplicate_files_warn() {
        let validated = validate_plan(&json!([
            {"sobject": "Account", "files": ["a.json", "a.json"]},
            {"sobject": "Contact", "files": ["a.json", "c.dat"]}
        ]))
        .expect("valid plan");
        let codes: Vec<&str> = validated.warnings.iter().map(|w| w.code.as_str()).collect();
        assert_eq!(codes, vec!["duplicate_file", "file_reused", "unknown_content_type"]);
    }
}
