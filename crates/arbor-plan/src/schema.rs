use schemars::schema::RootSchema;
use schemars::schema_for;

use crate::model::ObjectGroup;

/// Emit the JSON Schema for plan files: a non-empty array of object groups.
pub fn plan_json_schema() -> RootSchema {
    let mut root = schema_for!(Vec<ObjectGroup>);
    root.schema.array().min_items = Some(1);
    root
}
