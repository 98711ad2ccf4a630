use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One plan unit: every record of one object type saved in one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectGroup {
    /// Object type the group's records are saved as.
    #[schemars(length(min = 1))]
    pub sobject: String,
    /// Record files, relative to the plan file, loaded in this order.
    #[schemars(length(min = 1))]
    pub files: Vec<String>,
    /// Record `token -> id` for every record saved by this group.
    #[serde(default)]
    pub save_refs: bool,
    /// Substitute known tokens in this group's records before saving.
    #[serde(default)]
    pub resolve_refs: bool,
}

impl ObjectGroup {
    pub fn new(sobject: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            sobject: sobject.into(),
            files,
            save_refs: false,
            resolve_refs: false,
        }
    }

    pub fn save_refs(mut self, value: bool) -> Self {
        self.save_refs = value;
        self
    }

    pub fn resolve_refs(mut self, value: bool) -> Self {
        self.resolve_refs = value;
        self
    }
}

/// Ordered object groups; plan order is the dependency order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataPlan {
    pub groups: Vec<ObjectGroup>,
}

impl DataPlan {
    pub fn new(groups: Vec<ObjectGroup>) -> Self {
        Self { groups }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectGroup> {
        self.groups.iter()
    }
}
