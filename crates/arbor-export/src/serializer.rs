//! Lays exported records out as files and writes them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use arbor_core::{DependencyGraph, RECORDS_KEY, Record, is_token, write_bytes_atomic};
use arbor_plan::{DataPlan, ObjectGroup};
use serde_json::{Map, Value};
use tracing::warn;

use crate::anonymize::Exported;
use crate::errors::ExportError;

/// One file to be written, relative to the output directory.
#[derive(Debug, Clone)]
pub struct PlannedFile {
    pub file_name: String,
    pub document: Value,
}

/// Every file of an export, decided before anything touches the disk.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub files: Vec<PlannedFile>,
    pub plan: Option<PlannedFile>,
    pub warnings: Vec<String>,
}

/// Nest children under their parents in one `{Root}.json`.
///
/// Returns `None` when the records cannot travel as a single tree: a child
/// without an exported parent, or a token pointing outside the record's own
/// parent link.
pub fn tree_layout(root_type: &str, exported: &[Exported]) -> Option<Layout> {
    let mut roots: Vec<Record> = Vec::new();
    let mut root_slots: HashMap<usize, usize> = HashMap::new();
    let mut children: BTreeMap<usize, Vec<(String, Record)>> = BTreeMap::new();

    for (idx, item) in exported.iter().enumerate() {
        match &item.parent {
            None if item.object_type == root_type => {
                if carries_tokens(&item.record) {
                    return None;
                }
                root_slots.insert(idx, roots.len());
                roots.push(item.record.clone());
            }
            None => return None,
            Some(link) => {
                let mut child = item.record.clone();
                child.remove(&link.field);
                if carries_tokens(&child) {
                    return None;
                }
                children
                    .entry(link.index)
                    .or_default()
                    .push((link.relationship.clone(), child));
            }
        }
    }

    for (parent_idx, nested) in children {
        let slot = *root_slots.get(&parent_idx)?;
        let mut grouped: Vec<(String, Vec<Record>)> = Vec::new();
        for (relationship, child) in nested {
            match grouped.iter_mut().find(|(name, _)| *name == relationship) {
                Some((_, records)) => records.push(child),
                None => grouped.push((relationship, vec![child])),
            }
        }
        for (relationship, records) in grouped {
            roots[slot].set_children(&relationship, records);
        }
    }

    Some(Layout {
        files: vec![PlannedFile {
            file_name: format!("{root_type}.json"),
            document: records_document(roots),
        }],
        plan: None,
        warnings: Vec::new(),
    })
}

/// One flat file per object type plus `{Root}-plan.json` ordering them.
pub fn plan_layout(root_type: &str, exported: &[Exported]) -> Result<Layout, ExportError> {
    let type_of_token: HashMap<&str, &str> = exported
        .iter()
        .map(|item| (item.token.as_str(), item.object_type.as_str()))
        .collect();

    let mut graph = DependencyGraph::new();
    let mut discovery: Vec<String> = Vec::new();
    let mut referenced: BTreeSet<String> = BTreeSet::new();
    let mut resolving: BTreeSet<String> = BTreeSet::new();
    let mut by_type: BTreeMap<String, Vec<Record>> = BTreeMap::new();

    for item in exported {
        graph.add_node(&item.object_type);
        if !discovery.contains(&item.object_type) {
            discovery.push(item.object_type.clone());
        }

        item.record.for_each_value(&mut |_, value| {
            let Some(token) = value.as_str().filter(|text| is_token(text)) else {
                return;
            };
            resolving.insert(item.object_type.clone());
            if token == item.token {
                return;
            }
            if let Some(parent_type) = type_of_token.get(token) {
                referenced.insert((*parent_type).to_string());
                graph.add_dependency(parent_type, &item.object_type);
            }
        });

        by_type
            .entry(item.object_type.clone())
            .or_default()
            .push(item.record.clone());
    }

    let mut warnings = Vec::new();
    let report = graph.report();
    let order = match report.load_order {
        Some(order) => order,
        None => {
            let cycle = report.cycle.unwrap_or_default().join(", ");
            warn!(cycle = %cycle, "reference cycle between object types");
            warnings.push(format!(
                "reference cycle between {cycle}; groups keep discovery order"
            ));
            discovery
        }
    };

    let mut files = Vec::with_capacity(order.len());
    let mut groups = Vec::with_capacity(order.len());
    for object_type in order {
        let file_name = format!("{object_type}.json");
        let records = by_type.remove(&object_type).unwrap_or_default();
        groups.push(
            ObjectGroup::new(object_type.clone(), vec![file_name.clone()])
                .save_refs(referenced.contains(&object_type))
                .resolve_refs(resolving.contains(&object_type)),
        );
        files.push(PlannedFile {
            file_name,
            document: records_document(records),
        });
    }

    let plan = DataPlan::new(groups);
    Ok(Layout {
        files,
        plan: Some(PlannedFile {
            file_name: format!("{root_type}-plan.json"),
            document: serde_json::to_value(&plan)?,
        }),
        warnings,
    })
}

/// Serialize every document first, then commit each file atomically.
pub fn write_layout(
    dir: &Path,
    layout: &Layout,
) -> Result<(Vec<PathBuf>, Option<PathBuf>), ExportError> {
    let mut rendered = Vec::with_capacity(layout.files.len() + 1);
    for file in layout.files.iter().chain(layout.plan.iter()) {
        rendered.push((dir.join(&file.file_name), serde_json::to_vec_pretty(&file.document)?));
    }

    std::fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(rendered.len());
    for (path, bytes) in rendered {
        write_bytes_atomic(&path, &bytes)?;
        written.push(path);
    }

    let plan_path = if layout.plan.is_some() {
        written.pop()
    } else {
        None
    };
    Ok((written, plan_path))
}

fn records_document(records: Vec<Record>) -> Value {
    let mut document = Map::new();
    document.insert(
        RECORDS_KEY.to_string(),
        Value::Array(records.into_iter().map(Record::into_value).collect()),
    );
    Value::Object(document)
}

fn carries_tokens(record: &Record) -> bool {
    let mut found = false;
    record.for_each_value(&mut |_, value| {
        found |= value.as_str().is_some_and(is_token);
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::ParentLink;
    use serde_json::json;

    fn exported(object_type: &str, token: &str, value: Value, parent: Option<usize>) -> Exported {
        let mut record = Record::from_value(value).expect("object");
        record.set_object_type(object_type);
        record.set_reference_id(token);
        Exported {
            object_type: object_type.to_string(),
            token: token.to_string(),
            record,
            parent: parent.map(|index| ParentLink {
                index,
                relationship: "Contacts".to_string(),
                field: "AccountId".to_string(),
            }),
        }
    }

    fn sample() -> Vec<Exported> {
        vec![
            exported("Account", "@AccountRef1", json!({"Name": "Acme"}), None),
            exported(
                "Contact",
                "@ContactRef1",
                json!({"LastName": "Coyote", "AccountId": "@AccountRef1"}),
                Some(0),
            ),
        ]
    }

    #[test]
    fn tree_layout_nests_children_without_foreign_key() {
        let layout = tree_layout("Account", &sample()).expect("tree");
        assert_eq!(layout.files.len(), 1);
        assert_eq!(layout.files[0].file_name, "Account.json");

        let contact = &layout.files[0].document["records"][0]["Contacts"]["records"][0];
        assert_eq!(contact["LastName"], json!("Coyote"));
        assert!(contact.get("AccountId").is_none());
    }

    #[test]
    fn cross_references_outside_the_tree_force_plan_mode() {
        let mut records = sample();
        records.push(exported(
            "Account",
            "@AccountRef2",
            json!({"Name": "Sub", "ParentId": "@AccountRef1"}),
            None,
        ));
        assert!(tree_layout("Account", &records).is_none());
    }

    #[test]
    fn plan_layout_orders_parents_first_and_sets_flags() {
        let mut records = sample();
        records.reverse();
        let layout = plan_layout("Account", &records).expect("plan");

        let names: Vec<&str> = layout.files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["Account.json", "Contact.json"]);

        let plan = &layout.plan.expect("plan file");
        assert_eq!(plan.file_name, "Account-plan.json");
        assert_eq!(
            plan.document,
            json!([
                {"sobject": "Account", "files": ["Account.json"], "saveRefs": true, "resolveRefs": false},
                {"sobject": "Contact", "files": ["Contact.json"], "saveRefs": false, "resolveRefs": true}
            ])
        );
    }

    #[test]
    fn cycles_fall_back_to_discovery_order_with_a_warning() {
        let records = vec![
            exported("Contact", "@ContactRef1", json!({"AccountId": "@AccountRef1"}), None),
            exported("Account", "@AccountRef1", json!({"PrimaryContactId": "@ContactRef1"}), None),
        ];
        let layout = plan_layout("Contact", &records).expect("plan");

        let names: Vec<&str> = layout.files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["Contact.json", "Account.json"]);
        assert_eq!(layout.warnings.len(), 1);
    }
}
