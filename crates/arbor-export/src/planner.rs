//! Turns a root query into the store queries that collect a record tree.

use std::collections::HashMap;

use arbor_core::{ChildSelect, ClauseParts, QueryShape, QueryStore, Record, build_query, quote_list};
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::ExportError;

/// Where a child record hangs in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    /// Index of the parent in [`Collected::records`].
    pub index: usize,
    pub relationship: String,
    /// Child field holding the parent identifier.
    pub field: String,
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub object_type: String,
    pub record: Record,
    /// `None` for roots, and for children whose parent was not exported.
    pub parent: Option<ParentLink>,
}

/// Every record an export touches, roots first, then each relationship's children.
#[derive(Debug, Clone)]
pub struct Collected {
    pub root_type: String,
    pub records: Vec<Fetched>,
}

impl Collected {
    /// Object types in first-seen order.
    pub fn object_types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::new();
        for fetched in &self.records {
            if !types.contains(&fetched.object_type) {
                types.push(fetched.object_type.clone());
            }
        }
        types
    }

    pub fn has_orphans(&self) -> bool {
        self.records
            .iter()
            .any(|fetched| fetched.parent.is_none() && fetched.object_type != self.root_type)
    }
}

/// Run the root query and one query per child relationship.
pub async fn collect<Q: QueryStore>(store: &Q, query: &str) -> Result<Collected, ExportError> {
    let shape = QueryShape::parse(query).map_err(|source| ExportError::Query {
        target: "root query".to_string(),
        source,
    })?;
    let root_type = shape.object_type.clone();

    let root_query = shape.flat_query(&["Id"]);
    debug!(query = %root_query, "querying roots");
    let roots = store
        .query(&root_query)
        .await
        .map_err(|source| ExportError::Query {
            target: root_type.clone(),
            source,
        })?;
    info!(object_type = %root_type, records = roots.len(), "roots fetched");

    let mut records: Vec<Fetched> = roots
        .into_iter()
        .map(|record| Fetched {
            object_type: root_type.clone(),
            record,
            parent: None,
        })
        .collect();

    if shape.children.is_empty() {
        return Ok(Collected { root_type, records });
    }

    let root_ids: HashMap<String, usize> = records
        .iter()
        .enumerate()
        .filter_map(|(idx, fetched)| fetched.record.id().map(|id| (id.to_string(), idx)))
        .collect();
    let id_list: Vec<String> = records
        .iter()
        .filter_map(|fetched| fetched.record.id().map(str::to_string))
        .collect();

    let describe = store
        .describe(&root_type)
        .await
        .map_err(|source| ExportError::Query {
            target: root_type.clone(),
            source,
        })?;

    for child in &shape.children {
        let relationship =
            describe
                .child_relationship(&child.relationship)
                .ok_or_else(|| ExportError::Query {
                    target: format!("{root_type}.{}", child.relationship),
                    source: arbor_core::Error::Unsupported(format!(
                        "no child relationship '{}' on {root_type}",
                        child.relationship
                    )),
                })?;
        if id_list.is_empty() {
            continue;
        }

        let clause = ClauseParts::parse(child.clause.as_deref().unwrap_or_default()).map_err(
            |source| ExportError::Query {
                target: format!("{root_type}.{}", child.relationship),
                source,
            },
        )?;
        let child_type = relationship.child_object.clone();
        let fk = relationship.field.clone();
        let query = child_query(&child_type, &fk, child, &clause, &id_list);
        debug!(query = %query, "querying children");
        let children = store.query(&query).await.map_err(|source| ExportError::Query {
            target: child_type.clone(),
            source,
        })?;
        info!(
            object_type = %child_type,
            relationship = %child.relationship,
            records = children.len(),
            "children fetched"
        );

        let mut per_parent: HashMap<usize, usize> = HashMap::new();
        for record in children {
            let parent = record
                .get(&fk)
                .and_then(Value::as_str)
                .and_then(|parent_id| root_ids.get(parent_id))
                .map(|index| ParentLink {
                    index: *index,
                    relationship: child.relationship.clone(),
                    field: fk.clone(),
                });
            if let (Some(limit), Some(link)) = (clause.limit, parent.as_ref()) {
                let taken = per_parent.entry(link.index).or_default();
                if *taken >= limit {
                    continue;
                }
                *taken += 1;
            }
            records.push(Fetched {
                object_type: child_type.clone(),
                record,
                parent,
            });
        }
    }

    Ok(Collected { root_type, records })
}

/// `SELECT <fields>, Id, <fk> FROM <child> WHERE <fk> IN (...)`, keeping the
/// sub-select's condition and ordering. Its `LIMIT` is applied per parent by
/// the caller.
fn child_query(
    child_type: &str,
    fk: &str,
    child: &ChildSelect,
    clause: &ClauseParts,
    parent_ids: &[String],
) -> String {
    let mut fields = child.fields.clone();
    for extra in ["Id", fk] {
        if !fields.iter().any(|field| field.eq_ignore_ascii_case(extra)) {
            fields.push(extra.to_string());
        }
    }

    let mut filter = format!("WHERE {fk} IN {}", quote_list(parent_ids));
    if let Some(condition) = &clause.condition {
        filter.push_str(&format!(" AND ({condition})"));
    }
    if let Some(order_by) = &clause.order_by {
        filter.push(' ');
        filter.push_str(order_by);
    }
    build_query(child_type, &fields, Some(&filter))
}
