use std::collections::HashMap;

use arbor_core::{ID_FIELD, Record, format_token};
use serde_json::Value;

use crate::errors::ExportError;
use crate::planner::{Collected, ParentLink};

/// A record with its identifier replaced by a placeholder token.
#[derive(Debug, Clone)]
pub struct Exported {
    pub object_type: String,
    pub token: String,
    pub record: Record,
    pub parent: Option<ParentLink>,
}

/// Assign `@{prefix}{Type}Ref{N}` tokens and rewrite identifiers to them.
///
/// Numbering is per type, starting at 1, in collection order. Any string
/// field equal to an exported identifier becomes that record's token; `Id`
/// and `attributes.url` are dropped.
pub fn anonymize(collected: Collected, prefix: Option<&str>) -> Result<Vec<Exported>, ExportError> {
    let mut counters: HashMap<String, usize> = HashMap::new();
    let mut tokens_by_id: HashMap<String, String> = HashMap::new();
    let mut tokens = Vec::with_capacity(collected.records.len());

    for fetched in &collected.records {
        let id = fetched.record.id().ok_or_else(|| {
            ExportError::Serialization(format!(
                "{} record #{} has no {ID_FIELD}",
                fetched.object_type,
                tokens.len() + 1
            ))
        })?;
        let counter = counters.entry(fetched.object_type.clone()).or_insert(0);
        *counter += 1;
        let token = format_token(prefix, &fetched.object_type, *counter);
        tokens_by_id.insert(id.to_string(), token.clone());
        tokens.push(token);
    }

    Ok(collected
        .records
        .into_iter()
        .zip(tokens)
        .map(|(fetched, token)| {
            let mut record = fetched.record;
            record.remove(ID_FIELD);
            record.remove_attribute("url");
            record.for_each_value_mut(&mut |_, value| {
                let replacement = value.as_str().and_then(|text| tokens_by_id.get(text));
                if let Some(token) = replacement {
                    *value = Value::String(token.clone());
                }
            });
            record.set_object_type(&fetched.object_type);
            record.set_reference_id(&token);
            Exported {
                object_type: fetched.object_type,
                token,
                record,
                parent: fetched.parent,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Fetched;
    use serde_json::json;

    fn fetched(object_type: &str, value: Value, parent: Option<usize>) -> Fetched {
        Fetched {
            object_type: object_type.to_string(),
            record: Record::from_value(value).expect("object"),
            parent: parent.map(|index| ParentLink {
                index,
                relationship: "Contacts".to_string(),
                field: "AccountId".to_string(),
            }),
        }
    }

    #[test]
    fn tokens_replace_ids_everywhere() {
        let collected = Collected {
            root_type: "Account".to_string(),
            records: vec![
                fetched(
                    "Account",
                    json!({"attributes": {"type": "Account", "url": "/x/001A"}, "Id": "001A", "Name": "Acme"}),
                    None,
                ),
                fetched(
                    "Contact",
                    json!({"Id": "003A", "AccountId": "001A", "LastName": "Coyote"}),
                    Some(0),
                ),
            ],
        };

        let exported = anonymize(collected, Some("exp")).expect("anonymize");
        assert_eq!(exported[0].token, "@expAccountRef1");
        assert_eq!(exported[1].token, "@expContactRef1");

        let account = &exported[0].record;
        assert!(account.id().is_none());
        assert_eq!(account.get("attributes"), Some(&json!({"type": "Account", "referenceId": "expAccountRef1"})));
        assert_eq!(exported[1].record.get("AccountId"), Some(&json!("@expAccountRef1")));
    }

    #[test]
    fn missing_id_is_a_serialization_error() {
        let collected = Collected {
            root_type: "Account".to_string(),
            records: vec![fetched("Account", json!({"Name": "Acme"}), None)],
        };
        assert!(matches!(
            anonymize(collected, None),
            Err(ExportError::Serialization(_))
        ));
    }
}
