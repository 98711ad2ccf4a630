//! Shape of a root export query: `SELECT f, (SELECT g FROM Rel) FROM Type [clause]`.
//!
//! Only the shape is parsed; conditions and ordering are kept as opaque text.

use crate::error::{Error, Result};

/// A parsed `SELECT` with optional child sub-selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryShape {
    pub object_type: String,
    pub fields: Vec<String>,
    pub children: Vec<ChildSelect>,
    /// Everything after the object type (`WHERE ...`, `ORDER BY ...`, `LIMIT ...`).
    pub clause: Option<String>,
}

/// A sub-select over a child relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSelect {
    pub relationship: String,
    pub fields: Vec<String>,
    pub clause: Option<String>,
}

impl QueryShape {
    pub fn parse(query: &str) -> Result<Self> {
        let trimmed = query.trim();
        let lower = trimmed.to_ascii_lowercase();

        if !starts_with_keyword(&lower, 0, "select") {
            return Err(invalid(query, "expected SELECT"));
        }
        let from = find_keyword(&lower, "from", "select".len())
            .ok_or_else(|| invalid(query, "missing FROM"))?;

        let select_list = &trimmed["select".len()..from];
        let after = trimmed[from + "from".len()..].trim_start();
        let (object_type, rest) = match after.find(char::is_whitespace) {
            Some(idx) => (&after[..idx], after[idx..].trim()),
            None => (after, ""),
        };
        if object_type.is_empty() {
            return Err(invalid(query, "missing object type after FROM"));
        }

        let mut fields = Vec::new();
        let mut children = Vec::new();
        for item in split_top_level(select_list) {
            let item = item.trim();
            if item.is_empty() {
                return Err(invalid(query, "empty select item"));
            }
            if item.starts_with('(') && item.ends_with(')') {
                let inner = QueryShape::parse(&item[1..item.len() - 1])?;
                if !inner.children.is_empty() {
                    return Err(invalid(query, "sub-selects nest only one level"));
                }
                children.push(ChildSelect {
                    relationship: inner.object_type,
                    fields: inner.fields,
                    clause: inner.clause,
                });
            } else if item.contains(char::is_whitespace) {
                return Err(invalid(query, &format!("unsupported select item '{item}'")));
            } else {
                push_unique(&mut fields, item);
            }
        }
        if fields.is_empty() {
            return Err(invalid(query, "no fields selected"));
        }

        Ok(Self {
            object_type: object_type.to_string(),
            fields,
            children,
            clause: if rest.is_empty() {
                None
            } else {
                Some(rest.to_string())
            },
        })
    }

    /// The query without its sub-selects, with `extra` fields appended when missing.
    pub fn flat_query(&self, extra: &[&str]) -> String {
        let mut fields = self.fields.clone();
        for field in extra {
            push_unique(&mut fields, field);
        }
        build_query(&self.object_type, &fields, self.clause.as_deref())
    }
}

/// A sub-select clause split into what a flattened child query needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClauseParts {
    /// `WHERE` condition, keyword stripped.
    pub condition: Option<String>,
    /// `ORDER BY ...`, keyword included.
    pub order_by: Option<String>,
    /// Row cap of the sub-select; it applies per parent record.
    pub limit: Option<usize>,
}

impl ClauseParts {
    /// Split `[WHERE cond] [ORDER BY ...] [LIMIT n]`.
    pub fn parse(clause: &str) -> Result<Self> {
        let clause = clause.trim();
        let lower = clause.to_ascii_lowercase();
        let order = find_keyword(&lower, "order", 0);
        let limit = find_keyword(&lower, "limit", 0);

        let head_end = order.into_iter().chain(limit).min().unwrap_or(clause.len());
        let head = clause[..head_end].trim();
        let condition = if head.is_empty() {
            None
        } else if starts_with_keyword(&lower, 0, "where") {
            let condition = head["where".len()..].trim();
            if condition.is_empty() {
                return Err(invalid(clause, "empty WHERE condition"));
            }
            Some(condition.to_string())
        } else {
            return Err(invalid(clause, "expected WHERE, ORDER BY or LIMIT"));
        };

        let order_by = order.map(|start| {
            let end = limit.filter(|at| *at > start).unwrap_or(clause.len());
            clause[start..end].trim().to_string()
        });

        let limit = match limit {
            Some(start) => {
                let end = order.filter(|at| *at > start).unwrap_or(clause.len());
                let count = clause[start + "limit".len()..end].trim();
                Some(
                    count
                        .parse::<usize>()
                        .map_err(|_| invalid(clause, "LIMIT expects a row count"))?,
                )
            }
            None => None,
        };

        Ok(Self {
            condition,
            order_by,
            limit,
        })
    }
}

/// Render `SELECT fields FROM object_type [clause]`.
pub fn build_query(object_type: &str, fields: &[String], clause: Option<&str>) -> String {
    let mut query = format!("SELECT {} FROM {}", fields.join(", "), object_type);
    if let Some(clause) = clause.filter(|clause| !clause.trim().is_empty()) {
        query.push(' ');
        query.push_str(clause.trim());
    }
    query
}

/// Render `('a', 'b')` with quotes escaped.
pub fn quote_list(values: &[String]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|value| format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'")))
        .collect();
    format!("({})", quoted.join(", "))
}

fn push_unique(fields: &mut Vec<String>, field: &str) {
    if !fields.iter().any(|seen| seen.eq_ignore_ascii_case(field)) {
        fields.push(field.to_string());
    }
}

fn invalid(query: &str, reason: &str) -> Error {
    Error::Unsupported(format!("invalid query '{}': {reason}", query.trim()))
}

fn is_boundary(byte: Option<&u8>) -> bool {
    match byte {
        None => true,
        Some(byte) => byte.is_ascii_whitespace() || *byte == b'(' || *byte == b')' || *byte == b',',
    }
}

fn starts_with_keyword(lower: &str, at: usize, keyword: &str) -> bool {
    let bytes = lower.as_bytes();
    bytes[at..].starts_with(keyword.as_bytes())
        && (at == 0 || is_boundary(bytes.get(at - 1)))
        && is_boundary(bytes.get(at + keyword.len()))
}

/// Byte offset of `keyword` outside parentheses and quotes.
fn find_keyword(lower: &str, keyword: &str, start: usize) -> Option<usize> {
    let bytes = lower.as_bytes();
    let mut depth = 0_i32;
    let mut quoted = false;
    let mut idx = start;
    while idx < bytes.len() {
        let byte = bytes[idx];
        if quoted {
            if byte == b'\\' {
                idx += 1;
            } else if byte == b'\'' {
                quoted = false;
            }
        } else {
            match byte {
                b'\'' => quoted = true,
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ if depth == 0 && starts_with_keyword(lower, idx, keyword) => return Some(idx),
                _ => {}
            }
        }
        idx += 1;
    }
    None
}

fn split_top_level(list: &str) -> Vec<&str> {
    let bytes = list.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut quoted = false;
    let mut start = 0;
    let mut idx = 0;
    while idx < bytes.len() {
        let byte = bytes[idx];
        if quoted {
            if byte == b'\\' {
                idx += 1;
            } else if byte == b'\'' {
                quoted = false;
            }
        } else {
            match byte {
                b'\'' => quoted = true,
                b'(' => depth += 1,
                b')' => depth -= 1,
                b',' if depth == 0 => {
                    parts.push(&list[start..idx]);
                    start = idx + 1;
                }
                _ => {}
            }
        }
        idx += 1;
    }
    parts.push(&list[start..]);
    parts
}
