use std::path::{Path, PathBuf};

use arbor_core::{Record, parse_records};
use arbor_plan::ObjectGroup;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::debug;

use crate::errors::ImportError;

/// Encoding of a record file, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    Xml,
}

impl ContentType {
    /// Anything that is not `.xml` is read as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("xml") => ContentType::Xml,
            _ => ContentType::Json,
        }
    }
}

/// Resolve a plan file entry against the plan's directory.
pub fn resolve_path(base_dir: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Read one record file: a bare array or an object with a `records` array.
pub async fn load_file(path: PathBuf) -> Result<Vec<Record>, ImportError> {
    if ContentType::from_path(&path) == ContentType::Xml {
        return Err(ImportError::SourceLoad {
            path,
            reason: "unsupported content type: xml".to_string(),
        });
    }

    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(err) => {
            return Err(ImportError::SourceLoad {
                path,
                reason: err.to_string(),
            });
        }
    };
    let value: Value = match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(err) => {
            return Err(ImportError::SourceLoad {
                path,
                reason: format!("invalid json: {err}"),
            });
        }
    };

    match parse_records(value) {
        Ok(records) => {
            debug!(path = %path.display(), records = records.len(), "record file loaded");
            Ok(records)
        }
        Err(reason) => Err(ImportError::SourceLoad { path, reason }),
    }
}

/// Load every file of a group concurrently, keeping file order.
///
/// Records without `attributes.type` are stamped with the group's object type.
pub async fn load_group(base_dir: &Path, group: &ObjectGroup) -> Result<Vec<Record>, ImportError> {
    let mut tasks = JoinSet::new();
    for (idx, file) in group.files.iter().enumerate() {
        let path = resolve_path(base_dir, file);
        tasks.spawn(async move { (idx, load_file(path).await) });
    }

    let mut loaded: Vec<Option<Vec<Record>>> = vec![None; group.files.len()];
    while let Some(joined) = tasks.join_next().await {
        let (idx, result) = joined.map_err(|err| ImportError::Task(err.to_string()))?;
        loaded[idx] = Some(result?);
    }

    let mut records: Vec<Record> = loaded.into_iter().flatten().flatten().collect();
    for record in &mut records {
        if record.object_type().is_none() {
            record.set_object_type(&group.sobject);
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(ContentType::from_path(Path::new("a/Account.json")), ContentType::Json);
        assert_eq!(ContentType::from_path(Path::new("a/Account.XML")), ContentType::Xml);
        assert_eq!(ContentType::from_path(Path::new("records")), ContentType::Json);
    }

    #[test]
    fn relative_entries_join_the_base_dir() {
        let base = Path::new("/plans");
        assert_eq!(resolve_path(base, "data/a.json"), PathBuf::from("/plans/data/a.json"));
        assert_eq!(resolve_path(base, "/abs/a.json"), PathBuf::from("/abs/a.json"));
    }
}
