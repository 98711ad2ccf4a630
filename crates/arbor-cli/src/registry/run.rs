use std::fs::{OpenOptions, create_dir_all};
use std::path::PathBuf;
use std::process::Command;

use arbor_core::write_json_atomic;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::RegistryResult;

/// Metadata captured at run start.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub command: String,
    pub run_dir: PathBuf,
    /// Effective options after merging flags and config.
    pub options: Value,
}

/// JSON config written to each run directory.
#[derive(Debug, Serialize)]
pub struct RunConfig {
    pub run_id: String,
    pub started_at: String,
    pub command: String,
    pub options: Value,
    pub git: GitInfo,
}

/// Git metadata for reproducibility.
#[derive(Debug, Serialize)]
pub struct GitInfo {
    pub commit: Option<String>,
    pub dirty: Option<bool>,
}

/// Paths for run artifacts.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub root: PathBuf,
    pub logs_path: PathBuf,
    pub result_path: PathBuf,
}

/// Create `{run_dir}/{timestamp}__run_{id}/` with `config.json` and an empty log.
pub fn start_run(ctx: &RunContext) -> RegistryResult<RunPaths> {
    let timestamp = ctx.started_at.format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let root = ctx.run_dir.join(format!("{timestamp}__run_{}", ctx.run_id));

    create_dir_all(&root)?;

    let config_path = root.join("config.json");
    let logs_path = root.join("logs.ndjson");
    let result_path = root.join("result.json");

    let config = RunConfig {
        run_id: ctx.run_id.clone(),
        started_at: ctx.started_at.to_rfc3339(),
        command: ctx.command.clone(),
        options: ctx.options.clone(),
        git: collect_git_info(),
    };
    write_json_atomic(&config_path, &config)?;

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&logs_path)?;

    Ok(RunPaths {
        root,
        logs_path,
        result_path,
    })
}

pub fn write_result<T: Serialize>(paths: &RunPaths, result: &T) -> RegistryResult<()> {
    write_json_atomic(&paths.result_path, result)?;
    Ok(())
}

pub fn collect_git_info() -> GitInfo {
    let commit = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
            } else {
                None
            }
        })
        .filter(|value| !value.is_empty());

    let dirty = Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| !output.stdout.is_empty());

    GitInfo { commit, dirty }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_run_lays_out_the_run_directory() {
        let run_dir = std::env::temp_dir().join(format!("arbor_runs_{}", uuid::Uuid::new_v4()));
        let ctx = RunContext {
            run_id: "abc".to_string(),
            started_at: Utc::now(),
            command: "import".to_string(),
            run_dir: run_dir.clone(),
            options: serde_json::json!({"bulk": false}),
        };

        let paths = start_run(&ctx).expect("start run");
        assert!(paths.root.starts_with(&run_dir));
        assert!(paths.root.to_string_lossy().ends_with("__run_abc"));
        assert!(paths.logs_path.exists());

        let config: Value = serde_json::from_str(
            &std::fs::read_to_string(paths.root.join("config.json")).expect("config"),
        )
        .expect("json");
        assert_eq!(config["command"], "import");
        assert_eq!(config["options"]["bulk"], false);

        write_result(&paths, &serde_json::json!({"ok": true})).expect("result");
        assert!(paths.result_path.exists());
        let _ = std::fs::remove_dir_all(run_dir);
    }
}
