use std::sync::atomic::Ordering;
use std::time::Instant;

use arbor_core::{GroupOutcome, ImportResult, Record, ReferenceMap, unresolved_refs};
use arbor_plan::{DataPlan, ObjectGroup, validate_plan};
use tracing::{info, warn};

use crate::errors::ImportError;
use crate::loader::{load_file, load_group, resolve_path};
use crate::model::{ImportOptions, ImportReport};
use crate::saver::{GroupSaver, correlate};

/// Entry point for importing record files into a store.
#[derive(Debug)]
pub struct Importer<S> {
    saver: S,
    options: ImportOptions,
}

impl<S: GroupSaver> Importer<S> {
    pub fn new(saver: S, options: ImportOptions) -> Self {
        Self { saver, options }
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Validate a raw plan document, then import it.
    pub async fn import_plan_json(
        &self,
        plan_json: &serde_json::Value,
        seed: Option<ReferenceMap>,
    ) -> Result<ImportReport, ImportError> {
        let validated = validate_plan(plan_json)?;
        for warning in &validated.warnings {
            warn!(code = %warning.code, path = %warning.path, "{}", warning.message);
        }
        self.run_import(&validated.plan, seed).await
    }

    /// Import every group of `plan` in order, threading the reference map.
    ///
    /// Record rejections land in the result; load failures, whole-call save
    /// failures and aborts stop the run.
    pub async fn run_import(
        &self,
        plan: &DataPlan,
        seed: Option<ReferenceMap>,
    ) -> Result<ImportReport, ImportError> {
        let groups = plan.iter().map(|group| (group.clone(), None)).collect();
        self.run_groups(groups, seed).await
    }

    /// Import standalone record files, one group per file.
    ///
    /// Each file's object type comes from its first record. Every group saves
    /// and resolves references, so files may depend on earlier ones.
    pub async fn import_files(
        &self,
        files: &[String],
        seed: Option<ReferenceMap>,
    ) -> Result<ImportReport, ImportError> {
        let mut groups = Vec::with_capacity(files.len());
        for file in files {
            let path = resolve_path(&self.options.base_dir, file);
            let mut records = load_file(path.clone()).await?;
            let object_type = records
                .first()
                .and_then(|record| record.object_type())
                .map(str::to_string)
                .ok_or_else(|| ImportError::SourceLoad {
                    path,
                    reason: "first record has no attributes.type".to_string(),
                })?;
            for record in &mut records {
                if record.object_type().is_none() {
                    record.set_object_type(&object_type);
                }
            }
            let group = ObjectGroup::new(object_type, vec![file.clone()])
                .save_refs(true)
                .resolve_refs(true);
            groups.push((group, Some(records)));
        }
        self.run_groups(groups, seed).await
    }

    /// Groups paired with their records when already loaded.
    async fn run_groups(
        &self,
        groups: Vec<(ObjectGroup, Option<Vec<Record>>)>,
        seed: Option<ReferenceMap>,
    ) -> Result<ImportReport, ImportError> {
        let start = Instant::now();
        let mut references = seed.unwrap_or_default();
        let mut result = ImportResult::new();

        info!(groups = groups.len(), seeded = references.len(), "import started");

        for (group, loaded) in groups {
            let records = match loaded {
                Some(records) => records,
                None => load_group(&self.options.base_dir, &group).await?,
            };
            let outcome = self.import_group(&group, records, &mut references).await?;
            result.absorb(&outcome);
        }

        info!(
            records = result.records.len(),
            failures = result.failures.len(),
            unconfirmed = result.unconfirmed.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "import finished"
        );
        Ok(ImportReport { result, references })
    }

    async fn import_group(
        &self,
        group: &ObjectGroup,
        mut records: Vec<Record>,
        references: &mut ReferenceMap,
    ) -> Result<GroupOutcome, ImportError> {
        let object_type = group.sobject.as_str();
        let mut warnings = Vec::new();

        if group.resolve_refs {
            let resolution = references.resolve_records(&mut records);
            info!(object_type, resolved = resolution.resolved, "references resolved");
        }
        for token in unresolved_refs(&records) {
            warn!(object_type, token = %token, "unresolved reference submitted as-is");
            warnings.push(format!("{object_type}: unresolved reference {token}"));
        }

        if self.is_aborted() {
            warn!(object_type, "import aborted");
            return Err(ImportError::Aborted {
                object_type: object_type.to_string(),
            });
        }

        let response = self.saver.save_group(object_type, &records).await?;
        let mut outcome = correlate(object_type, &records, response);
        warnings.append(&mut outcome.warnings);
        outcome.warnings = warnings;

        if group.save_refs {
            for (token, id) in outcome.assigned_ids() {
                if let Some(previous) = references.insert(token, id) {
                    if previous != id {
                        warn!(token, previous = %previous, id, "reference id overwritten");
                    }
                }
            }
        }

        info!(
            object_type,
            records = outcome.outcomes.len(),
            failed = outcome.has_errors(),
            "group saved"
        );
        Ok(outcome)
    }

    fn is_aborted(&self) -> bool {
        self.options
            .abort
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}
