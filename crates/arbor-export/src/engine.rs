use std::time::Instant;

use arbor_core::{ExportSummary, QueryStore};
use tracing::info;

use crate::anonymize::anonymize;
use crate::errors::ExportError;
use crate::model::{ExportOptions, ExportOutput};
use crate::planner::collect;
use crate::serializer::{plan_layout, tree_layout, write_layout};

/// Entry point for exporting a record tree into importable files.
#[derive(Debug, Clone)]
pub struct Exporter<Q> {
    store: Q,
}

impl<Q: QueryStore> Exporter<Q> {
    pub fn new(store: Q) -> Self {
        Self { store }
    }

    /// Query, anonymize and write the records selected by `query`.
    ///
    /// Nothing is written unless every query succeeded.
    pub async fn run_export(
        &self,
        query: &str,
        options: &ExportOptions,
    ) -> Result<ExportOutput, ExportError> {
        let start = Instant::now();
        info!(query, "export started");

        let collected = collect(&self.store, query).await?;
        let root_type = collected.root_type.clone();

        let mut summary = ExportSummary::default();
        for fetched in &collected.records {
            summary.record(&fetched.object_type, 1);
        }
        let total = summary.total();

        let exported = anonymize(collected, options.prefix.as_deref())?;
        let layout = if options.plan || total > options.max_records_per_file {
            plan_layout(&root_type, &exported)?
        } else {
            match tree_layout(&root_type, &exported) {
                Some(layout) => layout,
                None => {
                    info!(object_type = %root_type, "records reference outside their tree; writing a plan");
                    plan_layout(&root_type, &exported)?
                }
            }
        };
        let warnings = layout.warnings.clone();

        let (files, plan_path) = write_layout(&options.output_dir, &layout)?;
        info!(
            object_type = %root_type,
            records = total,
            files = files.len(),
            plan = plan_path.is_some(),
            duration_ms = start.elapsed().as_millis() as u64,
            "export finished"
        );

        Ok(ExportOutput {
            files,
            plan_path,
            summary,
            warnings,
        })
    }
}
