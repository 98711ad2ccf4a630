use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use arbor_core::{
    BulkIngest, JobState, Record, SaveError, SaveResponse, SaveResultEntry, write_json_atomic,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ImportError;
use crate::saver::GroupSaver;

/// Polling behaviour of a [`BulkSaver`].
#[derive(Debug, Clone)]
pub struct BulkOptions {
    pub poll_interval: Duration,
    /// Total time to wait for a job before giving up.
    pub wait: Duration,
    /// Where submitted jobs are recorded so they can be resumed.
    pub cache_path: Option<PathBuf>,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            wait: Duration::from_secs(600),
            cache_path: None,
        }
    }
}

/// A submitted job as recorded in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedJob {
    pub object_type: String,
    pub submitted_at: DateTime<Utc>,
    pub records: usize,
}

/// Jobs that were submitted but whose results were not collected yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobCache {
    #[serde(skip)]
    path: Option<PathBuf>,
    jobs: BTreeMap<String, CachedJob>,
}

impl JobCache {
    /// Cache that lives only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Read the cache file, starting empty when it does not exist yet.
    pub fn open(path: &Path) -> Result<Self, ImportError> {
        let mut cache = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str::<JobCache>(&contents)?
        } else {
            JobCache::default()
        };
        cache.path = Some(path.to_path_buf());
        Ok(cache)
    }

    pub fn get(&self, job_id: &str) -> Option<&CachedJob> {
        self.jobs.get(job_id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = (&str, &CachedJob)> {
        self.jobs.iter().map(|(id, job)| (id.as_str(), job))
    }

    pub fn insert(&mut self, job_id: &str, job: CachedJob) -> Result<(), ImportError> {
        self.jobs.insert(job_id.to_string(), job);
        self.persist()
    }

    pub fn remove(&mut self, job_id: &str) -> Result<Option<CachedJob>, ImportError> {
        let removed = self.jobs.remove(job_id);
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    fn persist(&self) -> Result<(), ImportError> {
        if let Some(path) = &self.path {
            write_json_atomic(path, self)?;
        }
        Ok(())
    }
}

/// Saves a group through an asynchronous bulk job.
///
/// Only flat records are supported; records with nested children fail
/// individually with `NESTED_NOT_SUPPORTED`.
#[derive(Debug)]
pub struct BulkSaver<B> {
    ingest: B,
    options: BulkOptions,
    cache: Mutex<JobCache>,
}

impl<B: BulkIngest> BulkSaver<B> {
    pub fn new(ingest: B, options: BulkOptions) -> Result<Self, ImportError> {
        let cache = match &options.cache_path {
            Some(path) => JobCache::open(path)?,
            None => JobCache::in_memory(),
        };
        Ok(Self {
            ingest,
            options,
            cache: Mutex::new(cache),
        })
    }

    /// Snapshot of the jobs still awaiting results.
    pub fn pending_jobs(&self) -> JobCache {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Continue waiting on a job recorded by an earlier run.
    pub async fn resume(&self, job_id: &str) -> Result<(String, SaveResponse), ImportError> {
        let object_type = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .map(|job| job.object_type.clone())
            .ok_or_else(|| ImportError::UnknownJob(job_id.to_string()))?;
        info!(job_id, object_type = %object_type, "resuming bulk job");
        let response = self.await_job(&object_type, job_id).await?;
        Ok((object_type, response))
    }

    async fn await_job(&self, object_type: &str, job_id: &str) -> Result<SaveResponse, ImportError> {
        let started = Instant::now();
        loop {
            let status = self.ingest.poll(job_id).await.map_err(|source| ImportError::Save {
                object_type: object_type.to_string(),
                source,
            })?;
            debug!(
                job_id,
                state = ?status.state,
                processed = status.records_processed,
                failed = status.records_failed,
                "bulk job polled"
            );

            match status.state {
                JobState::JobComplete => break,
                JobState::Failed | JobState::Aborted => {
                    self.forget(job_id)?;
                    return Err(ImportError::BulkFailed {
                        job_id: job_id.to_string(),
                        state: status.state,
                        message: status.error_message.unwrap_or_default(),
                    });
                }
                _ => {}
            }

            if started.elapsed() >= self.options.wait {
                warn!(job_id, object_type, "bulk job did not finish in time");
                return Err(ImportError::BulkTimeout {
                    job_id: job_id.to_string(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }

        let response = self
            .ingest
            .fetch_results(job_id)
            .await
            .map_err(|source| ImportError::Save {
                object_type: object_type.to_string(),
                source,
            })?;
        self.forget(job_id)?;
        Ok(response)
    }

    fn remember(&self, job_id: &str, object_type: &str, records: usize) -> Result<(), ImportError> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).insert(
            job_id,
            CachedJob {
                object_type: object_type.to_string(),
                submitted_at: Utc::now(),
                records,
            },
        )
    }

    fn forget(&self, job_id: &str) -> Result<(), ImportError> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id)?;
        Ok(())
    }
}

#[async_trait]
impl<B: BulkIngest> GroupSaver for BulkSaver<B> {
    async fn save_group(
        &self,
        object_type: &str,
        records: &[Record],
    ) -> Result<SaveResponse, ImportError> {
        let (flat, nested): (Vec<&Record>, Vec<&Record>) =
            records.iter().partition(|record| !record.has_children());

        let mut rejected = Vec::new();
        for record in &nested {
            let error = SaveError::new(
                "NESTED_NOT_SUPPORTED",
                "bulk jobs accept flat records only",
                record.relationships(),
            );
            rejected.push(SaveResultEntry {
                reference_id: record.reference_id(),
                id: None,
                errors: vec![error.clone()],
            });
            for child in record.descendants() {
                rejected.push(SaveResultEntry {
                    reference_id: child.record.reference_id(),
                    id: None,
                    errors: vec![error.clone()],
                });
            }
        }

        if flat.is_empty() {
            return Ok(SaveResponse {
                has_errors: !rejected.is_empty(),
                results: rejected,
            });
        }

        let flat: Vec<Record> = flat.into_iter().cloned().collect();
        let job_id = self
            .ingest
            .submit(object_type, &flat)
            .await
            .map_err(|source| ImportError::Save {
                object_type: object_type.to_string(),
                source,
            })?;
        self.remember(&job_id, object_type, flat.len())?;
        info!(job_id = %job_id, object_type, records = flat.len(), "bulk job submitted");

        let mut response = self.await_job(object_type, &job_id).await?;
        if !rejected.is_empty() {
            response.has_errors = true;
            response.results.append(&mut rejected);
        }
        Ok(response)
    }
}
