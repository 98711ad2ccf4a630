use std::path::{Path, PathBuf};
use std::time::Duration;

use arbor_core::MemoryStore;
use arbor_import::{BulkOptions, BulkSaver, ImportError, ImportOptions, Importer, JobCache, correlate};
use arbor_plan::load_plan;

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn fast_options(cache_path: Option<PathBuf>, wait: Duration) -> BulkOptions {
    BulkOptions {
        poll_interval: Duration::from_millis(1),
        wait,
        cache_path,
    }
}

#[tokio::test]
async fn bulk_saver_imports_the_example_plan() {
    let plan_path = repo_root().join("plans/examples/accounts-contacts.plan.json");
    let plan = load_plan(&plan_path).expect("plan").plan;
    let store = MemoryStore::new().with_bulk_polls(3);
    let saver = BulkSaver::new(&store, fast_options(None, Duration::from_secs(5))).expect("saver");
    let importer = Importer::new(
        saver,
        ImportOptions::default().with_base_dir(plan_path.parent().expect("plan dir")),
    );

    let report = importer.run_import(&plan, None).await.expect("import");
    assert!(report.result.is_success(), "errors: {:?}", report.result.errors());
    assert_eq!(report.result.records.len(), 5);
    assert_eq!(store.records("Contact").len(), 3);
    assert!(store.save_calls().is_empty(), "bulk path must not use tree saves");
}

#[tokio::test]
async fn nested_records_fail_individually_in_bulk_mode() {
    let store = MemoryStore::new().with_relationship("Account", "Contacts", "Contact", "AccountId");
    let saver = BulkSaver::new(&store, fast_options(None, Duration::from_secs(5))).expect("saver");
    let importer = Importer::new(
        saver,
        ImportOptions::default().with_base_dir(repo_root().join("data/examples")),
    );

    let report = importer
        .import_files(&["Account-tree.json".to_string()], None)
        .await
        .expect("import completes");

    assert_eq!(report.result.failures.len(), 3);
    assert!(
        report
            .result
            .failures
            .iter()
            .all(|failure| failure.errors[0].status_code == "NESTED_NOT_SUPPORTED")
    );
    assert!(report.result.unconfirmed.is_empty());
    assert!(store.records("Account").is_empty());
}

#[tokio::test]
async fn timed_out_job_stays_cached_and_can_be_resumed() {
    let dir = std::env::temp_dir().join(format!("arbor_bulk_{}", uuid::Uuid::new_v4()));
    let cache_path = dir.join("jobs.json");
    let store = MemoryStore::new().with_bulk_polls(4);
    let records = arbor_core::parse_records(serde_json::json!([
        {"attributes": {"type": "Account", "referenceId": "AccountRef1"}, "Name": "Acme"}
    ]))
    .expect("records");

    let impatient = BulkSaver::new(&store, fast_options(Some(cache_path.clone()), Duration::ZERO))
        .expect("saver");
    let err = arbor_import::GroupSaver::save_group(&impatient, "Account", &records)
        .await
        .expect_err("timeout");
    let job_id = match err {
        ImportError::BulkTimeout { job_id, .. } => job_id,
        other => panic!("unexpected error: {other}"),
    };

    let cache = JobCache::open(&cache_path).expect("cache file");
    let cached = cache.get(&job_id).expect("job cached");
    assert_eq!(cached.object_type, "Account");
    assert_eq!(cached.records, 1);

    let patient = BulkSaver::new(&store, fast_options(Some(cache_path.clone()), Duration::from_secs(5)))
        .expect("saver");
    let (object_type, response) = patient.resume(&job_id).await.expect("resume");
    assert_eq!(object_type, "Account");

    let outcome = correlate(&object_type, &records, response);
    assert_eq!(outcome.assigned_ids().count(), 1);
    assert!(JobCache::open(&cache_path).expect("cache").get(&job_id).is_none());

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn resuming_an_unknown_job_fails() {
    let store = MemoryStore::new();
    let saver = BulkSaver::new(&store, BulkOptions::default()).expect("saver");
    let err = saver.resume("750missing").await.expect_err("unknown job");
    assert!(matches!(err, ImportError::UnknownJob(ref id) if id == "750missing"));
}
