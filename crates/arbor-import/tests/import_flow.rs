use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use arbor_core::{MemoryStore, Record, ReferenceMap, ResponseStyle, SaveError};
use arbor_import::{ImportError, ImportOptions, Importer, TreeSaver};
use arbor_plan::{DataPlan, ObjectGroup, load_plan};
use serde_json::{Value, json};

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn example_plan() -> (DataPlan, PathBuf) {
    let plan_path = repo_root().join("plans/examples/accounts-contacts.plan.json");
    let validated = load_plan(&plan_path).expect("example plan is valid");
    let base_dir = plan_path.parent().expect("plan dir").to_path_buf();
    (validated.plan, base_dir)
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("arbor_{name}_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

fn write_json(dir: &Path, name: &str, value: &Value) {
    std::fs::write(
        dir.join(name),
        serde_json::to_vec_pretty(value).expect("serialize"),
    )
    .expect("write fixture");
}

fn field(record: &Record, name: &str) -> String {
    record
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("field {name} missing"))
        .to_string()
}

#[tokio::test]
async fn single_account_group_records_its_reference() {
    let dir = scratch_dir("single");
    write_json(
        &dir,
        "Account.json",
        &json!([{"attributes": {"type": "Account", "referenceId": "AccountRef1"}, "Name": "Acme"}]),
    );
    let plan = DataPlan::new(vec![
        ObjectGroup::new("Account", vec!["Account.json".to_string()]).save_refs(true),
    ]);

    let store = MemoryStore::new().with_key_prefix("Account", "001");
    let importer = Importer::new(
        TreeSaver::new(&store),
        ImportOptions::default().with_base_dir(&dir),
    );
    let report = importer.run_import(&plan, None).await.expect("import");

    assert!(report.result.is_success());
    assert_eq!(report.result.records.len(), 1);
    assert_eq!(report.result.records[0].reference_id, "@AccountRef1");
    assert_eq!(report.result.records[0].object_type, "Account");
    assert!(report.result.records[0].id.starts_with("001"));
    assert_eq!(
        report.references.get("@AccountRef1"),
        Some(report.result.records[0].id.as_str())
    );
    assert_eq!(report.result.object_types(), ["Account".to_string()]);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn example_plan_links_contacts_to_saved_accounts() {
    let (plan, base_dir) = example_plan();
    let store = MemoryStore::new();
    let importer = Importer::new(
        TreeSaver::new(&store),
        ImportOptions::default().with_base_dir(base_dir),
    );

    let report = importer.run_import(&plan, None).await.expect("import");
    assert!(report.result.is_success(), "errors: {:?}", report.result.errors());
    assert_eq!(report.result.records.len(), 5);
    assert_eq!(
        report.result.object_types(),
        ["Account".to_string(), "Contact".to_string()]
    );

    let accounts = store.records("Account");
    let contacts = store.records("Contact");
    assert_eq!(field(&contacts[0], "AccountId"), field(&accounts[0], "Id"));
    assert_eq!(field(&contacts[1], "AccountId"), field(&accounts[0], "Id"));
    assert_eq!(field(&contacts[2], "AccountId"), field(&accounts[1], "Id"));
    assert_eq!(
        store.save_calls(),
        vec![("Account".to_string(), 2), ("Contact".to_string(), 3)]
    );
}

#[tokio::test]
async fn rejected_parent_cascades_to_dependent_children() {
    let (plan, base_dir) = example_plan();
    let store = MemoryStore::new();
    store.reject(
        "AccountRef2",
        SaveError::new("REQUIRED_FIELD_MISSING", "Required fields are missing", vec!["Name".to_string()]),
    );
    let importer = Importer::new(
        TreeSaver::new(&store),
        ImportOptions::default().with_base_dir(base_dir),
    );

    let report = importer.run_import(&plan, None).await.expect("run completes");
    let failed: Vec<&str> = report
        .result
        .failures
        .iter()
        .map(|failure| failure.reference_id.as_str())
        .collect();
    assert_eq!(failed, vec!["@AccountRef2", "@ContactRef3"]);
    assert_eq!(report.result.records.len(), 3);
    assert!(!report.references.contains("@AccountRef2"));
    assert!(
        report
            .result
            .warnings
            .iter()
            .any(|warning| warning.contains("@AccountRef2")),
        "warnings: {:?}",
        report.result.warnings
    );

    let errors = report.result.errors();
    assert!(errors[0].starts_with("@AccountRef2 (Account): REQUIRED_FIELD_MISSING"));
    assert_eq!(store.records("Contact").len(), 2);
}

#[tokio::test]
async fn errors_only_responses_leave_successes_unconfirmed() {
    let (plan, base_dir) = example_plan();
    let store = MemoryStore::new().with_response_style(ResponseStyle::ErrorsOnly);
    store.reject(
        "AccountRef2",
        SaveError::new("DUPLICATE_VALUE", "duplicate value found", Vec::new()),
    );
    let importer = Importer::new(
        TreeSaver::new(&store),
        ImportOptions::default().with_base_dir(base_dir),
    );

    let report = importer.run_import(&plan, None).await.expect("run completes");
    assert_eq!(report.result.unconfirmed, vec!["@AccountRef1".to_string()]);
    assert!(report.references.is_empty());
    assert_eq!(report.result.failures.len(), 4);
    assert!(report.result.records.is_empty());
}

#[tokio::test]
async fn seeded_references_resolve_without_a_parent_group() {
    let (plan, base_dir) = example_plan();
    let store = MemoryStore::new();
    let seed: ReferenceMap = [
        ("@AccountRef1".to_string(), "001SEED1".to_string()),
        ("AccountRef2".to_string(), "001SEED2".to_string()),
    ]
    .into_iter()
    .collect();
    let contacts_only = DataPlan::new(vec![plan.groups[1].clone()]);

    let importer = Importer::new(
        TreeSaver::new(&store),
        ImportOptions::default().with_base_dir(base_dir),
    );
    let report = importer
        .run_import(&contacts_only, Some(seed))
        .await
        .expect("import");

    assert!(report.result.is_success());
    let contacts = store.records("Contact");
    assert_eq!(field(&contacts[2], "AccountId"), "001SEED2");
    assert_eq!(report.references.len(), 2);
}

#[tokio::test]
async fn nested_tree_file_imports_children_with_parent_ids() {
    let store = MemoryStore::new().with_relationship("Account", "Contacts", "Contact", "AccountId");
    let importer = Importer::new(
        TreeSaver::new(&store),
        ImportOptions::default().with_base_dir(repo_root().join("data/examples")),
    );

    let report = importer
        .import_files(&["Account-tree.json".to_string()], None)
        .await
        .expect("import");

    assert!(report.result.is_success());
    let types: Vec<&str> = report
        .result
        .records
        .iter()
        .map(|record| record.object_type.as_str())
        .collect();
    assert_eq!(types, vec!["Account", "Contact", "Contact"]);

    let account_id = field(&store.records("Account")[0], "Id");
    for contact in store.records("Contact") {
        assert_eq!(field(&contact, "AccountId"), account_id);
    }
    assert_eq!(report.references.len(), 3);
}

#[tokio::test]
async fn load_failure_stops_the_run_before_the_group_is_saved() {
    let (mut plan, base_dir) = example_plan();
    plan.groups[1].files.push("../../data/examples/Missing.json".to_string());
    let store = MemoryStore::new();
    let importer = Importer::new(
        TreeSaver::new(&store),
        ImportOptions::default().with_base_dir(base_dir),
    );

    let err = importer.run_import(&plan, None).await.expect_err("missing file");
    match err {
        ImportError::SourceLoad { path, .. } => assert!(path.ends_with("Missing.json")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.save_calls(), vec![("Account".to_string(), 2)]);
}

#[tokio::test]
async fn xml_record_files_are_rejected() {
    let dir = scratch_dir("xml");
    std::fs::write(dir.join("Account.xml"), "<records/>").expect("write xml");
    let plan = DataPlan::new(vec![ObjectGroup::new("Account", vec!["Account.xml".to_string()])]);
    let store = MemoryStore::new();
    let importer = Importer::new(
        TreeSaver::new(&store),
        ImportOptions::default().with_base_dir(&dir),
    );

    let err = importer.run_import(&plan, None).await.expect_err("xml");
    assert!(err.to_string().contains("unsupported content type"), "{err}");
    assert!(store.save_calls().is_empty());

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn records_without_type_take_the_group_type() {
    let dir = scratch_dir("untyped");
    write_json(&dir, "Lead.json", &json!({"records": [{"LastName": "Doe", "referenceId": "LeadRef1"}]}));
    let plan = DataPlan::new(vec![ObjectGroup::new("Lead", vec!["Lead.json".to_string()]).save_refs(true)]);
    let store = MemoryStore::new();
    let importer = Importer::new(
        TreeSaver::new(&store),
        ImportOptions::default().with_base_dir(&dir),
    );

    let report = importer.run_import(&plan, None).await.expect("import");
    assert!(matches!(
        report.result.records.first(),
        Some(record) if record.object_type == "Lead" && record.reference_id == "@LeadRef1"
    ));

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn abort_flag_stops_before_the_next_save() {
    let (plan, base_dir) = example_plan();
    let store = MemoryStore::new();
    let abort = Arc::new(AtomicBool::new(true));
    let importer = Importer::new(
        TreeSaver::new(&store),
        ImportOptions::default()
            .with_base_dir(base_dir)
            .with_abort(abort),
    );

    let err = importer.run_import(&plan, None).await.expect_err("aborted");
    assert!(matches!(err, ImportError::Aborted { ref object_type } if object_type == "Account"));
    assert!(store.save_calls().is_empty());
}

#[tokio::test]
async fn invalid_plan_document_is_rejected_before_loading() {
    let store = MemoryStore::new();
    let importer = Importer::new(TreeSaver::new(&store), ImportOptions::default());

    let err = importer
        .import_plan_json(&json!([{"files": []}]), None)
        .await
        .expect_err("invalid plan");
    match err {
        ImportError::Validation(report) => {
            let mut codes = report.error_codes();
            codes.sort_unstable();
            assert_eq!(codes, vec!["empty_list", "missing_field"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn records_without_reference_ids_stay_out_of_the_map() {
    let dir = scratch_dir("anonymous");
    write_json(&dir, "first.json", &json!([{"Name": "Acme"}]));
    write_json(&dir, "second.json", &json!([{"Name": "Globex"}]));
    let plan = DataPlan::new(vec![
        ObjectGroup::new("Account", vec!["first.json".to_string()]).save_refs(true),
        ObjectGroup::new("Account", vec!["second.json".to_string()]).save_refs(true),
    ]);

    let store = MemoryStore::new();
    let importer = Importer::new(
        TreeSaver::new(&store),
        ImportOptions::default().with_base_dir(&dir),
    );
    let report = importer.run_import(&plan, None).await.expect("import");

    assert!(report.result.is_success());
    assert_eq!(report.result.records.len(), 2);
    assert_eq!(report.result.records[0].reference_id, "Account#1");
    assert!(report.references.is_empty());

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn standalone_files_are_loaded_once_and_typed_from_the_first_record() {
    let dir = scratch_dir("files");
    write_json(
        &dir,
        "accounts.json",
        &json!([
            {"attributes": {"type": "Account", "referenceId": "AccountRef1"}, "Name": "Acme"},
            {"referenceId": "@AccountRef2", "Name": "Globex"}
        ]),
    );
    write_json(
        &dir,
        "contacts.json",
        &json!([{"attributes": {"type": "Contact", "referenceId": "ContactRef1"}, "LastName": "Doe", "AccountId": "@AccountRef2"}]),
    );
    let store = MemoryStore::new();
    let importer = Importer::new(
        TreeSaver::new(&store),
        ImportOptions::default().with_base_dir(&dir),
    );

    let report = importer
        .import_files(&["accounts.json".to_string(), "contacts.json".to_string()], None)
        .await
        .expect("import");

    assert!(report.result.is_success());
    let types: Vec<&str> = report
        .result
        .records
        .iter()
        .map(|record| record.object_type.as_str())
        .collect();
    assert_eq!(types, vec!["Account", "Account", "Contact"]);
    assert_eq!(
        store.save_calls(),
        vec![("Account".to_string(), 2), ("Contact".to_string(), 1)]
    );
    let globex = report.references.get("@AccountRef2").expect("globex saved");
    assert_eq!(field(&store.records("Contact")[0], "AccountId"), globex);

    let _ = std::fs::remove_dir_all(dir);
}
