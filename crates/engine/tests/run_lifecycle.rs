//! Cross-crate exercise of the Run Engine: a Run queued against a real
//! `Store`, graded by the `script` grader in a real sandboxed subprocess,
//! and reported through a registered Reporter — the full §4.7 execution
//! sequence end to end.

use std::collections::HashMap;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use gradekeep_config::ReporterMoodleConfig;
use gradekeep_engine::{Engine, EngineLimits, InMemoryUserDirectory, UserDirectory};
use gradekeep_graders::GraderRegistry;
use gradekeep_reporters::{MoodleReporter, ReporterRegistry};
use gradekeep_sandbox::Limits;
use gradekeep_store::{RunStatus, Store, User};
use uuid::Uuid;

fn write_executable(dir: &std::path::Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn engine(store: Arc<Store>, users: Arc<dyn UserDirectory>) -> Engine {
    let graders = Arc::new(GraderRegistry::with_builtins());
    let reporters = Arc::new(ReporterRegistry::with_builtins(MoodleReporter::new(
        ReporterMoodleConfig::default(),
    )));
    Engine::new(
        store,
        graders,
        reporters,
        users,
        EngineLimits {
            sandbox: Limits::default(),
            capture_bytes: 4096,
            worker_count: 2,
            queue_depth: 16,
        },
    )
}

async fn wait_complete(engine: &Engine, run: &Uuid) {
    for _ in 0..100 {
        if engine.is_complete(run).unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run did not reach a terminal state in time");
}

#[tokio::test]
async fn script_grader_run_reports_through_the_null_reporter() {
    let blobs = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        Store::open(db_dir.path().join("db.redb"), db_dir.path().join("files")).unwrap(),
    );

    let grader_path = write_executable(
        blobs.path(),
        "grade.sh",
        "#!/bin/sh\n. \"./$1\"\nresult=$((a + b))\nif [ \"$result\" = \"$expected\" ]; then echo 10; else echo 0; fi\n",
    );
    let submission_path = write_executable(blobs.path(), "add_good.sh", "a=2\nb=3\nexpected=5\n");

    let owner = Uuid::new_v4();
    let assignment = store.create_assignment(owner, "hw1").unwrap();
    let script_file = store
        .create_file(owner, "script", &std::fs::read(&grader_path).unwrap(), "grade.sh")
        .unwrap();
    let reporter = {
        let mut fields = HashMap::new();
        fields.insert("mod".to_string(), "null".to_string());
        store.create_reporter(owner, fields).unwrap()
    };

    let mut test_fields = HashMap::new();
    test_fields.insert("name".to_string(), "add".to_string());
    test_fields.insert("tester".to_string(), "script".to_string());
    test_fields.insert("maxscore".to_string(), "10".to_string());
    test_fields.insert("path_script".to_string(), String::new());
    test_fields.insert("owner".to_string(), owner.to_string());
    test_fields.insert("assignment".to_string(), assignment.to_string());
    let test = store.create_test(test_fields).unwrap();
    store.test_add_files(&test, &[script_file]).unwrap();
    store.test_add_reporters(&test, &[reporter]).unwrap();

    let submission_file = store
        .create_file(owner, "", &std::fs::read(&submission_path).unwrap(), "add_good.sh")
        .unwrap();
    let mut sub_fields = HashMap::new();
    sub_fields.insert("owner".to_string(), owner.to_string());
    sub_fields.insert("assignment".to_string(), assignment.to_string());
    let submission = store.create_submission(sub_fields).unwrap();
    store.submission_add_files(&submission, &[submission_file]).unwrap();

    let users: Arc<dyn UserDirectory> = Arc::new(InMemoryUserDirectory::new());
    let engine = engine(store.clone(), users);

    let run = engine.create_run(test, submission, owner).unwrap();
    wait_complete(&engine, &run).await;

    let record = engine.get_run(&run).unwrap();
    assert_eq!(record.status, RunStatus::Complete);
    assert_eq!(record.score, 10.0);
    assert!(record.output.contains(&format!("reporter {reporter}: ok")));

    engine.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn reporter_without_a_known_user_is_recorded_but_does_not_fail_the_run() {
    let db_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        Store::open(db_dir.path().join("db.redb"), db_dir.path().join("files")).unwrap(),
    );

    let owner = Uuid::new_v4();
    let assignment = store.create_assignment(owner, "hw1").unwrap();
    let reporter = {
        let mut fields = HashMap::new();
        fields.insert("mod".to_string(), "null".to_string());
        store.create_reporter(owner, fields).unwrap()
    };

    let mut test_fields = HashMap::new();
    test_fields.insert("name".to_string(), "smoke".to_string());
    test_fields.insert("tester".to_string(), "null".to_string());
    test_fields.insert("maxscore".to_string(), "10".to_string());
    test_fields.insert("path_script".to_string(), String::new());
    test_fields.insert("owner".to_string(), owner.to_string());
    test_fields.insert("assignment".to_string(), assignment.to_string());
    let test = store.create_test(test_fields).unwrap();
    store.test_add_reporters(&test, &[reporter]).unwrap();

    let mut sub_fields = HashMap::new();
    sub_fields.insert("owner".to_string(), owner.to_string());
    sub_fields.insert("assignment".to_string(), assignment.to_string());
    let submission = store.create_submission(sub_fields).unwrap();

    // No User registered for `owner` — the reporter step must degrade
    // gracefully instead of panicking or failing the Run.
    let users: Arc<dyn UserDirectory> = Arc::new(InMemoryUserDirectory::new());
    let engine = engine(store.clone(), users);

    let run = engine.create_run(test, submission, owner).unwrap();
    wait_complete(&engine, &run).await;

    let record = engine.get_run(&run).unwrap();
    assert_eq!(record.status, RunStatus::Complete);
    assert!(record.output.contains("reporters skipped"));

    engine.shutdown(Duration::from_secs(2)).await;
}

#[test]
fn user_field_extraction_ignores_unknown_extra_keys() {
    let uuid = Uuid::new_v4();
    let mut fields = HashMap::new();
    fields.insert("authmod".to_string(), "moodle".to_string());
    fields.insert("moodle_id".to_string(), "7".to_string());
    fields.insert("display_name".to_string(), "Ada".to_string());
    let user = User::from_fields(uuid, &fields).unwrap();
    assert_eq!(user.authmod, "moodle");
    assert_eq!(user.extra.get("display_name").map(String::as_str), Some("Ada"));
}
