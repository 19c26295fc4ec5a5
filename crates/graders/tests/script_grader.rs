//! End-to-end exercise of the `script` grader against a real sandboxed
//! subprocess, modeling the literal scenarios the core is checked against:
//! a grader script that reads the submission and prints a score.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;

use gradekeep_graders::{GradeContext, Grader, ScriptGrader};
use gradekeep_sandbox::Limits;
use gradekeep_store::{FileRecord, SubmissionRecord, TestRecord, TesterKind};
use tokio_util::sync::CancellationToken;
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

fn file_record(key: &str, name: &str, path: &std::path::Path) -> FileRecord {
    FileRecord {
        uuid: Uuid::new_v4(),
        key: key.to_string(),
        name: name.to_string(),
        path: path.to_string_lossy().to_string(),
        owner: Uuid::new_v4(),
        created_time: "0".to_string(),
        modified_time: "0".to_string(),
    }
}

fn base_test(path_script: &str) -> TestRecord {
    TestRecord {
        uuid: Uuid::new_v4(),
        name: "add".to_string(),
        tester: TesterKind::Script,
        maxscore: 10.0,
        path_script: path_script.to_string(),
        owner: Uuid::new_v4(),
        assignment: Uuid::new_v4(),
    }
}

fn base_submission() -> SubmissionRecord {
    SubmissionRecord {
        uuid: Uuid::new_v4(),
        owner: Uuid::new_v4(),
        assignment: Uuid::new_v4(),
    }
}

#[tokio::test]
async fn good_submission_scores_full_marks() {
    let blobs = tempfile::tempdir().unwrap();
    let grader_path = write_executable(
        blobs.path(),
        "grade_add_args.sh",
        "#!/bin/sh\n. \"./$1\"\nresult=$((a + b))\nif [ \"$result\" = \"$expected\" ]; then echo 10; else echo 0; fi\n",
    );
    let submission_path = write_executable(
        blobs.path(),
        "add_good.sh",
        "a=2\nb=3\nexpected=5\n",
    );

    let ctx = GradeContext {
        test: base_test(""),
        test_files: vec![file_record("script", "grader", &grader_path)],
        submission: base_submission(),
        submission_files: vec![file_record("", "submission", &submission_path)],
        limits: Limits::default(),
        capture_bytes: 4096,
        cancel: CancellationToken::new(),
    };

    let outcome = ScriptGrader.grade(&ctx).await.unwrap();
    assert_eq!(outcome.retcode, 0);
    assert_eq!(outcome.score, 10.0);
    assert_eq!(outcome.status, gradekeep_store::RunStatus::Complete);
}

#[tokio::test]
async fn bad_submission_scores_less_than_full_marks() {
    let blobs = tempfile::tempdir().unwrap();
    let grader_path = write_executable(
        blobs.path(),
        "grade_add_args.sh",
        "#!/bin/sh\n. \"./$1\"\nresult=$((a + b))\nif [ \"$result\" = \"$expected\" ]; then echo 10; else echo 0; fi\n",
    );
    let submission_path = write_executable(
        blobs.path(),
        "add_bad.sh",
        "a=2\nb=3\nexpected=999\n",
    );

    let ctx = GradeContext {
        test: base_test(""),
        test_files: vec![file_record("script", "grader", &grader_path)],
        submission: base_submission(),
        submission_files: vec![file_record("", "submission", &submission_path)],
        limits: Limits::default(),
        capture_bytes: 4096,
        cancel: CancellationToken::new(),
    };

    let outcome = ScriptGrader.grade(&ctx).await.unwrap();
    assert_eq!(outcome.retcode, 0);
    assert!(outcome.score < 10.0);
}

#[tokio::test]
async fn fork_bomb_submission_is_contained() {
    let blobs = tempfile::tempdir().unwrap();
    let grader_path = write_executable(
        blobs.path(),
        "grade.sh",
        "#!/bin/sh\n\"./$1\"\necho 0\n",
    );
    let submission_path = write_executable(
        blobs.path(),
        "pgm_forkbomb.sh",
        "#!/bin/sh\nwhile true; do \"$0\" & done\n",
    );

    let mut limits = Limits::default();
    limits.max_procs = 8;
    limits.wall_timeout = std::time::Duration::from_secs(2);

    let ctx = GradeContext {
        test: base_test(""),
        test_files: vec![file_record("script", "grader", &grader_path)],
        submission: base_submission(),
        submission_files: vec![file_record("", "submission", &submission_path)],
        limits,
        capture_bytes: 4096,
        cancel: CancellationToken::new(),
    };

    let outcome = ScriptGrader.grade(&ctx).await.unwrap();
    assert_eq!(outcome.score, 0.0);
    assert_ne!(outcome.status, gradekeep_store::RunStatus::Complete);
}
