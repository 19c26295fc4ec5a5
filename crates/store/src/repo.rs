//! [`Store`]: the typed façade over [`crate::kv::ObjectRepository`] and
//! [`crate::files::FileStore`] that the rest of the workspace is built
//! against. Every public method here corresponds to one of the CRUD /
//! reference-set operations named in the data model, wired to the concrete
//! schemas in [`crate::schema`].

use std::collections::HashMap;
use std::path::Path;

use uuid::Uuid;

use crate::error::{RepoError, RepoResult};
use crate::files::FileStore;
use crate::kv::ObjectRepository;
use crate::schema::*;

pub struct Store {
    pub objects: ObjectRepository,
    pub files: FileStore,
}

impl Store {
    pub fn open(db_path: impl AsRef<Path>, files_root: impl AsRef<Path>) -> RepoResult<Self> {
        Ok(Self {
            objects: ObjectRepository::open(db_path)?,
            files: FileStore::new(files_root)?,
        })
    }

    // ── Files (C2) ───────────────────────────────────────────────────────

    pub fn create_file(&self, owner: Uuid, key: &str, data: &[u8], filename: &str) -> RepoResult<Uuid> {
        let (_blob_uuid, path) = self.files.ingest(data, filename)?;
        let name = path.file_name().and_then(|s| s.to_str()).unwrap_or(filename).to_string();
        let mut fields = HashMap::new();
        fields.insert("key".to_string(), key.to_string());
        fields.insert("name".to_string(), name);
        fields.insert("path".to_string(), path.to_string_lossy().into_owned());
        fields.insert("owner".to_string(), owner.to_string());
        self.objects.create(KIND_FILE, FILE_SCHEMA, fields)
    }

    pub fn get_file(&self, uuid: &Uuid) -> RepoResult<FileRecord> {
        let fields = self.objects.get_all(KIND_FILE, uuid)?;
        FileRecord::from_fields(*uuid, &fields)
    }

    pub fn list_files(&self) -> RepoResult<Vec<Uuid>> {
        self.objects.list(KIND_FILE)
    }

    /// Expands a zip archive (C9) into one File record per entry, keyed
    /// `from_<entry name>` the way a directly-uploaded file is keyed by its
    /// form field name. Returns the new File uuids in archive order.
    pub fn ingest_archive(&self, owner: Uuid, archive_bytes: &[u8]) -> RepoResult<Vec<Uuid>> {
        let mut uuids = Vec::new();
        for entry in crate::archive::extract_entries(archive_bytes)? {
            uuids.push(self.create_file(owner, &entry.key, &entry.data, &entry.name)?);
        }
        Ok(uuids)
    }

    pub fn delete_file(&self, uuid: &Uuid) -> RepoResult<()> {
        if self.is_file_referenced(uuid)? {
            return Err(RepoError::InUse {
                kind: KIND_FILE,
                uuid: uuid.to_string(),
            });
        }
        let record = self.get_file(uuid)?;
        self.objects.delete(KIND_FILE, uuid)?;
        self.files.delete_blob(Path::new(&record.path))?;
        Ok(())
    }

    fn is_file_referenced(&self, file_uuid: &Uuid) -> RepoResult<bool> {
        for test in self.objects.list(KIND_TEST)? {
            if self.objects.refset_list(KIND_TEST, &test, "files")?.contains(file_uuid) {
                return Ok(true);
            }
        }
        for submission in self.objects.list(KIND_SUBMISSION)? {
            if self
                .objects
                .refset_list(KIND_SUBMISSION, &submission, "files")?
                .contains(file_uuid)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ── Reporters (C6 records) ──────────────────────────────────────────

    pub fn create_reporter(&self, owner: Uuid, mut fields: HashMap<String, String>) -> RepoResult<Uuid> {
        let kind = ReporterMod::parse(fields.get("mod").map(String::as_str).unwrap_or_default())?;
        fields.insert("owner".to_string(), owner.to_string());
        self.objects.create(KIND_REPORTER, kind.schema(), fields)
    }

    pub fn get_reporter(&self, uuid: &Uuid) -> RepoResult<ReporterRecord> {
        let fields = self.objects.get_all(KIND_REPORTER, uuid)?;
        ReporterRecord::from_fields(*uuid, &fields)
    }

    pub fn list_reporters(&self) -> RepoResult<Vec<Uuid>> {
        self.objects.list(KIND_REPORTER)
    }

    pub fn update_reporter(&self, uuid: &Uuid, partial: HashMap<String, String>) -> RepoResult<()> {
        self.objects.update(KIND_REPORTER, uuid, partial)
    }

    pub fn delete_reporter(&self, uuid: &Uuid) -> RepoResult<()> {
        for test in self.objects.list(KIND_TEST)? {
            if self.objects.refset_list(KIND_TEST, &test, "reporters")?.contains(uuid) {
                return Err(RepoError::InUse {
                    kind: KIND_REPORTER,
                    uuid: uuid.to_string(),
                });
            }
        }
        self.objects.delete(KIND_REPORTER, uuid)
    }

    // ── Assignments ──────────────────────────────────────────────────────

    pub fn create_assignment(&self, owner: Uuid, name: &str) -> RepoResult<Uuid> {
        let mut fields = HashMap::new();
        fields.insert("name".to_string(), name.to_string());
        fields.insert("owner".to_string(), owner.to_string());
        self.objects.create(KIND_ASSIGNMENT, ASSIGNMENT_SCHEMA, fields)
    }

    pub fn get_assignment(&self, uuid: &Uuid) -> RepoResult<AssignmentRecord> {
        let fields = self.objects.get_all(KIND_ASSIGNMENT, uuid)?;
        AssignmentRecord::from_fields(*uuid, &fields)
    }

    pub fn list_assignments(&self) -> RepoResult<Vec<Uuid>> {
        self.objects.list(KIND_ASSIGNMENT)
    }

    fn tests_for_assignment(&self, assignment: &Uuid) -> RepoResult<Vec<Uuid>> {
        let mut out = Vec::new();
        for test in self.objects.list(KIND_TEST)? {
            if &self.get_test(&test)?.assignment == assignment {
                out.push(test);
            }
        }
        Ok(out)
    }

    fn submissions_for_assignment(&self, assignment: &Uuid) -> RepoResult<Vec<Uuid>> {
        let mut out = Vec::new();
        for submission in self.objects.list(KIND_SUBMISSION)? {
            if &self.get_submission(&submission)?.assignment == assignment {
                out.push(submission);
            }
        }
        Ok(out)
    }

    fn runs_for(&self, test: Option<&Uuid>, submission: Option<&Uuid>) -> RepoResult<Vec<Uuid>> {
        let mut out = Vec::new();
        for run in self.objects.list(KIND_RUN)? {
            let rec = self.get_run(&run)?;
            let test_matches = test.is_none_or(|t| &rec.test == t);
            let sub_matches = submission.is_none_or(|s| &rec.submission == s);
            if test_matches && sub_matches {
                out.push(run);
            }
        }
        Ok(out)
    }

    /// Deletes an Assignment and cascades to every Test, Submission, and Run
    /// it owns. Files and Reporters referenced by those Tests/Submissions are
    /// left untouched — they are global records, deleted independently.
    pub fn delete_assignment(&self, uuid: &Uuid) -> RepoResult<()> {
        for test in self.tests_for_assignment(uuid)? {
            for run in self.runs_for(Some(&test), None)? {
                self.objects.delete(KIND_RUN, &run)?;
            }
            self.objects.refset_delete(KIND_TEST, &test, "files")?;
            self.objects.refset_delete(KIND_TEST, &test, "reporters")?;
            self.objects.delete(KIND_TEST, &test)?;
        }
        for submission in self.submissions_for_assignment(uuid)? {
            self.objects.refset_delete(KIND_SUBMISSION, &submission, "files")?;
            self.objects.delete(KIND_SUBMISSION, &submission)?;
        }
        self.objects.delete(KIND_ASSIGNMENT, uuid)
    }

    // ── Tests ────────────────────────────────────────────────────────────

    pub fn create_test(&self, fields: HashMap<String, String>) -> RepoResult<Uuid> {
        self.objects.create(KIND_TEST, TEST_SCHEMA, fields)
    }

    pub fn get_test(&self, uuid: &Uuid) -> RepoResult<TestRecord> {
        let fields = self.objects.get_all(KIND_TEST, uuid)?;
        TestRecord::from_fields(*uuid, &fields)
    }

    pub fn list_tests(&self) -> RepoResult<Vec<Uuid>> {
        self.objects.list(KIND_TEST)
    }

    pub fn test_files(&self, uuid: &Uuid) -> RepoResult<Vec<Uuid>> {
        self.objects.refset_list(KIND_TEST, uuid, "files")
    }

    pub fn test_add_files(&self, uuid: &Uuid, files: &[Uuid]) -> RepoResult<()> {
        for file in files {
            if !self.objects.exists(KIND_FILE, file)? {
                return Err(RepoError::ObjectDNE {
                    kind: KIND_FILE,
                    uuid: file.to_string(),
                });
            }
        }
        self.objects.refset_add(KIND_TEST, uuid, "files", files)
    }

    pub fn test_remove_files(&self, uuid: &Uuid, files: &[Uuid]) -> RepoResult<()> {
        self.objects.refset_remove(KIND_TEST, uuid, "files", files)
    }

    pub fn test_reporters(&self, uuid: &Uuid) -> RepoResult<Vec<Uuid>> {
        self.objects.refset_list(KIND_TEST, uuid, "reporters")
    }

    pub fn test_add_reporters(&self, uuid: &Uuid, reporters: &[Uuid]) -> RepoResult<()> {
        for reporter in reporters {
            if !self.objects.exists(KIND_REPORTER, reporter)? {
                return Err(RepoError::ObjectDNE {
                    kind: KIND_REPORTER,
                    uuid: reporter.to_string(),
                });
            }
        }
        self.objects.refset_add(KIND_TEST, uuid, "reporters", reporters)
    }

    pub fn test_remove_reporters(&self, uuid: &Uuid, reporters: &[Uuid]) -> RepoResult<()> {
        self.objects.refset_remove(KIND_TEST, uuid, "reporters", reporters)
    }

    // ── Submissions ──────────────────────────────────────────────────────

    pub fn create_submission(&self, fields: HashMap<String, String>) -> RepoResult<Uuid> {
        self.objects.create(KIND_SUBMISSION, SUBMISSION_SCHEMA, fields)
    }

    pub fn get_submission(&self, uuid: &Uuid) -> RepoResult<SubmissionRecord> {
        let fields = self.objects.get_all(KIND_SUBMISSION, uuid)?;
        SubmissionRecord::from_fields(*uuid, &fields)
    }

    pub fn list_submissions(&self) -> RepoResult<Vec<Uuid>> {
        self.objects.list(KIND_SUBMISSION)
    }

    pub fn submission_files(&self, uuid: &Uuid) -> RepoResult<Vec<Uuid>> {
        self.objects.refset_list(KIND_SUBMISSION, uuid, "files")
    }

    pub fn submission_add_files(&self, uuid: &Uuid, files: &[Uuid]) -> RepoResult<()> {
        for file in files {
            if !self.objects.exists(KIND_FILE, file)? {
                return Err(RepoError::ObjectDNE {
                    kind: KIND_FILE,
                    uuid: file.to_string(),
                });
            }
        }
        self.objects.refset_add(KIND_SUBMISSION, uuid, "files", files)
    }

    pub fn submission_remove_files(&self, uuid: &Uuid, files: &[Uuid]) -> RepoResult<()> {
        self.objects.refset_remove(KIND_SUBMISSION, uuid, "files", files)
    }

    pub fn delete_submission(&self, uuid: &Uuid) -> RepoResult<()> {
        self.objects.refset_delete(KIND_SUBMISSION, uuid, "files")?;
        self.objects.delete(KIND_SUBMISSION, uuid)
    }

    // ── Runs (C7 persistence) ────────────────────────────────────────────

    /// Validates that `test` and `submission` exist and share an Assignment,
    /// then inserts a fresh `queued` Run. Does not itself enqueue a worker
    /// job — that is `gradekeep-engine`'s responsibility.
    pub fn create_run(&self, test: Uuid, submission: Uuid, owner: Uuid) -> RepoResult<Uuid> {
        let test_rec = self.get_test(&test)?;
        let submission_rec = self.get_submission(&submission)?;
        if test_rec.assignment != submission_rec.assignment {
            return Err(RepoError::SchemaViolation {
                kind: KIND_RUN,
                detail: "test and submission do not share an assignment".to_string(),
            });
        }
        let mut fields = HashMap::new();
        fields.insert("test".to_string(), test.to_string());
        fields.insert("submission".to_string(), submission.to_string());
        fields.insert("status".to_string(), RunStatus::Queued.as_str().to_string());
        fields.insert("retcode".to_string(), "0".to_string());
        fields.insert("score".to_string(), "0".to_string());
        fields.insert("output".to_string(), String::new());
        fields.insert("owner".to_string(), owner.to_string());
        self.objects.create(KIND_RUN, RUN_SCHEMA, fields)
    }

    pub fn get_run(&self, uuid: &Uuid) -> RepoResult<RunRecord> {
        let fields = self.objects.get_all(KIND_RUN, uuid)?;
        RunRecord::from_fields(*uuid, &fields)
    }

    pub fn list_runs(&self) -> RepoResult<Vec<Uuid>> {
        self.objects.list(KIND_RUN)
    }

    pub fn delete_run(&self, uuid: &Uuid) -> RepoResult<()> {
        self.objects.delete(KIND_RUN, uuid)
    }

    pub fn set_run_running(&self, uuid: &Uuid) -> RepoResult<()> {
        self.objects
            .set_field(KIND_RUN, uuid, "status", RunStatus::Running.as_str().to_string())
    }

    pub fn finish_run(&self, uuid: &Uuid, status: RunStatus, retcode: i32, score: f64, output: &str) -> RepoResult<()> {
        let mut patch = HashMap::new();
        patch.insert("status".to_string(), status.as_str().to_string());
        patch.insert("retcode".to_string(), retcode.to_string());
        patch.insert("score".to_string(), score.to_string());
        patch.insert("output".to_string(), output.to_string());
        self.objects.update(KIND_RUN, uuid, patch)
    }

    pub fn append_run_output(&self, uuid: &Uuid, line: &str) -> RepoResult<()> {
        let mut all = self.objects.get_all(KIND_RUN, uuid)?;
        let existing = all.remove("output").unwrap_or_default();
        let updated = if existing.is_empty() {
            line.to_string()
        } else {
            format!("{existing}\n{line}")
        };
        self.objects.set_field(KIND_RUN, uuid, "output", updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("db.redb"), dir.path().join("files")).unwrap();
        (store, dir)
    }

    #[test]
    fn archive_ingestion_creates_one_file_per_entry() {
        use std::io::{Cursor, Write};

        let (store, _dir) = store();
        let owner = Uuid::new_v4();

        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options: zip::write::FileOptions<'_, ()> = zip::write::FileOptions::default();
            writer.start_file("main.py", options).unwrap();
            writer.write_all(b"print('hi')").unwrap();
            writer.start_file("helper.py", options).unwrap();
            writer.write_all(b"def f(): pass").unwrap();
            writer.finish().unwrap();
        }

        let uuids = store.ingest_archive(owner, &buf).unwrap();
        assert_eq!(uuids.len(), 2);
        let names: Vec<_> = uuids.iter().map(|u| store.get_file(u).unwrap().name).collect();
        assert!(names.contains(&"main.py".to_string()));
        assert!(names.contains(&"helper.py".to_string()));
    }

    #[test]
    fn file_delete_refused_while_referenced_by_test() {
        let (store, _dir) = store();
        let owner = Uuid::new_v4();
        let assignment = store.create_assignment(owner, "hw1").unwrap();
        let file = store.create_file(owner, "script", b"print(1)", "grader.py").unwrap();
        let mut fields = HashMap::new();
        fields.insert("name".to_string(), "t1".to_string());
        fields.insert("tester".to_string(), "script".to_string());
        fields.insert("maxscore".to_string(), "10".to_string());
        fields.insert("path_script".to_string(), String::new());
        fields.insert("owner".to_string(), owner.to_string());
        fields.insert("assignment".to_string(), assignment.to_string());
        let test = store.create_test(fields).unwrap();
        store.test_add_files(&test, &[file]).unwrap();

        let err = store.delete_file(&file).unwrap_err();
        assert!(matches!(err, RepoError::InUse { .. }));

        store.test_remove_files(&test, &[file]).unwrap();
        store.delete_file(&file).unwrap();
    }

    #[test]
    fn assignment_deletion_cascades_to_tests_and_runs() {
        let (store, _dir) = store();
        let owner = Uuid::new_v4();
        let assignment = store.create_assignment(owner, "hw1").unwrap();
        let mut test_fields = HashMap::new();
        test_fields.insert("name".to_string(), "t1".to_string());
        test_fields.insert("tester".to_string(), "null".to_string());
        test_fields.insert("maxscore".to_string(), "10".to_string());
        test_fields.insert("path_script".to_string(), String::new());
        test_fields.insert("owner".to_string(), owner.to_string());
        test_fields.insert("assignment".to_string(), assignment.to_string());
        let test = store.create_test(test_fields).unwrap();

        let mut sub_fields = HashMap::new();
        sub_fields.insert("owner".to_string(), owner.to_string());
        sub_fields.insert("assignment".to_string(), assignment.to_string());
        let submission = store.create_submission(sub_fields).unwrap();

        let run = store.create_run(test, submission, owner).unwrap();

        store.delete_assignment(&assignment).unwrap();

        assert!(store.get_test(&test).is_err());
        assert!(store.get_submission(&submission).is_err());
        assert!(store.get_run(&run).is_err());
    }

    #[test]
    fn run_creation_rejects_mismatched_assignments() {
        let (store, _dir) = store();
        let owner = Uuid::new_v4();
        let a1 = store.create_assignment(owner, "hw1").unwrap();
        let a2 = store.create_assignment(owner, "hw2").unwrap();

        let mut test_fields = HashMap::new();
        test_fields.insert("name".to_string(), "t1".to_string());
        test_fields.insert("tester".to_string(), "null".to_string());
        test_fields.insert("maxscore".to_string(), "10".to_string());
        test_fields.insert("path_script".to_string(), String::new());
        test_fields.insert("owner".to_string(), owner.to_string());
        test_fields.insert("assignment".to_string(), a1.to_string());
        let test = store.create_test(test_fields).unwrap();

        let mut sub_fields = HashMap::new();
        sub_fields.insert("owner".to_string(), owner.to_string());
        sub_fields.insert("assignment".to_string(), a2.to_string());
        let submission = store.create_submission(sub_fields).unwrap();

        let err = store.create_run(test, submission, owner).unwrap_err();
        assert!(matches!(err, RepoError::SchemaViolation { .. }));
    }
}
