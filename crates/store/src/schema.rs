//! Entity schemas and typed record wrappers over [`crate::kv::ObjectRepository`].
//!
//! Every kind below is a tagged-variant record with an explicit field set —
//! the typed counterpart of the dynamically-validated hash records C1
//! stores. Construction and destructuring go through `from_fields`/
//! `into_fields` so the flat `HashMap<String, String>` the repository
//! actually persists never leaks its shape into caller code.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::{RepoError, RepoResult};

pub const KIND_FILE: &str = "file";
pub const KIND_REPORTER: &str = "reporter";
pub const KIND_ASSIGNMENT: &str = "assignment";
pub const KIND_TEST: &str = "test";
pub const KIND_SUBMISSION: &str = "submission";
pub const KIND_RUN: &str = "run";

pub const FILE_SCHEMA: &[&str] = &["key", "name", "path", "owner", "created_time", "modified_time"];
pub const NULL_REPORTER_SCHEMA: &[&str] = &["mod", "owner", "created_time", "modified_time"];
pub const MOODLE_REPORTER_SCHEMA: &[&str] = &[
    "mod",
    "owner",
    "created_time",
    "modified_time",
    "moodle_asn_id",
    "moodle_respect_duedate",
    "moodle_only_higher",
    "moodle_prereq_id",
    "moodle_prereq_min",
];
pub const ASSIGNMENT_SCHEMA: &[&str] = &["name", "owner", "created_time", "modified_time"];
pub const TEST_SCHEMA: &[&str] = &[
    "name",
    "tester",
    "maxscore",
    "path_script",
    "owner",
    "created_time",
    "modified_time",
    "assignment",
];
pub const SUBMISSION_SCHEMA: &[&str] = &["owner", "created_time", "modified_time", "assignment"];
pub const RUN_SCHEMA: &[&str] = &[
    "test",
    "status",
    "retcode",
    "score",
    "output",
    "owner",
    "created_time",
    "modified_time",
    "submission",
];

fn field(map: &HashMap<String, String>, kind: &'static str, key: &str) -> RepoResult<String> {
    map.get(key).cloned().ok_or_else(|| RepoError::SchemaViolation {
        kind,
        detail: format!("missing field {key:?}"),
    })
}

fn field_uuid(map: &HashMap<String, String>, kind: &'static str, key: &str) -> RepoResult<Uuid> {
    let raw = field(map, kind, key)?;
    Uuid::parse_str(&raw).map_err(|_| RepoError::BadUuid(raw))
}

/// An opaque identity handed in by the external auth module. The core reads
/// `uuid`/`authmod`/`moodle_id` off of it but never creates or persists one —
/// there is deliberately no `create`/`delete` here, unlike every other record
/// in this module.
#[derive(Debug, Clone)]
pub struct User {
    pub uuid: Uuid,
    pub authmod: String,
    pub moodle_id: Option<String>,
    pub extra: HashMap<String, String>,
}

impl User {
    pub fn from_fields(uuid: Uuid, map: &HashMap<String, String>) -> RepoResult<Self> {
        let mut extra = map.clone();
        let authmod = extra.remove("authmod").ok_or_else(|| RepoError::SchemaViolation {
            kind: "user",
            detail: "missing field \"authmod\"".to_string(),
        })?;
        let moodle_id = extra.remove("moodle_id");
        extra.remove("uuid");
        Ok(Self {
            uuid,
            authmod,
            moodle_id,
            extra,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub uuid: Uuid,
    pub key: String,
    pub name: String,
    pub path: String,
    pub owner: Uuid,
    pub created_time: String,
    pub modified_time: String,
}

impl FileRecord {
    pub fn from_fields(uuid: Uuid, map: &HashMap<String, String>) -> RepoResult<Self> {
        Ok(Self {
            uuid,
            key: field(map, KIND_FILE, "key")?,
            name: field(map, KIND_FILE, "name")?,
            path: field(map, KIND_FILE, "path")?,
            owner: field_uuid(map, KIND_FILE, "owner")?,
            created_time: field(map, KIND_FILE, "created_time")?,
            modified_time: field(map, KIND_FILE, "modified_time")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReporterMod {
    Null,
    Moodle,
}

impl ReporterMod {
    pub fn parse(raw: &str) -> RepoResult<Self> {
        match raw {
            "null" => Ok(Self::Null),
            "moodle" => Ok(Self::Moodle),
            other => Err(RepoError::SchemaViolation {
                kind: KIND_REPORTER,
                detail: format!("unknown reporter mod {other:?}"),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Moodle => "moodle",
        }
    }

    pub fn schema(&self) -> &'static [&'static str] {
        match self {
            Self::Null => NULL_REPORTER_SCHEMA,
            Self::Moodle => MOODLE_REPORTER_SCHEMA,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReporterRecord {
    pub uuid: Uuid,
    pub kind: ReporterMod,
    pub owner: Uuid,
    pub fields: HashMap<String, String>,
}

impl ReporterRecord {
    pub fn from_fields(uuid: Uuid, map: &HashMap<String, String>) -> RepoResult<Self> {
        let kind = ReporterMod::parse(&field(map, KIND_REPORTER, "mod")?)?;
        Ok(Self {
            uuid,
            kind,
            owner: field_uuid(map, KIND_REPORTER, "owner")?,
            fields: map.clone(),
        })
    }

    pub fn get(&self, key: &str, default: &str) -> String {
        self.fields.get(key).cloned().unwrap_or_else(|| default.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct AssignmentRecord {
    pub uuid: Uuid,
    pub name: String,
    pub owner: Uuid,
}

impl AssignmentRecord {
    pub fn from_fields(uuid: Uuid, map: &HashMap<String, String>) -> RepoResult<Self> {
        Ok(Self {
            uuid,
            name: field(map, KIND_ASSIGNMENT, "name")?,
            owner: field_uuid(map, KIND_ASSIGNMENT, "owner")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TesterKind {
    Script,
    Io,
    Null,
}

impl TesterKind {
    pub fn parse(raw: &str) -> RepoResult<Self> {
        match raw {
            "script" => Ok(Self::Script),
            "io" => Ok(Self::Io),
            "null" => Ok(Self::Null),
            other => Err(RepoError::SchemaViolation {
                kind: KIND_TEST,
                detail: format!("unknown tester kind {other:?}"),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Io => "io",
            Self::Null => "null",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestRecord {
    pub uuid: Uuid,
    pub name: String,
    pub tester: TesterKind,
    pub maxscore: f64,
    pub path_script: String,
    pub owner: Uuid,
    pub assignment: Uuid,
}

impl TestRecord {
    pub fn from_fields(uuid: Uuid, map: &HashMap<String, String>) -> RepoResult<Self> {
        let maxscore_raw = field(map, KIND_TEST, "maxscore")?;
        let maxscore = maxscore_raw.parse::<f64>().map_err(|_| RepoError::SchemaViolation {
            kind: KIND_TEST,
            detail: format!("maxscore {maxscore_raw:?} is not a number"),
        })?;
        Ok(Self {
            uuid,
            name: field(map, KIND_TEST, "name")?,
            tester: TesterKind::parse(&field(map, KIND_TEST, "tester")?)?,
            maxscore,
            path_script: field(map, KIND_TEST, "path_script")?,
            owner: field_uuid(map, KIND_TEST, "owner")?,
            assignment: field_uuid(map, KIND_TEST, "assignment")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub uuid: Uuid,
    pub owner: Uuid,
    pub assignment: Uuid,
}

impl SubmissionRecord {
    pub fn from_fields(uuid: Uuid, map: &HashMap<String, String>) -> RepoResult<Self> {
        Ok(Self {
            uuid,
            owner: field_uuid(map, KIND_SUBMISSION, "owner")?,
            assignment: field_uuid(map, KIND_SUBMISSION, "assignment")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    Running,
    Complete,
    CompleteError,
    CompleteExceptionRun,
    CompleteExceptionEval,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::CompleteError => "complete-error",
            Self::CompleteExceptionRun => "complete-exception-run",
            Self::CompleteExceptionEval => "complete-exception-eval",
        }
    }

    pub fn parse(raw: &str) -> RepoResult<Self> {
        match raw {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "complete" => Ok(Self::Complete),
            "complete-error" => Ok(Self::CompleteError),
            "complete-exception-run" => Ok(Self::CompleteExceptionRun),
            "complete-exception-eval" => Ok(Self::CompleteExceptionEval),
            other => Err(RepoError::SchemaViolation {
                kind: KIND_RUN,
                detail: format!("unknown run status {other:?}"),
            }),
        }
    }

    pub fn is_complete(&self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }
}

#[derive(Debug, Clone)]
pub struct RunRecord {
    pub uuid: Uuid,
    pub test: Uuid,
    pub submission: Uuid,
    pub status: RunStatus,
    pub retcode: i32,
    pub score: f64,
    pub output: String,
    pub owner: Uuid,
}

impl RunRecord {
    pub fn from_fields(uuid: Uuid, map: &HashMap<String, String>) -> RepoResult<Self> {
        let retcode = field(map, KIND_RUN, "retcode")?
            .parse::<i32>()
            .unwrap_or_default();
        let score = field(map, KIND_RUN, "score")?.parse::<f64>().unwrap_or(0.0);
        Ok(Self {
            uuid,
            test: field_uuid(map, KIND_RUN, "test")?,
            submission: field_uuid(map, KIND_RUN, "submission")?,
            status: RunStatus::parse(&field(map, KIND_RUN, "status")?)?,
            retcode,
            score,
            output: field(map, KIND_RUN, "output")?,
            owner: field_uuid(map, KIND_RUN, "owner")?,
        })
    }
}
