//! Tester Registry (C3) and Graders (C5): per-kind grading strategies that
//! build a sandbox directory from referenced files, invoke the Sandbox
//! Executor, and parse a numeric score.

pub mod error;
pub mod io;
pub mod null;
pub mod prep;
pub mod script;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use gradekeep_sandbox::Limits;
use gradekeep_store::{FileRecord, RunStatus, SubmissionRecord, TestRecord};

pub use error::{GraderError, GraderResult};
pub use io::IoGrader;
pub use null::NullGrader;
pub use script::ScriptGrader;

/// Everything a grader needs to produce a score, gathered by the caller
/// (the Run Engine) from the Object Repository before dispatch.
pub struct GradeContext {
    pub test: TestRecord,
    pub test_files: Vec<FileRecord>,
    pub submission: SubmissionRecord,
    pub submission_files: Vec<FileRecord>,
    pub limits: Limits,
    pub capture_bytes: usize,
    /// Fires when the owning Run is deleted mid-execution. Graders check it
    /// between sandbox spawns and forward it into each [`gradekeep_sandbox::ExecRequest`]
    /// so an in-flight spawn is hard-killed rather than waited out.
    pub cancel: CancellationToken,
}

/// Result of grading one (Test, Submission) pair, ready to be written onto
/// the Run record by the engine.
#[derive(Debug, Clone)]
pub struct GradeOutcome {
    pub status: RunStatus,
    pub retcode: i32,
    pub score: f64,
    pub output: String,
}

/// Strategy implemented by every tester kind (`script`, `io`, `null`).
#[async_trait]
pub trait Grader: Send + Sync {
    fn kind(&self) -> &'static str;
    async fn grade(&self, ctx: &GradeContext) -> GraderResult<GradeOutcome>;
}

/// Maps a Test's declared tester kind to a grader implementation.
#[derive(Default)]
pub struct GraderRegistry {
    graders: Vec<Box<dyn Grader>>,
}

impl GraderRegistry {
    /// The registry preloaded with the three built-in graders.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register(Box::new(ScriptGrader));
        registry.register(Box::new(IoGrader));
        registry.register(Box::new(NullGrader));
        registry
    }

    pub fn register(&mut self, grader: Box<dyn Grader>) {
        self.graders.push(grader);
    }

    pub fn get(&self, kind: &str) -> GraderResult<&dyn Grader> {
        self.graders
            .iter()
            .find(|g| g.kind() == kind)
            .map(|g| g.as_ref())
            .ok_or_else(|| GraderError::UnknownTester(kind.to_string()))
    }
}
