use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraderError {
    #[error("tester kind {0:?} is not registered")]
    UnknownTester(String),

    #[error("two files in the same reference set share key {0:?}")]
    DuplicateKey(String),

    #[error("grader precondition failed: {0}")]
    Precondition(String),

    #[error("run was cancelled")]
    Cancelled,

    #[error("sandbox preparation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("sandbox execution failed: {0}")]
    Sandbox(#[from] gradekeep_sandbox::SandboxError),

    #[error("store lookup failed: {0}")]
    Store(#[from] gradekeep_store::RepoError),
}

pub type GraderResult<T> = Result<T, GraderError>;
