use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to spawn grader process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("grader process exceeded wall-clock limit")]
    Timeout,

    #[error("grader process exceeded resource limit: {0}")]
    LimitExceeded(&'static str),

    #[error("I/O error communicating with grader process: {0}")]
    IOError(#[from] std::io::Error),
}

pub type SandboxResult<T> = Result<T, SandboxError>;
