use thiserror::Error;

/// Error taxonomy for the Run Engine (§7). Every other crate boundary's
/// error type is wrapped here via `#[from]` so call sites match on one cause
/// without manual boxing.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("worker queue is full")]
    Busy,

    #[error(transparent)]
    Store(#[from] gradekeep_store::RepoError),

    #[error(transparent)]
    Grader(#[from] gradekeep_graders::GraderError),
}

pub type EngineResult<T> = Result<T, EngineError>;
