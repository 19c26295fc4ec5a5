use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("reporter mod {0:?} is not registered")]
    UnknownMod(String),

    #[error("user authmod {0:?} is not accepted by this reporter")]
    WrongAuthMod(String),

    #[error("LMS web service unreachable: {0}")]
    LmsUnreachable(String),

    #[error("LMS response could not be parsed: {0}")]
    MalformedResponse(String),

    #[error("assignment due date has passed")]
    DueDatePassed,

    #[error("new grade is not higher than the prior recorded grade")]
    NotHigher,

    #[error("prerequisite grade does not meet the required minimum")]
    PrereqNotMet,

    #[error("no prerequisite grade exists for this student")]
    PrereqMissing,
}

pub type ReporterResult<T> = Result<T, ReporterError>;
