use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("{kind} {uuid} does not exist")]
    ObjectDNE { kind: &'static str, uuid: String },

    #[error("schema violation for {kind}: {detail}")]
    SchemaViolation { kind: &'static str, detail: String },

    #[error("malformed uuid: {0}")]
    BadUuid(String),

    #[error("{kind} {uuid} is in use and cannot be deleted")]
    InUse { kind: &'static str, uuid: String },

    #[error("duplicate key {0:?} within the same reference set")]
    Duplicate(String),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;
