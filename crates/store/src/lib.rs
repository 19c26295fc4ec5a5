pub mod archive;
pub mod error;
pub mod files;
pub mod kv;
pub mod repo;
pub mod schema;

pub use error::{RepoError, RepoResult};
pub use files::FileStore;
pub use kv::{sanitize_uuid, ObjectRepository};
pub use repo::Store;
pub use schema::*;
