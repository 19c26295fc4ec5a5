//! Generic object-repository primitives (C1): typed hash records and
//! reference sets over a single embedded [`redb::Database`].
//!
//! A "kind" (e.g. `"file"`, `"test"`, `"run"`) namespaces keys the way the
//! original service namespaced Redis keys: `"{kind}:{uuid}"` for a hash
//! record, `"{kind}:{uuid}:{field}"` for a reference set. Every entity type
//! in [`crate::schema`] is backed by the same two tables — there is no
//! per-kind table, only a per-kind key prefix, mirroring the single
//! `(kind-name, schema)`-parameterized abstraction called for in the design
//! notes this repository replaces a dynamic factory-class pattern with.

use std::collections::HashMap;
use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::error::{RepoError, RepoResult};

const HASH_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");
const REFSET_TABLE: TableDefinition<&str, &str> = TableDefinition::new("refsets");

fn now_str() -> String {
    chrono::Utc::now().timestamp().to_string()
}

fn hash_key(kind: &str, uuid: &Uuid) -> String {
    format!("{kind}:{uuid}")
}

fn refset_key(kind: &str, uuid: &Uuid, field: &str) -> String {
    format!("{kind}:{uuid}:{field}")
}

/// Parses and re-renders a UUID to guarantee the stored form is a
/// well-formed, canonical UUID string — the Rust analogue of the source's
/// reference-set sanitization step.
pub fn sanitize_uuid(raw: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| RepoError::BadUuid(raw.to_string()))
}

pub struct ObjectRepository {
    db: Database,
}

impl ObjectRepository {
    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        {
            let tx = db.begin_write()?;
            tx.open_table(HASH_TABLE)?;
            tx.open_table(REFSET_TABLE)?;
            tx.commit()?;
        }
        Ok(Self { db })
    }

    /// Creates a new hash record of `kind`. `data` must supply exactly the
    /// fields in `schema` minus `created_time`/`modified_time`, which this
    /// call stamps itself. Returns the freshly generated UUID.
    pub fn create(
        &self,
        kind: &'static str,
        schema: &[&'static str],
        mut data: HashMap<String, String>,
    ) -> RepoResult<Uuid> {
        let now = now_str();
        data.insert("created_time".to_string(), now.clone());
        data.insert("modified_time".to_string(), now);

        let mut got: Vec<&str> = data.keys().map(String::as_str).collect();
        got.sort_unstable();
        let mut want: Vec<&str> = schema.to_vec();
        want.sort_unstable();
        if got != want {
            return Err(RepoError::SchemaViolation {
                kind,
                detail: format!("expected keys {want:?}, got {got:?}"),
            });
        }

        let id = Uuid::new_v4();
        let bytes = serde_json::to_vec(&data)?;
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(HASH_TABLE)?;
            tbl.insert(hash_key(kind, &id).as_str(), bytes.as_slice())?;
        }
        tx.commit()?;
        tracing::info!(kind, uuid = %id, "created object");
        Ok(id)
    }

    pub fn get_all(&self, kind: &'static str, uuid: &Uuid) -> RepoResult<HashMap<String, String>> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(HASH_TABLE)?;
        match tbl.get(hash_key(kind, uuid).as_str())? {
            None => Err(RepoError::ObjectDNE {
                kind,
                uuid: uuid.to_string(),
            }),
            Some(v) => Ok(serde_json::from_slice(v.value())?),
        }
    }

    pub fn get_field(&self, kind: &'static str, uuid: &Uuid, field: &str) -> RepoResult<String> {
        let all = self.get_all(kind, uuid)?;
        all.get(field).cloned().ok_or_else(|| RepoError::SchemaViolation {
            kind,
            detail: format!("no such field {field:?}"),
        })
    }

    pub fn set_field(&self, kind: &'static str, uuid: &Uuid, field: &str, value: String) -> RepoResult<()> {
        let mut patch = HashMap::new();
        patch.insert(field.to_string(), value);
        self.update(kind, uuid, patch)
    }

    /// Merges `partial` into the stored record. Every key in `partial` must
    /// already be a field of the existing record (i.e. a subset of the
    /// declared schema); unknown keys are rejected rather than silently
    /// widening the schema.
    pub fn update(&self, kind: &'static str, uuid: &Uuid, partial: HashMap<String, String>) -> RepoResult<()> {
        let mut existing = self.get_all(kind, uuid)?;
        for key in partial.keys() {
            if !existing.contains_key(key) {
                return Err(RepoError::SchemaViolation {
                    kind,
                    detail: format!("key {key:?} is not part of the declared schema"),
                });
            }
        }
        existing.extend(partial);
        existing.insert("modified_time".to_string(), now_str());

        let bytes = serde_json::to_vec(&existing)?;
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(HASH_TABLE)?;
            tbl.insert(hash_key(kind, uuid).as_str(), bytes.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete(&self, kind: &'static str, uuid: &Uuid) -> RepoResult<()> {
        let key = hash_key(kind, uuid);
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(HASH_TABLE)?;
            if tbl.remove(key.as_str())?.is_none() {
                return Err(RepoError::ObjectDNE {
                    kind,
                    uuid: uuid.to_string(),
                });
            }
        }
        tx.commit()?;
        tracing::info!(kind, uuid = %uuid, "deleted object");
        Ok(())
    }

    pub fn exists(&self, kind: &'static str, uuid: &Uuid) -> RepoResult<bool> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(HASH_TABLE)?;
        Ok(tbl.get(hash_key(kind, uuid).as_str())?.is_some())
    }

    /// Lists every UUID whose hash record is namespaced under `kind`.
    pub fn list(&self, kind: &'static str) -> RepoResult<Vec<Uuid>> {
        let prefix = format!("{kind}:");
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(HASH_TABLE)?;
        let mut out = Vec::new();
        for entry in tbl.iter()? {
            let (k, _) = entry?;
            let key = k.value();
            if let Some(rest) = key.strip_prefix(&prefix) {
                if let Ok(uuid) = Uuid::parse_str(rest) {
                    out.push(uuid);
                }
            }
        }
        Ok(out)
    }

    // ── reference sets ──────────────────────────────────────────────────

    pub fn refset_list(&self, kind: &'static str, uuid: &Uuid, field: &str) -> RepoResult<Vec<Uuid>> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(REFSET_TABLE)?;
        let raw = tbl
            .get(refset_key(kind, uuid, field).as_str())?
            .map(|v| v.value().to_string())
            .unwrap_or_default();
        Ok(raw
            .lines()
            .filter(|s| !s.is_empty())
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect())
    }

    pub fn refset_add(&self, kind: &'static str, uuid: &Uuid, field: &str, values: &[Uuid]) -> RepoResult<()> {
        let key = refset_key(kind, uuid, field);
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(REFSET_TABLE)?;
            let mut current: std::collections::BTreeSet<String> = tbl
                .get(key.as_str())?
                .map(|v| v.value().to_string())
                .unwrap_or_default()
                .lines()
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            for value in values {
                current.insert(value.to_string());
            }
            let joined = current.into_iter().collect::<Vec<_>>().join("\n");
            tbl.insert(key.as_str(), joined.as_str())?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn refset_remove(&self, kind: &'static str, uuid: &Uuid, field: &str, values: &[Uuid]) -> RepoResult<()> {
        let key = refset_key(kind, uuid, field);
        let removing: std::collections::HashSet<String> = values.iter().map(Uuid::to_string).collect();
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(REFSET_TABLE)?;
            let current: Vec<String> = tbl
                .get(key.as_str())?
                .map(|v| v.value().to_string())
                .unwrap_or_default()
                .lines()
                .filter(|s| !s.is_empty() && !removing.contains(*s))
                .map(String::from)
                .collect();
            let joined = current.join("\n");
            tbl.insert(key.as_str(), joined.as_str())?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn refset_delete(&self, kind: &'static str, uuid: &Uuid, field: &str) -> RepoResult<()> {
        let key = refset_key(kind, uuid, field);
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(REFSET_TABLE)?;
            tbl.remove(key.as_str())?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> (ObjectRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let repo = ObjectRepository::open(dir.path().join("store.redb")).unwrap();
        (repo, dir)
    }

    #[test]
    fn create_requires_exact_schema_match() {
        let (repo, _dir) = repo();
        let schema = &["owner", "name"];
        let mut data = HashMap::new();
        data.insert("owner".to_string(), Uuid::new_v4().to_string());
        data.insert("name".to_string(), "x".to_string());
        data.insert("extra".to_string(), "y".to_string());
        let err = repo.create("thing", schema, data).unwrap_err();
        assert!(matches!(err, RepoError::SchemaViolation { .. }));
    }

    #[test]
    fn create_then_get_round_trips_with_stamps() {
        let (repo, _dir) = repo();
        let schema = &["owner", "name"];
        let mut data = HashMap::new();
        let owner = Uuid::new_v4();
        data.insert("owner".to_string(), owner.to_string());
        data.insert("name".to_string(), "x".to_string());
        let id = repo.create("thing", schema, data).unwrap();
        let all = repo.get_all("thing", &id).unwrap();
        assert_eq!(all.get("name").unwrap(), "x");
        assert!(all.contains_key("created_time"));
        assert!(all.contains_key("modified_time"));
    }

    #[test]
    fn update_rejects_unknown_keys() {
        let (repo, _dir) = repo();
        let schema = &["owner", "name"];
        let mut data = HashMap::new();
        data.insert("owner".to_string(), Uuid::new_v4().to_string());
        data.insert("name".to_string(), "x".to_string());
        let id = repo.create("thing", schema, data).unwrap();
        let mut patch = HashMap::new();
        patch.insert("bogus".to_string(), "z".to_string());
        let err = repo.update("thing", &id, patch).unwrap_err();
        assert!(matches!(err, RepoError::SchemaViolation { .. }));
    }

    #[test]
    fn missing_object_is_dne() {
        let (repo, _dir) = repo();
        let err = repo.get_all("thing", &Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, RepoError::ObjectDNE { .. }));
    }

    #[test]
    fn refset_add_list_remove_round_trips() {
        let (repo, _dir) = repo();
        let owner = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        repo.refset_add("test", &owner, "files", &[a, b]).unwrap();
        let mut listed = repo.refset_list("test", &owner, "files").unwrap();
        listed.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(listed, expected);

        repo.refset_remove("test", &owner, "files", &[a]).unwrap();
        assert_eq!(repo.refset_list("test", &owner, "files").unwrap(), vec![b]);
    }

    #[test]
    fn sanitize_uuid_rejects_garbage() {
        assert!(sanitize_uuid("not-a-uuid").is_err());
        assert!(sanitize_uuid(&Uuid::new_v4().to_string()).is_ok());
    }
}
