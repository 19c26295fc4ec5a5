//! `User` is consumed, never created, by this core (§3) — the request layer
//! and its auth module own that record. [`UserDirectory`] is the seam this
//! crate calls through to resolve a Run's owner into the `User` a reporter
//! needs (authmod check, `moodle_id`), without depending on however the host
//! application actually stores or authenticates users.

use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

use gradekeep_store::User;

pub trait UserDirectory: Send + Sync {
    fn get(&self, uuid: &Uuid) -> Option<User>;
}

/// A directory backed by an in-process map, good enough for the
/// demonstration binary and for tests — a real deployment's request layer
/// would implement [`UserDirectory`] against its own auth module instead.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users.write().unwrap().insert(user.uuid, user);
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn get(&self, uuid: &Uuid) -> Option<User> {
        self.users.read().unwrap().get(uuid).cloned()
    }
}
