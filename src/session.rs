use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::engine::now_ms;
use crate::model::Ms;

/// Opaque handle a client presents on every staging call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(Ulid);

impl SessionToken {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionToken {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Key/value storage scoped to a session token.
pub trait SessionStore: Send + Sync {
    fn get(&self, token: &SessionToken, key: &str) -> Option<Value>;

    fn put(&self, token: &SessionToken, key: &str, value: Value);

    fn remove(&self, token: &SessionToken, key: &str) -> Option<Value>;

    fn destroy(&self, token: &SessionToken);

    /// Drop sessions idle past their lifetime. Returns how many went.
    fn sweep_expired(&self, now: Ms) -> usize;
}

struct SessionEntry {
    values: HashMap<String, Value>,
    expires_at: Ms,
}

/// In-process session store with an idle lifetime, refreshed on every write.
pub struct MemorySessionStore {
    sessions: DashMap<SessionToken, SessionEntry>,
    ttl_ms: Ms,
}

impl MemorySessionStore {
    pub fn new(ttl_ms: Ms) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, token: &SessionToken, key: &str) -> Option<Value> {
        let entry = self.sessions.get(token)?;
        if entry.expires_at <= now_ms() {
            return None;
        }
        entry.values.get(key).cloned()
    }

    fn put(&self, token: &SessionToken, key: &str, value: Value) {
        let now = now_ms();
        let mut entry = self.sessions.entry(*token).or_insert_with(|| SessionEntry {
            values: HashMap::new(),
            expires_at: now + self.ttl_ms,
        });
        if entry.expires_at <= now {
            entry.values.clear();
        }
        entry.expires_at = now + self.ttl_ms;
        entry.values.insert(key.to_string(), value);
    }

    fn remove(&self, token: &SessionToken, key: &str) -> Option<Value> {
        let mut entry = self.sessions.get_mut(token)?;
        if entry.expires_at <= now_ms() {
            return None;
        }
        entry.values.remove(key)
    }

    fn destroy(&self, token: &SessionToken) {
        self.sessions.remove(token);
    }

    fn sweep_expired(&self, now: Ms) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.sessions.len())
    }
}
