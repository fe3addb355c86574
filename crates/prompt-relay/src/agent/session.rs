//! Per-conversation session bookkeeping.
//!
//! A [`Session`] is created lazily the first time a conversation sends a
//! prompt and is touched after every completed exchange. Sessions idle for
//! longer than the TTL (24 hours by default) are removed by
//! [`SessionStore::sweep`]. Ids are random v4 UUIDs, so a conversation that
//! comes back after a sweep gets a fresh id.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Idle time after which a session is swept.
pub const SESSION_TTL_HOURS: i64 = 24;

/// One conversation's identity and turn count.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
}

impl Session {
    fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("session-{}", uuid::Uuid::new_v4()),
            user_id: user_id.to_string(),
            start_time: now,
            last_activity: now,
            message_count: 0,
        }
    }

    /// Whether the session has been idle for longer than `ttl` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now.signed_duration_since(self.last_activity) > ttl
    }
}

/// Sessions keyed by conversation id.
#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    ttl: TimeDelta,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_ttl(TimeDelta::hours(SESSION_TTL_HOURS))
    }

    pub fn with_ttl(ttl: TimeDelta) -> Self {
        Self {
            sessions: HashMap::new(),
            ttl,
        }
    }

    /// Return the session for `conversation_id`, creating it if needed.
    /// The flag is `true` when a new session was created.
    pub fn get_or_create(
        &mut self,
        conversation_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> (Session, bool) {
        if let Some(existing) = self.sessions.get(conversation_id) {
            return (existing.clone(), false);
        }
        let session = Session::new(user_id, now);
        self.sessions
            .insert(conversation_id.to_string(), session.clone());
        (session, true)
    }

    /// Record a completed exchange. Returns the new message count, or
    /// `None` if the session was swept in the meantime.
    pub fn record_exchange(&mut self, conversation_id: &str, now: DateTime<Utc>) -> Option<u64> {
        let session = self.sessions.get_mut(conversation_id)?;
        if now > session.last_activity {
            session.last_activity = now;
        }
        session.message_count += 1;
        Some(session.message_count)
    }

    /// Remove every session idle for longer than the TTL. Returns how many
    /// were removed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        let ttl = self.ttl;
        self.sessions.retain(|_, s| !s.is_expired(now, ttl));
        before - self.sessions.len()
    }

    pub fn get(&self, conversation_id: &str) -> Option<&Session> {
        self.sessions.get(conversation_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
