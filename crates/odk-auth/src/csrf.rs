//! CSRF tokens bound to a subject.
//!
//! # Invariants
//! - A token validates only for the subject it was issued to.
//! - A token never validates at or after its `expires_at`; an expired entry
//!   found during validation is removed.
//! - Every `issue` sweeps all expired entries.
//!
//! [`MemoryCsrfStore`] is process-local. A deployment with more than one
//! daemon instance must supply a shared [`CsrfStore`] instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::random_token_hex;

pub const DEFAULT_CSRF_TTL_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfEntry {
    pub subject_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Backing store for CSRF entries.
pub trait CsrfStore: Send + Sync {
    fn put(&self, token: String, entry: CsrfEntry);
    fn get(&self, token: &str) -> Option<CsrfEntry>;
    fn remove(&self, token: &str);
    /// Remove every entry whose `expires_at <= now`; returns how many went.
    fn purge_expired(&self, now: DateTime<Utc>) -> usize;
}

#[derive(Debug, Default)]
pub struct MemoryCsrfStore {
    entries: Mutex<HashMap<String, CsrfEntry>>,
}

impl MemoryCsrfStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CsrfEntry>> {
        // A panic while holding the lock cannot leave the map half-written.
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl CsrfStore for MemoryCsrfStore {
    fn put(&self, token: String, entry: CsrfEntry) {
        self.lock().insert(token, entry);
    }

    fn get(&self, token: &str) -> Option<CsrfEntry> {
        self.lock().get(token).cloned()
    }

    fn remove(&self, token: &str) {
        self.lock().remove(token);
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, e| e.expires_at > now);
        before - map.len()
    }
}

#[derive(Clone)]
pub struct CsrfGuard {
    store: Arc<dyn CsrfStore>,
    ttl: Duration,
}

impl CsrfGuard {
    pub fn new(store: Arc<dyn CsrfStore>) -> Self {
        Self::with_ttl_secs(store, DEFAULT_CSRF_TTL_SECS)
    }

    pub fn with_ttl_secs(store: Arc<dyn CsrfStore>, ttl_secs: i64) -> Self {
        Self {
            store,
            ttl: Duration::seconds(ttl_secs),
        }
    }

    pub fn issue(&self, subject_id: &str) -> String {
        self.issue_at(subject_id, Utc::now())
    }

    pub fn issue_at(&self, subject_id: &str, now: DateTime<Utc>) -> String {
        let token = random_token_hex();
        self.store.put(
            token.clone(),
            CsrfEntry {
                subject_id: subject_id.to_string(),
                created_at: now,
                expires_at: now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            },
        );
        self.store.purge_expired(now);
        token
    }

    pub fn validate(&self, token: &str, subject_id: &str) -> bool {
        self.validate_at(token, subject_id, Utc::now())
    }

    pub fn validate_at(&self, token: &str, subject_id: &str, now: DateTime<Utc>) -> bool {
        if token.is_empty() {
            return false;
        }
        let Some(entry) = self.store.get(token) else {
            return false;
        };
        if entry.expires_at <= now {
            self.store.remove(token);
            return false;
        }
        entry.subject_id == subject_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> (CsrfGuard, Arc<MemoryCsrfStore>) {
        let store = Arc::new(MemoryCsrfStore::new());
        (CsrfGuard::new(store.clone()), store)
    }

    #[test]
    fn token_validates_for_its_subject_only() {
        let (g, _) = guard();
        let t = g.issue("order-a");
        assert!(g.validate(&t, "order-a"));
        assert!(!g.validate(&t, "order-b"));
    }

    #[test]
    fn token_stays_valid_for_repeated_requests() {
        let (g, _) = guard();
        let t = g.issue("order-a");
        assert!(g.validate(&t, "order-a"));
        assert!(g.validate(&t, "order-a"));
    }

    #[test]
    fn unknown_and_empty_tokens_are_rejected() {
        let (g, _) = guard();
        assert!(!g.validate("deadbeef", "order-a"));
        assert!(!g.validate("", ""));
    }

    #[test]
    fn expired_token_is_rejected_and_removed() {
        let (g, store) = guard();
        let now = Utc::now();
        let t = g.issue_at("order-a", now);
        assert_eq!(store.len(), 1);

        assert!(!g.validate_at(&t, "order-a", now + Duration::hours(1)));
        assert!(store.is_empty(), "expired entry must be deleted on check");
    }

    #[test]
    fn issue_sweeps_every_expired_entry() {
        let (g, store) = guard();
        let start = Utc::now();
        g.issue_at("a", start);
        g.issue_at("b", start);
        g.issue_at("c", start + Duration::minutes(30));
        assert_eq!(store.len(), 3);

        // a and b are expired at start+61m; c is not.
        let fresh = g.issue_at("d", start + Duration::minutes(61));
        assert_eq!(store.len(), 2);
        assert!(g.validate_at(&fresh, "d", start + Duration::minutes(62)));
    }
}
