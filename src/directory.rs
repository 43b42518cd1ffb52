//! User directory cache.
//!
//! Resolves an identifier to `{leader_id, name}` with bounded staleness
//! (TTL 24 h by default) while keeping remote calls rare: fresh cache hits
//! are served locally, misses trigger one bulk roster refresh, and only
//! then a single-record remote lookup. A successful single-record lookup
//! upserts that record and bumps `fetched_at` for the whole cache — an
//! accepted staleness/soundness trade-off, asserted in tests.
//!
//! Lock discipline: the cache mutex is only held for map access, never
//! across a network await.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::backend::{BackendClient, RemoteUser};
use crate::error::LookupError;
use crate::types::{DirectoryCacheData, DirectoryRecord, Role, UserSession};

/// Leader validation result. The leader role needs no directory entry of
/// its own, but callers want to know whether anyone reports to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderLogin {
    pub session: UserSession,
    pub has_team: bool,
}

pub struct DirectoryCache {
    inner: Mutex<DirectoryCacheData>,
    ttl: Duration,
}

impl DirectoryCache {
    pub fn new(data: DirectoryCacheData, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(data),
            ttl,
        }
    }

    pub fn snapshot(&self) -> DirectoryCacheData {
        self.inner.lock().clone()
    }

    pub fn replace(&self, data: DirectoryCacheData) {
        *self.inner.lock() = data;
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.inner.lock().fetched_at) <= self.ttl
    }

    fn cached(&self, id: &str) -> Option<DirectoryRecord> {
        self.inner.lock().entries.get(id).cloned()
    }

    /// Resolves an identifier: fresh cache hit, else bulk refresh, else
    /// single-record fallback.
    pub async fn lookup(
        &self,
        backend: &dyn BackendClient,
        now: DateTime<Utc>,
        id: &str,
    ) -> Result<RemoteUser, LookupError> {
        let id = normalize(id);
        if id.is_empty() {
            return Err(LookupError::NotFound(id));
        }

        if self.is_fresh(now) {
            if let Some(record) = self.cached(&id) {
                return Ok(resolved(&id, record));
            }
        }

        // Bulk refresh: replace the whole roster. A failed refresh is
        // logged and falls through to the single-record path.
        match backend.fetch_users().await {
            Ok(users) => {
                self.apply_roster(users, now);
                if let Some(record) = self.cached(&id) {
                    return Ok(resolved(&id, record));
                }
            }
            Err(e) => log::warn!("Directory roster refresh failed: {}", e),
        }

        match backend.lookup_user(&id).await {
            Ok(Some(user)) => {
                let record = DirectoryRecord {
                    leader_id: normalize(&user.leader_id),
                    name: user.name.clone(),
                };
                let mut guard = self.inner.lock();
                guard.entries.insert(id.clone(), record.clone());
                // The whole cache's freshness is bumped even though only
                // one record was fetched.
                guard.fetched_at = now;
                drop(guard);
                Ok(resolved(&id, record))
            }
            Ok(None) => Err(LookupError::NotFound(id)),
            Err(e) => Err(LookupError::Unavailable(e)),
        }
    }

    /// Validates an agent login against the directory.
    pub async fn validate_agent(
        &self,
        backend: &dyn BackendClient,
        now: DateTime<Utc>,
        agent_id: &str,
        claimed_leader_id: &str,
    ) -> Result<UserSession, LookupError> {
        let agent_id = normalize(agent_id);
        let claimed = normalize(claimed_leader_id);
        let user = self.lookup(backend, now, &agent_id).await?;

        if !user.leader_id.eq_ignore_ascii_case(&claimed) {
            return Err(LookupError::LeaderMismatch {
                agent: agent_id,
                claimed,
            });
        }

        Ok(UserSession {
            role: Role::Agent,
            id: agent_id,
            leader_id: claimed,
            name: (!user.name.is_empty()).then(|| user.name),
        })
    }

    /// Validates a leader login. Always succeeds as a role; refreshes the
    /// roster first when stale (a failed refresh falls back to whatever
    /// is cached) and reports whether any record points at this leader.
    pub async fn validate_leader(
        &self,
        backend: &dyn BackendClient,
        now: DateTime<Utc>,
        leader_id: &str,
    ) -> LeaderLogin {
        let leader_id = normalize(leader_id);

        if !self.is_fresh(now) {
            match backend.fetch_users().await {
                Ok(users) => self.apply_roster(users, now),
                Err(e) => log::warn!("Directory roster refresh failed: {}", e),
            }
        }

        let has_team = self
            .inner
            .lock()
            .entries
            .values()
            .any(|record| record.leader_id.eq_ignore_ascii_case(&leader_id));

        LeaderLogin {
            session: UserSession {
                role: Role::Leader,
                id: leader_id.clone(),
                leader_id,
                name: None,
            },
            has_team,
        }
    }

    fn apply_roster(&self, users: Vec<RemoteUser>, now: DateTime<Utc>) {
        let mut entries = std::collections::HashMap::new();
        for user in users {
            let id = normalize(&user.id);
            if id.is_empty() {
                continue;
            }
            entries.insert(
                id,
                DirectoryRecord {
                    leader_id: normalize(&user.leader_id),
                    name: user.name,
                },
            );
        }
        let mut guard = self.inner.lock();
        guard.entries = entries;
        guard.fetched_at = now;
    }
}

fn normalize(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}

fn resolved(id: &str, record: DirectoryRecord) -> RemoteUser {
    RemoteUser {
        id: id.to_string(),
        leader_id: record.leader_id,
        name: record.name,
    }
}
