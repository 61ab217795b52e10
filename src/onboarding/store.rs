//! Keyed storage of onboarding sessions.
//!
//! Locking discipline: the map lock is held only for O(1) insert, lookup,
//! and removal. Every session sits behind its own mutex, so updates to the
//! same session serialize while updates to different sessions never wait on
//! each other. No lock is ever held across an external call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use super::session::{Session, SessionSummary, UserIdentity};
use crate::error::SessionError;

/// A stored session plus its eviction marker.
///
/// A caller may look up the slot just before a sweep removes it; the marker
/// lets that caller see `NotFound` instead of mutating an orphan.
struct Slot {
    session: Session,
    evicted: bool,
}

type SlotRef = Arc<Mutex<Slot>>;

/// Keyed, exclusively-owning storage of sessions.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SlotRef>>,
    /// Keep idle sessions that have not completed onboarding.
    preserve_incomplete: bool,
}

impl SessionStore {
    pub fn new(preserve_incomplete: bool) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            preserve_incomplete,
        }
    }

    /// Create a new session at the first stage.
    pub async fn create(&self, user: UserIdentity) -> Result<Session, SessionError> {
        user.validate()?;

        let now = Utc::now();
        let base_id = session_id_for(&user.user_id, now);

        let mut sessions = self.sessions.write().await;
        let mut id = base_id.clone();
        while sessions.contains_key(&id) {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            id = format!("{base_id}-{}", &suffix[..8]);
            debug!(session_id = %id, "Session id collision, retrying with suffix");
        }

        let session = Session::new(id.clone(), user, now);
        sessions.insert(
            id.clone(),
            Arc::new(Mutex::new(Slot {
                session: session.clone(),
                evicted: false,
            })),
        );
        drop(sessions);

        info!(session_id = %id, user_id = %session.user.user_id, "Session created");
        Ok(session)
    }

    /// Get a copy of a session.
    pub async fn get(&self, id: &str) -> Result<Session, SessionError> {
        let slot = self.slot(id).await?;
        let slot = slot.lock().await;
        if slot.evicted {
            return Err(not_found(id));
        }
        Ok(slot.session.clone())
    }

    /// Apply `f` to a session atomically with respect to other updates of the
    /// same session.
    ///
    /// The mutation runs on a copy. If it breaks a session invariant (stage
    /// regression, ticket id replaced, history truncated, completion cleared)
    /// the copy is discarded and `StoreCorruption` is returned; the stored
    /// state is unchanged.
    pub async fn update<F, R>(&self, id: &str, f: F) -> Result<(Session, R), SessionError>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let slot = self.slot(id).await?;
        let mut slot = slot.lock().await;
        if slot.evicted {
            return Err(not_found(id));
        }

        let mut candidate = slot.session.clone();
        let out = f(&mut candidate);

        if let Some(reason) = candidate.invariant_violation(&slot.session) {
            error!(
                session_id = %id,
                reason = %reason,
                "Rejected session update that violates an invariant"
            );
            return Err(SessionError::StoreCorruption {
                id: id.to_string(),
                reason,
            });
        }

        slot.session = candidate;
        Ok((slot.session.clone(), out))
    }

    /// Point-in-time summaries of every session.
    pub async fn list(&self) -> Vec<SessionSummary> {
        self.snapshot()
            .await
            .iter()
            .map(SessionSummary::from)
            .collect()
    }

    /// Point-in-time copies of every session.
    ///
    /// Sessions updated while the snapshot is taken may show either their old
    /// or new state.
    pub async fn snapshot(&self) -> Vec<Session> {
        let mut out = Vec::new();
        for (_, slot) in self.slots().await {
            let slot = slot.lock().await;
            if !slot.evicted {
                out.push(slot.session.clone());
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Remove sessions idle for longer than `max_idle`.
    ///
    /// With `preserve_incomplete`, only completed sessions are eligible.
    /// Returns the number evicted.
    pub async fn sweep(&self, max_idle: Duration) -> usize {
        let max_idle = TimeDelta::from_std(max_idle).unwrap_or(TimeDelta::MAX);
        match Utc::now().checked_sub_signed(max_idle) {
            Some(cutoff) => self.sweep_idle_since(cutoff).await,
            None => 0,
        }
    }

    /// Remove eligible sessions whose last activity is before `cutoff`.
    pub async fn sweep_idle_since(&self, cutoff: DateTime<Utc>) -> usize {
        let mut candidates = Vec::new();
        for (id, slot) in self.slots().await {
            let slot = slot.lock().await;
            if self.is_evictable(&slot, cutoff) {
                candidates.push(id);
            }
        }

        let mut evicted = 0;
        for id in candidates {
            let mut sessions = self.sessions.write().await;
            let Some(slot) = sessions.get(&id).cloned() else {
                continue;
            };
            // A session that is locked right now is in use, so not idle.
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            if !self.is_evictable(&guard, cutoff) {
                continue;
            }
            guard.evicted = true;
            sessions.remove(&id);
            evicted += 1;
            debug!(session_id = %id, "Evicted idle session");
        }

        if evicted > 0 {
            info!(count = evicted, "Swept idle sessions");
        }
        evicted
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    fn is_evictable(&self, slot: &Slot, cutoff: DateTime<Utc>) -> bool {
        !slot.evicted
            && slot.session.last_activity < cutoff
            && (slot.session.completed || !self.preserve_incomplete)
    }

    async fn slot(&self, id: &str) -> Result<SlotRef, SessionError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn slots(&self) -> Vec<(String, SlotRef)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect()
    }
}

fn not_found(id: &str) -> SessionError {
    SessionError::NotFound { id: id.to_string() }
}

/// Session ids are derived from the user id and creation time.
fn session_id_for(user_id: &str, now: DateTime<Utc>) -> String {
    let user: String = user_id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("onboarding-{user}-{}", now.timestamp_millis())
}
