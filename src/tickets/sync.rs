//! Ticket reconciliation: keeps each session's external ticket in line
//! with its stage.
//!
//! Reconciliation for one session id is serialized, and always works from
//! the stage persisted in the `SessionStore`, never from the event that
//! triggered it. A late-running reconciliation can therefore never move a
//! ticket back to an earlier stage.
//!
//! Creates are never retried. The session is marked `create_issued` before
//! the call goes out; if no ticket id comes back, sync for that session
//! stays blocked until an operator links the ticket with [`TicketSync::link_ticket`].

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::client::TicketClient;
use super::retry::{RetryPolicy, with_retry};
use crate::error::{Error, SessionError, TicketError};
use crate::onboarding::engine::TicketEvent;
use crate::onboarding::stage::Stage;
use crate::onboarding::store::SessionStore;

/// Successful reconciliation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A ticket was opened (and, if the stage moved meanwhile, updated).
    Created { ticket_id: String, stage: Stage },
    /// An existing ticket was moved to `stage`.
    Updated { ticket_id: String, stage: Stage },
    /// The ticket already reflected the session's stage.
    UpToDate { ticket_id: String },
}

impl SyncOutcome {
    pub fn ticket_id(&self) -> &str {
        match self {
            Self::Created { ticket_id, .. }
            | Self::Updated { ticket_id, .. }
            | Self::UpToDate { ticket_id } => ticket_id,
        }
    }
}

/// Totals from a reconciliation pass over many sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Mirrors session stages into the ticket service.
pub struct TicketSync {
    client: Arc<dyn TicketClient>,
    store: Arc<SessionStore>,
    policy: RetryPolicy,
    /// Per-session reconciliation locks. The map lock is held only for
    /// lookup, insert, and removal.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TicketSync {
    pub fn new(client: Arc<dyn TicketClient>, store: Arc<SessionStore>, policy: RetryPolicy) -> Self {
        Self {
            client,
            store,
            policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &Arc<dyn TicketClient> {
        &self.client
    }

    /// Reconcile the ticket for the session named by `event`.
    pub async fn reconcile(&self, event: &TicketEvent) -> Result<SyncOutcome, Error> {
        debug!(session_id = %event.session_id, stage = %event.stage, "Reconciling ticket");
        self.reconcile_session(&event.session_id).await
    }

    /// Reconcile a session's ticket against its persisted stage.
    pub async fn reconcile_session(&self, session_id: &str) -> Result<SyncOutcome, Error> {
        let lock = self.lock_for(session_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.reconcile_locked(session_id).await
        };
        self.release_lock(session_id, lock).await;
        result
    }

    /// Manual retry: clear a fatal-failure block and reconcile again.
    ///
    /// An unconfirmed create is not cleared here; see [`Self::link_ticket`].
    pub async fn retry(&self, session_id: &str) -> Result<SyncOutcome, Error> {
        let (session, was_disabled) = self
            .store
            .update(session_id, |s| {
                let was_disabled = s.ticket.sync_disabled;
                s.ticket.sync_disabled = false;
                if !s.ticket.awaiting_link() {
                    s.ticket.last_error = None;
                }
                was_disabled
            })
            .await?;
        if was_disabled {
            info!(session_id = %session.id, "Ticket sync re-enabled by manual retry");
        }
        self.reconcile_session(session_id).await
    }

    /// Attach an existing ticket to a session that has none, then bring it
    /// up to the session's stage.
    ///
    /// This is the repair for a create whose response was lost. Linking the
    /// id a session already carries is a no-op; linking a different one is
    /// rejected.
    pub async fn link_ticket(
        &self,
        session_id: &str,
        ticket_id: &str,
    ) -> Result<SyncOutcome, Error> {
        let ticket_id = ticket_id.trim();
        if ticket_id.is_empty() {
            return Err(SessionError::Validation {
                field: "ticket_id".to_string(),
                reason: "is required".to_string(),
            }
            .into());
        }

        let lock = self.lock_for(session_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.link_locked(session_id, ticket_id).await
        };
        self.release_lock(session_id, lock).await;
        result
    }

    async fn link_locked(&self, session_id: &str, ticket_id: &str) -> Result<SyncOutcome, Error> {
        let (_, existing) = self
            .store
            .update(session_id, |s| {
                if let Some(existing) = s.ticket.ticket_id.clone() {
                    return Some(existing);
                }
                s.ticket.ticket_id = Some(ticket_id.to_string());
                s.ticket.create_issued = true;
                s.ticket.sync_disabled = false;
                s.ticket.last_error = None;
                None
            })
            .await?;
        match existing {
            Some(existing) if existing != ticket_id => {
                return Err(SessionError::Validation {
                    field: "ticket_id".to_string(),
                    reason: format!("session is already linked to ticket {existing}"),
                }
                .into());
            }
            Some(_) => {}
            None => info!(session_id, ticket_id, "Ticket linked manually"),
        }
        self.reconcile_locked(session_id).await
    }

    /// Reconcile every session whose ticket lags its stage.
    ///
    /// Sessions blocked by a fatal failure are skipped until retried.
    pub async fn reconcile_pending(&self) -> PassReport {
        let pending: Vec<String> = self
            .store
            .snapshot()
            .await
            .into_iter()
            .filter(|s| s.needs_ticket_sync())
            .map(|s| s.id)
            .collect();

        let results = join_all(pending.iter().map(|id| self.reconcile_session(id))).await;

        let mut report = PassReport {
            attempted: results.len(),
            ..Default::default()
        };
        for result in results {
            match result {
                Ok(_) => report.succeeded += 1,
                Err(_) => report.failed += 1,
            }
        }
        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                failed = report.failed,
                "Ticket reconciliation pass finished"
            );
        }
        report
    }

    async fn reconcile_locked(&self, session_id: &str) -> Result<SyncOutcome, Error> {
        let session = self.store.get(session_id).await?;
        if session.ticket.sync_disabled {
            return Err(TicketError::SyncDisabled {
                session_id: session_id.to_string(),
            }
            .into());
        }

        if session.ticket.awaiting_link() {
            return Err(TicketError::CreateUnconfirmed {
                session_id: session_id.to_string(),
            }
            .into());
        }

        let mut created = false;
        let ticket_id = match session.ticket.ticket_id.clone() {
            Some(id) => id,
            None => {
                // Also repairs a session that advanced without ever getting a
                // ticket: create at the current stage, then catch up below.
                let stage = session.stage;
                let stage_name = stage.to_string();
                self.store
                    .update(session_id, |s| s.ticket.create_issued = true)
                    .await?;
                let result = self
                    .client
                    .create_ticket(&session.id, &session.user.user_id, &stage_name)
                    .await;
                let ticket_id = match result {
                    Ok(id) => id,
                    Err(e) => return Err(self.record_failure(session_id, e).await),
                };

                self.store
                    .update(session_id, |s| {
                        if s.ticket.ticket_id.is_none() {
                            s.ticket.ticket_id = Some(ticket_id.clone());
                        }
                        s.ticket.synced_stage = Some(stage);
                        s.ticket.last_error = None;
                    })
                    .await?;
                info!(session_id, ticket_id = %ticket_id, stage = %stage, "Ticket created");
                created = true;
                ticket_id
            }
        };

        let mut synced = None;
        loop {
            let session = self.store.get(session_id).await?;
            if session.ticket.synced_stage == Some(session.stage) {
                break;
            }
            let stage = session.stage;
            let stage_name = stage.to_string();
            let result = with_retry(&self.policy, "update_ticket", || {
                self.client.update_ticket(&ticket_id, &stage_name)
            })
            .await;
            if let Err(e) = result {
                return Err(self.record_failure(session_id, e).await);
            }

            self.store
                .update(session_id, |s| {
                    if s.ticket.synced_stage.is_none_or(|prev| prev < stage) {
                        s.ticket.synced_stage = Some(stage);
                    }
                    s.ticket.last_error = None;
                })
                .await?;
            info!(session_id, ticket_id = %ticket_id, stage = %stage, "Ticket updated");
            synced = Some(stage);
        }

        let current = self.store.get(session_id).await?.stage;
        Ok(match (created, synced) {
            (true, _) => SyncOutcome::Created {
                ticket_id,
                stage: synced.unwrap_or(current),
            },
            (false, Some(stage)) => SyncOutcome::Updated { ticket_id, stage },
            (false, None) => SyncOutcome::UpToDate { ticket_id },
        })
    }

    /// Note a failed call on the session and hand the error back.
    ///
    /// The session's stage is left untouched: it stays authoritative even
    /// when the ticket lags.
    async fn record_failure(&self, session_id: &str, err: TicketError) -> Error {
        let fatal = matches!(err, TicketError::Fatal { .. });
        if fatal {
            error!(
                session_id,
                client = self.client.name(),
                error = %err,
                "Fatal ticket failure, disabling sync for session"
            );
        } else {
            warn!(
                session_id,
                client = self.client.name(),
                error = %err,
                "Ticket sync failed"
            );
        }

        let message = err.to_string();
        if let Err(e) = self
            .store
            .update(session_id, |s| {
                s.ticket.last_error = Some(message);
                if fatal {
                    s.ticket.sync_disabled = true;
                }
            })
            .await
        {
            warn!(session_id, error = %e, "Could not record ticket failure on session");
        }
        err.into()
    }

    async fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(session_id.to_string()).or_default())
    }

    /// Drop the per-session lock once nobody else holds or waits on it.
    async fn release_lock(&self, session_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(session_id);
        }
    }
}
