//! Onboarding operations exposed to transports.
//!
//! Wires the session store, stage engine, progress reporter, and ticket
//! sync together. Stage changes are committed before any ticket work starts;
//! ticket failures come back as a warning on the response and never undo
//! the user's progress.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::catalog::StageCatalog;
use super::engine::{StageEngine, TicketEvent};
use super::progress::{ProgressReporter, stage_progress};
use super::session::{Author, TicketLink, UserIdentity};
use super::stage::Stage;
use super::store::SessionStore;
use crate::config::{ServiceConfig, SyncMode};
use crate::error::{ConfigError, Result};
use crate::tickets::{PassReport, SyncWorker, TicketClient, TicketSync};

// ── Request / response types ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub user_id: String,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: String,
    pub message: String,
    pub stage: Stage,
    pub progress: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRequest {
    pub session_id: String,
    pub message: String,
}

/// Body of a manual ticket link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkTicketRequest {
    pub ticket_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
    pub next_actions: Vec<String>,
    pub stage: Stage,
    pub progress: f64,
    pub completed: bool,
    /// Set when the stage changed but the ticket could not be brought in line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_warning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub session_id: String,
    pub user_id: String,
    pub stage: Stage,
    pub stage_name: String,
    pub progress: f64,
    pub completed: bool,
    pub summary: String,
    pub ticket: TicketLink,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListItem {
    pub session_id: String,
    pub user_id: String,
    pub stage: Stage,
    pub progress: f64,
    pub completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDetails {
    pub sessions: usize,
    pub completed: usize,
    /// Sessions whose ticket lags their stage.
    pub pending_sync: usize,
    /// Sessions blocked by a fatal ticket failure.
    pub sync_disabled: usize,
    /// Sessions whose ticket create was never confirmed.
    pub awaiting_link: usize,
    pub ticket_client: String,
    /// `ok`, or the reason the ticket service check failed.
    pub ticket_service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub details: HealthDetails,
}

// ── Service ─────────────────────────────────────────────────────────────

pub struct OnboardingService {
    store: Arc<SessionStore>,
    engine: StageEngine,
    reporter: ProgressReporter,
    sync: Arc<TicketSync>,
    /// Present in background sync mode.
    worker: Option<SyncWorker>,
    idle_timeout: Duration,
    shutdown_grace: Duration,
}

impl OnboardingService {
    /// Build the service. In background sync mode this spawns the sync
    /// worker, so it must be called inside a tokio runtime.
    pub fn new(
        config: &ServiceConfig,
        catalog: StageCatalog,
        client: Arc<dyn TicketClient>,
    ) -> std::result::Result<Self, ConfigError> {
        let catalog = Arc::new(catalog);
        let engine = StageEngine::new(Arc::clone(&catalog), config.match_mode)?;
        let store = Arc::new(SessionStore::new(config.preserve_incomplete));
        let sync = Arc::new(TicketSync::new(
            client,
            Arc::clone(&store),
            config.sync.retry,
        ));
        let worker = match config.sync.mode {
            SyncMode::Inline => None,
            SyncMode::Background => Some(SyncWorker::spawn(Arc::clone(&sync))),
        };

        info!(
            sync_mode = ?config.sync.mode,
            match_mode = ?config.match_mode,
            ticket_client = sync.client().name(),
            "Onboarding service ready"
        );

        Ok(Self {
            store,
            engine,
            reporter: ProgressReporter::new(catalog),
            sync,
            worker,
            idle_timeout: config.session_idle_timeout,
            shutdown_grace: config.sync.shutdown_grace,
        })
    }

    /// Open a session for a new user and greet them.
    pub async fn start_session(&self, req: StartRequest) -> Result<StartResponse> {
        let user = UserIdentity::new(req.user_id, req.username, req.email);
        let session = self.store.create(user).await?;

        let welcome = format!(
            "Hi {}! {}",
            session.user.username.trim(),
            self.engine.catalog().get(session.stage).guidance
        );
        let now = Utc::now();
        let (session, ()) = self
            .store
            .update(&session.id, |s| {
                s.record(Author::Agent, welcome.clone(), now);
                s.touch(now);
            })
            .await?;

        info!(
            session_id = %session.id,
            user_id = %session.user.user_id,
            "Onboarding session started"
        );

        Ok(StartResponse {
            progress: self.reporter.progress(&session),
            session_id: session.id,
            message: welcome,
            stage: session.stage,
        })
    }

    /// Handle one user message: advance the stage if a trigger matched,
    /// then bring the ticket in line.
    pub async fn post_message(&self, req: MessageRequest) -> Result<MessageResponse> {
        let now = Utc::now();
        let (session, transition) = self
            .store
            .update(&req.session_id, |s| {
                let transition = self.engine.advance(s, &req.message);
                transition.apply(s, &req.message, now);
                transition
            })
            .await?;

        if transition.advanced() {
            info!(
                session_id = %session.id,
                from = %transition.from,
                to = %transition.to,
                trigger = transition.trigger.as_deref().unwrap_or_default(),
                "Stage advanced"
            );
        } else {
            debug!(session_id = %session.id, stage = %session.stage, "Message did not advance stage");
        }
        if transition.completes {
            info!(session_id = %session.id, user_id = %session.user.user_id, "Onboarding completed");
        }

        let sync_warning = match transition.ticket_event {
            Some(ref event) => self.dispatch(event.clone()).await,
            None => None,
        };

        Ok(MessageResponse {
            message: transition.response,
            next_actions: transition.actions,
            stage: session.stage,
            progress: self.reporter.progress(&session),
            completed: session.completed,
            sync_warning,
        })
    }

    pub async fn get_status(&self, session_id: &str) -> Result<StatusResponse> {
        let session = self.store.get(session_id).await?;
        let now = Utc::now();
        Ok(StatusResponse {
            summary: self.reporter.summarize(&session, now),
            progress: self.reporter.progress(&session),
            stage_name: self.engine.catalog().get(session.stage).name.clone(),
            session_id: session.id,
            user_id: session.user.user_id,
            stage: session.stage,
            completed: session.completed,
            ticket: session.ticket,
            created_at: session.created_at,
            last_activity: session.last_activity,
        })
    }

    pub async fn list_sessions(&self) -> Vec<SessionListItem> {
        self.store
            .list()
            .await
            .into_iter()
            .map(|s| SessionListItem {
                progress: stage_progress(s.stage),
                session_id: s.session_id,
                user_id: s.user_id,
                stage: s.stage,
                completed: s.completed,
            })
            .collect()
    }

    /// Degraded when the ticket service is unreachable or any session has
    /// sync blocked.
    pub async fn health_check(&self) -> HealthReport {
        let sessions = self.store.snapshot().await;
        let client = self.sync.client();
        let ticket_service = match client.health_check().await {
            Ok(()) => "ok".to_string(),
            Err(e) => {
                warn!(client = client.name(), error = %e, "Ticket service health check failed");
                e.to_string()
            }
        };

        let details = HealthDetails {
            sessions: sessions.len(),
            completed: sessions.iter().filter(|s| s.completed).count(),
            pending_sync: sessions.iter().filter(|s| s.needs_ticket_sync()).count(),
            sync_disabled: sessions.iter().filter(|s| s.ticket.sync_disabled).count(),
            awaiting_link: sessions.iter().filter(|s| s.ticket.awaiting_link()).count(),
            ticket_client: client.name().to_string(),
            ticket_service,
        };
        let status = if details.ticket_service == "ok"
            && details.sync_disabled == 0
            && details.awaiting_link == 0
        {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };
        HealthReport { status, details }
    }

    /// Evict sessions idle for longer than the configured timeout.
    pub async fn sweep(&self) -> usize {
        self.store.sweep(self.idle_timeout).await
    }

    /// Re-enable ticket sync for a session and reconcile it now.
    pub async fn retry_sync(&self, session_id: &str) -> Result<StatusResponse> {
        self.sync.retry(session_id).await?;
        self.get_status(session_id).await
    }

    /// Attach an existing ticket to a session whose create was never
    /// confirmed, and bring it up to date.
    pub async fn link_ticket(&self, session_id: &str, ticket_id: &str) -> Result<StatusResponse> {
        self.sync.link_ticket(session_id, ticket_id).await?;
        self.get_status(session_id).await
    }

    /// Reconcile every session whose ticket lags its stage.
    pub async fn reconcile_pending(&self) -> PassReport {
        self.sync.reconcile_pending().await
    }

    /// Stop background sync, waiting up to the configured grace period.
    /// Returns false if in-flight reconciliations had to be abandoned.
    pub async fn shutdown(&self) -> bool {
        match self.worker {
            Some(ref worker) => worker.shutdown(self.shutdown_grace).await,
            None => true,
        }
    }

    async fn dispatch(&self, event: TicketEvent) -> Option<String> {
        if let Some(ref worker) = self.worker {
            if worker.dispatch(event.clone()).await {
                return None;
            }
            warn!(session_id = %event.session_id, "Sync worker stopped, ticket left for the next pass");
            return Some("ticket sync is shutting down; the ticket will catch up later".to_string());
        }

        match self.sync.reconcile(&event).await {
            Ok(_) => None,
            Err(e) => {
                warn!(
                    session_id = %event.session_id,
                    stage = %event.stage,
                    error = %e,
                    "Stage committed but ticket is behind"
                );
                Some(e.to_string())
            }
        }
    }
}

/// Run `sweep` and a reconciliation pass on a fixed schedule.
pub fn spawn_maintenance_task(service: Arc<OnboardingService>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            service.sweep().await;
            service.reconcile_pending().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, SessionError, TicketError};
    use crate::tickets::RetryPolicy;
    use crate::tickets::testing::RecordingClient;

    fn config(mode: SyncMode) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.sync.mode = mode;
        config.sync.retry = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        config
    }

    fn service_with(client: Arc<RecordingClient>, mode: SyncMode) -> OnboardingService {
        OnboardingService::new(&config(mode), StageCatalog::default(), client).unwrap()
    }

    fn jane() -> StartRequest {
        StartRequest {
            user_id: "u1".to_string(),
            username: "Jane".to_string(),
            email: "jane@x.com".to_string(),
        }
    }

    fn msg(session_id: &str, message: &str) -> MessageRequest {
        MessageRequest {
            session_id: session_id.to_string(),
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn walkthrough_from_welcome_to_completion() {
        let client = Arc::new(RecordingClient::default());
        let service = service_with(client.clone(), SyncMode::Inline);

        let started = service.start_session(jane()).await.unwrap();
        assert_eq!(started.stage, Stage::Welcome);
        assert_eq!(started.progress, 0.0);
        assert!(started.message.starts_with("Hi Jane!"));
        let id = started.session_id;

        let r = service
            .post_message(msg(&id, "I've completed setting up my environment"))
            .await
            .unwrap();
        assert_eq!(r.stage, Stage::EnvironmentSetup);
        assert_eq!(r.progress, 0.25);
        assert!(r.sync_warning.is_none());
        assert_eq!(client.creates(), 1);
        let ticket_id = service.get_status(&id).await.unwrap().ticket.ticket_id.unwrap();

        let r = service.post_message(msg(&id, "what's next?")).await.unwrap();
        assert_eq!(r.stage, Stage::EnvironmentSetup);
        assert_eq!(r.progress, 0.25);
        assert_eq!(client.create_attempts(), 1);
        assert!(client.updates().await.is_empty());

        for (text, stage, progress) in [
            ("everything is installed", Stage::TeamIntroduction, 0.5),
            ("I met the whole team", Stage::FirstTasks, 0.75),
            ("my first PR got merged", Stage::Completion, 1.0),
        ] {
            let r = service.post_message(msg(&id, text)).await.unwrap();
            assert_eq!(r.stage, stage);
            assert_eq!(r.progress, progress);
        }

        let status = service.get_status(&id).await.unwrap();
        assert!(status.completed);
        assert_eq!(status.progress, 1.0);
        assert_eq!(status.ticket.ticket_id.as_deref(), Some(ticket_id.as_str()));
        assert_eq!(status.ticket.synced_stage, Some(Stage::Completion));
        assert_eq!(client.creates(), 1);
        assert_eq!(client.updates().await.len(), 3);
    }

    #[tokio::test]
    async fn stage_never_decreases() {
        let client = Arc::new(RecordingClient::default());
        let service = service_with(client, SyncMode::Inline);
        let id = service.start_session(jane()).await.unwrap().session_id;

        let inputs = [
            "hello", "ready", "", "done", "go back to welcome", "restart", "met", "??",
            "done", "done", "start over",
        ];
        let mut last = Stage::Welcome;
        for input in inputs {
            let r = service.post_message(msg(&id, input)).await.unwrap();
            assert!(r.stage >= last, "{} after {}", r.stage, last);
            last = r.stage;
        }
        assert_eq!(last, Stage::Completion);
    }

    #[tokio::test]
    async fn completion_is_idempotent() {
        let client = Arc::new(RecordingClient::default());
        let service = service_with(client.clone(), SyncMode::Inline);
        let id = service.start_session(jane()).await.unwrap().session_id;
        for input in ["ready", "done", "met", "merged"] {
            service.post_message(msg(&id, input)).await.unwrap();
        }
        let updates_before = client.updates().await.len();

        let first = service.post_message(msg(&id, "done")).await.unwrap();
        for input in ["done", "anything else?", "finished"] {
            let r = service.post_message(msg(&id, input)).await.unwrap();
            assert_eq!(r.stage, Stage::Completion);
            assert_eq!(r.progress, 1.0);
            assert!(r.completed);
            assert_eq!(r.message, first.message);
        }
        assert_eq!(client.create_attempts(), 1);
        assert_eq!(client.updates().await.len(), updates_before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sessions_do_not_interfere() {
        let client = Arc::new(RecordingClient::with_latency(Duration::from_millis(2)));
        let service = Arc::new(service_with(client.clone(), SyncMode::Inline));

        let a = service.start_session(jane()).await.unwrap().session_id;
        let b = service
            .start_session(StartRequest {
                user_id: "u2".to_string(),
                username: "Sam".to_string(),
                email: "sam@x.com".to_string(),
            })
            .await
            .unwrap()
            .session_id;

        let run = |id: String, inputs: Vec<&'static str>| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                for input in inputs {
                    service.post_message(msg(&id, input)).await.unwrap();
                }
            })
        };
        let ha = run(a.clone(), vec!["ready", "hmm", "done", "met", "merged"]);
        let hb = run(b.clone(), vec!["ready", "what?", "installed"]);
        ha.await.unwrap();
        hb.await.unwrap();

        assert_eq!(service.get_status(&a).await.unwrap().stage, Stage::Completion);
        assert_eq!(service.get_status(&b).await.unwrap().stage, Stage::TeamIntroduction);
        assert_eq!(client.creates(), 2);
    }

    #[tokio::test]
    async fn unknown_session_and_bad_identity_are_rejected() {
        let service = service_with(Arc::new(RecordingClient::default()), SyncMode::Inline);

        let err = service.post_message(msg("nope", "ready")).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(service.get_status("nope").await.unwrap_err().is_not_found());

        let err = service
            .start_session(StartRequest {
                email: " ".to_string(),
                ..jane()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::Validation { .. })));
    }

    #[tokio::test]
    async fn ticket_failure_does_not_block_progress() {
        let client = Arc::new(RecordingClient::default());
        client.fail_updates([TicketError::fatal("401 unauthorized")]).await;
        let service = service_with(client.clone(), SyncMode::Inline);
        let id = service.start_session(jane()).await.unwrap().session_id;

        let r = service.post_message(msg(&id, "ready")).await.unwrap();
        assert_eq!(r.stage, Stage::EnvironmentSetup);
        assert!(r.sync_warning.is_none());

        let r = service.post_message(msg(&id, "done")).await.unwrap();
        assert_eq!(r.stage, Stage::TeamIntroduction);
        assert!(r.sync_warning.unwrap().contains("401"));

        let r = service.post_message(msg(&id, "met")).await.unwrap();
        assert_eq!(r.stage, Stage::FirstTasks);
        assert!(r.sync_warning.is_some(), "sync stays disabled");

        let health = service.health_check().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.details.sync_disabled, 1);

        let status = service.retry_sync(&id).await.unwrap();
        assert_eq!(status.ticket.synced_stage, Some(Stage::FirstTasks));
        assert_eq!(client.creates(), 1);
        assert_eq!(service.health_check().await.status, HealthStatus::Ok);
    }

    #[tokio::test]
    async fn unconfirmed_create_blocks_sync_until_ticket_is_linked() {
        let client = Arc::new(RecordingClient::default());
        client.fail_creates([TicketError::retryable("timeout")]).await;
        let service = service_with(client.clone(), SyncMode::Inline);
        let id = service.start_session(jane()).await.unwrap().session_id;

        let r = service.post_message(msg(&id, "ready")).await.unwrap();
        assert_eq!(r.stage, Stage::EnvironmentSetup);
        assert!(r.sync_warning.unwrap().contains("timeout"));

        let r = service.post_message(msg(&id, "done")).await.unwrap();
        assert_eq!(r.stage, Stage::TeamIntroduction);
        assert!(r.sync_warning.unwrap().contains("never confirmed"));

        let health = service.health_check().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.details.awaiting_link, 1);
        assert_eq!(health.details.pending_sync, 0);

        let err = service.retry_sync(&id).await.unwrap_err();
        assert!(matches!(err, Error::Ticket(TicketError::CreateUnconfirmed { .. })));
        assert_eq!(client.create_attempts(), 1);

        let status = service.link_ticket(&id, "T-manual").await.unwrap();
        assert_eq!(status.ticket.ticket_id.as_deref(), Some("T-manual"));
        assert_eq!(status.ticket.synced_stage, Some(Stage::TeamIntroduction));
        assert_eq!(service.health_check().await.status, HealthStatus::Ok);
        assert_eq!(client.create_attempts(), 1);
    }

    #[tokio::test]
    async fn background_mode_syncs_off_the_request_path() {
        let client = Arc::new(RecordingClient::with_latency(Duration::from_millis(20)));
        let service = service_with(client.clone(), SyncMode::Background);
        let id = service.start_session(jane()).await.unwrap().session_id;

        let r = service.post_message(msg(&id, "ready")).await.unwrap();
        assert_eq!(r.stage, Stage::EnvironmentSetup);
        assert!(r.sync_warning.is_none());

        assert!(service.shutdown().await);
        assert_eq!(client.creates(), 1);
        let status = service.get_status(&id).await.unwrap();
        assert_eq!(status.ticket.synced_stage, Some(Stage::EnvironmentSetup));

        // After shutdown the stage still moves; the ticket waits for a pass.
        let r = service.post_message(msg(&id, "done")).await.unwrap();
        assert_eq!(r.stage, Stage::TeamIntroduction);
        assert!(r.sync_warning.is_some());
        assert_eq!(service.reconcile_pending().await.succeeded, 1);
    }

    #[tokio::test]
    async fn list_and_health_report_sessions() {
        let service = service_with(Arc::new(RecordingClient::default()), SyncMode::Inline);
        let id = service.start_session(jane()).await.unwrap().session_id;
        service.post_message(msg(&id, "ready")).await.unwrap();

        let list = service.list_sessions().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].user_id, "u1");
        assert_eq!(list[0].progress, 0.25);

        let health = service.health_check().await;
        assert_eq!(health.status, HealthStatus::Ok);
        assert_eq!(health.details.sessions, 1);
        assert_eq!(health.details.pending_sync, 0);
        assert_eq!(health.details.ticket_client, "recording");
    }

    #[tokio::test]
    async fn sweep_uses_configured_idle_timeout() {
        let mut config = config(SyncMode::Inline);
        config.session_idle_timeout = Duration::ZERO;
        let service = OnboardingService::new(
            &config,
            StageCatalog::default(),
            Arc::new(RecordingClient::default()),
        )
        .unwrap();
        service.start_session(jane()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(service.sweep().await, 1);
        assert!(service.list_sessions().await.is_empty());
    }
}
