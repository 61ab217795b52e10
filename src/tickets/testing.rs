//! Ticket client test double shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::client::TicketClient;
use crate::error::TicketError;

/// Counts calls, records updates, and plays back scripted failures.
#[derive(Default)]
pub(crate) struct RecordingClient {
    creates: AtomicUsize,
    create_attempts: AtomicUsize,
    update_attempts: AtomicUsize,
    updates: Mutex<Vec<(String, String)>>,
    create_failures: Mutex<VecDeque<TicketError>>,
    update_failures: Mutex<VecDeque<TicketError>>,
    latency: Duration,
}

impl RecordingClient {
    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    pub(crate) async fn fail_creates(&self, errors: impl IntoIterator<Item = TicketError>) {
        self.create_failures.lock().await.extend(errors);
    }

    pub(crate) async fn fail_updates(&self, errors: impl IntoIterator<Item = TicketError>) {
        self.update_failures.lock().await.extend(errors);
    }

    /// Successful creates.
    pub(crate) fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Every create call, failed or not.
    pub(crate) fn create_attempts(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }

    /// Every update call, failed or not.
    pub(crate) fn update_attempts(&self) -> usize {
        self.update_attempts.load(Ordering::SeqCst)
    }

    /// `(ticket_id, stage_name)` for every successful update.
    pub(crate) async fn updates(&self) -> Vec<(String, String)> {
        self.updates.lock().await.clone()
    }
}

#[async_trait]
impl TicketClient for RecordingClient {
    fn name(&self) -> &str {
        "recording"
    }

    async fn create_ticket(
        &self,
        session_id: &str,
        _user_id: &str,
        _stage_name: &str,
    ) -> Result<String, TicketError> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        if let Some(err) = self.create_failures.lock().await.pop_front() {
            return Err(err);
        }
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("T-{n}-{session_id}"))
    }

    async fn update_ticket(&self, ticket_id: &str, stage_name: &str) -> Result<(), TicketError> {
        self.update_attempts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        if let Some(err) = self.update_failures.lock().await.pop_front() {
            return Err(err);
        }
        self.updates
            .lock()
            .await
            .push((ticket_id.to_string(), stage_name.to_string()));
        Ok(())
    }
}
