//! Background reconciliation dispatcher.
//!
//! Ticket events are queued and reconciled on spawned tasks so the request
//! path never waits on the ticket service. `TicketSync` serializes work per
//! session, so events for one session still land in order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::sync::TicketSync;
use crate::onboarding::engine::TicketEvent;

/// Handle to the background dispatcher.
pub struct SyncWorker {
    tx: Mutex<Option<mpsc::UnboundedSender<TicketEvent>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncWorker {
    /// Spawn the dispatcher loop.
    pub fn spawn(sync: Arc<TicketSync>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(sync, rx));
        Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue an event. Returns false once the worker has shut down.
    pub async fn dispatch(&self, event: TicketEvent) -> bool {
        match self.tx.lock().await.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Stop accepting events and wait up to `grace` for in-flight
    /// reconciliations. Whatever is still running after that is abandoned.
    ///
    /// Returns true if everything finished within the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tx.lock().await.take();
        let Some(mut handle) = self.handle.lock().await.take() else {
            return true;
        };

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(_) => {
                info!("Ticket sync worker drained");
                true
            }
            Err(_) => {
                warn!(grace_secs = grace.as_secs_f64(), "Abandoning in-flight ticket reconciliations");
                handle.abort();
                false
            }
        }
    }
}

async fn run(sync: Arc<TicketSync>, mut rx: mpsc::UnboundedReceiver<TicketEvent>) {
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let sync = Arc::clone(&sync);
                tasks.spawn(async move {
                    match sync.reconcile(&event).await {
                        Ok(outcome) => debug!(session_id = %event.session_id, ?outcome, "Background reconcile done"),
                        Err(e) => warn!(session_id = %event.session_id, error = %e, "Background reconcile failed"),
                    }
                });
            }
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }
    // Channel closed: drain what is in flight. Dropping the set (on abort)
    // cancels the rest.
    while tasks.join_next().await.is_some() {}
}
