//! In-process ticket client for deployments without a ticket service.
//!
//! Mints ticket ids locally and logs every change, so stage progress still
//! shows up in the service log.

use async_trait::async_trait;
use tracing::info;

use super::client::TicketClient;
use crate::error::TicketError;

pub struct LocalTicketClient;

impl LocalTicketClient {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalTicketClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TicketClient for LocalTicketClient {
    fn name(&self) -> &str {
        "local"
    }

    async fn create_ticket(
        &self,
        session_id: &str,
        user_id: &str,
        stage_name: &str,
    ) -> Result<String, TicketError> {
        let ticket_id = format!("ONB-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        info!(
            ticket_id = %ticket_id,
            session_id,
            user_id,
            stage = stage_name,
            "Onboarding ticket opened"
        );
        Ok(ticket_id)
    }

    async fn update_ticket(&self, ticket_id: &str, stage_name: &str) -> Result<(), TicketError> {
        info!(ticket_id, stage = stage_name, "Onboarding ticket moved");
        Ok(())
    }
}
