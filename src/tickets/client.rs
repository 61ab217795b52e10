//! Ticket collaborator capability.

use async_trait::async_trait;

use crate::error::TicketError;

/// Creates and updates the external ticket that mirrors a session.
///
/// Implementations classify their failures as `TicketError::Retryable`
/// (timeouts, 5xx, rate limits) or `TicketError::Fatal` (bad credentials,
/// malformed payloads). They do not need to deduplicate creates; callers
/// guarantee at most one successful create per session.
#[async_trait]
pub trait TicketClient: Send + Sync {
    /// Name used in logs and health reports.
    fn name(&self) -> &str;

    /// Open a ticket for a session. Returns the external ticket id.
    async fn create_ticket(
        &self,
        session_id: &str,
        user_id: &str,
        stage_name: &str,
    ) -> Result<String, TicketError>;

    /// Move an existing ticket to a new stage.
    async fn update_ticket(&self, ticket_id: &str, stage_name: &str) -> Result<(), TicketError>;

    /// Check that the ticket service is reachable.
    async fn health_check(&self) -> Result<(), TicketError> {
        Ok(())
    }
}
