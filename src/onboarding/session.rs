//! Session data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::Stage;
use crate::error::SessionError;

/// Who is being onboarded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub username: String,
    pub email: String,
}

impl UserIdentity {
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            email: email.into(),
        }
    }

    /// Check that every required field is present. Fields are trimmed first.
    pub fn validate(&self) -> Result<(), SessionError> {
        let required = [
            ("user_id", &self.user_id),
            ("username", &self.username),
            ("email", &self.email),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(SessionError::Validation {
                    field: field.to_string(),
                    reason: "is required".to_string(),
                });
            }
        }
        if !self.email.contains('@') {
            return Err(SessionError::Validation {
                field: "email".to_string(),
                reason: format!("'{}' is not an email address", self.email),
            });
        }
        Ok(())
    }
}

/// Who authored a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    User,
    Agent,
}

/// One exchanged message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub author: Author,
    pub content: String,
    pub stage: Stage,
    pub at: DateTime<Utc>,
}

/// The session's link to its external ticket.
///
/// `ticket_id` is set at most once. `create_issued` is persisted before the
/// create call goes out and never cleared, so a create whose outcome is
/// unknown is not sent a second time. `synced_stage` records the last stage
/// the ticket is known to reflect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketLink {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    #[serde(default)]
    pub create_issued: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_stage: Option<Stage>,
    /// Set after a fatal collaborator failure; cleared by a manual retry.
    pub sync_disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TicketLink {
    /// A create was sent but no ticket id came back. Sync stays blocked
    /// until a ticket is linked by hand.
    pub fn awaiting_link(&self) -> bool {
        self.create_issued && self.ticket_id.is_none()
    }
}

/// One user's onboarding run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user: UserIdentity,
    pub stage: Stage,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub history: Vec<HistoryEntry>,
    pub ticket: TicketLink,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// A fresh session at the first stage.
    pub fn new(id: impl Into<String>, user: UserIdentity, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            user,
            stage: Stage::first(),
            created_at: now,
            last_activity: now,
            history: Vec::new(),
            ticket: TicketLink::default(),
            completed: false,
            completed_at: None,
        }
    }

    /// Append a message to the history.
    pub fn record(&mut self, author: Author, content: impl Into<String>, at: DateTime<Utc>) {
        self.history.push(HistoryEntry {
            author,
            content: content.into(),
            stage: self.stage,
            at,
        });
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    /// Whether the external ticket lags the current stage and a
    /// reconciliation pass should pick this session up.
    pub fn needs_ticket_sync(&self) -> bool {
        if self.ticket.sync_disabled || self.ticket.awaiting_link() {
            return false;
        }
        match self.ticket.ticket_id {
            Some(_) => self.ticket.synced_stage != Some(self.stage),
            // Tickets are opened on the first transition.
            None => self.stage != Stage::first(),
        }
    }

    /// Compare against the prior state of the same session and describe the
    /// first broken invariant, if any.
    pub(crate) fn invariant_violation(&self, before: &Session) -> Option<String> {
        if self.id != before.id {
            return Some(format!("session id changed to {}", self.id));
        }
        if self.stage < before.stage {
            return Some(format!("stage regressed from {} to {}", before.stage, self.stage));
        }
        if !before.stage.can_transition_to(self.stage) {
            return Some(format!("stage skipped from {} to {}", before.stage, self.stage));
        }
        if let Some(ref existing) = before.ticket.ticket_id {
            if self.ticket.ticket_id.as_ref() != Some(existing) {
                return Some(format!("ticket id {existing} was replaced or cleared"));
            }
        }
        if before.ticket.create_issued && !self.ticket.create_issued {
            return Some("ticket create marker was cleared".to_string());
        }
        if before.completed && !self.completed {
            return Some("completion flag was cleared".to_string());
        }
        if self.history.len() < before.history.len() {
            return Some("history was truncated".to_string());
        }
        None
    }
}

/// Point-in-time view used by listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub stage: Stage,
    pub completed: bool,
    pub last_activity: DateTime<Utc>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            user_id: session.user.user_id.clone(),
            stage: session.stage,
            completed: session.completed,
            last_activity: session.last_activity,
        }
    }
}
