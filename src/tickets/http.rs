//! HTTP ticket service client.
//!
//! Talks JSON to a ticket tracker:
//! - `POST {base}/tickets` `{external_id, user_id, summary, status, labels}` → `{id}`
//! - `PATCH {base}/tickets/{id}` `{status, labels}`
//! - `GET {base}/health`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::client::TicketClient;
use crate::error::{ConfigError, TicketError};

#[derive(Serialize)]
struct CreateTicketBody<'a> {
    external_id: &'a str,
    user_id: &'a str,
    summary: String,
    status: &'a str,
    labels: Vec<String>,
}

#[derive(Serialize)]
struct UpdateTicketBody<'a> {
    status: &'a str,
    labels: Vec<String>,
}

#[derive(Deserialize)]
struct CreatedTicket {
    id: String,
}

/// reqwest-backed `TicketClient`.
pub struct HttpTicketClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpTicketClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "ticket_api_url".to_string(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token.expose_secret()),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, TicketError> {
        let resp = self.authorize(req).send().await.map_err(classify_transport)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

fn labels(stage_name: &str) -> Vec<String> {
    vec!["onboarding".to_string(), format!("stage:{stage_name}")]
}

#[async_trait]
impl TicketClient for HttpTicketClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn create_ticket(
        &self,
        session_id: &str,
        user_id: &str,
        stage_name: &str,
    ) -> Result<String, TicketError> {
        let body = CreateTicketBody {
            external_id: session_id,
            user_id,
            summary: format!("Onboarding: {user_id}"),
            status: stage_name,
            labels: labels(stage_name),
        };
        let req = self
            .http
            .post(format!("{}/tickets", self.base_url))
            .header("Idempotency-Key", session_id)
            .json(&body);

        let created: CreatedTicket = self
            .send(req)
            .await?
            .json()
            .await
            .map_err(|e| TicketError::fatal(format!("unreadable create response: {e}")))?;
        Ok(created.id)
    }

    async fn update_ticket(&self, ticket_id: &str, stage_name: &str) -> Result<(), TicketError> {
        let body = UpdateTicketBody {
            status: stage_name,
            labels: labels(stage_name),
        };
        let req = self
            .http
            .patch(format!("{}/tickets/{}", self.base_url, ticket_id))
            .json(&body);
        self.send(req).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), TicketError> {
        let req = self.http.get(format!("{}/health", self.base_url));
        self.send(req).await?;
        Ok(())
    }
}

/// Map a non-success HTTP status to a ticket error kind.
pub fn classify_status(status: StatusCode, body: &str) -> TicketError {
    let reason = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.chars().take(200).collect::<String>())
    };
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        TicketError::Retryable { reason }
    } else {
        TicketError::Fatal { reason }
    }
}

/// A request that could not be built (bad URL, bad header) fails the same
/// way every time, so it is never retried.
fn classify_transport(err: reqwest::Error) -> TicketError {
    if err.is_builder() {
        return TicketError::fatal(err.to_string());
    }
    if err.is_timeout() || err.is_connect() || err.is_request() {
        TicketError::retryable(err.to_string())
    } else {
        TicketError::fatal(err.to_string())
    }
}
