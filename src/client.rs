//! HTTP client for the onboarding API, used by the CLI commands.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ClientError;
use crate::onboarding::routes::ApiResponse;
use crate::onboarding::service::{
    MessageRequest, MessageResponse, SessionListItem, StartRequest, StartResponse,
    StatusResponse,
};

pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn start_session(
        &self,
        user_id: &str,
        username: &str,
        email: &str,
    ) -> Result<StartResponse, ClientError> {
        let body = StartRequest {
            user_id: user_id.to_string(),
            username: username.to_string(),
            email: email.to_string(),
        };
        self.post("/api/v1/onboarding/start", &body).await
    }

    pub async fn send_message(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<MessageResponse, ClientError> {
        let body = MessageRequest {
            session_id: session_id.to_string(),
            message: message.to_string(),
        };
        self.post("/api/v1/onboarding/message", &body).await
    }

    pub async fn status(&self, session_id: &str) -> Result<StatusResponse, ClientError> {
        self.get(&format!("/api/v1/onboarding/status/{session_id}"))
            .await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionListItem>, ClientError> {
        self.get("/api/v1/onboarding/sessions").await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;
        unwrap_envelope(resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        unwrap_envelope(resp).await
    }
}

async fn unwrap_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    let text = resp.text().await?;
    parse_envelope(status, &text)
}

fn parse_envelope<T: DeserializeOwned>(
    status: reqwest::StatusCode,
    text: &str,
) -> Result<T, ClientError> {
    let envelope: ApiResponse<T> = serde_json::from_str(text).map_err(|e| {
        ClientError::Malformed(format!("HTTP {status}: {e}"))
    })?;

    if !envelope.success {
        return Err(ClientError::Api(
            envelope
                .error
                .unwrap_or_else(|| format!("request failed with HTTP {status}")),
        ));
    }
    envelope
        .data
        .ok_or_else(|| ClientError::Malformed("successful response without data".to_string()))
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    #[test]
    fn failure_envelope_becomes_api_error() {
        let body = r#"{"success":false,"error":"Session not found: nope"}"#;
        let err = parse_envelope::<StatusResponse>(StatusCode::NOT_FOUND, body).unwrap_err();
        match err {
            ClientError::Api(message) => assert_eq!(message, "Session not found: nope"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn success_without_data_is_malformed() {
        let err = parse_envelope::<Vec<SessionListItem>>(StatusCode::OK, r#"{"success":true}"#)
            .unwrap_err();
        assert!(matches!(err, ClientError::Malformed(_)));
    }

    #[test]
    fn non_envelope_body_is_malformed() {
        let err = parse_envelope::<StartResponse>(StatusCode::BAD_GATEWAY, "upstream down")
            .unwrap_err();
        match err {
            ClientError::Malformed(message) => assert!(message.contains("502")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
