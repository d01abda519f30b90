// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! REST collaborator for conversations and attachment slots.
//!
//! Responses are wrapped in a `{ "data": ..., "error": { "code", "description" } }`
//! envelope.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ApiConfig;

/// Errors from the REST collaborator.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network/request error
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP error with status code
    #[error("HTTP error: {0}")]
    Status(u16),

    /// Error carried in the response envelope
    #[error("Server error {code}: {description}")]
    Server { code: i32, description: String },

    #[error("Response carried no data")]
    EmptyResponse,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRequest {
    pub user_id: String,
    #[serde(default)]
    pub role: String,
}

/// Body of a conversation creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRequest {
    pub conversation_id: String,
    pub category: String,
    pub participants: Vec<ParticipantRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantResponse {
    pub user_id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSessionResponse {
    pub user_id: String,
    pub session_id: String,
}

/// Authoritative conversation state from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub conversation_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub participants: Vec<ParticipantResponse>,
    /// `None` when the server did not include device sessions.
    #[serde(default)]
    pub participant_sessions: Option<Vec<ParticipantSessionResponse>>,
}

/// A freshly issued upload slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentResponse {
    pub attachment_id: String,
    pub upload_url: String,
    #[serde(default)]
    pub view_url: Option<String>,
    #[serde(default)]
    pub created_at: i64,
}

/// The REST calls the delivery core makes.
pub trait ConversationApi: Send + Sync {
    fn create_conversation(
        &self,
        request: &ConversationRequest,
    ) -> Result<ConversationResponse, ApiError>;

    fn get_conversation(&self, conversation_id: &str) -> Result<ConversationResponse, ApiError>;

    fn request_attachment(&self) -> Result<AttachmentResponse, ApiError>;
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    error: Option<EnvelopeError>,
}

#[derive(Deserialize)]
struct EnvelopeError {
    code: i32,
    #[serde(default)]
    description: String,
}

/// [`ConversationApi`] over HTTP.
pub struct HttpConversationApi {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpConversationApi {
    /// Create a new client from config
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(format!("Courier/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn read<T: DeserializeOwned>(response: reqwest::blocking::Response) -> Result<T, ApiError> {
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 || status.is_server_error() {
            return Err(ApiError::Status(status.as_u16()));
        }
        let envelope: Envelope<T> = response.json()?;
        if let Some(error) = envelope.error {
            return Err(ApiError::Server {
                code: error.code,
                description: error.description,
            });
        }
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        envelope.data.ok_or(ApiError::EmptyResponse)
    }
}

impl ConversationApi for HttpConversationApi {
    fn create_conversation(
        &self,
        request: &ConversationRequest,
    ) -> Result<ConversationResponse, ApiError> {
        let url = format!("{}/conversations", self.base_url);
        let response = self.authorize(self.client.post(&url).json(request)).send()?;
        Self::read(response)
    }

    fn get_conversation(&self, conversation_id: &str) -> Result<ConversationResponse, ApiError> {
        let url = format!("{}/conversations/{}", self.base_url, conversation_id);
        let response = self.authorize(self.client.get(&url)).send()?;
        Self::read(response)
    }

    fn request_attachment(&self) -> Result<AttachmentResponse, ApiError> {
        let url = format!("{}/attachments", self.base_url);
        let response = self.authorize(self.client.post(&url)).send()?;
        Self::read(response)
    }
}
