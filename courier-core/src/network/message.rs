// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wire Message Types
//!
//! Every frame on the chat socket carries one [`WireMessage`]. Requests are
//! correlated with their replies through `id`; frames whose id matches no
//! pending transaction are server pushes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const CREATE_MESSAGE: &str = "CREATE_MESSAGE";
pub const CREATE_CALL: &str = "CREATE_CALL";
pub const CONSUME_SESSION_SIGNAL_KEYS: &str = "CONSUME_SESSION_SIGNAL_KEYS";
pub const CREATE_SIGNAL_KEY_MESSAGES: &str = "CREATE_SIGNAL_KEY_MESSAGES";
pub const LIST_PENDING_MESSAGES: &str = "LIST_PENDING_MESSAGES";
pub const ACKNOWLEDGE_MESSAGE_RECEIPT: &str = "ACKNOWLEDGE_MESSAGE_RECEIPT";
pub const ACKNOWLEDGE_MESSAGE_RECEIPTS: &str = "ACKNOWLEDGE_MESSAGE_RECEIPTS";
pub const ERROR_ACTION: &str = "ERROR";

/// Server error codes the core reacts to.
pub mod codes {
    pub const AUTHENTICATION: i32 = 401;
    pub const FORBIDDEN: i32 = 403;
    pub const CONVERSATION_CHECKSUM_INVALID: i32 = 20140;
}

/// Error attached to a server reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub code: i32,
    #[serde(default)]
    pub description: String,
}

/// A single frame on the chat socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Sender-generated UUID, the sole correlation key.
    pub id: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServerError>,
}

impl WireMessage {
    /// Creates a request with a fresh id.
    pub fn request(action: &str, params: Option<Value>) -> Self {
        WireMessage {
            id: Uuid::new_v4().to_string(),
            action: action.to_string(),
            params,
            data: None,
            error: None,
        }
    }

    /// Builds a successful reply to `request` carrying `data`.
    pub fn reply_to(request: &WireMessage, data: Option<Value>) -> Self {
        WireMessage {
            id: request.id.clone(),
            action: request.action.clone(),
            params: None,
            data,
            error: None,
        }
    }

    /// Builds an error reply to `request`.
    pub fn error_reply(request: &WireMessage, code: i32, description: &str) -> Self {
        WireMessage {
            id: request.id.clone(),
            action: ERROR_ACTION.to_string(),
            params: None,
            data: None,
            error: Some(ServerError {
                code,
                description: description.to_string(),
            }),
        }
    }

    /// True if this frame is a server push the inbound dispatcher handles.
    pub fn is_receive_action(&self) -> bool {
        matches!(
            self.action.as_str(),
            CREATE_MESSAGE | CREATE_CALL | ACKNOWLEDGE_MESSAGE_RECEIPT
        )
    }

    /// Returns the conversation id carried in the request params, if any.
    pub fn conversation_id(&self) -> Option<&str> {
        self.params
            .as_ref()
            .and_then(|p| p.get("conversation_id"))
            .and_then(Value::as_str)
    }

    pub fn error_code(&self) -> Option<i32> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// Params of a `CREATE_MESSAGE` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageParam {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    pub message_id: String,
    pub category: String,
    /// Base64 payload (ciphertext for encrypted categories).
    pub data: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_checksum: Option<String>,
}

/// A `(user, session)` pair addressed by key requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionParam {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl SessionParam {
    pub fn new(user_id: &str, session_id: Option<&str>) -> Self {
        SessionParam {
            user_id: user_id.to_string(),
            session_id: session_id.map(str::to_string),
        }
    }
}

/// One encrypted sender key addressed to a single device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalKeyMessage {
    pub message_id: String,
    pub recipient_id: String,
    /// Base64 ciphertext of the sender key.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl SignalKeyMessage {
    pub fn new(recipient_id: &str, ciphertext: &[u8], session_id: Option<&str>) -> Self {
        use base64::Engine;
        SignalKeyMessage {
            message_id: Uuid::new_v4().to_string(),
            recipient_id: recipient_id.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(ciphertext),
            session_id: session_id.map(str::to_string),
        }
    }
}

/// A receipt acknowledgement queued for the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    pub message_id: String,
    pub status: String,
}

/// Payload of a pushed message or receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushData {
    pub message_id: String,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// Builds a `CONSUME_SESSION_SIGNAL_KEYS` request for the given devices.
pub fn consume_session_signal_keys(sessions: &[SessionParam]) -> WireMessage {
    WireMessage::request(
        CONSUME_SESSION_SIGNAL_KEYS,
        Some(serde_json::json!({ "recipients": sessions })),
    )
}

/// Builds a `CREATE_SIGNAL_KEY_MESSAGES` request carrying sender keys.
pub fn create_signal_key_messages(
    conversation_id: &str,
    messages: &[SignalKeyMessage],
    conversation_checksum: Option<&str>,
) -> WireMessage {
    let mut params = serde_json::json!({
        "conversation_id": conversation_id,
        "messages": messages,
    });
    if let Some(checksum) = conversation_checksum {
        params["conversation_checksum"] = Value::String(checksum.to_string());
    }
    WireMessage::request(CREATE_SIGNAL_KEY_MESSAGES, Some(params))
}

/// Builds a `CREATE_MESSAGE` request.
pub fn create_message(param: &MessageParam) -> Result<WireMessage, serde_json::Error> {
    Ok(WireMessage::request(
        CREATE_MESSAGE,
        Some(serde_json::to_value(param)?),
    ))
}

/// Builds the `LIST_PENDING_MESSAGES` request sent after every connect.
pub fn list_pending_messages() -> WireMessage {
    WireMessage::request(LIST_PENDING_MESSAGES, None)
}

/// Builds an `ACKNOWLEDGE_MESSAGE_RECEIPTS` request.
pub fn acknowledge_receipts(acks: &[AckMessage]) -> Result<WireMessage, serde_json::Error> {
    Ok(WireMessage::request(
        ACKNOWLEDGE_MESSAGE_RECEIPTS,
        Some(serde_json::json!({ "messages": serde_json::to_value(acks)? })),
    ))
}
