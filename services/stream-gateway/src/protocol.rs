//! Client wire protocol
//!
//! Inbound: `{"op": string, "content": string}`.
//! Outbound: `{"code": int, "msg": string, "category": string, "pair": string|null, "result": any}`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backpressure::Frame;
use crate::error::HubError;
use crate::events::DomainEvent;

/// Category reported on every error reply
pub const ERROR_CATEGORY: &str = "error";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientMessage {
    pub op: String,
    pub content: String,
}

impl ClientMessage {
    /// Parse one text frame. Missing fields, wrong types and empty
    /// `content` are all malformed.
    pub fn parse(raw: &str) -> Result<Self, HubError> {
        let message: ClientMessage = serde_json::from_str(raw)
            .map_err(|e| HubError::MalformedMessage(format!("expected {{op, content}}: {e}")))?;
        if message.content.is_empty() {
            return Err(HubError::MalformedMessage(
                "content must be non-empty".to_string(),
            ));
        }
        Ok(message)
    }
}

/// Supported operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    SubPair,
    Sub,
    Unsub,
    UnsubAll,
    UnsubPair,
    Subscriptions,
    AuthApi,
    Status,
}

impl Op {
    pub fn parse(raw: &str) -> Option<Op> {
        let op = match raw {
            "sub_pair" => Op::SubPair,
            "sub" => Op::Sub,
            "unsub" => Op::Unsub,
            "unsub_all" => Op::UnsubAll,
            "unsub_pair" => Op::UnsubPair,
            "subscriptions" => Op::Subscriptions,
            "auth_api" => Op::AuthApi,
            "status" => Op::Status,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Op::SubPair => "sub_pair",
            Op::Sub => "sub",
            Op::Unsub => "unsub",
            Op::UnsubAll => "unsub_all",
            Op::UnsubPair => "unsub_pair",
            Op::Subscriptions => "subscriptions",
            Op::AuthApi => "auth_api",
            Op::Status => "status",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reply and push envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub code: u16,
    pub msg: String,
    pub category: String,
    pub pair: Option<String>,
    pub result: Value,
}

impl ServerMessage {
    pub fn ok(msg: &str, category: &str, pair: Option<String>, result: Value) -> Self {
        Self {
            code: 200,
            msg: msg.to_string(),
            category: category.to_string(),
            pair,
            result,
        }
    }

    pub fn error(err: &HubError, pair: Option<String>) -> Self {
        Self {
            code: err.code(),
            msg: err.to_string(),
            category: ERROR_CATEGORY.to_string(),
            pair,
            result: Value::Null,
        }
    }

    pub fn event(event: &DomainEvent) -> Self {
        Self {
            code: 200,
            msg: "update".to_string(),
            category: event.category.to_string(),
            pair: Some(event.pair.to_string()),
            result: event.payload.clone(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.category == ERROR_CATEGORY
    }

    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }
}
