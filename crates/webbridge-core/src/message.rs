//! Wire framing: messages and batches.
//!
//! A batch is one JSON array. Each element is either a call
//! (`handlerName`/`data`/`callbackId`) or a reply (`responseId`/`responseData`).
//! `data` and `responseData` are always written, as `null` when empty.

use crate::types::BridgeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The unit of exchange between the two sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawMessage", into = "RawMessage")]
pub enum Message {
    /// A call to a handler on the receiving side.
    Call {
        handler_name: Option<String>,
        data: Value,
        /// Present only when the sender expects a reply.
        callback_id: Option<String>,
    },
    /// The answer to an earlier call.
    Reply {
        response_id: String,
        response_data: Value,
    },
}

impl Message {
    /// Build a call message.
    pub fn call(handler_name: Option<String>, data: Value, callback_id: Option<String>) -> Self {
        Message::Call {
            handler_name,
            data,
            callback_id,
        }
    }

    /// Build a reply to the call carrying `callback_id`.
    pub fn reply(callback_id: impl Into<String>, response_data: Value) -> Self {
        Message::Reply {
            response_id: callback_id.into(),
            response_data,
        }
    }

    /// Returns true if this message answers an earlier call.
    pub fn is_reply(&self) -> bool {
        matches!(self, Message::Reply { .. })
    }

    /// Returns true if this call expects a reply.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            Message::Call {
                callback_id: Some(_),
                ..
            }
        )
    }

    /// Short description used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Call {
                callback_id: Some(_),
                ..
            } => "call",
            Message::Call { .. } => "send",
            Message::Reply { .. } => "reply",
        }
    }
}

/// Field-level view of a message as it appears on the wire.
///
/// Every field is optional when reading; `responseId` decides the kind.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    handler_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    callback_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response_data: Option<Value>,
}

impl From<RawMessage> for Message {
    fn from(raw: RawMessage) -> Self {
        match raw.response_id {
            Some(response_id) => Message::Reply {
                response_id,
                response_data: raw.response_data.unwrap_or(Value::Null),
            },
            None => Message::Call {
                handler_name: raw.handler_name,
                data: raw.data.unwrap_or(Value::Null),
                callback_id: raw.callback_id,
            },
        }
    }
}

impl From<Message> for RawMessage {
    fn from(message: Message) -> Self {
        match message {
            Message::Call {
                handler_name,
                data,
                callback_id,
            } => RawMessage {
                handler_name,
                data: Some(data),
                callback_id,
                ..Default::default()
            },
            Message::Reply {
                response_id,
                response_data,
            } => RawMessage {
                response_id: Some(response_id),
                response_data: Some(response_data),
                ..Default::default()
            },
        }
    }
}

/// Serialize a batch of messages as one JSON array.
pub fn encode_batch(messages: &[Message]) -> Result<String, BridgeError> {
    Ok(serde_json::to_string(messages)?)
}

/// Decode a batch. Any malformed element rejects the whole batch.
pub fn decode_batch(batch: &str) -> Result<Vec<Message>, BridgeError> {
    let value: Value =
        serde_json::from_str(batch).map_err(|e| BridgeError::Decode(e.to_string()))?;

    let elements = match value {
        Value::Array(elements) => elements,
        other => {
            return Err(BridgeError::Decode(format!(
                "expected a JSON array, got {}",
                json_kind(&other)
            )))
        }
    };

    elements
        .into_iter()
        .enumerate()
        .map(|(index, element)| {
            if !element.is_object() {
                return Err(BridgeError::Decode(format!(
                    "element {} is {}, not an object",
                    index,
                    json_kind(&element)
                )));
            }
            serde_json::from_value(element)
                .map_err(|e| BridgeError::Decode(format!("element {}: {}", index, e)))
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
