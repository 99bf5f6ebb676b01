//! Wire protocol for Rust <-> game communication
//!
//! Messages are MessagePack arrays tagged by their first element:
//! - Request: `[0, msgid, method, params]`
//! - Response: `[1, msgid, error, result]`
//! - Notification: `[2, method, params]`
//!
//! A response whose `error` is nil carries a successful `result`.

use kart_remote_core::{Result, RpcError};
use rmpv::Value;
use serde::ser::{Serialize, SerializeTuple, Serializer};

/// Message type tags
pub mod message_type {
    pub const REQUEST: u8 = 0;
    pub const RESPONSE: u8 = 1;
    pub const NOTIFICATION: u8 = 2;
}

/// Request identifier, unique per client
pub type MsgId = u32;

/// A single MessagePack-RPC message
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    /// Call expecting a response with the same msgid
    Request {
        msgid: MsgId,
        method: String,
        params: Vec<Value>,
    },

    /// Answer to a request
    Response {
        msgid: MsgId,
        error: Value,
        result: Value,
    },

    /// One-way call, never answered
    Notification { method: String, params: Vec<Value> },
}

/// Error and result halves of a response
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub error: Value,
    pub result: Value,
}

impl Reply {
    /// Turn the reply into the call's outcome
    pub fn into_result(self, method: &str) -> Result<Value> {
        if self.error.is_nil() {
            Ok(self.result)
        } else {
            Err(RpcError::Remote {
                method: method.to_string(),
                message: describe(&self.error),
            })
        }
    }
}

/// Render a remote error value for humans
fn describe(error: &Value) -> String {
    match error {
        Value::String(s) => match s.as_str() {
            Some(text) => text.to_string(),
            None => String::from_utf8_lossy(s.as_bytes()).into_owned(),
        },
        Value::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        other => other.to_string(),
    }
}

impl Serialize for RpcMessage {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            RpcMessage::Request {
                msgid,
                method,
                params,
            } => {
                let mut tuple = serializer.serialize_tuple(4)?;
                tuple.serialize_element(&message_type::REQUEST)?;
                tuple.serialize_element(msgid)?;
                tuple.serialize_element(method)?;
                tuple.serialize_element(params)?;
                tuple.end()
            }
            RpcMessage::Response {
                msgid,
                error,
                result,
            } => {
                let mut tuple = serializer.serialize_tuple(4)?;
                tuple.serialize_element(&message_type::RESPONSE)?;
                tuple.serialize_element(msgid)?;
                tuple.serialize_element(error)?;
                tuple.serialize_element(result)?;
                tuple.end()
            }
            RpcMessage::Notification { method, params } => {
                let mut tuple = serializer.serialize_tuple(3)?;
                tuple.serialize_element(&message_type::NOTIFICATION)?;
                tuple.serialize_element(method)?;
                tuple.serialize_element(params)?;
                tuple.end()
            }
        }
    }
}

impl RpcMessage {
    /// Interpret a decoded MessagePack value as a message
    pub fn from_value(value: Value) -> Result<Self> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(RpcError::Protocol(format!(
                    "Expected message array, got {}",
                    other
                )));
            }
        };

        let mut items = items.into_iter();
        let kind = items
            .next()
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RpcError::Protocol("Missing message type".into()))?;

        match (kind, items.len()) {
            (k, 3) if k == message_type::REQUEST as u64 => Ok(RpcMessage::Request {
                msgid: next_msgid(&mut items)?,
                method: next_method(&mut items)?,
                params: next_params(&mut items)?,
            }),
            (k, 3) if k == message_type::RESPONSE as u64 => {
                let msgid = next_msgid(&mut items)?;
                let error = items.next().unwrap_or(Value::Nil);
                let result = items.next().unwrap_or(Value::Nil);
                Ok(RpcMessage::Response {
                    msgid,
                    error,
                    result,
                })
            }
            (k, 2) if k == message_type::NOTIFICATION as u64 => Ok(RpcMessage::Notification {
                method: next_method(&mut items)?,
                params: next_params(&mut items)?,
            }),
            (k, n) => Err(RpcError::Protocol(format!(
                "Unknown message shape: type {} with {} fields",
                k, n
            ))),
        }
    }
}

fn next_msgid(items: &mut impl Iterator<Item = Value>) -> Result<MsgId> {
    items
        .next()
        .and_then(|v| v.as_u64())
        .and_then(|id| MsgId::try_from(id).ok())
        .ok_or_else(|| RpcError::Protocol("Invalid msgid".into()))
}

fn next_method(items: &mut impl Iterator<Item = Value>) -> Result<String> {
    match items.next() {
        Some(Value::String(s)) => s
            .into_str()
            .ok_or_else(|| RpcError::Protocol("Method name is not UTF-8".into())),
        Some(Value::Binary(bytes)) => String::from_utf8(bytes)
            .map_err(|_| RpcError::Protocol("Method name is not UTF-8".into())),
        _ => Err(RpcError::Protocol("Missing method name".into())),
    }
}

fn next_params(items: &mut impl Iterator<Item = Value>) -> Result<Vec<Value>> {
    match items.next() {
        Some(Value::Array(params)) => Ok(params),
        Some(Value::Nil) => Ok(Vec::new()),
        _ => Err(RpcError::Protocol("Params must be an array".into())),
    }
}

/// Serialize a message to MessagePack bytes
pub fn serialize(msg: &RpcMessage) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(msg)?)
}

/// Deserialize a message from MessagePack bytes
pub fn deserialize(bytes: &[u8]) -> Result<RpcMessage> {
    let value = rmpv::decode::read_value(&mut &bytes[..])?;
    RpcMessage::from_value(value)
}
