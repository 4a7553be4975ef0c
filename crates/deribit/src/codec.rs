//! JSON-RPC 2.0 envelope encoding and classification of incoming frames.
//!
//! Decoding is side-effect-free; the session decides how to react to each
//! variant.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;

use strangle_core::{BotError, Result};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// An outgoing request. `id` defaults to a process-wide monotonic counter so
/// two frames never share one.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            method: method.into(),
            params,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    /// Wire form of the request.
    ///
    /// # Errors
    ///
    /// Returns an error only if the params fail to serialize.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A classified incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// An RPC response carrying a `result`.
    Result(Value),
    /// An RPC error response.
    Error { code: i64, message: String },
    /// A subscription push: `{"method":"subscription","params":{channel,data}}`.
    Notification { channel: String, data: Value },
    /// Anything without `result`, `error` or a params envelope. Logged and
    /// otherwise ignored by callers.
    Unexpected(Value),
}

/// Classifies one raw frame.
///
/// # Errors
///
/// Returns an error if the frame is not valid JSON.
pub fn decode(raw: &str) -> Result<Incoming> {
    let obj: Value = serde_json::from_str(raw)?;

    if let Some(result) = obj.get("result") {
        return Ok(Incoming::Result(result.clone()));
    }

    if let Some(error) = obj.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        return Ok(Incoming::Error { code, message });
    }

    if let Some(params) = obj.get("params") {
        if let (Some(channel), Some(data)) = (
            params.get("channel").and_then(Value::as_str),
            params.get("data"),
        ) {
            return Ok(Incoming::Notification {
                channel: channel.to_string(),
                data: data.clone(),
            });
        }
    }

    Ok(Incoming::Unexpected(obj))
}

/// Pulls a required field out of a result payload.
///
/// # Errors
///
/// Returns [`BotError::Payload`] when the field is missing.
pub fn require<'a>(payload: &'a Value, field: &str) -> Result<&'a Value> {
    payload
        .get(field)
        .ok_or_else(|| BotError::Payload(format!("missing field `{field}` in {payload}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_carries_envelope() {
        let req = RpcRequest::new("public/auth", json!({"grant_type": "client_credentials"}))
            .with_id(7);
        let wire = req.encode().unwrap();
        let parsed: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed["jsonrpc"], "2.0");
        assert_eq!(parsed["id"], 7);
        assert_eq!(parsed["method"], "public/auth");
    }

    #[test]
    fn ids_are_unique() {
        let a = RpcRequest::new("m", json!({}));
        let b = RpcRequest::new("m", json!({}));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn decode_result() {
        let incoming = decode(r#"{"id":1,"result":{"index_price":26000.0}}"#).unwrap();
        assert!(matches!(incoming, Incoming::Result(_)));
    }

    #[test]
    fn decode_error() {
        let incoming =
            decode(r#"{"id":1,"error":{"code":13004,"message":"invalid_credentials"}}"#).unwrap();
        assert_eq!(
            incoming,
            Incoming::Error { code: 13004, message: "invalid_credentials".into() }
        );
    }

    #[test]
    fn decode_notification() {
        let raw = r#"{"method":"subscription","params":{"channel":"deribit_price_index.btc_usd","data":{"price":26000.0}}}"#;
        match decode(raw).unwrap() {
            Incoming::Notification { channel, data } => {
                assert_eq!(channel, "deribit_price_index.btc_usd");
                assert_eq!(data["price"], 26000.0);
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn decode_unclassifiable_frame() {
        let incoming = decode(r#"{"method":"heartbeat"}"#).unwrap();
        assert!(matches!(incoming, Incoming::Unexpected(_)));
    }

    #[test]
    fn decode_rejects_bad_json() {
        assert!(decode("not json").is_err());
    }
}
