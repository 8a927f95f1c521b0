//! Wire format for the RPC channel.
//!
//! Every frame is a single JSON object on its own line, tagged by `type`:
//!
//! | type | direction | meaning |
//! |---|---|---|
//! | `call` | client → server | invoke operation `op` with `payload` |
//! | `ack` | server → client | completion of call `id`: `data` or `error` |
//! | `subscribe` | client → server | open stream `id` on `channel` |
//! | `event` | server → client | one pushed event for stream `id` |
//! | `stream_error` | server → client | stream-level error for stream `id` |
//! | `stream_end` | server → client | the server finished stream `id` |
//! | `unsubscribe` | client → server | cancel stream `id` |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::LinesCodec;

use crate::error::RpcResult;

/// Maximum encoded frame length (16 MiB). Site files travel inside frames.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Line codec shared by both ends of the channel.
pub fn codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_FRAME_LEN)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Call {
        id: u64,
        op: String,
        #[serde(default)]
        payload: Value,
    },
    Ack {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default)]
        data: Value,
    },
    Subscribe {
        id: u64,
        channel: String,
        #[serde(default)]
        payload: Value,
    },
    Event {
        id: u64,
        data: Value,
    },
    StreamError {
        id: u64,
        error: String,
    },
    StreamEnd {
        id: u64,
    },
    Unsubscribe {
        id: u64,
    },
}

impl Frame {
    pub fn ok(id: u64, data: Value) -> Self {
        Frame::Ack {
            id,
            error: None,
            data,
        }
    }

    pub fn failed(id: u64, error: String) -> Self {
        Frame::Ack {
            id,
            error: Some(error),
            data: Value::Null,
        }
    }

    /// Encode to a single line (without the trailing newline).
    pub fn encode(&self) -> RpcResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(line: &str) -> RpcResult<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_wire_shape() {
        let frame = Frame::Call {
            id: 7,
            op: "/sites-available/read".to_string(),
            payload: json!("shop_main"),
        };
        let line = frame.encode().unwrap();
        assert!(!line.contains('\n'));
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "call");
        assert_eq!(value["op"], "/sites-available/read");
        assert_eq!(Frame::decode(&line).unwrap(), frame);
    }

    #[test]
    fn ack_without_error_omits_field() {
        let line = Frame::ok(1, json!(true)).encode().unwrap();
        assert!(!line.contains("error"));
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let frame = Frame::decode(r#"{"type":"call","id":3,"op":"/reload"}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Call {
                id: 3,
                op: "/reload".to_string(),
                payload: Value::Null,
            }
        );
    }

    #[test]
    fn multiline_content_stays_on_one_line() {
        let frame = Frame::ok(2, json!({"content": "server {\n\tlisten 80;\n}\n"}));
        let line = frame.encode().unwrap();
        assert_eq!(line.lines().count(), 1);
        assert_eq!(Frame::decode(&line).unwrap(), frame);
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(Frame::decode(r#"{"type":"bogus","id":1}"#).is_err());
    }
}
