//! Live log streaming over websockets: the `/logs` endpoint and the
//! reconnecting viewer client.

pub mod client;
pub mod server;

use serde::{Deserialize, Serialize};

pub use client::{ClientError, RetryPolicy, StreamTarget, TailClient};
pub use server::{router, StreamParams, StreamState};

/// One server→client frame. Serialized as `{"line": "..."}` or
/// `{"error": "..."}`; an error frame is always followed by close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frame {
    Line(String),
    Error(String),
}

impl Frame {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"error":"encoding failed"}"#))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_wire_shape() {
        assert_eq!(Frame::Line("a \"b\"".into()).to_json(), r#"{"line":"a \"b\""}"#);
        assert_eq!(Frame::Error("gone".into()).to_json(), r#"{"error":"gone"}"#);

        let parsed: Frame = serde_json::from_str(r#"{"line":"x"}"#).unwrap();
        assert_eq!(parsed, Frame::Line("x".into()));
    }
}
