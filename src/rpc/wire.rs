//! Binary RPC framing.
//!
//! Each frame is a 4-byte big-endian length followed by a MessagePack
//! envelope. Requests carry an id chosen by the client; the response with
//! the same id answers it, so many calls can share one connection.

use std::collections::HashMap;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;

use crate::error::MeshError;
use crate::rpc::status::Status;

/// Upper bound on a single frame.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Metadata key carrying the caller's remaining time budget in milliseconds.
pub const TIMEOUT_KEY: &str = "x-mesh-timeout-ms";

pub type Metadata = HashMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    pub status: Status,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

pub fn encode_frame<T: Serialize>(frame: &T) -> Result<Bytes, MeshError> {
    rmp_serde::to_vec_named(frame)
        .map(Bytes::from)
        .map_err(|e| MeshError::Internal(format!("frame encoding failed: {}", e)))
}

pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MeshError> {
    rmp_serde::from_slice(bytes)
        .map_err(|e| MeshError::Internal(format!("malformed frame: {}", e)))
}

/// Payload encoding of a capability's request and response messages.
///
/// The RPC listener speaks MessagePack, the HTTP gateway speaks JSON; both
/// dispatch into the same handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    MsgPack,
    Json,
}

impl Encoding {
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Bytes, MeshError> {
        let encoded = match self {
            Encoding::MsgPack => rmp_serde::to_vec_named(value).map_err(|e| e.to_string()),
            Encoding::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
        };
        encoded
            .map(Bytes::from)
            .map_err(|e| MeshError::Internal(format!("response encoding failed: {}", e)))
    }

    /// Decode a message. Malformed input is the caller's fault: `InvalidArgument`.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, MeshError> {
        let decoded = match self {
            Encoding::MsgPack => rmp_serde::from_slice(bytes).map_err(|e| e.to_string()),
            Encoding::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
        };
        decoded.map_err(|e| MeshError::InvalidArgument(format!("malformed message: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::status::Code;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Lookup {
        email: String,
        #[serde(default)]
        verbose: bool,
    }

    #[test]
    fn request_frame_survives_encoding() {
        let mut metadata = Metadata::new();
        metadata.insert(TIMEOUT_KEY.to_string(), "250".to_string());
        let frame = RequestFrame {
            id: 7,
            method: "UserService/GetUserByEmail".to_string(),
            metadata,
            payload: vec![1, 2, 3],
        };
        let bytes = encode_frame(&frame).unwrap();
        let decoded: RequestFrame = decode_frame(&bytes).unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.method, frame.method);
        assert_eq!(decoded.metadata[TIMEOUT_KEY], "250");
        assert_eq!(decoded.payload, vec![1, 2, 3]);
    }

    #[test]
    fn response_status_survives_encoding() {
        let frame = ResponseFrame {
            id: 1,
            status: Status::new(Code::NotFound, "gone"),
            payload: Vec::new(),
        };
        let bytes = encode_frame(&frame).unwrap();
        let decoded: ResponseFrame = decode_frame(&bytes).unwrap();
        assert_eq!(decoded.status, frame.status);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn json_decode_defaults_missing_fields() {
        let lookup: Lookup = Encoding::Json.decode(br#"{"email":"a@b.c"}"#).unwrap();
        assert_eq!(lookup, Lookup { email: "a@b.c".into(), verbose: false });
    }

    #[test]
    fn malformed_payload_is_invalid_argument() {
        let err = Encoding::MsgPack.decode::<Lookup>(&[0xc1]).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert!(decode_frame::<RequestFrame>(&[0xc1]).is_err());
    }
}
