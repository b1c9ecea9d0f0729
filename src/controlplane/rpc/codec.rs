//! Wire Framing
//!
//! Every message is a length-prefixed frame (4-byte big-endian length, at
//! most [`MAX_FRAME_LEN`] bytes) holding a JSON [`Envelope`]. The envelope
//! names the schema of its body so either side can reject a frame meant for
//! another surface before decoding the body.

use crate::error::{Error, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;

/// Upper bound on a single frame
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Envelope format version
pub const PROTOCOL_VERSION: u16 = 1;

/// Registered body schemas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SchemaId {
    DockRequestV1,
    DockResponseV1,
    ControllerRequestV1,
    ControllerResponseV1,
}

impl SchemaId {
    /// Schema of the answer to a request of this schema
    pub fn response(&self) -> Option<SchemaId> {
        match self {
            SchemaId::DockRequestV1 => Some(SchemaId::DockResponseV1),
            SchemaId::ControllerRequestV1 => Some(SchemaId::ControllerResponseV1),
            SchemaId::DockResponseV1 | SchemaId::ControllerResponseV1 => None,
        }
    }
}

impl std::fmt::Display for SchemaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SchemaId::DockRequestV1 => "dock.request.v1",
            SchemaId::DockResponseV1 => "dock.response.v1",
            SchemaId::ControllerRequestV1 => "controller.request.v1",
            SchemaId::ControllerResponseV1 => "controller.response.v1",
        };
        f.write_str(name)
    }
}

/// Frame payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub schema: SchemaId,
    pub version: u16,
    /// Echoed in the response so callers can match answers to requests
    pub correlation_id: u64,
    pub body: serde_json::Value,
}

/// Length-delimited codec with the frame bound applied
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Wrap `body` in an envelope and serialize it into a frame payload
pub fn encode<T: Serialize>(schema: SchemaId, correlation_id: u64, body: &T) -> Result<Bytes> {
    let envelope = Envelope {
        schema,
        version: PROTOCOL_VERSION,
        correlation_id,
        body: serde_json::to_value(body)?,
    };
    Ok(Bytes::from(serde_json::to_vec(&envelope)?))
}

/// Decode a frame payload, checking schema and version
///
/// Returns the correlation id together with the body.
pub fn decode<T: DeserializeOwned>(frame: &[u8], expected: SchemaId) -> Result<(u64, T)> {
    let envelope: Envelope = serde_json::from_slice(frame)?;
    if envelope.version != PROTOCOL_VERSION {
        return Err(Error::Validation(format!(
            "unsupported envelope version {} (expected {})",
            envelope.version, PROTOCOL_VERSION
        )));
    }
    if envelope.schema != expected {
        return Err(Error::Validation(format!(
            "unexpected schema {} (expected {})",
            envelope.schema, expected
        )));
    }
    let body = serde_json::from_value(envelope.body)?;
    Ok((envelope.correlation_id, body))
}
