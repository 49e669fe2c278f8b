//! Codec for frame serialization and deserialization
//!
//! Every frame on the wire is a JSON text frame. This module maps between
//! those frames and structured values, and classifies failures:
//!
//! - Outbound values that can't be serialized → `Error::Serialization`
//! - Inbound frames that aren't valid JSON → `Error::Decode`
//!
//! The distinction matters to the client: a serialization failure is returned
//! to the caller of `send`, while a decode failure is reported on the error
//! stream and the connection stays up.
//!
//! # Examples
//!
//! ```rust
//! use resock_core::codec;
//! use serde_json::json;
//!
//! let frame = codec::encode(&json!({"type": "search", "q": "cats"})).unwrap();
//! assert!(frame.contains("\"q\":\"cats\""));
//!
//! assert!(codec::decode("{not json").is_err());
//! ```

use crate::error::{Error, Result};
use crate::types::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode any serializable value to a text frame
///
/// # Errors
///
/// Returns `Error::Serialization` if the value cannot be represented as JSON
/// (for example a map with non-string keys).
pub fn encode<T: Serialize + ?Sized>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a text frame into a structured value
///
/// Any well-formed JSON document is accepted, including scalars and arrays.
/// The client doesn't impose an envelope schema on inbound frames.
///
/// # Errors
///
/// Returns `Error::Decode` if the frame is not valid JSON.
pub fn decode(data: &str) -> Result<Message> {
    serde_json::from_str(data).map_err(|e| Error::Decode(e.to_string()))
}

/// Decode a text frame directly into a typed envelope
///
/// Use this in handlers that expect a fixed shape.
///
/// ```rust
/// use resock_core::codec;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Ack { status: String }
///
/// let ack: Ack = codec::decode_as(r#"{"status":"received"}"#).unwrap();
/// assert_eq!(ack.status, "received");
/// ```
pub fn decode_as<T: DeserializeOwned>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| Error::Decode(e.to_string()))
}
