// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Wire framing (§6.2): length-prefixed frames carrying a small `serde`
//! envelope. `Request`/`Reply` params and results are themselves
//! value-kernel payloads, serialised through [`crate::ser`] rather than
//! `serde`, so the wire shape matches the persisted-state codec (§6.3)
//! instead of diverging into a second format.
//!
//! Grounded on `hdds-xrce::protocol`'s `{header, submessages}` framing,
//! adapted from fixed-size binary submessages to a JSON-shaped envelope
//! since this protocol's payloads (arbitrary value-kernel trees) don't fit
//! a fixed wire layout the way a DDS CDR sample does.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Highest protocol version this build speaks. `EndUpdate`'s atomic props
/// list (§4.10) requires the negotiated version to be at least 1.
pub const PROTOCOL_VERSION: u32 = 1;

/// One frame of the protocol (§6.2). Serialised as length-prefixed JSON by
/// [`encode_frame`]/[`decode_frame`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Frame {
    Hello { supported_versions: Vec<u32>, username: Option<String>, password: Option<String>, client_capabilities: Vec<String> },
    HelloAck { version: u32 },
    Reject { reason: String },
    Request { seq: u64, component_path: String, command: String, params: String },
    Reply { seq: u64, result: Option<String>, error: Option<WireError> },
    NotifyEvent { event: String },
    NotifyPacket { signal_id: String, packet: String },
    Subscribe { signal_id: String },
    Unsubscribe { signal_id: String },
    Close,
}

/// `{code, msg}` carried by an error [`Frame::Reply`] (§7: "RPC error
/// replies carry the full enum + message").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: Option<String>,
}

impl From<&Error> for WireError {
    fn from(e: &Error) -> Self {
        let (code, message) = match e {
            Error::ArgumentNull(m) => ("ArgumentNull", Some(m.clone())),
            Error::InvalidParameter(m) => ("InvalidParameter", Some(m.clone())),
            Error::NoInterface(m) => ("NoInterface", Some(m.clone())),
            Error::NotFound(m) => ("NotFound", Some(m.clone())),
            Error::AlreadyExists(m) => ("AlreadyExists", Some(m.clone())),
            Error::DuplicateItem(m) => ("DuplicateItem", Some(m.clone())),
            Error::OutOfRange(m) => ("OutOfRange", Some(m.clone())),
            Error::Frozen => ("Frozen", None),
            Error::AccessDenied(m) => ("AccessDenied", Some(m.clone())),
            Error::InvalidType(m) => ("InvalidType", Some(m.clone())),
            Error::InvalidState(m) => ("InvalidState", Some(m.clone())),
            Error::InvalidValue(m) => ("InvalidValue", Some(m.clone())),
            Error::InvalidProperty(m) => ("InvalidProperty", Some(m.clone())),
            Error::ConversionFailed(m) => ("ConversionFailed", Some(m.clone())),
            Error::CoercionFailed(m) => ("CoercionFailed", Some(m.clone())),
            Error::ValidateFailed(m) => ("ValidateFailed", Some(m.clone())),
            Error::ResolveFailed(m) => ("ResolveFailed", Some(m.clone())),
            Error::CalcFailed(m) => ("CalcFailed", Some(m.clone())),
            Error::ParseFailed(m) => ("ParseFailed", Some(m.clone())),
            Error::NotSerializable(m) => ("NotSerializable", Some(m.clone())),
            Error::NotImplemented(m) => ("NotImplemented", Some(m.clone())),
            Error::NotSupported(m) => ("NotSupported", Some(m.clone())),
            Error::NoMemory => ("NoMemory", None),
            Error::GeneralError(m) => ("GeneralError", Some(m.clone())),
            Error::Ignored => ("Ignored", None),
        };
        WireError { code: code.to_string(), message }
    }
}

impl From<WireError> for Error {
    fn from(w: WireError) -> Self {
        let m = w.message.unwrap_or_default();
        match w.code.as_str() {
            "ArgumentNull" => Error::ArgumentNull(m),
            "InvalidParameter" => Error::InvalidParameter(m),
            "NoInterface" => Error::NoInterface(m),
            "NotFound" => Error::NotFound(m),
            "AlreadyExists" => Error::AlreadyExists(m),
            "DuplicateItem" => Error::DuplicateItem(m),
            "OutOfRange" => Error::OutOfRange(m),
            "Frozen" => Error::Frozen,
            "AccessDenied" => Error::AccessDenied(m),
            "InvalidType" => Error::InvalidType(m),
            "InvalidState" => Error::InvalidState(m),
            "InvalidValue" => Error::InvalidValue(m),
            "InvalidProperty" => Error::InvalidProperty(m),
            "ConversionFailed" => Error::ConversionFailed(m),
            "CoercionFailed" => Error::CoercionFailed(m),
            "ValidateFailed" => Error::ValidateFailed(m),
            "ResolveFailed" => Error::ResolveFailed(m),
            "CalcFailed" => Error::CalcFailed(m),
            "ParseFailed" => Error::ParseFailed(m),
            "NotSerializable" => Error::NotSerializable(m),
            "NotImplemented" => Error::NotImplemented(m),
            "NotSupported" => Error::NotSupported(m),
            "NoMemory" => Error::NoMemory,
            "Ignored" => Error::Ignored,
            _ => Error::GeneralError(m),
        }
    }
}

/// Encodes a frame as `[u32 big-endian length][json bytes]` (§6.2
/// "length-prefixed binary frames").
pub fn encode_frame(frame: &Frame) -> crate::error::Result<Vec<u8>> {
    let body = serde_json::to_vec(frame).map_err(|e| Error::NotSerializable(e.to_string()))?;
    let mut out = Vec::with_capacity(body.len() + 4);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decodes one frame from the front of `buf`, returning it and the number
/// of bytes consumed. `None` when `buf` doesn't yet hold a complete frame.
pub fn decode_frame(buf: &[u8]) -> crate::error::Result<Option<(Frame, usize)>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < 4 + len {
        return Ok(None);
    }
    let frame: Frame = serde_json::from_slice(&buf[4..4 + len]).map_err(|e| Error::ParseFailed(e.to_string()))?;
    Ok(Some((frame, 4 + len)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_request_frame() {
        let frame = Frame::Request { seq: 7, component_path: "/dev".to_string(), command: "GetInfo".to_string(), params: "null".to_string() };
        let bytes = encode_frame(&frame).unwrap();
        let (decoded, consumed) = decode_frame(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert!(matches!(decoded, Frame::Request { seq: 7, .. }));
    }

    #[test]
    fn incomplete_buffer_yields_none() {
        let frame = Frame::Close;
        let bytes = encode_frame(&frame).unwrap();
        assert!(decode_frame(&bytes[..bytes.len() - 1]).unwrap().is_none());
    }

    #[test]
    fn error_code_round_trips_through_wire_error() {
        let err = Error::AccessDenied("nope".to_string());
        let wire: WireError = (&err).into();
        let back: Error = wire.into();
        assert_eq!(err, back);
    }
}
