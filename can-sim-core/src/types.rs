//! Core types for the CAN simulator
//!
//! This module defines the canonical frame representation that flows between
//! the bus, the event loop and the node scripts, together with the error type
//! shared by the whole library.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::script::ScriptError;

/// Result type for simulator operations
pub type Result<T> = std::result::Result<T, SimError>;

/// Maximum payload length of a classic CAN 2.0 frame
pub const CAN_MAX_DLEN: usize = 8;

/// Maximum payload length of a CAN-FD frame
pub const CANFD_MAX_DLEN: usize = 64;

/// Frame flavour, selects the wire MTU and which flags are meaningful
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FrameKind {
    /// CAN 2.0 frame (up to 8 payload bytes)
    #[default]
    #[serde(rename = "CAN", alias = "can")]
    Classic,
    /// CAN-FD frame (up to 64 payload bytes)
    #[serde(rename = "CANFD", alias = "canfd")]
    Fd,
}

impl FrameKind {
    /// Largest payload this kind of frame can carry
    pub fn max_len(self) -> usize {
        match self {
            FrameKind::Classic => CAN_MAX_DLEN,
            FrameKind::Fd => CANFD_MAX_DLEN,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Classic => write!(f, "CAN"),
            FrameKind::Fd => write!(f, "CANFD"),
        }
    }
}

/// A decoded bus message
///
/// This is what nodes receive in `on_message`. The identifier is already
/// stripped of the SocketCAN flag bits; those are exposed as booleans.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// Classic or FD
    pub kind: FrameKind,
    /// 11-bit or 29-bit identifier
    pub id: u32,
    /// True if this is an extended (29-bit) CAN ID
    pub extended: bool,
    /// Remote transmission request
    pub remote: bool,
    /// Error message frame
    pub error: bool,
    /// [CAN-FD] bit rate switch (second bitrate for the data phase)
    pub brs: bool,
    /// [CAN-FD] error state indicator of the transmitting node
    pub esi: bool,
    /// [CAN] optional DLC 9..15 for an 8 byte payload.
    /// Informational only, never used to determine the payload length.
    pub legacy_dlc: Option<u8>,
    /// Payload bytes, `payload.len()` is the frame length
    pub payload: Vec<u8>,
    /// Receive time in nanoseconds, when the socket provides one
    pub timestamp_ns: Option<u64>,
}

impl Frame {
    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True for a frame without payload
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Receive time as a calendar timestamp (SocketCAN stamps are wall clock)
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        let ns = self.timestamp_ns?;
        let secs = (ns / 1_000_000_000) as i64;
        let nsecs = (ns % 1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nsecs)
    }

    /// Build the transmit request that reproduces this frame
    pub fn to_spec(&self) -> FrameSpec {
        FrameSpec {
            kind: self.kind,
            id: self.id,
            extended: self.extended,
            remote: self.remote,
            error: self.error,
            brs: self.brs,
            esi: self.esi,
            legacy_dlc: self.legacy_dlc,
            payload: self.payload.clone(),
        }
    }
}

/// candump-style rendering: `123#AABB`, `12345678#R`, `123##1AABB`
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "{:08X}", self.id)?;
        } else {
            write!(f, "{:03X}", self.id)?;
        }
        match self.kind {
            FrameKind::Classic => {
                write!(f, "#")?;
                if self.remote {
                    return write!(f, "R");
                }
            }
            FrameKind::Fd => {
                let flags = u8::from(self.brs) | (u8::from(self.esi) << 1);
                write!(f, "##{:X}", flags)?;
            }
        }
        for byte in &self.payload {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// A transmit request, as handed to `emit` by node logic
///
/// Only `id` is mandatory when deserialized; every flag defaults to off and
/// the length is the payload length. The codec derives the final frame kind
/// and extended flag from the request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSpec {
    /// Requested kind, promoted to FD when the payload exceeds 8 bytes
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// Identifier; values above 0x7FF force an extended frame
    pub id: u32,
    /// Request an extended frame even for a small identifier
    #[serde(rename = "eff")]
    pub extended: bool,
    /// Remote transmission request
    #[serde(rename = "rtr")]
    pub remote: bool,
    /// Error message frame
    #[serde(rename = "err")]
    pub error: bool,
    /// [CAN-FD] bit rate switch
    pub brs: bool,
    /// [CAN-FD] error state indicator
    pub esi: bool,
    /// [CAN] legacy DLC, do not use unless you know what you are doing
    #[serde(rename = "dlc")]
    pub legacy_dlc: Option<u8>,
    /// Payload bytes
    #[serde(alias = "data")]
    pub payload: Vec<u8>,
}

impl FrameSpec {
    /// Classic data frame request
    pub fn new(id: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Builder method: request a frame kind
    pub fn with_kind(mut self, kind: FrameKind) -> Self {
        self.kind = kind;
        self
    }

    /// Builder method: request an extended identifier
    pub fn with_extended(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }

    /// Builder method: set the RTR flag
    pub fn with_remote(mut self, remote: bool) -> Self {
        self.remote = remote;
        self
    }

    /// Builder method: set the error frame flag
    pub fn with_error(mut self, error: bool) -> Self {
        self.error = error;
        self
    }

    /// Builder method: set the CAN-FD flags
    pub fn with_fd_flags(mut self, brs: bool, esi: bool) -> Self {
        self.brs = brs;
        self.esi = esi;
        self
    }

    /// Builder method: set the legacy DLC
    pub fn with_legacy_dlc(mut self, dlc: u8) -> Self {
        self.legacy_dlc = Some(dlc);
        self
    }

    /// Requested payload length
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True for a request without payload
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Errors raised by the simulator core
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Unable to create a CAN socket: {0}")]
    Socket(#[source] std::io::Error),

    #[error("Cannot bind a socket to interface {interface}: {source}")]
    Bind {
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Error reading from CAN socket: {0}")]
    SocketRead(#[source] std::io::Error),

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_display_classic() {
        let frame = Frame {
            id: 0x123,
            payload: vec![0xAA, 0xBB],
            ..Frame::default()
        };
        assert_eq!(frame.to_string(), "123#AABB");

        let remote = Frame {
            id: 0x1ABCDEF,
            extended: true,
            remote: true,
            ..Frame::default()
        };
        assert_eq!(remote.to_string(), "01ABCDEF#R");
    }

    #[test]
    fn test_frame_display_fd() {
        let frame = Frame {
            kind: FrameKind::Fd,
            id: 0x10,
            brs: true,
            payload: vec![1, 2, 3],
            ..Frame::default()
        };
        assert_eq!(frame.to_string(), "010##1010203");
    }

    #[test]
    fn test_received_at() {
        let frame = Frame {
            timestamp_ns: Some(1_700_000_000_123_456_789),
            ..Frame::default()
        };
        let at = frame.received_at().unwrap();
        assert_eq!(at.timestamp(), 1_700_000_000);
        assert_eq!(at.timestamp_subsec_nanos(), 123_456_789);
        assert!(Frame::default().received_at().is_none());
    }

    #[test]
    fn test_frame_spec_deserialization() {
        let spec: FrameSpec =
            serde_json::from_str(r#"{"type": "CANFD", "id": 291, "brs": true, "payload": [1, 2]}"#)
                .unwrap();
        assert_eq!(spec.kind, FrameKind::Fd);
        assert_eq!(spec.id, 0x123);
        assert!(spec.brs);
        assert!(!spec.extended);
        assert_eq!(spec.payload, vec![1, 2]);
        assert_eq!(spec.legacy_dlc, None);
    }

    #[test]
    fn test_kind_limits() {
        assert_eq!(FrameKind::Classic.max_len(), 8);
        assert_eq!(FrameKind::Fd.max_len(), 64);
        assert_eq!(FrameKind::default(), FrameKind::Classic);
    }
}
