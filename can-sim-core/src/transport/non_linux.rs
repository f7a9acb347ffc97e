//! SocketCAN stand-in for non-Linux targets
//!
//! The types exist so the rest of the crate compiles everywhere, but opening
//! a socket always fails.

use std::io;
use std::time::Duration;

use crate::types::{Result, SimError};

use super::{Received, TimestampMode, Transport};

/// Optional socket features requested at open time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    pub fd_frames: bool,
    pub recv_own_msgs: bool,
    pub error_frames: bool,
    pub timestamps: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            fd_frames: true,
            recv_own_msgs: true,
            error_frames: true,
            timestamps: true,
        }
    }
}

/// SocketCAN socket (non-Linux stub)
#[derive(Debug)]
pub struct SocketCan {
    interface: String,
}

impl SocketCan {
    /// Always fails: SocketCAN is Linux only
    pub fn open(_interface: &str, _options: &SocketOptions) -> Result<Self> {
        Err(SimError::Socket(io::Error::new(
            io::ErrorKind::Unsupported,
            "SocketCAN is only supported on Linux targets",
        )))
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn timestamp_mode(&self) -> TimestampMode {
        TimestampMode::None
    }

    pub fn fd_frames(&self) -> bool {
        false
    }

    pub fn unsupported_features(&self) -> &[&'static str] {
        &[]
    }
}

impl Transport for SocketCan {
    fn recv_timeout(&mut self, _timeout: Duration) -> Result<Option<Received>> {
        Ok(None)
    }

    fn send(&mut self, _bytes: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "SocketCAN is only supported on Linux targets",
        ))
    }
}
