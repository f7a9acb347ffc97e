//! Bus transports
//!
//! The event loop talks to the bus through [`Transport`]: a blocking receive
//! with a timeout and a raw write. Two implementations ship with the crate:
//! - [`SocketCan`]: a Linux CAN_RAW socket bound to a named interface
//! - [`VirtualBus`]: an in-memory bus for tests and dry runs

use std::io;
use std::time::Duration;

use crate::codec::CANFD_MTU;
use crate::types::Result;

pub mod memory;

#[cfg(target_os = "linux")]
mod socketcan;

#[cfg(not(target_os = "linux"))]
#[path = "non_linux.rs"]
mod socketcan;

pub use memory::VirtualBus;
pub use socketcan::{SocketCan, SocketOptions};

/// Receive timestamp source negotiated with the socket at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampMode {
    /// SO_TIMESTAMPING (hardware and software stamps)
    Timestamping,
    /// SO_TIMESTAMP (software stamp as `timeval`)
    Timestamp,
    /// No stamps
    None,
}

/// One frame as read from the bus
#[derive(Clone)]
pub struct Received {
    buf: [u8; CANFD_MTU],
    len: usize,
    /// Receive time in nanoseconds
    pub timestamp_ns: Option<u64>,
}

impl Received {
    /// Copy up to one CAN-FD MTU of raw bytes
    pub fn new(bytes: &[u8], timestamp_ns: Option<u64>) -> Self {
        let len = bytes.len().min(CANFD_MTU);
        let mut buf = [0u8; CANFD_MTU];
        buf[..len].copy_from_slice(&bytes[..len]);
        Self {
            buf,
            len,
            timestamp_ns,
        }
    }

    /// Bytes actually read
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Byte count of the read
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for Received {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Received")
            .field("bytes", &self.bytes())
            .field("timestamp_ns", &self.timestamp_ns)
            .finish()
    }
}

/// Duplex byte channel to the bus
pub trait Transport {
    /// Wait up to `timeout` for one frame
    ///
    /// `Ok(None)` means the timeout elapsed. An error is fatal for the
    /// simulation.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Received>>;

    /// Write one encoded frame, returning the number of bytes written
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Received>> {
        (**self).recv_timeout(timeout)
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        (**self).send(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_received_copies_bytes() {
        let received = Received::new(&[1, 2, 3], Some(7));
        assert_eq!(received.bytes(), &[1, 2, 3]);
        assert_eq!(received.len(), 3);
        assert_eq!(received.timestamp_ns, Some(7));
    }

    #[test]
    fn test_received_caps_at_fd_mtu() {
        let received = Received::new(&[0u8; 100], None);
        assert_eq!(received.len(), CANFD_MTU);
    }
}
