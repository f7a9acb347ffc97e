//! In-memory bus
//!
//! [`VirtualBus`] queues inbound frames and records everything written to
//! it. It never blocks: an empty queue reports a poll timeout immediately,
//! which lets tests drive the event loop one iteration at a time.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use crate::codec;
use crate::types::{Frame, FrameSpec, Result, SimError};

use super::{Received, Transport};

/// Scriptable in-memory [`Transport`]
#[derive(Debug, Default)]
pub struct VirtualBus {
    inbound: VecDeque<Received>,
    sent: Vec<Vec<u8>>,
    loopback: bool,
    short_write: Option<usize>,
    read_error: Option<io::ErrorKind>,
}

impl VirtualBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: deliver every sent frame back to the receive queue,
    /// like a socket with CAN_RAW_RECV_OWN_MSGS
    pub fn with_loopback(mut self, loopback: bool) -> Self {
        self.loopback = loopback;
        self
    }

    /// Queue a transmit request as if another ECU had sent it
    pub fn push(&mut self, spec: &FrameSpec) -> Result<()> {
        let wire = codec::encode(spec)?;
        self.inbound.push_back(Received::new(wire.as_bytes(), None));
        Ok(())
    }

    /// Queue a decoded frame, keeping its timestamp
    pub fn push_frame(&mut self, frame: &Frame) -> Result<()> {
        let wire = codec::encode(&frame.to_spec())?;
        self.inbound
            .push_back(Received::new(wire.as_bytes(), frame.timestamp_ns));
        Ok(())
    }

    /// Queue raw bytes, valid or not
    pub fn push_raw(&mut self, bytes: &[u8], timestamp_ns: Option<u64>) {
        self.inbound.push_back(Received::new(bytes, timestamp_ns));
    }

    /// Make every following write report `written` bytes
    pub fn set_short_write(&mut self, written: Option<usize>) {
        self.short_write = written;
    }

    /// Make the next receive fail
    pub fn fail_next_read(&mut self, kind: io::ErrorKind) {
        self.read_error = Some(kind);
    }

    /// Frames still waiting to be received
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    /// Raw bytes of every write, in order
    pub fn sent_raw(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Every write decoded back into frames
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent
            .iter()
            .filter_map(|raw| codec::decode(raw, None).ok())
            .collect()
    }

    /// Forget recorded writes
    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }
}

impl Transport for VirtualBus {
    fn recv_timeout(&mut self, _timeout: Duration) -> Result<Option<Received>> {
        if let Some(kind) = self.read_error.take() {
            return Err(SimError::SocketRead(io::Error::new(
                kind,
                "virtual bus read failure",
            )));
        }
        Ok(self.inbound.pop_front())
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.sent.push(bytes.to_vec());
        if self.loopback {
            self.inbound.push_back(Received::new(bytes, None));
        }
        Ok(self.short_write.unwrap_or(bytes.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CAN_MTU;

    #[test]
    fn test_empty_bus_times_out() {
        let mut bus = VirtualBus::new();
        assert!(bus.recv_timeout(Duration::from_millis(50)).unwrap().is_none());
    }

    #[test]
    fn test_push_and_receive_in_order() {
        let mut bus = VirtualBus::new();
        bus.push(&FrameSpec::new(0x1, vec![1])).unwrap();
        bus.push(&FrameSpec::new(0x2, vec![2])).unwrap();
        assert_eq!(bus.pending(), 2);

        let first = bus.recv_timeout(Duration::ZERO).unwrap().unwrap();
        assert_eq!(first.len(), CAN_MTU);
        assert_eq!(codec::decode(first.bytes(), None).unwrap().id, 0x1);

        let second = bus.recv_timeout(Duration::ZERO).unwrap().unwrap();
        assert_eq!(codec::decode(second.bytes(), None).unwrap().id, 0x2);
    }

    #[test]
    fn test_loopback_requeues_sent_frames() {
        let mut bus = VirtualBus::new().with_loopback(true);
        let wire = codec::encode(&FrameSpec::new(0x10, vec![9])).unwrap();
        assert_eq!(bus.send(wire.as_bytes()).unwrap(), CAN_MTU);

        assert_eq!(bus.sent_frames().len(), 1);
        assert_eq!(bus.pending(), 1);
    }

    #[test]
    fn test_injected_failures() {
        let mut bus = VirtualBus::new();
        bus.set_short_write(Some(3));
        assert_eq!(bus.send(&[0u8; CAN_MTU]).unwrap(), 3);

        bus.fail_next_read(io::ErrorKind::BrokenPipe);
        assert!(matches!(
            bus.recv_timeout(Duration::ZERO),
            Err(SimError::SocketRead(_))
        ));
        assert!(bus.recv_timeout(Duration::ZERO).unwrap().is_none());
    }
}
