//! Event loop
//!
//! [`Simulator`] owns the bus, the node registry and the clock. One
//! [`step`](Simulator::step) is one loop iteration:
//! 1. wait up to the poll timeout for a frame
//! 2. deliver a received frame to every enabled node, in registration order
//! 3. fire every enabled node's expired timer, in registration order
//! 4. report whether any node is still enabled
//!
//! In both passes a node's enabled flag is checked when its turn comes, so a
//! callback earlier in the pass can add or remove later nodes from it.

use std::path::Path;
use std::time::Duration;

use crate::bridge::Host;
use crate::codec;
use crate::node::{NodeId, NodeRegistry};
use crate::script::{NodeIdentity, ScriptEngine};
use crate::timer::{Clock, MonotonicClock};
use crate::transport::Transport;
use crate::types::{Frame, Result};

/// Default wait for a frame before timers are scanned
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Whether the loop should keep going after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// At least one node is enabled
    Running,
    /// Every node is disabled; the simulation is over
    AllDisabled,
}

/// CAN network simulator
pub struct Simulator<T: Transport> {
    transport: T,
    registry: NodeRegistry,
    clock: Box<dyn Clock>,
    poll_timeout: Duration,
    started: bool,
}

impl<T: Transport> Simulator<T> {
    /// Create a simulator on `transport` with a monotonic clock
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            registry: NodeRegistry::new(),
            clock: Box::new(MonotonicClock::new()),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            started: false,
        }
    }

    /// Builder method: drive timers from `clock`
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Builder method: set how long a step waits for a frame
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Load a node script into `engine` and register the node
    ///
    /// The node starts disabled; [`start`](Self::start) enables it if
    /// `autostart` is set.
    pub fn load_node(
        &mut self,
        name: &str,
        autostart: bool,
        mut engine: Box<dyn ScriptEngine>,
        script: &Path,
    ) -> Result<NodeId> {
        let identity = NodeIdentity {
            id: self.registry.next_id(),
            name: name.to_string(),
        };
        log::debug!("Loading node {} from {:?}", name, script);
        engine.load(script, &identity)?;
        Ok(self.add_node(name, autostart, engine))
    }

    /// Register a node whose engine is already loaded
    pub fn add_node(
        &mut self,
        name: &str,
        autostart: bool,
        engine: Box<dyn ScriptEngine>,
    ) -> NodeId {
        let id = self.registry.add(name, autostart, engine);
        log::info!(
            "Registered node {} ({}{})",
            name,
            id,
            if autostart { ", autostart" } else { "" }
        );
        id
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    fn host(&mut self) -> Host<'_> {
        Host {
            registry: &mut self.registry,
            transport: &mut self.transport,
            clock: self.clock.as_ref(),
        }
    }

    /// Enable a node and run its `on_enable`
    pub fn enable(&mut self, id: NodeId) {
        self.host().enable(id);
    }

    /// Disable a node, run its `on_disable` and cancel its timer
    pub fn disable(&mut self, id: NodeId) {
        self.host().disable(id);
    }

    /// Arm or cancel a node's timer
    pub fn set_timer(&mut self, id: NodeId, interval_ms: f64) {
        self.host().set_timer(id, interval_ms);
    }

    /// Enable every autostart node, in registration order
    ///
    /// Runs once; later calls do nothing.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let ids: Vec<NodeId> = self.registry.ids().collect();
        let mut host = self.host();
        for id in ids {
            if host.registry.node(id).autostart() {
                host.enable(id);
            }
        }
        log::info!(
            "Simulation started with {} of {} nodes enabled",
            self.registry.enabled_count(),
            self.registry.len()
        );
    }

    /// Run one loop iteration
    ///
    /// A bus read error or an undecodable frame ends the simulation.
    pub fn step(&mut self) -> Result<LoopState> {
        if let Some(received) = self.transport.recv_timeout(self.poll_timeout)? {
            let frame = codec::decode(received.bytes(), received.timestamp_ns)?;
            self.dispatch(&frame);
        }
        self.scan_timers();

        if self.registry.any_enabled() {
            Ok(LoopState::Running)
        } else {
            Ok(LoopState::AllDisabled)
        }
    }

    /// Deliver `frame` to every enabled node
    pub fn dispatch(&mut self, frame: &Frame) {
        match frame.received_at() {
            Some(at) => log::trace!("rx {} at {}", frame, at.format("%H:%M:%S%.6f")),
            None => log::trace!("rx {}", frame),
        }
        let ids: Vec<NodeId> = self.registry.ids().collect();
        let mut host = self.host();
        for id in ids {
            if host.registry.is_enabled(id) {
                host.deliver(id, frame);
            }
        }
    }

    /// Fire every enabled node's expired timer
    pub fn scan_timers(&mut self) {
        let ids: Vec<NodeId> = self.registry.ids().collect();
        let mut host = self.host();
        for id in ids {
            let node = host.registry.node(id);
            if node.is_enabled() && node.timer().expired(host.clock.now()) {
                host.fire_timer(id);
            }
        }
    }

    /// Start if needed, then step until every node is disabled
    pub fn run(&mut self) -> Result<()> {
        self.start();
        loop {
            if self.step()? == LoopState::AllDisabled {
                log::info!("All nodes are disabled. Graceful exit.");
                return Ok(());
            }
        }
    }

    /// Disable the nodes still enabled and tear down every engine
    ///
    /// Returns the transport so the caller can inspect or reuse it.
    pub fn shutdown(mut self) -> T {
        let ids: Vec<NodeId> = self.registry.ids().collect();
        let mut host = self.host();
        for &id in &ids {
            host.disable(id);
        }
        for id in ids {
            let node = self.registry.node_mut(id);
            node.timer.cancel();
            node.engine = None;
        }
        log::debug!("Simulator shut down");
        self.transport
    }
}

impl<T: Transport> std::fmt::Debug for Simulator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("registry", &self.registry)
            .field("poll_timeout", &self.poll_timeout)
            .field("started", &self.started)
            .finish()
    }
}
