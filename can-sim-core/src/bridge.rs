//! Script bridge
//!
//! Everything a node callback can do to the simulation goes through here:
//! lifecycle changes, timers and frame emission. [`Host`] borrows the
//! registry, the bus and the clock for the duration of one dispatch step;
//! [`Bridge`] is the per-callback view handed to a script engine.
//!
//! ## Failure policy
//! Callback failures and missing callbacks are logged against the node and
//! swallowed. A failed bus write is logged as critical and swallowed. Only
//! an unencodable frame is reported back to the script.
//!
//! ## Re-entrancy
//! A node's engine is taken out of the registry while one of its callbacks
//! runs. If that callback (directly or through a sibling) enables or disables
//! the node itself, the state change happens immediately and the matching
//! `on_enable` / `on_disable` is queued, then delivered as soon as the running
//! callback returns.

use crate::codec;
use crate::node::{Lifecycle, NodeId, NodeRegistry};
use crate::script::{Invocation, NodeApi, Reply, ScriptError};
use crate::timer::{interval_from_ms, Clock, TimerStatus};
use crate::transport::Transport;
use crate::types::{Frame, FrameSpec, Result};

/// What came of a callback invocation
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Outcome {
    /// The callback ran and returned
    Completed(Reply),
    /// The script does not define the callback
    Missing,
    /// The callback raised an error (already logged)
    Failed,
    /// The node was busy; lifecycle callbacks are queued, others dropped
    Deferred,
}

/// Mutable access to the simulation for one dispatch step
pub(crate) struct Host<'a> {
    pub(crate) registry: &'a mut NodeRegistry,
    pub(crate) transport: &'a mut dyn Transport,
    pub(crate) clock: &'a dyn Clock,
}

impl Host<'_> {
    /// Enable a node and run its `on_enable`; no-op if already enabled
    pub(crate) fn enable(&mut self, id: NodeId) {
        let node = self.registry.node_mut(id);
        if node.enabled {
            return;
        }
        node.enabled = true;
        log::debug!("Node {} enabled", node.name());
        self.invoke(id, Invocation::Enable);
    }

    /// Disable a node, run its `on_disable` and cancel its timer; no-op if
    /// already disabled
    pub(crate) fn disable(&mut self, id: NodeId) {
        let node = self.registry.node_mut(id);
        if !node.enabled {
            return;
        }
        node.enabled = false;
        log::debug!("Node {} disabled", node.name());
        self.invoke(id, Invocation::Disable);
        self.cancel_timer(id);
    }

    /// Arm a node's timer `interval_ms` from now, or cancel it for `0`
    pub(crate) fn set_timer(&mut self, id: NodeId, interval_ms: f64) {
        match interval_from_ms(interval_ms) {
            Some(interval) => {
                let now = self.clock.now();
                let node = self.registry.node_mut(id);
                node.timer.arm(now, interval);
                log::trace!("{}: timer armed for {:?}", node.name(), interval);
            }
            None => self.cancel_timer(id),
        }
    }

    fn cancel_timer(&mut self, id: NodeId) {
        let node = self.registry.node_mut(id);
        if node.timer.is_active() {
            log::trace!("{}: timer cancelled", node.name());
        }
        node.timer.cancel();
    }

    /// Run `on_timer` for an expired timer and settle the timer afterwards
    ///
    /// A returned interval re-arms the timer. Otherwise the timer lapses,
    /// unless the callback re-armed it through `set_timer`.
    pub(crate) fn fire_timer(&mut self, id: NodeId) {
        let node = self.registry.node_mut(id);
        node.timer.begin_decision();
        let interval_ms = node.timer.interval_ms();

        let outcome = self.invoke(id, Invocation::Timer(interval_ms));

        let node = self.registry.node(id);
        if !node.enabled {
            self.cancel_timer(id);
            return;
        }
        let undecided = node.timer.status() == TimerStatus::ArmedAwaitingDecision;
        match outcome {
            Outcome::Completed(Some(next)) => self.set_timer(id, next),
            Outcome::Missing => self.cancel_timer(id),
            _ if undecided => self.cancel_timer(id),
            _ => {}
        }
    }

    /// Encode `spec` and write it to the bus on behalf of `caller`
    pub(crate) fn emit(&mut self, caller: NodeId, spec: &FrameSpec) -> Result<()> {
        let wire = codec::encode(spec)?;
        let name = self.registry.node(caller).name();

        match self.transport.send(wire.as_bytes()) {
            Ok(written) if codec::is_valid_mtu(written) => {
                if log::log_enabled!(log::Level::Trace) {
                    if let Ok(frame) = codec::decode(wire.as_bytes(), None) {
                        log::trace!("{}: tx {}", name, frame);
                    }
                }
            }
            Ok(written) => log::error!(
                "critical: {}: cannot send a message ({} of {} bytes written)",
                name,
                written,
                wire.len()
            ),
            Err(err) => log::error!("critical: {}: cannot send a message: {}", name, err),
        }
        Ok(())
    }

    /// Invoke a callback on a node, containing any failure
    pub(crate) fn invoke(&mut self, id: NodeId, invocation: Invocation<'_>) -> Outcome {
        let node = self.registry.node_mut(id);
        let Some(mut engine) = node.engine.take() else {
            match invocation {
                Invocation::Enable => node.deferred.push(Lifecycle::Enable),
                Invocation::Disable => node.deferred.push(Lifecycle::Disable),
                _ => log::warn!("{}: {} skipped, node is busy", node.name(), invocation),
            }
            return Outcome::Deferred;
        };
        log::trace!("{}: {}", node.name(), invocation);

        let result = {
            let mut bridge = Bridge {
                host: &mut *self,
                caller: id,
            };
            engine.call(invocation, &mut bridge)
        };

        let outcome = match result {
            Ok(reply) => Outcome::Completed(reply),
            Err(ScriptError::MissingCallback(_)) => {
                let node = self.registry.node_mut(id);
                if node.warned_missing.insert(invocation.name()) {
                    log::warn!(
                        "no valid {} function for node {}",
                        invocation.name(),
                        node.name()
                    );
                }
                Outcome::Missing
            }
            Err(err) => {
                let text = engine.last_error().unwrap_or_else(|| err.to_string());
                log::error!(
                    "{}: {} failed: {}",
                    self.registry.node(id).name(),
                    invocation,
                    text
                );
                Outcome::Failed
            }
        };

        self.registry.node_mut(id).engine = Some(engine);
        self.drain_deferred(id);
        outcome
    }

    fn drain_deferred(&mut self, id: NodeId) {
        let deferred = std::mem::take(&mut self.registry.node_mut(id).deferred);
        for lifecycle in deferred {
            match lifecycle {
                Lifecycle::Enable => {
                    self.invoke(id, Invocation::Enable);
                }
                Lifecycle::Disable => {
                    self.invoke(id, Invocation::Disable);
                    if !self.registry.is_enabled(id) {
                        self.cancel_timer(id);
                    }
                }
            }
        }
    }

    /// Run `on_message` on a node
    pub(crate) fn deliver(&mut self, id: NodeId, frame: &Frame) {
        self.invoke(id, Invocation::Message(frame));
    }
}

/// [`NodeApi`] bound to the node whose callback is running
pub(crate) struct Bridge<'h, 'a> {
    host: &'h mut Host<'a>,
    caller: NodeId,
}

impl NodeApi for Bridge<'_, '_> {
    fn node_name(&self) -> &str {
        self.host.registry.node(self.caller).name()
    }

    fn node_id(&self) -> NodeId {
        self.caller
    }

    fn enable_node(&mut self, name: &str) {
        match self.host.registry.find_by_name(name) {
            Some(id) => self.host.enable(id),
            None => log::warn!("{}: enable_node: no node named {}", self.node_name(), name),
        }
    }

    fn disable_node(&mut self, name: Option<&str>) {
        let target = match name {
            None => Some(self.caller),
            Some(name) => self.host.registry.find_by_name(name),
        };
        match target {
            Some(id) => self.host.disable(id),
            None => log::warn!(
                "{}: disable_node: no node named {}",
                self.node_name(),
                name.unwrap_or_default()
            ),
        }
    }

    fn set_timer(&mut self, interval_ms: f64) {
        self.host.set_timer(self.caller, interval_ms);
    }

    fn emit(&mut self, spec: &FrameSpec) -> Result<()> {
        self.host.emit(self.caller, spec)
    }
}
