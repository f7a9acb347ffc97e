//! CAN Network Simulator Library
//!
//! Simulates a set of CAN nodes (ECUs) attached to one CAN bus. Each node's
//! behaviour is defined by a script engine; the library routes frames
//! between the bus and the scripts and drives per-node timers.
//!
//! # Architecture
//!
//! - [`codec`]: SocketCAN `can_frame` / `canfd_frame` wire layout
//! - [`transport`]: the bus, either a Linux SocketCAN socket or an in-memory bus
//! - [`node`]: node registry, in load order
//! - [`timer`]: one-shot per-node timers and the clock that drives them
//! - [`script`]: the contract a script engine implements
//! - [`simulator`]: the single-threaded event loop
//!
//! The library does NOT ship a script engine. Engines (and configuration
//! loading) live in the application layer (can-sim-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use can_sim_core::{SocketCan, SocketOptions, Simulator};
//!
//! let socket = SocketCan::open("vcan0", &SocketOptions::default()).unwrap();
//! let mut sim = Simulator::new(socket);
//! // sim.load_node("gateway", true, engine, Path::new("gateway.toml"))?;
//! sim.run().unwrap();
//! sim.shutdown();
//! ```

// Public modules
pub mod codec;
pub mod node;
pub mod script;
pub mod simulator;
pub mod timer;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use node::{Node, NodeId, NodeRegistry};
pub use script::{Invocation, NodeApi, NodeIdentity, Reply, ScriptEngine, ScriptError};
pub use simulator::{LoopState, Simulator, DEFAULT_POLL_TIMEOUT};
pub use timer::{Clock, ManualClock, MonotonicClock, TimerStatus};
pub use transport::{SocketCan, SocketOptions, TimestampMode, Transport, VirtualBus};
pub use types::{Frame, FrameKind, FrameSpec, Result, SimError};

// Internal modules (not exposed in public API)
mod bridge;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
