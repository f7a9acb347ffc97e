//! Script engine contract
//!
//! A node's behaviour lives in a script engine: an opaque object that the
//! core loads once and then invokes through four callbacks. While a callback
//! runs, the engine talks back to the simulator through [`NodeApi`].
//!
//! The core never looks inside an engine. Any scripting technology that can
//! satisfy [`ScriptEngine`] can drive a node.

use std::fmt;
use std::path::Path;

use crate::node::NodeId;
use crate::types::{Frame, FrameSpec, Result};

/// Errors reported by script engines
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// The script could not be read or compiled
    #[error("failed to load script: {0}")]
    Load(String),

    /// The script loaded but its top-level code failed
    #[error("failed to initialise script: {0}")]
    Init(String),

    /// The script does not define the requested callback
    #[error("no valid {0} function")]
    MissingCallback(&'static str),

    /// A callback raised an error
    #[error("{0}")]
    Runtime(String),
}

/// Callback requested from a node script
#[derive(Debug, Clone, Copy)]
pub enum Invocation<'a> {
    /// `on_enable()`
    Enable,
    /// `on_disable()`
    Disable,
    /// `on_message(frame)`
    Message(&'a Frame),
    /// `on_timer(current_interval_ms) -> optional new interval`
    Timer(f64),
}

impl Invocation<'_> {
    /// Script-side callback name
    pub fn name(&self) -> &'static str {
        match self {
            Invocation::Enable => "on_enable",
            Invocation::Disable => "on_disable",
            Invocation::Message(_) => "on_message",
            Invocation::Timer(_) => "on_timer",
        }
    }
}

impl fmt::Display for Invocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value returned by a callback
///
/// Only `on_timer` returns anything meaningful: a new interval in
/// milliseconds, or `None` to let the timer lapse.
pub type Reply = Option<f64>;

/// Read-only identity of a node, handed to its engine at load time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub id: NodeId,
    pub name: String,
}

/// Capabilities a running callback can use
///
/// Every operation acts on behalf of the calling node. Enable and disable are
/// name based; the timer can only be set on the caller itself.
pub trait NodeApi {
    /// Name of the calling node
    fn node_name(&self) -> &str;

    /// Registry index of the calling node
    fn node_id(&self) -> NodeId;

    /// Enable the first node called `name` (no-op if already enabled)
    fn enable_node(&mut self, name: &str);

    /// Disable the first node called `name`, or the caller when `None`
    fn disable_node(&mut self, name: Option<&str>);

    /// Arm the caller's timer `interval_ms` from now; `0` cancels it
    fn set_timer(&mut self, interval_ms: f64);

    /// Encode and transmit a frame
    ///
    /// Fails only when the request cannot be encoded. A failed or short write
    /// on the bus is logged and reported as success.
    fn emit(&mut self, spec: &FrameSpec) -> Result<()>;
}

/// A node's script runtime
pub trait ScriptEngine {
    /// Load the script at `path` and run its top-level code
    fn load(&mut self, path: &Path, identity: &NodeIdentity) -> std::result::Result<(), ScriptError>;

    /// Invoke a callback
    ///
    /// Returns [`ScriptError::MissingCallback`] when the script does not
    /// define it.
    fn call(
        &mut self,
        invocation: Invocation<'_>,
        api: &mut dyn NodeApi,
    ) -> std::result::Result<Reply, ScriptError>;

    /// Text of the most recent failure, if the engine keeps one
    fn last_error(&self) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_names() {
        let frame = Frame::default();
        assert_eq!(Invocation::Enable.name(), "on_enable");
        assert_eq!(Invocation::Disable.name(), "on_disable");
        assert_eq!(Invocation::Message(&frame).name(), "on_message");
        assert_eq!(Invocation::Timer(1.0).to_string(), "on_timer");
    }

    #[test]
    fn test_script_error_display() {
        let err = ScriptError::MissingCallback("on_timer");
        assert_eq!(err.to_string(), "no valid on_timer function");
        let err = ScriptError::Runtime("boom".to_string());
        assert_eq!(err.to_string(), "boom");
    }
}
