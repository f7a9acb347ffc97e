// Shared helpers for simulation tests
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use can_sim_core::{Invocation, NodeApi, NodeIdentity, Reply, ScriptEngine, ScriptError};

/// Callback trace shared by every node of a test
pub type Events = Rc<RefCell<Vec<String>>>;

type Handler = Box<dyn FnMut(Invocation<'_>, &mut dyn NodeApi) -> Result<Reply, ScriptError>>;

/// Engine whose callbacks are closures
///
/// Every call is recorded as `"<node>:<callback>"`, messages as
/// `"<node>:on_message:<frame>"`. Callbacks without a handler report
/// themselves missing.
pub struct Scripted {
    events: Events,
    handlers: HashMap<&'static str, Handler>,
}

impl Scripted {
    pub fn new(events: &Events) -> Self {
        Self {
            events: events.clone(),
            handlers: HashMap::new(),
        }
    }

    pub fn on(
        mut self,
        callback: &'static str,
        handler: impl FnMut(Invocation<'_>, &mut dyn NodeApi) -> Result<Reply, ScriptError> + 'static,
    ) -> Self {
        self.handlers.insert(callback, Box::new(handler));
        self
    }

    /// Define `callback` as doing nothing
    pub fn noop(self, callback: &'static str) -> Self {
        self.on(callback, |_, _| Ok(None))
    }

    /// Define all four callbacks as doing nothing
    pub fn quiet(self) -> Self {
        self.noop("on_enable")
            .noop("on_disable")
            .noop("on_message")
            .noop("on_timer")
    }

    pub fn boxed(self) -> Box<dyn ScriptEngine> {
        Box::new(self)
    }
}

impl ScriptEngine for Scripted {
    fn load(&mut self, _path: &Path, _identity: &NodeIdentity) -> Result<(), ScriptError> {
        Ok(())
    }

    fn call(
        &mut self,
        invocation: Invocation<'_>,
        api: &mut dyn NodeApi,
    ) -> Result<Reply, ScriptError> {
        let entry = match invocation {
            Invocation::Message(frame) => format!("{}:on_message:{}", api.node_name(), frame),
            other => format!("{}:{}", api.node_name(), other),
        };
        self.events.borrow_mut().push(entry);
        match self.handlers.get_mut(invocation.name()) {
            Some(handler) => handler(invocation, api),
            None => Err(ScriptError::MissingCallback(invocation.name())),
        }
    }

    fn last_error(&self) -> Option<String> {
        None
    }
}

/// Recorded events, clearing the trace
pub fn drain(events: &Events) -> Vec<String> {
    std::mem::take(&mut *events.borrow_mut())
}

/// Log output for `cargo test -- --nocapture`
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
