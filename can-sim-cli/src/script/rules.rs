//! Declarative node scripts
//!
//! A rule script is a TOML (or JSON) document listing the actions a node
//! takes for each callback. A callback section that is absent is reported as
//! missing, like an undefined function in a script.
//!
//! ```toml
//! on_enable = [{ set_timer = 100 }]
//! on_disable = [{ log = "bye" }]
//!
//! [[on_message]]
//! id = 0x123
//! actions = [{ forward = { id = 0x321 } }]
//!
//! [[on_message]]
//! id = 0x7DF
//! actions = ["disable_self"]
//!
//! [on_timer]
//! actions = [{ emit = { id = 0x100, payload = [1, 2, 3] } }]
//! rearm = "keep"
//! ```

use can_sim_core::codec;
use can_sim_core::{
    Frame, FrameKind, FrameSpec, Invocation, NodeApi, NodeIdentity, Reply, ScriptEngine,
    ScriptError,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Parsed rule script
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuleScript {
    pub on_enable: Option<Vec<Action>>,
    pub on_disable: Option<Vec<Action>>,
    pub on_message: Option<Vec<MessageRule>>,
    pub on_timer: Option<TimerRule>,
}

/// Actions run for received frames that pass every filter set
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MessageRule {
    pub id: Option<u32>,
    #[serde(rename = "type")]
    pub kind: Option<FrameKind>,
    pub extended: Option<bool>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Actions run when the node's timer expires
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TimerRule {
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Interval for the next expiry; absent lets the timer lapse
    pub rearm: Option<Rearm>,
}

/// Timer re-arm policy
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Rearm {
    /// New interval in milliseconds (`0` cancels)
    Interval(f64),
    /// `"keep"`: same interval again
    Keyword(RearmKeyword),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RearmKeyword {
    Keep,
}

impl Rearm {
    fn interval(self, current_ms: f64) -> f64 {
        match self {
            Rearm::Interval(ms) => ms,
            Rearm::Keyword(RearmKeyword::Keep) => current_ms,
        }
    }
}

/// One step of a callback
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Transmit a frame
    Emit(FrameSpec),
    /// Re-transmit the received frame, optionally under another identifier
    Forward {
        #[serde(default)]
        id: Option<u32>,
    },
    EnableNode(String),
    DisableNode(String),
    DisableSelf,
    /// Arm the node's timer; `0` cancels it
    SetTimer(f64),
    /// Log a line; `{frame}` and `{interval}` are substituted
    Log(String),
}

impl MessageRule {
    pub fn matches(&self, frame: &Frame) -> bool {
        self.id.map_or(true, |id| id == frame.id)
            && self.kind.map_or(true, |kind| kind == frame.kind)
            && self.extended.map_or(true, |ext| ext == frame.extended)
    }
}

impl RuleScript {
    /// Parse a script; `is_toml` selects TOML over JSON
    pub fn parse(content: &str, is_toml: bool) -> Result<Self, String> {
        if is_toml {
            toml::from_str(content).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(content).map_err(|e| e.to_string())
        }
    }

    /// Reject actions that can never succeed
    pub fn validate(&self) -> Result<(), String> {
        let message_actions = self.on_message.iter().flatten().flat_map(|r| &r.actions);
        let actions = self
            .on_enable
            .iter()
            .flatten()
            .chain(self.on_disable.iter().flatten())
            .chain(message_actions)
            .chain(self.on_timer.iter().flat_map(|t| &t.actions));

        for action in actions {
            match action {
                Action::Emit(spec) => {
                    codec::encode(spec).map_err(|e| format!("emit 0x{:X}: {}", spec.id, e))?;
                }
                Action::EnableNode(name) | Action::DisableNode(name) if name.is_empty() => {
                    return Err("node name must not be empty".to_string());
                }
                _ => {}
            }
        }

        for action in self.on_enable.iter().flatten().chain(self.on_disable.iter().flatten()) {
            if matches!(action, Action::Forward { .. }) {
                return Err("forward is only valid in on_message".to_string());
            }
        }
        if let Some(timer) = &self.on_timer {
            if timer.actions.iter().any(|a| matches!(a, Action::Forward { .. })) {
                return Err("forward is only valid in on_message".to_string());
            }
        }
        Ok(())
    }
}

/// What the running callback was given
#[derive(Clone, Copy)]
enum Context<'f> {
    Lifecycle,
    Message(&'f Frame),
    Timer(f64),
}

impl Context<'_> {
    fn render(&self, text: &str) -> String {
        match self {
            Context::Lifecycle => text.to_string(),
            Context::Message(frame) => text.replace("{frame}", &frame.to_string()),
            Context::Timer(ms) => text.replace("{interval}", &ms.to_string()),
        }
    }
}

fn execute(actions: &[Action], ctx: Context<'_>, api: &mut dyn NodeApi) -> Result<(), ScriptError> {
    for action in actions {
        match action {
            Action::Emit(spec) => api
                .emit(spec)
                .map_err(|e| ScriptError::Runtime(e.to_string()))?,
            Action::Forward { id } => {
                let Context::Message(frame) = ctx else {
                    return Err(ScriptError::Runtime(
                        "forward outside on_message".to_string(),
                    ));
                };
                let mut spec = frame.to_spec();
                if let Some(id) = id {
                    spec.id = *id;
                }
                api.emit(&spec)
                    .map_err(|e| ScriptError::Runtime(e.to_string()))?;
            }
            Action::EnableNode(name) => api.enable_node(name),
            Action::DisableNode(name) => api.disable_node(Some(name)),
            Action::DisableSelf => api.disable_node(None),
            Action::SetTimer(ms) => api.set_timer(*ms),
            Action::Log(text) => log::info!("{}: {}", api.node_name(), ctx.render(text)),
        }
    }
    Ok(())
}

/// [`ScriptEngine`] running a [`RuleScript`]
#[derive(Debug, Default)]
pub struct RulesEngine {
    script: Option<RuleScript>,
    last_error: Option<String>,
}

impl RulesEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with an already parsed script
    pub fn from_script(script: RuleScript) -> Self {
        Self {
            script: Some(script),
            last_error: None,
        }
    }
}

impl ScriptEngine for RulesEngine {
    fn load(&mut self, path: &Path, identity: &NodeIdentity) -> Result<(), ScriptError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ScriptError::Load(format!("{}: {}", path.display(), e)))?;
        let is_toml = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));

        let script = RuleScript::parse(&content, is_toml)
            .map_err(|e| ScriptError::Load(format!("{}: {}", path.display(), e)))?;
        script
            .validate()
            .map_err(|e| ScriptError::Init(format!("{}: {}", identity.name, e)))?;

        log::debug!(
            "{}: rule script {} loaded ({} message rules)",
            identity.name,
            path.display(),
            script.on_message.as_ref().map_or(0, Vec::len)
        );
        self.script = Some(script);
        Ok(())
    }

    fn call(&mut self, invocation: Invocation<'_>, api: &mut dyn NodeApi) -> Result<Reply, ScriptError> {
        let Some(script) = &self.script else {
            return Err(ScriptError::Runtime("no script loaded".to_string()));
        };
        let missing = ScriptError::MissingCallback(invocation.name());

        let result = match invocation {
            Invocation::Enable => match &script.on_enable {
                Some(actions) => execute(actions, Context::Lifecycle, api).map(|()| None),
                None => Err(missing),
            },
            Invocation::Disable => match &script.on_disable {
                Some(actions) => execute(actions, Context::Lifecycle, api).map(|()| None),
                None => Err(missing),
            },
            Invocation::Message(frame) => match &script.on_message {
                Some(rules) => rules
                    .iter()
                    .filter(|rule| rule.matches(frame))
                    .try_for_each(|rule| execute(&rule.actions, Context::Message(frame), &mut *api))
                    .map(|()| None),
                None => Err(missing),
            },
            Invocation::Timer(current_ms) => match &script.on_timer {
                Some(rule) => execute(&rule.actions, Context::Timer(current_ms), api)
                    .map(|()| rule.rearm.map(|rearm| rearm.interval(current_ms))),
                None => Err(missing),
            },
        };

        if let Err(err) = &result {
            if !matches!(err, ScriptError::MissingCallback(_)) {
                self.last_error = Some(err.to_string());
            }
        }
        result
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use can_sim_core::NodeId;

    /// Records every bridge call
    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        emitted: Vec<FrameSpec>,
    }

    impl NodeApi for Recorder {
        fn node_name(&self) -> &str {
            "test"
        }

        fn node_id(&self) -> NodeId {
            NodeId(0)
        }

        fn enable_node(&mut self, name: &str) {
            self.calls.push(format!("enable {}", name));
        }

        fn disable_node(&mut self, name: Option<&str>) {
            self.calls.push(format!("disable {}", name.unwrap_or("self")));
        }

        fn set_timer(&mut self, interval_ms: f64) {
            self.calls.push(format!("timer {}", interval_ms));
        }

        fn emit(&mut self, spec: &FrameSpec) -> can_sim_core::Result<()> {
            codec::encode(spec)?;
            self.emitted.push(spec.clone());
            Ok(())
        }
    }

    const GATEWAY: &str = r#"
        on_enable = [{ set_timer = 100 }, { enable_node = "B" }]

        [[on_message]]
        id = 0x123
        actions = [{ forward = { id = 0x321 } }]

        [[on_message]]
        id = 0x7DF
        actions = ["disable_self"]

        [on_timer]
        actions = [{ emit = { id = 0x100, payload = [1, 2, 3] } }]
        rearm = "keep"
    "#;

    fn engine(text: &str) -> RulesEngine {
        let script = RuleScript::parse(text, true).unwrap();
        script.validate().unwrap();
        RulesEngine::from_script(script)
    }

    #[test]
    fn test_on_enable_actions_run_in_order() {
        let mut engine = engine(GATEWAY);
        let mut api = Recorder::default();
        let reply = engine.call(Invocation::Enable, &mut api).unwrap();
        assert_eq!(reply, None);
        assert_eq!(api.calls, vec!["timer 100", "enable B"]);
    }

    #[test]
    fn test_message_rules_filter_by_id() {
        let mut engine = engine(GATEWAY);
        let mut api = Recorder::default();
        let frame = Frame {
            id: 0x123,
            payload: vec![0xAA, 0xBB],
            ..Frame::default()
        };
        engine.call(Invocation::Message(&frame), &mut api).unwrap();
        assert_eq!(api.emitted.len(), 1);
        assert_eq!(api.emitted[0].id, 0x321);
        assert_eq!(api.emitted[0].payload, vec![0xAA, 0xBB]);

        let other = Frame {
            id: 0x7DF,
            ..Frame::default()
        };
        engine.call(Invocation::Message(&other), &mut api).unwrap();
        assert_eq!(api.calls, vec!["disable self"]);
        assert_eq!(api.emitted.len(), 1);
    }

    #[test]
    fn test_timer_keep_returns_current_interval() {
        let mut engine = engine(GATEWAY);
        let mut api = Recorder::default();
        let reply = engine.call(Invocation::Timer(100.0), &mut api).unwrap();
        assert_eq!(reply, Some(100.0));
        assert_eq!(api.emitted[0].payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_timer_without_rearm_lapses() {
        let mut engine = engine("[on_timer]\nactions = [{ log = \"tick {interval}\" }]\n");
        let mut api = Recorder::default();
        assert_eq!(engine.call(Invocation::Timer(5.0), &mut api).unwrap(), None);
    }

    #[test]
    fn test_absent_section_is_missing_callback() {
        let mut engine = engine(GATEWAY);
        let mut api = Recorder::default();
        assert_eq!(
            engine.call(Invocation::Disable, &mut api),
            Err(ScriptError::MissingCallback("on_disable"))
        );
        assert_eq!(engine.last_error(), None);
    }

    #[test]
    fn test_json_script() {
        let json = r#"{
            "on_enable": [{ "emit": { "id": 2048, "data": [1] } }],
            "on_disable": []
        }"#;
        let mut engine = RulesEngine::from_script(RuleScript::parse(json, false).unwrap());
        let mut api = Recorder::default();
        engine.call(Invocation::Enable, &mut api).unwrap();
        engine.call(Invocation::Disable, &mut api).unwrap();
        assert_eq!(api.emitted[0].id, 0x800);
        assert_eq!(api.emitted[0].payload, vec![1]);
    }

    #[test]
    fn test_validation_rejects_unencodable_emit() {
        let script = RuleScript::parse(
            "on_enable = [{ emit = { id = 1, payload = [] } }]\n",
            true,
        )
        .unwrap();
        assert!(script.validate().is_ok());

        let too_long = RuleScript {
            on_enable: Some(vec![Action::Emit(FrameSpec::new(1, vec![0; 65]))]),
            ..RuleScript::default()
        };
        assert!(too_long.validate().is_err());

        let forward = RuleScript {
            on_enable: Some(vec![Action::Forward { id: None }]),
            ..RuleScript::default()
        };
        assert!(forward.validate().is_err());
    }

    #[test]
    fn test_emit_failure_is_runtime_error() {
        let mut engine = RulesEngine::from_script(RuleScript {
            on_enable: Some(vec![Action::Emit(FrameSpec::new(1, vec![0; 65]))]),
            ..RuleScript::default()
        });
        let mut api = Recorder::default();
        let err = engine.call(Invocation::Enable, &mut api).unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(_)));
        assert!(engine.last_error().is_some());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gw.toml");
        fs::write(&path, GATEWAY).unwrap();

        let identity = NodeIdentity {
            id: NodeId(0),
            name: "GW".to_string(),
        };
        let mut engine = RulesEngine::new();
        engine.load(&path, &identity).unwrap();

        let missing = RulesEngine::new().load(&dir.path().join("nope.toml"), &identity);
        assert!(matches!(missing, Err(ScriptError::Load(_))));

        fs::write(&path, "on_enable = [{ bogus = 1 }]").unwrap();
        assert!(matches!(
            RulesEngine::new().load(&path, &identity),
            Err(ScriptError::Load(_))
        ));
    }
}
