//! Node script engines
//!
//! The engine for a node is picked from its script's file extension:
//! - `.toml`, `.json`: declarative rule script ([`rules::RulesEngine`])
//! - `.so`, `.dylib`, `.dll`: native plugin ([`native::NativeEngine`])

use anyhow::{bail, Result};
use can_sim_core::ScriptEngine;
use std::path::Path;

pub mod native;
pub mod rules;

/// Script flavours the simulator can run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Rules,
    Native,
}

impl ScriptKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "toml" | "json" => Some(ScriptKind::Rules),
            "so" | "dylib" | "dll" => Some(ScriptKind::Native),
            _ => None,
        }
    }
}

/// Fresh, unloaded engine for the script at `path`
pub fn create_engine(path: &Path) -> Result<Box<dyn ScriptEngine>> {
    match ScriptKind::from_path(path) {
        Some(ScriptKind::Rules) => Ok(Box::new(rules::RulesEngine::new())),
        Some(ScriptKind::Native) => Ok(Box::new(native::NativeEngine::new())),
        None => bail!("no script engine for {:?}", path),
    }
}
