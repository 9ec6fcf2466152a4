//! Contract between the tick engine and the sandboxes that run participant code.
//!
//! The engine owns world state; guests only see what a [`ModuleHost`] exposes to
//! them. Backends turn a [`ModuleSource`] into a [`CompiledModule`] through a
//! [`ModuleCompiler`].

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub type ParticipantId = String;
pub type RoomName = String;
pub type GameTime = u64;

pub const MAIN_MODULE: &str = "main";
pub const LOOP_EXPORT: &str = "loop";
pub const FLAGS_RECEIVER: &str = "flags";
pub const ROOM_RECEIVER_PREFIX: &str = "room:";

// ============================================================================
// Intents
// ============================================================================

/// One intent as submitted by participant code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerIntent {
    pub receiver: String,
    pub intent: String,
    #[serde(default)]
    pub params: JsonValue,
}

impl RunnerIntent {
    pub fn new(receiver: impl Into<String>, intent: impl Into<String>, params: JsonValue) -> Self {
        Self {
            receiver: receiver.into(),
            intent: intent.into(),
            params,
        }
    }

    pub fn for_room(room: &str, intent: impl Into<String>, params: JsonValue) -> Self {
        Self::new(format!("{ROOM_RECEIVER_PREFIX}{room}"), intent, params)
    }

    pub fn for_flags(intent: impl Into<String>, params: JsonValue) -> Self {
        Self::new(FLAGS_RECEIVER, intent, params)
    }

    pub fn target(&self) -> IntentReceiver<'_> {
        if self.receiver == FLAGS_RECEIVER {
            IntentReceiver::Flags
        } else if let Some(room) = self.receiver.strip_prefix(ROOM_RECEIVER_PREFIX) {
            IntentReceiver::Room(room)
        } else {
            IntentReceiver::Object(&self.receiver)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentReceiver<'a> {
    Object(&'a str),
    Room(&'a str),
    Flags,
}

// ============================================================================
// Console
// ============================================================================

/// Console stream a line is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleFd {
    Result,
    Log,
    Error,
}

impl ConsoleFd {
    pub fn as_raw(self) -> i32 {
        match self {
            ConsoleFd::Result => 0,
            ConsoleFd::Log => 1,
            ConsoleFd::Error => 2,
        }
    }
}

impl TryFrom<i32> for ConsoleFd {
    type Error = i32;

    fn try_from(raw: i32) -> Result<Self, i32> {
        match raw {
            0 => Ok(ConsoleFd::Result),
            1 => Ok(ConsoleFd::Log),
            2 => Ok(ConsoleFd::Error),
            other => Err(other),
        }
    }
}

// ============================================================================
// Limits and faults
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxLimits {
    pub max_fuel: u64,
    pub max_mem_bytes: u64,
    pub max_cpu_ms: u64,
    pub max_intents: u32,
    pub max_console_bytes: u64,
    pub max_memory_bytes: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_fuel: 50_000_000,
            max_mem_bytes: 64 * 1024 * 1024,
            max_cpu_ms: 500,
            max_intents: 10_000,
            max_console_bytes: 64 * 1024,
            max_memory_bytes: 2 * 1024 * 1024,
        }
    }
}

impl SandboxLimits {
    pub fn unbounded() -> Self {
        Self {
            max_fuel: u64::MAX,
            max_mem_bytes: u64::MAX,
            max_cpu_ms: u64::MAX,
            max_intents: u32::MAX,
            max_console_bytes: u64::MAX,
            max_memory_bytes: u64::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxFaultCode {
    Trap,
    Thrown,
    Timeout,
    IntentLimitExceeded,
    MemoryLimitExceeded,
    UnknownModule,
    CircularReference,
    MissingExport,
    InvalidModule,
    Unsupported,
    SandboxUnavailable,
}

impl fmt::Display for SandboxFaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SandboxFaultCode::Trap => "trap",
            SandboxFaultCode::Thrown => "thrown",
            SandboxFaultCode::Timeout => "timeout",
            SandboxFaultCode::IntentLimitExceeded => "intent_limit_exceeded",
            SandboxFaultCode::MemoryLimitExceeded => "memory_limit_exceeded",
            SandboxFaultCode::UnknownModule => "unknown_module",
            SandboxFaultCode::CircularReference => "circular_reference",
            SandboxFaultCode::MissingExport => "missing_export",
            SandboxFaultCode::InvalidModule => "invalid_module",
            SandboxFaultCode::Unsupported => "unsupported",
            SandboxFaultCode::SandboxUnavailable => "sandbox_unavailable",
        };
        f.write_str(label)
    }
}

/// A failure raised while running participant code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{detail}")]
pub struct SandboxFault {
    pub module: String,
    pub code: SandboxFaultCode,
    pub detail: String,
}

impl SandboxFault {
    pub fn new(module: impl Into<String>, code: SandboxFaultCode, detail: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            code,
            detail: detail.into(),
        }
    }

    pub fn unknown_module(name: &str) -> Self {
        Self::new(
            name,
            SandboxFaultCode::UnknownModule,
            format!("Unknown module: {name}"),
        )
    }

    pub fn circular_reference(name: &str) -> Self {
        Self::new(
            name,
            SandboxFaultCode::CircularReference,
            format!("Circular reference to module: {name}"),
        )
    }

    pub fn missing_export(module: &str, export: &str) -> Self {
        Self::new(
            module,
            SandboxFaultCode::MissingExport,
            format!("Module {module} has no export named {export}"),
        )
    }
}

// ============================================================================
// Modules
// ============================================================================

/// Source of one participant module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModuleSource {
    Wasm { bytes: Vec<u8> },
    Native { program: String },
}

/// Names a loaded module makes callable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleExports {
    names: BTreeSet<String>,
}

impl ModuleExports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ModuleExports {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Everything participant code may reach during a tick.
pub trait ModuleHost: Send + Sync {
    fn participant(&self) -> &str;
    fn time(&self) -> GameTime;
    fn require(&self, name: &str) -> Result<ModuleExports, SandboxFault>;
    fn call_export(&self, module: &str, export: &str) -> Result<(), SandboxFault>;
    fn submit_intent(&self, intent: RunnerIntent) -> Result<(), SandboxFault>;
    fn write_console(&self, fd: ConsoleFd, text: &str);
    fn room_names(&self) -> Vec<RoomName>;
    fn room_blob(&self, room: &str) -> Option<Vec<u8>>;
    fn memory(&self) -> Vec<u8>;
    fn set_memory(&self, bytes: Vec<u8>) -> Result<(), SandboxFault>;
    fn push_visual(&self, room: &str, payload: String) -> Result<(), SandboxFault>;
    fn fuel_remaining(&self) -> u64;
    fn consume_fuel(&self, used: u64);
    fn check_deadline(&self) -> Result<(), SandboxFault>;
    fn as_any(&self) -> &dyn Any;
}

/// An instantiated module. Instances keep their state between calls.
pub trait CompiledModule: Send {
    /// Runs the module body and reports what it exported.
    fn run_body(&mut self, host: &Arc<dyn ModuleHost>) -> Result<ModuleExports, SandboxFault>;

    fn call_export(&mut self, export: &str, host: &Arc<dyn ModuleHost>)
        -> Result<(), SandboxFault>;

    fn evaluate(
        &mut self,
        _expression: &str,
        _host: &Arc<dyn ModuleHost>,
    ) -> Result<String, SandboxFault> {
        Err(SandboxFault::new(
            "",
            SandboxFaultCode::Unsupported,
            "module does not support console evaluation",
        ))
    }
}

pub trait ModuleCompiler: Send + Sync {
    fn compile(
        &self,
        name: &str,
        source: &ModuleSource,
    ) -> Result<Box<dyn CompiledModule>, SandboxFault>;
}

/// Module with no body and no exports.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyModule;

impl CompiledModule for EmptyModule {
    fn run_body(&mut self, _host: &Arc<dyn ModuleHost>) -> Result<ModuleExports, SandboxFault> {
        Ok(ModuleExports::new())
    }

    fn call_export(
        &mut self,
        export: &str,
        _host: &Arc<dyn ModuleHost>,
    ) -> Result<(), SandboxFault> {
        Err(SandboxFault::missing_export(MAIN_MODULE, export))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_intent_params_default_to_null() {
        let intent: RunnerIntent =
            serde_json::from_str(r#"{"receiver":"00000000000000aa","intent":"suicide"}"#).unwrap();
        assert_eq!(intent.params, JsonValue::Null);
        assert_eq!(intent.target(), IntentReceiver::Object("00000000000000aa"));
    }

    #[test]
    fn runner_intent_receiver_variants() {
        let room = RunnerIntent::for_room("W1N1", "placeSpawn", JsonValue::Null);
        assert_eq!(room.receiver, "room:W1N1");
        assert_eq!(room.target(), IntentReceiver::Room("W1N1"));

        let flags = RunnerIntent::for_flags("create", JsonValue::Null);
        assert_eq!(flags.target(), IntentReceiver::Flags);
    }

    #[test]
    fn console_fd_round_trips_raw_values() {
        for fd in [ConsoleFd::Result, ConsoleFd::Log, ConsoleFd::Error] {
            assert_eq!(ConsoleFd::try_from(fd.as_raw()), Ok(fd));
        }
        assert_eq!(ConsoleFd::try_from(7), Err(7));
    }

    #[test]
    fn loader_faults_carry_expected_messages() {
        let fault = SandboxFault::circular_reference("main");
        assert_eq!(fault.code, SandboxFaultCode::CircularReference);
        assert_eq!(fault.to_string(), "Circular reference to module: main");

        let fault = SandboxFault::unknown_module("util");
        assert_eq!(fault.code, SandboxFaultCode::UnknownModule);
        assert_eq!(fault.to_string(), "Unknown module: util");
    }

    #[test]
    fn module_source_serializes_with_kind_tag() {
        let source = ModuleSource::Native {
            program: "harvester".to_string(),
        };
        let value = serde_json::to_value(&source).unwrap();
        assert_eq!(value["kind"], "native");
        assert_eq!(value["program"], "harvester");
    }

    #[test]
    fn module_exports_collects_names() {
        let exports: ModuleExports = ["loop", "helper"].into_iter().collect();
        assert!(exports.contains("loop"));
        assert!(!exports.contains("init"));
        assert_eq!(exports.iter().collect::<Vec<_>>(), vec!["helper", "loop"]);
    }
}
