//! Rust programs run as participant modules.
//!
//! A [`NativeModule`] is the trusted counterpart of a wasm guest: it gets the
//! same host services through [`NativeApi`] plus typed read access to the
//! tick's rooms. Programs are registered by name with a
//! [`NativeModuleCompiler`]; a `ModuleSource::Native { program }` picks one.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tick_world_abi::{
    CompiledModule, ConsoleFd, ModuleCompiler, ModuleExports, ModuleHost, ModuleSource, RunnerIntent,
    SandboxFault, SandboxFaultCode,
};

use super::host::SandboxHost;
use crate::buffer::BufferError;
use crate::objects::{Creep, ObjectId, ObjectView};
use crate::pathfinder::{SearchGoal, SearchOptions, SearchResult};
use crate::position::RoomPosition;
use crate::room::RoomView;
use crate::world::WorldContext;

/// Error raised by native participant code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("{message}")]
    Thrown { message: String },
    #[error(transparent)]
    Fault(#[from] SandboxFault),
}

impl ScriptError {
    pub fn thrown(message: impl Into<String>) -> Self {
        ScriptError::Thrown {
            message: message.into(),
        }
    }

    pub fn into_fault(self, module: &str) -> SandboxFault {
        match self {
            ScriptError::Thrown { message } => SandboxFault::new(module, SandboxFaultCode::Thrown, message),
            ScriptError::Fault(fault) => fault,
        }
    }
}

impl From<BufferError> for ScriptError {
    fn from(err: BufferError) -> Self {
        ScriptError::thrown(err.to_string())
    }
}

/// One instantiated native module. State kept in `self` survives between ticks.
pub trait NativeModule: Send {
    /// Module body. Returns the names it exports.
    fn body(&mut self, api: &NativeApi<'_>) -> Result<ModuleExports, ScriptError>;

    fn call(&mut self, export: &str, api: &NativeApi<'_>) -> Result<(), ScriptError>;

    fn evaluate(&mut self, _expression: &str, _api: &NativeApi<'_>) -> Result<String, ScriptError> {
        Err(SandboxFault::new(
            "",
            SandboxFaultCode::Unsupported,
            "module does not support console evaluation",
        )
        .into())
    }
}

pub type NativeProgramFactory = Arc<dyn Fn() -> Box<dyn NativeModule> + Send + Sync>;

/// Host services as seen from native code.
pub struct NativeApi<'a> {
    module: &'a str,
    host: &'a Arc<dyn ModuleHost>,
}

impl<'a> NativeApi<'a> {
    pub fn new(module: &'a str, host: &'a Arc<dyn ModuleHost>) -> Self {
        Self { module, host }
    }

    pub fn module(&self) -> &str {
        self.module
    }

    pub fn participant(&self) -> &str {
        self.host.participant()
    }

    pub fn time(&self) -> u64 {
        self.host.time()
    }

    /// Tick context, when running under the engine's own host.
    pub fn world(&self) -> Option<&WorldContext> {
        self.host
            .as_any()
            .downcast_ref::<SandboxHost>()
            .map(SandboxHost::world)
    }

    pub fn rooms(&self) -> Vec<RoomView> {
        self.world()
            .map(|world| world.rooms().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room(&self, name: &str) -> Option<RoomView> {
        self.world()?.room(name).cloned()
    }

    pub fn find(&self, id: ObjectId) -> Option<ObjectView> {
        self.world()?.find(id).cloned()
    }

    /// Creeps owned by this participant across all rooms.
    pub fn my_creeps(&self) -> Result<Vec<Creep>, ScriptError> {
        let mut creeps = Vec::new();
        for room in self.rooms() {
            for object in room.objects() {
                if let Some(creep) = object.as_creep() {
                    if creep.is_owned_by(self.participant())? {
                        creeps.push(creep);
                    }
                }
            }
        }
        Ok(creeps)
    }

    pub fn search(
        &self,
        origin: RoomPosition,
        goals: &[SearchGoal],
        options: &SearchOptions,
    ) -> Option<SearchResult> {
        self.world()?.search(origin, goals, None, options)
    }

    pub fn intent(&self, intent: RunnerIntent) -> Result<(), ScriptError> {
        Ok(self.host.submit_intent(intent)?)
    }

    pub fn object_intent(&self, id: ObjectId, verb: &str, params: JsonValue) -> Result<(), ScriptError> {
        self.intent(RunnerIntent::new(id.to_string(), verb, params))
    }

    pub fn room_intent(&self, room: &str, verb: &str, params: JsonValue) -> Result<(), ScriptError> {
        self.intent(RunnerIntent::for_room(room, verb, params))
    }

    pub fn flag_intent(&self, verb: &str, params: JsonValue) -> Result<(), ScriptError> {
        self.intent(RunnerIntent::for_flags(verb, params))
    }

    pub fn log(&self, text: impl fmt::Display) {
        self.host.write_console(ConsoleFd::Log, &text.to_string());
    }

    pub fn require(&self, name: &str) -> Result<ModuleExports, ScriptError> {
        Ok(self.host.require(name)?)
    }

    pub fn call(&self, module: &str, export: &str) -> Result<(), ScriptError> {
        Ok(self.host.call_export(module, export)?)
    }

    pub fn memory(&self) -> Vec<u8> {
        self.host.memory()
    }

    pub fn set_memory(&self, bytes: Vec<u8>) -> Result<(), ScriptError> {
        Ok(self.host.set_memory(bytes)?)
    }

    pub fn visual(&self, room: &str, payload: impl Into<String>) -> Result<(), ScriptError> {
        Ok(self.host.push_visual(room, payload.into())?)
    }
}

struct NativeInstance {
    name: String,
    module: Box<dyn NativeModule>,
}

impl CompiledModule for NativeInstance {
    fn run_body(&mut self, host: &Arc<dyn ModuleHost>) -> Result<ModuleExports, SandboxFault> {
        let api = NativeApi::new(&self.name, host);
        self.module
            .body(&api)
            .map_err(|err| err.into_fault(&self.name))
    }

    fn call_export(&mut self, export: &str, host: &Arc<dyn ModuleHost>) -> Result<(), SandboxFault> {
        let api = NativeApi::new(&self.name, host);
        self.module
            .call(export, &api)
            .map_err(|err| err.into_fault(&self.name))
    }

    fn evaluate(&mut self, expression: &str, host: &Arc<dyn ModuleHost>) -> Result<String, SandboxFault> {
        let api = NativeApi::new(&self.name, host);
        self.module
            .evaluate(expression, &api)
            .map_err(|err| err.into_fault(&self.name))
    }
}

/// Registry of native programs by name.
#[derive(Clone, Default)]
pub struct NativeModuleCompiler {
    programs: BTreeMap<String, NativeProgramFactory>,
}

impl fmt::Debug for NativeModuleCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeModuleCompiler")
            .field("programs", &self.programs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl NativeModuleCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, M>(&mut self, program: &str, factory: F) -> &mut Self
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: NativeModule + 'static,
    {
        self.programs.insert(
            program.to_string(),
            Arc::new(move || Box::new(factory()) as Box<dyn NativeModule>),
        );
        self
    }

    pub fn has_program(&self, program: &str) -> bool {
        self.programs.contains_key(program)
    }
}

impl ModuleCompiler for NativeModuleCompiler {
    fn compile(&self, name: &str, source: &ModuleSource) -> Result<Box<dyn CompiledModule>, SandboxFault> {
        let ModuleSource::Native { program } = source else {
            return Err(SandboxFault::new(
                name,
                SandboxFaultCode::InvalidModule,
                "not a native module",
            ));
        };
        let factory = self.programs.get(program).ok_or_else(|| {
            SandboxFault::new(
                name,
                SandboxFaultCode::InvalidModule,
                format!("no native program named {program}"),
            )
        })?;
        Ok(Box::new(NativeInstance {
            name: name.to_string(),
            module: factory(),
        }))
    }
}
