//! Per-participant sandboxes.
//!
//! A [`Sandbox`] owns one participant's module cache and program phase for as
//! long as its code is unchanged. Each tick it gets a fresh [`SandboxHost`]
//! bound to that tick's [`WorldContext`], runs the program, evaluates console
//! expressions and hands back a [`SandboxTickOutput`]. Faults never escape:
//! they land on the participant's error stream.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tick_world_abi::{
    CompiledModule, ConsoleFd, ModuleCompiler, ModuleHost, ModuleSource, RoomName, RunnerIntent,
    SandboxFault, SandboxFaultCode, SandboxLimits, LOOP_EXPORT, MAIN_MODULE,
};
use tick_world_wasm_executor::{WasmExecutor, WasmExecutorConfig};

use crate::world::{IntentRoute, WorldContext};

pub mod host;
pub mod loader;
pub mod native;
pub mod programs;

pub use host::{ConsoleOutput, SandboxHost};
pub use loader::{normalize_module_name, ModuleLoader, ModuleStatus};
pub use native::{NativeApi, NativeModule, NativeModuleCompiler, ScriptError};

// ============================================================================
// Participant code
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeBundleError {
    #[error("code bundle encode failed: {0}")]
    Encode(String),
    #[error("code bundle decode failed: {0}")]
    Decode(String),
}

/// A participant's modules by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantCode {
    pub modules: BTreeMap<String, ModuleSource>,
}

impl ParticipantCode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Code whose `main` module is the named native program.
    pub fn native(program: &str) -> Self {
        Self::new().with_module(
            MAIN_MODULE,
            ModuleSource::Native {
                program: program.to_string(),
            },
        )
    }

    pub fn with_module(mut self, name: &str, source: ModuleSource) -> Self {
        self.modules.insert(name.to_string(), source);
        self
    }

    pub fn to_bundle(&self) -> Result<Vec<u8>, CodeBundleError> {
        serde_cbor::to_vec(self).map_err(|err| CodeBundleError::Encode(err.to_string()))
    }

    pub fn from_bundle(bytes: &[u8]) -> Result<Self, CodeBundleError> {
        serde_cbor::from_slice(bytes).map_err(|err| CodeBundleError::Decode(err.to_string()))
    }
}

// ============================================================================
// Compiler
// ============================================================================

/// Dispatches wasm sources to the wasmtime backend and native sources to the
/// native program registry.
#[derive(Clone)]
pub struct CodeCompiler {
    wasm: Option<WasmExecutor>,
    native: NativeModuleCompiler,
}

impl fmt::Debug for CodeCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeCompiler")
            .field("wasm", &self.wasm.is_some())
            .field("native", &self.native)
            .finish()
    }
}

impl CodeCompiler {
    pub fn new(native: NativeModuleCompiler, wasm: WasmExecutorConfig) -> Result<Self, SandboxFault> {
        Ok(Self {
            wasm: Some(WasmExecutor::new(wasm)?),
            native,
        })
    }

    pub fn native_only(native: NativeModuleCompiler) -> Self {
        Self { wasm: None, native }
    }
}

impl ModuleCompiler for CodeCompiler {
    fn compile(&self, name: &str, source: &ModuleSource) -> Result<Box<dyn CompiledModule>, SandboxFault> {
        match source {
            ModuleSource::Native { .. } => self.native.compile(name, source),
            ModuleSource::Wasm { .. } => match &self.wasm {
                Some(wasm) => wasm.compile(name, source),
                None => Err(SandboxFault::new(
                    name,
                    SandboxFaultCode::SandboxUnavailable,
                    "wasm modules are disabled",
                )),
            },
        }
    }
}

// ============================================================================
// Program state machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    /// `main` exported `loop`; call it every tick.
    ExportedLoop,
    /// `main` exported no `loop`; run its body every tick.
    RerunBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramPhase {
    NotYetLooping,
    Looping(LoopMode),
}

/// Everything one participant produced in one tick.
#[derive(Debug, Clone, Default)]
pub struct SandboxTickOutput {
    pub participant: String,
    pub intents: Vec<(IntentRoute, RunnerIntent)>,
    pub dropped_intents: u64,
    pub console: ConsoleOutput,
    pub memory: Vec<u8>,
    pub visuals: BTreeMap<RoomName, Vec<String>>,
    pub fault: Option<SandboxFault>,
    pub fuel_used: u64,
}

pub struct Sandbox {
    participant: String,
    loader: Arc<ModuleLoader>,
    phase: ProgramPhase,
    limits: SandboxLimits,
    memory: Vec<u8>,
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("participant", &self.participant)
            .field("phase", &self.phase)
            .finish()
    }
}

impl Sandbox {
    pub fn new(
        participant: impl Into<String>,
        code: ParticipantCode,
        compiler: Arc<dyn ModuleCompiler>,
        limits: SandboxLimits,
    ) -> Self {
        Self {
            participant: participant.into(),
            loader: Arc::new(ModuleLoader::new(compiler, code.modules)),
            phase: ProgramPhase::NotYetLooping,
            limits,
            memory: Vec::new(),
        }
    }

    /// Restores persisted memory.
    pub fn with_memory(mut self, memory: Vec<u8>) -> Self {
        self.memory = memory;
        self
    }

    pub fn participant(&self) -> &str {
        &self.participant
    }

    pub fn phase(&self) -> ProgramPhase {
        self.phase
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    pub fn run_tick(&mut self, world: Arc<WorldContext>, console_eval: &[String]) -> SandboxTickOutput {
        let host = SandboxHost::new(
            self.participant.clone(),
            world,
            self.limits.clone(),
            self.loader.clone(),
            self.memory.clone(),
        );
        let handle: Arc<dyn ModuleHost> = host.clone();

        let fault = self
            .run_program(&handle)
            .and_then(|()| handle.check_deadline())
            .err();
        if let Some(fault) = &fault {
            handle.write_console(ConsoleFd::Error, &format!("[{}] {}", fault.code, fault.detail));
            tracing::warn!(
                participant = %self.participant,
                module = %fault.module,
                code = %fault.code,
                detail = %fault.detail,
                "participant code faulted"
            );
        }

        for expression in console_eval {
            match self.loader.evaluate(expression, &handle) {
                Ok(result) => handle.write_console(ConsoleFd::Result, &result),
                Err(err) => handle.write_console(ConsoleFd::Error, &err.detail),
            }
        }

        let state = host.take_state();
        self.memory = state.memory.clone();
        SandboxTickOutput {
            participant: self.participant.clone(),
            intents: state.intents,
            dropped_intents: state.dropped,
            console: state.console,
            memory: state.memory,
            visuals: state.visuals,
            fault,
            fuel_used: state.fuel_used,
        }
    }

    fn run_program(&mut self, host: &Arc<dyn ModuleHost>) -> Result<(), SandboxFault> {
        match self.phase {
            ProgramPhase::NotYetLooping => {
                let exports = self.loader.require(MAIN_MODULE, host)?;
                if exports.contains(LOOP_EXPORT) {
                    self.phase = ProgramPhase::Looping(LoopMode::ExportedLoop);
                    self.loader.call_export(MAIN_MODULE, LOOP_EXPORT, host)
                } else {
                    // The body already ran this tick.
                    self.phase = ProgramPhase::Looping(LoopMode::RerunBody);
                    Ok(())
                }
            }
            ProgramPhase::Looping(LoopMode::ExportedLoop) => {
                self.loader.call_export(MAIN_MODULE, LOOP_EXPORT, host)
            }
            ProgramPhase::Looping(LoopMode::RerunBody) => {
                self.loader.rerun_body(MAIN_MODULE, host).map(|_| ())
            }
        }
    }
}

#[cfg(test)]
mod tests;
