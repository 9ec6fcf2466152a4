//! Wasmtime backend for participant modules.
//!
//! Each compiled module keeps its own `Store`, so globals and linear memory
//! survive from one tick to the next exactly like module state in a long-lived
//! sandbox. Host services are reached through the `env` imports defined in
//! [`imports`].

#[cfg(feature = "wasmtime")]
mod imports;
#[cfg(feature = "wasmtime")]
mod instance;

use std::fmt;
#[cfg(feature = "wasmtime")]
use std::collections::HashMap;
#[cfg(feature = "wasmtime")]
use std::sync::Arc;

#[cfg(feature = "wasmtime")]
use parking_lot::Mutex;
#[cfg(feature = "wasmtime")]
use sha2::{Digest, Sha256};
use tick_world_abi::{
    CompiledModule, ModuleCompiler, ModuleSource, SandboxFault, SandboxFaultCode, SandboxLimits,
};

/// Export run once when a module is first required.
pub const INIT_EXPORT: &str = "init";
/// Import module name for host functions.
pub const HOST_IMPORT_MODULE: &str = "env";

/// Configuration for the wasmtime backend.
#[derive(Debug, Clone, PartialEq)]
pub struct WasmExecutorConfig {
    pub max_fuel: u64,
    pub max_mem_bytes: u64,
    pub max_call_ms: u64,
    pub max_cache_entries: usize,
}

impl Default for WasmExecutorConfig {
    fn default() -> Self {
        Self::from_limits(&SandboxLimits::default())
    }
}

impl WasmExecutorConfig {
    pub fn from_limits(limits: &SandboxLimits) -> Self {
        Self {
            max_fuel: limits.max_fuel,
            max_mem_bytes: limits.max_mem_bytes,
            max_call_ms: limits.max_cpu_ms,
            max_cache_entries: 32,
        }
    }
}

#[derive(Clone)]
pub struct WasmExecutor {
    config: WasmExecutorConfig,
    #[cfg(feature = "wasmtime")]
    engine: wasmtime::Engine,
    #[cfg(feature = "wasmtime")]
    module_cache: Arc<Mutex<ModuleCache>>,
}

impl fmt::Debug for WasmExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WasmExecutor")
            .field("config", &self.config)
            .finish()
    }
}

impl WasmExecutor {
    pub fn new(config: WasmExecutorConfig) -> Result<Self, SandboxFault> {
        #[cfg(feature = "wasmtime")]
        {
            let mut engine_config = wasmtime::Config::new();
            engine_config.consume_fuel(true);
            engine_config.wasm_multi_value(true);
            engine_config.wasm_threads(false);
            engine_config.cranelift_nan_canonicalization(true);
            engine_config.debug_info(false);
            let engine = wasmtime::Engine::new(&engine_config).map_err(|err| {
                SandboxFault::new(
                    "",
                    SandboxFaultCode::SandboxUnavailable,
                    format!("failed to initialize wasmtime engine: {err}"),
                )
            })?;
            let module_cache = Arc::new(Mutex::new(ModuleCache::new(config.max_cache_entries)));
            Ok(Self {
                config,
                engine,
                module_cache,
            })
        }

        #[cfg(not(feature = "wasmtime"))]
        {
            Ok(Self { config })
        }
    }

    pub fn config(&self) -> &WasmExecutorConfig {
        &self.config
    }

    #[cfg(all(feature = "wasmtime", test))]
    pub(crate) fn cached_modules(&self) -> usize {
        self.module_cache.lock().entries.len()
    }

    /// Compiles `bytes` unless a module with the same digest is cached.
    #[cfg(feature = "wasmtime")]
    pub(crate) fn module_for(
        &self,
        name: &str,
        digest: ModuleDigest,
        bytes: &[u8],
    ) -> Result<Arc<wasmtime::Module>, SandboxFault> {
        if let Some(module) = self.module_cache.lock().lookup(&digest) {
            return Ok(module);
        }
        let module = wasmtime::Module::new(&self.engine, bytes).map_err(|err| {
            SandboxFault::new(name, SandboxFaultCode::InvalidModule, format!("compile failed: {err}"))
        })?;
        let module = Arc::new(module);
        self.module_cache.lock().store(digest, module.clone());
        Ok(module)
    }
}

impl ModuleCompiler for WasmExecutor {
    fn compile(
        &self,
        name: &str,
        source: &ModuleSource,
    ) -> Result<Box<dyn CompiledModule>, SandboxFault> {
        let ModuleSource::Wasm { bytes } = source else {
            return Err(SandboxFault::new(
                name,
                SandboxFaultCode::InvalidModule,
                "not a wasm module",
            ));
        };
        if bytes.is_empty() {
            return Err(SandboxFault::new(
                name,
                SandboxFaultCode::InvalidModule,
                "missing wasm bytes",
            ));
        }

        #[cfg(feature = "wasmtime")]
        {
            let digest = module_digest(bytes);
            let module = self.module_for(name, digest, bytes)?;
            let instance =
                instance::WasmInstance::instantiate(&self.engine, name, &module, &self.config)?;
            tracing::debug!(module = name, digest = %hex::encode(digest), "instantiated wasm module");
            Ok(Box::new(instance))
        }

        #[cfg(not(feature = "wasmtime"))]
        {
            Err(SandboxFault::new(
                name,
                SandboxFaultCode::SandboxUnavailable,
                "wasmtime feature not enabled",
            ))
        }
    }
}

#[cfg(feature = "wasmtime")]
pub(crate) type ModuleDigest = [u8; 32];

#[cfg(feature = "wasmtime")]
fn module_digest(bytes: &[u8]) -> ModuleDigest {
    Sha256::digest(bytes).into()
}

/// Compiled modules shared by every sandbox using this executor. Participants
/// often upload identical code, so entries are keyed by content digest and the
/// least recently used one is dropped once `capacity` is exceeded.
#[cfg(feature = "wasmtime")]
struct ModuleCache {
    capacity: usize,
    clock: u64,
    entries: HashMap<ModuleDigest, CachedModule>,
}

#[cfg(feature = "wasmtime")]
struct CachedModule {
    module: Arc<wasmtime::Module>,
    last_used: u64,
}

#[cfg(feature = "wasmtime")]
impl ModuleCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            clock: 0,
            entries: HashMap::new(),
        }
    }

    fn lookup(&mut self, digest: &ModuleDigest) -> Option<Arc<wasmtime::Module>> {
        self.clock += 1;
        let entry = self.entries.get_mut(digest)?;
        entry.last_used = self.clock;
        Some(entry.module.clone())
    }

    fn store(&mut self, digest: ModuleDigest, module: Arc<wasmtime::Module>) {
        if self.capacity == 0 {
            return;
        }
        self.clock += 1;
        self.entries.insert(
            digest,
            CachedModule {
                module,
                last_used: self.clock,
            },
        );
        while self.entries.len() > self.capacity {
            let stalest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(digest, _)| *digest);
            match stalest {
                Some(digest) => self.entries.remove(&digest),
                None => break,
            };
        }
    }
}

#[cfg(test)]
mod tests;
