//! Module cache with `require` semantics.
//!
//! Each module is compiled and its body run at most once per sandbox. While a
//! body runs the module is `Loading`, so a nested request for it is a circular
//! reference. Failures are cached and returned again on every later request.
//! The cache lock is never held while guest code runs; guests re-enter the
//! loader through the host.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tick_world_abi::{
    CompiledModule, EmptyModule, ModuleCompiler, ModuleExports, ModuleHost, ModuleSource, SandboxFault,
    MAIN_MODULE,
};

/// Strips leading `./` segments.
pub fn normalize_module_name(name: &str) -> &str {
    let mut name = name;
    while let Some(rest) = name.strip_prefix("./") {
        name = rest;
    }
    name
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleStatus {
    Loading,
    Loaded,
    Failed(SandboxFault),
}

enum ModuleState {
    Loading,
    Loaded {
        /// `None` while one of its exports is running.
        instance: Option<Box<dyn CompiledModule>>,
        exports: ModuleExports,
    },
    Failed(SandboxFault),
}

struct LoaderState {
    pending: BTreeMap<String, ModuleSource>,
    modules: BTreeMap<String, ModuleState>,
}

pub struct ModuleLoader {
    compiler: Arc<dyn ModuleCompiler>,
    state: Mutex<LoaderState>,
}

impl fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ModuleLoader")
            .field("pending", &state.pending.keys().collect::<Vec<_>>())
            .field("modules", &state.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleLoader {
    pub fn new(compiler: Arc<dyn ModuleCompiler>, modules: BTreeMap<String, ModuleSource>) -> Self {
        let pending = modules
            .into_iter()
            .map(|(name, source)| (normalize_module_name(&name).to_string(), source))
            .collect();
        Self {
            compiler,
            state: Mutex::new(LoaderState {
                pending,
                modules: BTreeMap::new(),
            }),
        }
    }

    pub fn status(&self, name: &str) -> Option<ModuleStatus> {
        let state = self.state.lock();
        state
            .modules
            .get(normalize_module_name(name))
            .map(|module| match module {
                ModuleState::Loading => ModuleStatus::Loading,
                ModuleState::Loaded { .. } => ModuleStatus::Loaded,
                ModuleState::Failed(fault) => ModuleStatus::Failed(fault.clone()),
            })
    }

    /// Loads `name` once and returns its exports.
    pub fn require(&self, name: &str, host: &Arc<dyn ModuleHost>) -> Result<ModuleExports, SandboxFault> {
        let name = normalize_module_name(name);
        let source = {
            let mut state = self.state.lock();
            match state.modules.get(name) {
                Some(ModuleState::Loaded { exports, .. }) => return Ok(exports.clone()),
                Some(ModuleState::Loading) => return Err(SandboxFault::circular_reference(name)),
                Some(ModuleState::Failed(fault)) => return Err(fault.clone()),
                None => {}
            }
            let source = state.pending.remove(name);
            if source.is_none() && name != MAIN_MODULE {
                let fault = SandboxFault::unknown_module(name);
                state
                    .modules
                    .insert(name.to_string(), ModuleState::Failed(fault.clone()));
                return Err(fault);
            }
            state.modules.insert(name.to_string(), ModuleState::Loading);
            source
        };

        let compiled = match source {
            Some(source) => self.compiler.compile(name, &source),
            // A participant without a main module runs nothing.
            None => Ok(Box::new(EmptyModule) as Box<dyn CompiledModule>),
        };
        let loaded = compiled.and_then(|mut instance| {
            let exports = instance.run_body(host)?;
            Ok((instance, exports))
        });

        let mut state = self.state.lock();
        match loaded {
            Ok((instance, exports)) => {
                state.modules.insert(
                    name.to_string(),
                    ModuleState::Loaded {
                        instance: Some(instance),
                        exports: exports.clone(),
                    },
                );
                Ok(exports)
            }
            Err(fault) => {
                tracing::debug!(module = name, code = %fault.code, "module load failed");
                state
                    .modules
                    .insert(name.to_string(), ModuleState::Failed(fault.clone()));
                Err(fault)
            }
        }
    }

    pub fn call_export(
        &self,
        module: &str,
        export: &str,
        host: &Arc<dyn ModuleHost>,
    ) -> Result<(), SandboxFault> {
        self.with_instance(module, host, |instance| instance.call_export(export, host))
    }

    /// Runs a loaded module's body again and refreshes its exports.
    pub fn rerun_body(&self, module: &str, host: &Arc<dyn ModuleHost>) -> Result<ModuleExports, SandboxFault> {
        let exports = self.with_instance(module, host, |instance| instance.run_body(host))?;
        let mut state = self.state.lock();
        if let Some(ModuleState::Loaded { exports: cached, .. }) =
            state.modules.get_mut(normalize_module_name(module))
        {
            *cached = exports.clone();
        }
        Ok(exports)
    }

    pub fn evaluate(&self, expression: &str, host: &Arc<dyn ModuleHost>) -> Result<String, SandboxFault> {
        self.with_instance(MAIN_MODULE, host, |instance| instance.evaluate(expression, host))
    }

    /// Takes the module's instance out of the cache for the duration of `run`.
    fn with_instance<R>(
        &self,
        module: &str,
        host: &Arc<dyn ModuleHost>,
        run: impl FnOnce(&mut Box<dyn CompiledModule>) -> Result<R, SandboxFault>,
    ) -> Result<R, SandboxFault> {
        let name = normalize_module_name(module);
        self.require(name, host)?;
        let mut instance = {
            let mut state = self.state.lock();
            match state.modules.get_mut(name) {
                Some(ModuleState::Loaded { instance, .. }) => instance
                    .take()
                    .ok_or_else(|| SandboxFault::circular_reference(name))?,
                Some(ModuleState::Failed(fault)) => return Err(fault.clone()),
                _ => return Err(SandboxFault::circular_reference(name)),
            }
        };
        let result = run(&mut instance);
        let mut state = self.state.lock();
        if let Some(ModuleState::Loaded { instance: slot, .. }) = state.modules.get_mut(name) {
            *slot = Some(instance);
        }
        result
    }
}
