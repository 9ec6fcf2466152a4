use std::sync::Arc;
use std::time::Instant;

use tick_world_abi::{
    CompiledModule, ModuleExports, ModuleHost, SandboxFault, SandboxFaultCode,
};
use wasmtime::{Engine, ExternType, Instance, Linker, Module, Store, StoreLimits, StoreLimitsBuilder};

use crate::{imports, WasmExecutorConfig, INIT_EXPORT};

/// Per-instance data visible to host imports.
pub(crate) struct GuestState {
    limits: StoreLimits,
    pub(crate) host: Option<Arc<dyn ModuleHost>>,
    pub(crate) fault: Option<SandboxFault>,
}

pub(crate) struct WasmInstance {
    name: String,
    store: Store<GuestState>,
    instance: Instance,
    exports: ModuleExports,
    has_init: bool,
    config: WasmExecutorConfig,
}

impl WasmInstance {
    pub(crate) fn instantiate(
        engine: &Engine,
        name: &str,
        module: &Module,
        config: &WasmExecutorConfig,
    ) -> Result<Self, SandboxFault> {
        let max_mem = usize::try_from(config.max_mem_bytes).unwrap_or(usize::MAX);
        let limits = StoreLimitsBuilder::new()
            .memory_size(max_mem)
            .instances(1)
            .build();
        let mut store = Store::new(
            engine,
            GuestState {
                limits,
                host: None,
                fault: None,
            },
        );
        store.limiter(|state| &mut state.limits);
        store
            .set_fuel(config.max_fuel)
            .map_err(|err| map_wasmtime_error(name, err))?;

        let mut linker = Linker::new(engine);
        imports::define(&mut linker).map_err(|err| {
            SandboxFault::new(
                name,
                SandboxFaultCode::SandboxUnavailable,
                format!("failed to link host imports: {err}"),
            )
        })?;
        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|err| map_wasmtime_error(name, err))?;

        let mut has_init = false;
        let mut exports = ModuleExports::new();
        for export in module.exports() {
            let ExternType::Func(func) = export.ty() else {
                continue;
            };
            if func.params().len() != 0 || func.results().len() != 0 {
                continue;
            }
            if export.name() == INIT_EXPORT {
                has_init = true;
            } else {
                exports.insert(export.name());
            }
        }

        Ok(Self {
            name: name.to_string(),
            store,
            instance,
            exports,
            has_init,
            config: config.clone(),
        })
    }

    fn invoke(&mut self, export: &str, host: &Arc<dyn ModuleHost>) -> Result<(), SandboxFault> {
        let func = self
            .instance
            .get_typed_func::<(), ()>(&mut self.store, export)
            .map_err(|_| SandboxFault::missing_export(&self.name, export))?;

        let budget = host.fuel_remaining().min(self.config.max_fuel);
        if budget == 0 {
            return Err(SandboxFault::new(
                &self.name,
                SandboxFaultCode::Timeout,
                "cpu budget exhausted",
            ));
        }
        self.store
            .set_fuel(budget)
            .map_err(|err| map_wasmtime_error(&self.name, err))?;
        {
            let state = self.store.data_mut();
            state.host = Some(host.clone());
            state.fault = None;
        }

        let start = Instant::now();
        let result = func.call(&mut self.store, ());
        let remaining = self.store.get_fuel().unwrap_or(0);
        host.consume_fuel(budget.saturating_sub(remaining));
        let fault = {
            let state = self.store.data_mut();
            state.host = None;
            state.fault.take()
        };

        if let Err(err) = result {
            return Err(fault.unwrap_or_else(|| map_wasmtime_error(&self.name, err)));
        }
        if start.elapsed().as_millis() as u64 > self.config.max_call_ms {
            return Err(SandboxFault::new(
                &self.name,
                SandboxFaultCode::Timeout,
                "execution exceeded max_call_ms",
            ));
        }
        Ok(())
    }
}

impl CompiledModule for WasmInstance {
    fn run_body(&mut self, host: &Arc<dyn ModuleHost>) -> Result<ModuleExports, SandboxFault> {
        if self.has_init {
            self.invoke(INIT_EXPORT, host)?;
        }
        Ok(self.exports.clone())
    }

    fn call_export(
        &mut self,
        export: &str,
        host: &Arc<dyn ModuleHost>,
    ) -> Result<(), SandboxFault> {
        if !self.exports.contains(export) {
            return Err(SandboxFault::missing_export(&self.name, export));
        }
        self.invoke(export, host)
    }
}

fn map_wasmtime_error(module: &str, err: wasmtime::Error) -> SandboxFault {
    if let Some(trap) = err.downcast_ref::<wasmtime::Trap>() {
        let code = match trap {
            wasmtime::Trap::OutOfFuel => SandboxFaultCode::Timeout,
            _ => SandboxFaultCode::Trap,
        };
        return SandboxFault::new(module, code, trap.to_string());
    }
    SandboxFault::new(module, SandboxFaultCode::Trap, err.to_string())
}
