use super::*;
use tick_world_abi::ModuleSource;

#[test]
fn compile_rejects_native_sources() {
    let executor = WasmExecutor::new(WasmExecutorConfig::default()).unwrap();
    let err = executor
        .compile(
            "main",
            &ModuleSource::Native {
                program: "harvester".to_string(),
            },
        )
        .err()
        .expect("native source rejected");
    assert_eq!(err.code, SandboxFaultCode::InvalidModule);
}

#[test]
fn compile_rejects_empty_wasm() {
    let executor = WasmExecutor::new(WasmExecutorConfig::default()).unwrap();
    let err = executor
        .compile("main", &ModuleSource::Wasm { bytes: Vec::new() })
        .err()
        .expect("empty wasm rejected");
    assert_eq!(err.code, SandboxFaultCode::InvalidModule);
}

#[test]
fn config_follows_sandbox_limits() {
    let limits = SandboxLimits {
        max_fuel: 7,
        max_cpu_ms: 9,
        ..SandboxLimits::default()
    };
    let config = WasmExecutorConfig::from_limits(&limits);
    assert_eq!(config.max_fuel, 7);
    assert_eq!(config.max_call_ms, 9);
}

#[cfg(not(feature = "wasmtime"))]
#[test]
fn compile_reports_unavailable_without_wasmtime() {
    let executor = WasmExecutor::new(WasmExecutorConfig::default()).unwrap();
    let err = executor
        .compile(
            "main",
            &ModuleSource::Wasm {
                bytes: vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00],
            },
        )
        .err()
        .expect("no backend");
    assert_eq!(err.code, SandboxFaultCode::SandboxUnavailable);
}

#[cfg(feature = "wasmtime")]
mod wasmtime_backend {
    use super::*;
    use std::any::Any;
    use std::sync::Arc;
    use tick_world_abi::{ConsoleFd, ModuleExports, ModuleHost, RunnerIntent, SandboxFault};

    const EMPTY_WASM: [u8; 8] = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

    #[derive(Default)]
    struct RecordingHost {
        intents: Mutex<Vec<RunnerIntent>>,
        console: Mutex<Vec<(ConsoleFd, String)>>,
        memory: Mutex<Vec<u8>>,
        fuel_used: Mutex<u64>,
        require_fault: Option<SandboxFault>,
    }

    impl ModuleHost for RecordingHost {
        fn participant(&self) -> &str {
            "alice"
        }

        fn time(&self) -> u64 {
            42
        }

        fn require(&self, name: &str) -> Result<ModuleExports, SandboxFault> {
            match &self.require_fault {
                Some(fault) => Err(fault.clone()),
                None => Err(SandboxFault::unknown_module(name)),
            }
        }

        fn call_export(&self, module: &str, export: &str) -> Result<(), SandboxFault> {
            Err(SandboxFault::missing_export(module, export))
        }

        fn submit_intent(&self, intent: RunnerIntent) -> Result<(), SandboxFault> {
            self.intents.lock().push(intent);
            Ok(())
        }

        fn write_console(&self, fd: ConsoleFd, text: &str) {
            self.console.lock().push((fd, text.to_string()));
        }

        fn room_names(&self) -> Vec<String> {
            vec!["W1N1".to_string()]
        }

        fn room_blob(&self, room: &str) -> Option<Vec<u8>> {
            (room == "W1N1").then(|| vec![1, 2, 3])
        }

        fn memory(&self) -> Vec<u8> {
            self.memory.lock().clone()
        }

        fn set_memory(&self, bytes: Vec<u8>) -> Result<(), SandboxFault> {
            *self.memory.lock() = bytes;
            Ok(())
        }

        fn push_visual(&self, _room: &str, _payload: String) -> Result<(), SandboxFault> {
            Ok(())
        }

        fn fuel_remaining(&self) -> u64 {
            u64::MAX
        }

        fn consume_fuel(&self, used: u64) {
            *self.fuel_used.lock() += used;
        }

        fn check_deadline(&self) -> Result<(), SandboxFault> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn wat_string(text: &str) -> String {
        text.replace('\\', "\\\\").replace('"', "\\\"")
    }

    fn compile_wat(executor: &WasmExecutor, wat: &str) -> Box<dyn CompiledModule> {
        let bytes = wat::parse_str(wat).expect("valid wat");
        executor
            .compile("main", &ModuleSource::Wasm { bytes })
            .expect("compile module")
    }

    #[test]
    fn body_submits_intents_and_loop_keeps_state() {
        let executor = WasmExecutor::new(WasmExecutorConfig::default()).unwrap();
        let intent = r#"{"receiver":"00000000000000aa","intent":"move","params":{"direction":3}}"#;
        let wat = format!(
            r#"(module
  (import "env" "intent" (func $intent (param i32 i32) (result i32)))
  (import "env" "memory_write" (func $memory_write (param i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "{intent}")
  (global $ticks (mut i32) (i32.const 0))
  (func (export "init")
    (drop (call $intent (i32.const 0) (i32.const {len}))))
  (func (export "loop")
    (global.set $ticks (i32.add (global.get $ticks) (i32.const 1)))
    (i32.store8 (i32.const 512) (global.get $ticks))
    (drop (call $memory_write (i32.const 512) (i32.const 1)))))"#,
            intent = wat_string(intent),
            len = intent.len(),
        );
        let mut module = compile_wat(&executor, &wat);
        let recording = Arc::new(RecordingHost::default());
        let host: Arc<dyn ModuleHost> = recording.clone();

        let exports = module.run_body(&host).expect("run body");
        assert!(exports.contains("loop"));
        assert!(!exports.contains("init"));
        {
            let intents = recording.intents.lock();
            assert_eq!(intents.len(), 1);
            assert_eq!(intents[0].intent, "move");
            assert_eq!(intents[0].params["direction"], 3);
        }

        module.call_export("loop", &host).expect("first loop");
        module.call_export("loop", &host).expect("second loop");
        assert_eq!(*recording.memory.lock(), vec![2]);
        assert!(*recording.fuel_used.lock() > 0);
    }

    #[test]
    fn malformed_intent_is_reported_to_guest() {
        let executor = WasmExecutor::new(WasmExecutorConfig::default()).unwrap();
        let wat = r#"(module
  (import "env" "intent" (func $intent (param i32 i32) (result i32)))
  (import "env" "console" (func $console (param i32 i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "not json")
  (data (i32.const 64) "rejected")
  (func (export "init")
    (if (i32.eq (call $intent (i32.const 0) (i32.const 8)) (i32.const -1))
      (then (call $console (i32.const 2) (i32.const 64) (i32.const 8))))))"#;
        let mut module = compile_wat(&executor, wat);
        let recording = Arc::new(RecordingHost::default());
        let host: Arc<dyn ModuleHost> = recording.clone();

        module.run_body(&host).expect("run body");
        assert!(recording.intents.lock().is_empty());
        assert_eq!(
            *recording.console.lock(),
            vec![(ConsoleFd::Error, "rejected".to_string())]
        );
    }

    #[test]
    fn oversized_guest_range_traps_without_copying() {
        let executor = WasmExecutor::new(WasmExecutorConfig::default()).unwrap();
        let wat = r#"(module
  (import "env" "console" (func $console (param i32 i32 i32)))
  (memory (export "memory") 1)
  (func (export "init")
    (call $console (i32.const 1) (i32.const 0) (i32.const 0x7fffffff))))"#;
        let mut module = compile_wat(&executor, wat);
        let recording = Arc::new(RecordingHost::default());
        let host: Arc<dyn ModuleHost> = recording.clone();

        let fault = module.run_body(&host).unwrap_err();
        assert_eq!(fault.code, SandboxFaultCode::Trap);
        assert!(recording.console.lock().is_empty());
    }

    #[test]
    fn runaway_loop_runs_out_of_fuel() {
        let executor = WasmExecutor::new(WasmExecutorConfig {
            max_fuel: 10_000,
            ..WasmExecutorConfig::default()
        })
        .unwrap();
        let wat = r#"(module
  (memory (export "memory") 1)
  (func (export "loop") (loop $spin (br $spin))))"#;
        let mut module = compile_wat(&executor, wat);
        let host: Arc<dyn ModuleHost> = Arc::new(RecordingHost::default());

        module.run_body(&host).expect("empty body");
        let fault = module.call_export("loop", &host).unwrap_err();
        assert_eq!(fault.code, SandboxFaultCode::Timeout);
    }

    #[test]
    fn nested_loader_fault_keeps_its_code() {
        let executor = WasmExecutor::new(WasmExecutorConfig::default()).unwrap();
        let wat = r#"(module
  (import "env" "require" (func $require (param i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "main")
  (func (export "init") (call $require (i32.const 0) (i32.const 4))))"#;
        let mut module = compile_wat(&executor, wat);
        let host: Arc<dyn ModuleHost> = Arc::new(RecordingHost {
            require_fault: Some(SandboxFault::circular_reference("main")),
            ..RecordingHost::default()
        });

        let fault = module.run_body(&host).unwrap_err();
        assert_eq!(fault.code, SandboxFaultCode::CircularReference);
        assert_eq!(fault.detail, "Circular reference to module: main");
    }

    #[test]
    fn missing_export_is_rejected_without_running() {
        let executor = WasmExecutor::new(WasmExecutorConfig::default()).unwrap();
        let mut module = compile_wat(&executor, r#"(module (memory (export "memory") 1))"#);
        let host: Arc<dyn ModuleHost> = Arc::new(RecordingHost::default());

        let exports = module.run_body(&host).expect("no body");
        assert!(exports.is_empty());
        let fault = module.call_export("loop", &host).unwrap_err();
        assert_eq!(fault.code, SandboxFaultCode::MissingExport);
    }

    #[test]
    fn room_blob_is_copied_into_guest_memory() {
        let executor = WasmExecutor::new(WasmExecutorConfig::default()).unwrap();
        let wat = r#"(module
  (import "env" "room_read" (func $room_read (param i32 i32 i32) (result i32)))
  (import "env" "memory_write" (func $memory_write (param i32 i32) (result i32)))
  (memory (export "memory") 1)
  (func (export "init")
    (drop (call $memory_write (i32.const 100)
      (call $room_read (i32.const 0) (i32.const 100) (i32.const 16))))))"#;
        let mut module = compile_wat(&executor, wat);
        let recording = Arc::new(RecordingHost::default());
        let host: Arc<dyn ModuleHost> = recording.clone();

        module.run_body(&host).expect("run body");
        assert_eq!(*recording.memory.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn module_cache_drops_the_least_recently_used_digest() {
        let executor = WasmExecutor::new(WasmExecutorConfig {
            max_cache_entries: 2,
            ..WasmExecutorConfig::default()
        })
        .unwrap();
        let (a, b, c) = ([1u8; 32], [2u8; 32], [3u8; 32]);

        let first_a = executor.module_for("a", a, &EMPTY_WASM).unwrap();
        let first_b = executor.module_for("b", b, &EMPTY_WASM).unwrap();
        // Touch `a` so `b` becomes the stalest entry.
        assert!(Arc::ptr_eq(&first_a, &executor.module_for("a", a, &EMPTY_WASM).unwrap()));
        executor.module_for("c", c, &EMPTY_WASM).unwrap();
        assert_eq!(executor.cached_modules(), 2);

        assert!(Arc::ptr_eq(&first_a, &executor.module_for("a", a, &EMPTY_WASM).unwrap()));
        assert!(!Arc::ptr_eq(&first_b, &executor.module_for("b", b, &EMPTY_WASM).unwrap()));
    }

    #[test]
    fn module_cache_with_zero_capacity_stays_empty() {
        let executor = WasmExecutor::new(WasmExecutorConfig {
            max_cache_entries: 0,
            ..WasmExecutorConfig::default()
        })
        .unwrap();

        executor.module_for("a", [1u8; 32], &EMPTY_WASM).unwrap();
        assert_eq!(executor.cached_modules(), 0);
    }

    #[test]
    fn invalid_bytes_fail_to_compile() {
        let executor = WasmExecutor::new(WasmExecutorConfig::default()).unwrap();
        let err = executor
            .compile(
                "main",
                &ModuleSource::Wasm {
                    bytes: vec![1, 2, 3],
                },
            )
            .err()
            .expect("invalid module");
        assert_eq!(err.code, SandboxFaultCode::InvalidModule);
    }
}
