#![cfg(feature = "wasmtime")]

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use tick_world::sandbox::NativeModuleCompiler;
use tick_world::{
    CodeCompiler, FlagSet, GameRules, ModuleSource, ParticipantCode, Sandbox, SandboxLimits,
    TickDriver, TickInput,
};
use tick_world_wasm_executor::WasmExecutorConfig;

use common::{seed_room, ROOM};

const FLAG_INTENT: &str =
    r#"{"receiver":"flags","intent":"create","params":{"name":"w","room":"W1N1","x":1,"y":2}}"#;

fn flag_module() -> Vec<u8> {
    let escaped = FLAG_INTENT.replace('\\', "\\\\").replace('"', "\\\"");
    let text = format!(
        r#"(module
  (import "env" "intent" (func $intent (param i32 i32) (result i32)))
  (import "env" "console" (func $console (param i32 i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "{escaped}")
  (data (i32.const 256) "planted")
  (func (export "loop")
    (drop (call $intent (i32.const 0) (i32.const {len})))
    (call $console (i32.const 1) (i32.const 256) (i32.const 7))))"#,
        len = FLAG_INTENT.len(),
    );
    wat::parse_str(text).expect("valid wat")
}

#[test]
fn wasm_loop_plants_a_flag_and_logs() {
    let limits = SandboxLimits::default();
    let compiler = Arc::new(
        CodeCompiler::new(NativeModuleCompiler::new(), WasmExecutorConfig::from_limits(&limits))
            .expect("wasm backend"),
    );
    let code = ParticipantCode::new().with_module(
        "main",
        ModuleSource::Wasm {
            bytes: flag_module(),
        },
    );
    let mut sandboxes = vec![Sandbox::new("amy", code, compiler, limits)];

    let output = TickDriver::standard(GameRules::default())
        .run_tick(
            TickInput {
                time: 3,
                rooms: BTreeMap::from([(ROOM.to_string(), seed_room())]),
                ..TickInput::default()
            },
            &mut sandboxes,
        )
        .expect("tick runs");

    let artifacts = &output.participants["amy"];
    assert!(artifacts.fault.is_none(), "unexpected fault: {:?}", artifacts.fault);
    assert_eq!(artifacts.console.log, vec!["planted".to_string()]);
    assert!(artifacts.fuel_used > 0);

    let flags = FlagSet::from_blob(artifacts.flags.as_ref().expect("flag blob")).unwrap();
    let flag = flags.get("w").expect("flag planted");
    assert_eq!((flag.pos.x(), flag.pos.y()), (1, 2));
    assert_eq!(output.stats.flag_intents, 1);
    assert_eq!(output.stats.flag_rejections, 0);
}
