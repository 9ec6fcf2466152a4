use std::sync::Arc;

use tick_world_abi::{ModuleExports, ModuleSource, SandboxFaultCode, SandboxLimits};

use super::programs::{register_builtin_programs, HARVESTER_PROGRAM};
use super::*;
use crate::objects::{ObjectId, ResourceType, StoreSpec};
use crate::position::RoomPosition;
use crate::schema::{read, NewObject, ObjectSpec, RoomBuilder, SchemaRegistry};

struct LoopCounter {
    calls: u32,
}

impl NativeModule for LoopCounter {
    fn body(&mut self, _api: &NativeApi<'_>) -> Result<ModuleExports, ScriptError> {
        Ok(ModuleExports::from_iter([LOOP_EXPORT]))
    }

    fn call(&mut self, _export: &str, api: &NativeApi<'_>) -> Result<(), ScriptError> {
        self.calls += 1;
        api.log(format!("loop {} at {}", self.calls, api.time()));
        Ok(())
    }
}

struct BodyOnly;

impl NativeModule for BodyOnly {
    fn body(&mut self, api: &NativeApi<'_>) -> Result<ModuleExports, ScriptError> {
        api.log("body");
        Ok(ModuleExports::new())
    }

    fn call(&mut self, export: &str, _api: &NativeApi<'_>) -> Result<(), ScriptError> {
        Err(ScriptError::thrown(format!("{export} is not a function")))
    }
}

struct Thrower;

impl NativeModule for Thrower {
    fn body(&mut self, _api: &NativeApi<'_>) -> Result<ModuleExports, ScriptError> {
        Ok(ModuleExports::from_iter([LOOP_EXPORT]))
    }

    fn call(&mut self, _export: &str, _api: &NativeApi<'_>) -> Result<(), ScriptError> {
        Err(ScriptError::thrown("boom"))
    }
}

fn compiler() -> Arc<dyn ModuleCompiler> {
    let mut native = NativeModuleCompiler::new();
    native.register("counter", || LoopCounter { calls: 0 });
    native.register("body_only", || BodyOnly);
    native.register("thrower", || Thrower);
    register_builtin_programs(&mut native);
    Arc::new(CodeCompiler::native_only(native))
}

fn sandbox(program: &str) -> Sandbox {
    Sandbox::new("amy", ParticipantCode::native(program), compiler(), SandboxLimits::default())
}

fn world(time: u64) -> Arc<WorldContext> {
    let pos = |x, y| RoomPosition::in_room("W1N1", x, y).unwrap();
    let blob = RoomBuilder::new("W1N1")
        .unwrap()
        .owner("amy")
        .object(
            NewObject::new(
                ObjectId(1),
                pos(10, 10),
                ObjectSpec::Spawn {
                    name: "Spawn1".to_string(),
                    store: StoreSpec::with_capacity(300).with(ResourceType::Energy, 300),
                },
            )
            .owned_by("amy")
            .with_hits(5000, 5000),
        )
        .unwrap()
        .object(NewObject::new(
            ObjectId(2),
            pos(20, 20),
            ObjectSpec::Source {
                energy: 3000,
                capacity: 3000,
                next_regeneration_time: 0,
            },
        ))
        .unwrap()
        .build()
        .unwrap();
    let room = read(&SchemaRegistry::new(), blob.clone()).unwrap();
    let mut world = WorldContext::new(time);
    world.add_room(room.view(), Arc::new(blob));
    Arc::new(world)
}

#[test]
fn exported_loop_is_called_every_tick() {
    let mut sandbox = sandbox("counter");
    assert_eq!(sandbox.phase(), ProgramPhase::NotYetLooping);

    let first = sandbox.run_tick(world(1), &[]);
    assert_eq!(sandbox.phase(), ProgramPhase::Looping(LoopMode::ExportedLoop));
    assert_eq!(first.console.log, vec!["loop 1 at 1".to_string()]);
    assert!(first.fault.is_none());

    let second = sandbox.run_tick(world(2), &[]);
    assert_eq!(second.console.log, vec!["loop 2 at 2".to_string()]);
}

#[test]
fn body_without_loop_reruns_each_tick() {
    let mut sandbox = sandbox("body_only");
    let first = sandbox.run_tick(world(1), &[]);
    assert_eq!(sandbox.phase(), ProgramPhase::Looping(LoopMode::RerunBody));
    assert_eq!(first.console.log, vec!["body".to_string()]);

    let second = sandbox.run_tick(world(2), &[]);
    assert_eq!(second.console.log, vec!["body".to_string()]);
}

#[test]
fn faults_land_on_the_error_stream() {
    let mut sandbox = sandbox("thrower");
    for time in 1..=2 {
        let output = sandbox.run_tick(world(time), &[]);
        let fault = output.fault.expect("loop throws");
        assert_eq!(fault.code, SandboxFaultCode::Thrown);
        assert_eq!(output.console.errors, vec!["[thrown] boom".to_string()]);
    }
    assert_eq!(sandbox.phase(), ProgramPhase::Looping(LoopMode::ExportedLoop));
}

#[test]
fn wasm_sources_fault_when_wasm_is_disabled() {
    let code = ParticipantCode::new().with_module(MAIN_MODULE, ModuleSource::Wasm { bytes: vec![0, 97, 115, 109] });
    let mut sandbox = Sandbox::new("amy", code, compiler(), SandboxLimits::default());
    let output = sandbox.run_tick(world(1), &[]);
    assert_eq!(output.fault.map(|fault| fault.code), Some(SandboxFaultCode::SandboxUnavailable));
    assert_eq!(sandbox.phase(), ProgramPhase::NotYetLooping);
}

#[test]
fn harvester_spawns_and_answers_console() {
    let mut sandbox = sandbox(HARVESTER_PROGRAM);
    let output = sandbox.run_tick(
        world(7),
        &["time".to_string(), "creeps".to_string(), "bogus".to_string()],
    );
    assert!(output.fault.is_none());
    assert_eq!(output.intents.len(), 1);
    let (route, intent) = &output.intents[0];
    assert_eq!(intent.intent, "spawnCreep");
    assert_eq!(intent.params["name"], "harvester0");
    assert!(matches!(route, IntentRoute::Object { room, .. } if room == "W1N1"));

    assert_eq!(output.console.results, vec!["7".to_string(), "0".to_string()]);
    assert_eq!(output.console.errors.len(), 1);
    assert!(output.console.errors[0].contains("bogus is not defined"));

    let memory: serde_json::Value = serde_json::from_slice(sandbox.memory()).unwrap();
    assert_eq!(memory["spawned"], 1);
    assert_eq!(memory["lastTick"], 7);
}

#[test]
fn memory_is_restored_into_the_host() {
    let mut sandbox = sandbox(HARVESTER_PROGRAM).with_memory(br#"{"spawned":4}"#.to_vec());
    let output = sandbox.run_tick(world(3), &[]);
    assert_eq!(output.intents[0].1.params["name"], "harvester4");
}

#[test]
fn code_bundles_round_trip() {
    let code = ParticipantCode::native(HARVESTER_PROGRAM)
        .with_module("util", ModuleSource::Wasm { bytes: vec![1, 2, 3] });
    let bytes = code.to_bundle().unwrap();
    assert_eq!(ParticipantCode::from_bundle(&bytes).unwrap(), code);
    assert!(ParticipantCode::from_bundle(b"not cbor").is_err());
}
