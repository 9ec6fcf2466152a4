mod common;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tick_world::sandbox::{NativeApi, NativeModule, ScriptError};
use tick_world::{
    released_reason, BufferError, GameRules, ModuleSource, ObjectView, ParticipantCode, Sandbox,
    SandboxFaultCode, SandboxLimits, TickDriver, TickInput,
};
use tick_world_abi::ModuleExports;

use common::{native_compiler, seed_room, ROOM};

/// Body requires another module by name.
struct Requires(&'static str);

impl NativeModule for Requires {
    fn body(&mut self, api: &NativeApi<'_>) -> Result<ModuleExports, ScriptError> {
        api.require(self.0)?;
        Ok(ModuleExports::from_iter(["loop"]))
    }

    fn call(&mut self, _export: &str, _api: &NativeApi<'_>) -> Result<(), ScriptError> {
        Ok(())
    }
}

/// Keeps every object it sees past the end of the tick.
struct Stash(Arc<Mutex<Vec<ObjectView>>>);

impl NativeModule for Stash {
    fn body(&mut self, _api: &NativeApi<'_>) -> Result<ModuleExports, ScriptError> {
        Ok(ModuleExports::from_iter(["loop"]))
    }

    fn call(&mut self, _export: &str, api: &NativeApi<'_>) -> Result<(), ScriptError> {
        let mut kept = self.0.lock().unwrap();
        for room in api.rooms() {
            kept.extend(room.objects().iter().cloned());
        }
        Ok(())
    }
}

fn one_room(time: u64) -> TickInput {
    TickInput {
        time,
        rooms: BTreeMap::from([(ROOM.to_string(), seed_room())]),
        ..TickInput::default()
    }
}

#[test]
fn circular_requires_fault_the_participant() {
    let compiler = native_compiler(|native| {
        native.register("requires_helper", || Requires("helper"));
        native.register("requires_main", || Requires("./main"));
    });
    let code = ParticipantCode::native("requires_helper").with_module(
        "helper",
        ModuleSource::Native {
            program: "requires_main".to_string(),
        },
    );
    let mut sandboxes = vec![Sandbox::new("amy", code, compiler, SandboxLimits::default())];

    let driver = TickDriver::standard(GameRules::default());
    let output = driver.run_tick(one_room(1), &mut sandboxes).unwrap();
    let artifacts = &output.participants["amy"];
    let fault = artifacts.fault.as_ref().expect("fault recorded");
    assert_eq!(fault.code, SandboxFaultCode::CircularReference);
    assert_eq!(
        artifacts.console.errors,
        vec!["[circular_reference] Circular reference to module: main".to_string()]
    );
    assert_eq!(output.stats.faults, 1);

    // The failed module stays failed on the next tick.
    let output = driver.run_tick(one_room(2), &mut sandboxes).unwrap();
    assert_eq!(
        output.participants["amy"].fault.as_ref().map(|fault| fault.code),
        Some(SandboxFaultCode::CircularReference)
    );
}

#[test]
fn objects_kept_past_the_tick_are_released() {
    let kept = Arc::new(Mutex::new(Vec::new()));
    let shared = kept.clone();
    let compiler = native_compiler(move |native| {
        native.register("stash", move || Stash(shared.clone()));
    });
    let mut sandboxes = vec![Sandbox::new(
        "amy",
        ParticipantCode::native("stash"),
        compiler,
        SandboxLimits::default(),
    )];

    TickDriver::standard(GameRules::default())
        .run_tick(one_room(1), &mut sandboxes)
        .unwrap();

    let kept = kept.lock().unwrap();
    assert_eq!(kept.len(), 2);
    let expected = released_reason(1);
    for object in kept.iter() {
        for _ in 0..2 {
            match object.pos() {
                Err(BufferError::Released { reason }) => assert_eq!(&*reason, expected.as_str()),
                other => panic!("expected a released buffer, got {other:?}"),
            }
        }
    }
}
