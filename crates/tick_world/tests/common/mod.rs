#![allow(dead_code)]

use std::sync::Arc;

use tick_world::sandbox::programs::register_builtin_programs;
use tick_world::sandbox::NativeModuleCompiler;
use tick_world::{
    read, CodeCompiler, NewObject, ObjectId, ObjectSpec, ProcessorRegistry, RoomBuilder, RoomPosition,
    RoomState,
};

pub const ROOM: &str = "W1N1";

pub fn pos(x: u8, y: u8) -> RoomPosition {
    RoomPosition::in_room(ROOM, x, y).unwrap()
}

/// Unclaimed room with a controller at (25, 10) and a source at (20, 28).
pub fn seed_room() -> Vec<u8> {
    RoomBuilder::new(ROOM)
        .unwrap()
        .object(NewObject::new(
            ObjectId(1),
            pos(25, 10),
            ObjectSpec::Controller {
                level: 0,
                progress: 0,
                downgrade_time: 0,
            },
        ))
        .unwrap()
        .object(NewObject::new(
            ObjectId(2),
            pos(20, 28),
            ObjectSpec::Source {
                energy: 3000,
                capacity: 3000,
                next_regeneration_time: 0,
            },
        ))
        .unwrap()
        .build()
        .unwrap()
}

pub fn native_compiler(extra: impl FnOnce(&mut NativeModuleCompiler)) -> Arc<CodeCompiler> {
    let mut native = NativeModuleCompiler::new();
    register_builtin_programs(&mut native);
    extra(&mut native);
    Arc::new(CodeCompiler::native_only(native))
}

pub fn hydrate(blob: &[u8]) -> RoomState {
    read(ProcessorRegistry::standard().schema(), blob.to_vec()).unwrap()
}
