//! Built-in native programs.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tick_world_abi::{ModuleExports, LOOP_EXPORT};

use super::native::{NativeApi, NativeModule, NativeModuleCompiler, ScriptError};
use crate::objects::{BodyPartType, Creep, ObjectView, ResourceType};
use crate::position::RoomPosition;
use crate::processor::checks::UPGRADE_RANGE;

pub const HARVESTER_PROGRAM: &str = "harvester";

const HARVESTER_BODY: [BodyPartType; 3] = [BodyPartType::Work, BodyPartType::Carry, BodyPartType::Move];
const HARVESTER_COST: i32 = 200;

/// Registers every built-in program.
pub fn register_builtin_programs(compiler: &mut NativeModuleCompiler) {
    compiler.register(HARVESTER_PROGRAM, HarvesterProgram::default);
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarvesterMemory {
    #[serde(default)]
    spawned: u64,
    #[serde(default)]
    last_tick: u64,
}

/// Keeps a small crew of harvesters alive: mine the nearest source, refill the
/// spawn and feed the controller once the spawn is full.
#[derive(Debug, Default)]
pub struct HarvesterProgram {
    pub target_creeps: usize,
    ticks: u64,
}

impl HarvesterProgram {
    fn target(&self) -> usize {
        if self.target_creeps == 0 {
            2
        } else {
            self.target_creeps
        }
    }

    fn load_memory(api: &NativeApi<'_>) -> HarvesterMemory {
        serde_json::from_slice(&api.memory()).unwrap_or_default()
    }

    fn spawn_if_short(&self, api: &NativeApi<'_>, memory: &mut HarvesterMemory, creeps: usize) -> Result<(), ScriptError> {
        if creeps >= self.target() {
            return Ok(());
        }
        for room in api.rooms() {
            for object in room.objects() {
                let Some(spawn) = object.as_spawn() else {
                    continue;
                };
                if !spawn.is_owned_by(api.participant())? {
                    continue;
                }
                if spawn.store().get(ResourceType::Energy)? < HARVESTER_COST {
                    continue;
                }
                let name = format!("harvester{}", memory.spawned);
                memory.spawned += 1;
                api.object_intent(
                    spawn.id(),
                    "spawnCreep",
                    json!({ "body": HARVESTER_BODY, "name": name }),
                )?;
                return Ok(());
            }
        }
        Ok(())
    }

    fn work(&self, api: &NativeApi<'_>, creep: &Creep) -> Result<(), ScriptError> {
        let pos = creep.pos()?;
        let Some(room) = api.room(&pos.room_name()) else {
            return Ok(());
        };
        let store = creep.store();
        if store.free_capacity(ResourceType::Energy)? > 0 {
            let mut best: Option<(u32, &ObjectView)> = None;
            for object in room.objects() {
                if let Some(source) = object.as_source() {
                    if source.energy()? > 0 {
                        let range = pos.range_to(&source.pos()?);
                        if best.map_or(true, |(closest, _)| range < closest) {
                            best = Some((range, object));
                        }
                    }
                }
            }
            return match best {
                Some((range, source)) if range <= 1 => {
                    api.object_intent(creep.id(), "harvest", json!({ "id": source.id() }))
                }
                Some((_, source)) => step_toward(api, creep, pos, source.pos()?),
                None => Ok(()),
            };
        }

        for object in room.objects() {
            if let Some(spawn) = object.as_spawn() {
                if spawn.is_owned_by(api.participant())?
                    && spawn.store().free_capacity(ResourceType::Energy)? > 0
                {
                    let target = spawn.pos()?;
                    if pos.is_near_to(&target) {
                        return api.object_intent(
                            creep.id(),
                            "transfer",
                            json!({ "id": spawn.id(), "resourceType": ResourceType::Energy }),
                        );
                    }
                    return step_toward(api, creep, pos, target);
                }
            }
        }

        for object in room.objects() {
            if let Some(controller) = object.as_controller() {
                if controller.is_owned_by(api.participant())? {
                    let target = controller.pos()?;
                    if pos.range_to(&target) <= UPGRADE_RANGE {
                        return api.object_intent(
                            creep.id(),
                            "upgradeController",
                            json!({ "id": controller.id() }),
                        );
                    }
                    return step_toward(api, creep, pos, target);
                }
            }
        }
        Ok(())
    }
}

fn step_toward(api: &NativeApi<'_>, creep: &Creep, from: RoomPosition, to: RoomPosition) -> Result<(), ScriptError> {
    match from.direction_to(&to) {
        Some(direction) => api.object_intent(creep.id(), "move", json!({ "direction": direction })),
        None => Ok(()),
    }
}

impl NativeModule for HarvesterProgram {
    fn body(&mut self, _api: &NativeApi<'_>) -> Result<ModuleExports, ScriptError> {
        Ok(ModuleExports::from_iter([LOOP_EXPORT]))
    }

    fn call(&mut self, export: &str, api: &NativeApi<'_>) -> Result<(), ScriptError> {
        if export != LOOP_EXPORT {
            return Err(ScriptError::thrown(format!("{export} is not a function")));
        }
        self.ticks += 1;
        let mut memory = Self::load_memory(api);
        let creeps = api.my_creeps()?;
        self.spawn_if_short(api, &mut memory, creeps.len())?;
        for creep in &creeps {
            self.work(api, creep)?;
        }
        memory.last_tick = api.time();
        let bytes = serde_json::to_vec(&memory).map_err(|err| ScriptError::thrown(err.to_string()))?;
        api.set_memory(bytes)
    }

    fn evaluate(&mut self, expression: &str, api: &NativeApi<'_>) -> Result<String, ScriptError> {
        match expression.trim() {
            "creeps" => Ok(api.my_creeps()?.len().to_string()),
            "time" => Ok(api.time().to_string()),
            "ticks" => Ok(self.ticks.to_string()),
            other => Err(ScriptError::thrown(format!("ReferenceError: {other} is not defined"))),
        }
    }
}
