//! `spawnCreep`.

use serde::Deserialize;

use super::checks;
use super::{IntentOutcome, ProcessorContext, ProcessorError, ProcessorRegistry, ReturnCode};
use crate::objects::{BodyPart, BodyPartType, ObjectKind, ObjectView, ResourceType, StoreSpec, CARRY_CAPACITY};
use crate::position::{Direction, RoomPosition};
use crate::schema::{NewObject, ObjectSpec};

#[derive(Debug, Clone, Deserialize)]
pub struct SpawnCreepParams {
    pub body: Vec<BodyPartType>,
    pub name: String,
}

pub(crate) fn register(registry: &mut ProcessorRegistry) {
    registry.register_intent(ObjectKind::Spawn, "spawnCreep", spawn_creep);
}

/// First adjacent tile, clockwise from the top, a new creep can stand on.
pub(crate) fn free_adjacent_tile(
    ctx: &ProcessorContext<'_>,
    origin: RoomPosition,
) -> Result<Option<RoomPosition>, ProcessorError> {
    for direction in Direction::ALL {
        let Some(candidate) = origin.step(direction) else {
            continue;
        };
        if !ctx.room.terrain().is_walkable(candidate.x(), candidate.y()) {
            continue;
        }
        let occupied = ctx
            .room
            .objects_at(candidate.x(), candidate.y())?
            .iter()
            .any(|object| object.kind() == ObjectKind::Creep || object.kind().is_obstacle());
        if !occupied {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

fn spawn_creep(
    ctx: &mut ProcessorContext<'_>,
    object: &ObjectView,
    participant: &str,
    params: SpawnCreepParams,
) -> Result<IntentOutcome, ProcessorError> {
    let Some(spawn) = object.as_spawn() else {
        return Err(ctx.invariant(format!("{} {} dispatched as spawn", object.kind(), object.id())));
    };
    if let Err(code) =
        checks::check_spawn_creep(&spawn, participant, &*ctx.room, &params.body, &params.name, ctx.rules)?
    {
        return Ok(IntentOutcome::Rejected(code));
    }
    let Some(pos) = free_adjacent_tile(ctx, spawn.pos()?)? else {
        return Ok(IntentOutcome::Rejected(ReturnCode::Busy));
    };

    let cost: i32 = params.body.iter().map(|part| part.cost()).sum();
    spawn.store().subtract(ResourceType::Energy, cost)?;

    let carry_parts = params
        .body
        .iter()
        .filter(|part| **part == BodyPartType::Carry)
        .count() as i32;
    let body: Vec<BodyPart> = params.body.iter().copied().map(BodyPart::new).collect();
    let age_time = ctx.time + ctx.rules.creep_life_time;
    let creep = ctx.insert(|id| {
        let mut creep = NewObject::creep(
            id,
            pos,
            participant,
            &params.name,
            body,
            StoreSpec::with_capacity(carry_parts * CARRY_CAPACITY),
        );
        if let ObjectSpec::Creep { age_time: slot, .. } = &mut creep.body {
            *slot = age_time;
        }
        creep
    })?;
    tracing::debug!(
        room = ctx.room.name(),
        creep = %creep.id(),
        name = %params.name,
        "creep spawned"
    );
    Ok(IntentOutcome::Applied)
}
