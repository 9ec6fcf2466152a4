//! `check*` validators.
//!
//! Each validator reads current state and answers whether the matching intent
//! may apply. They never mutate, so participant-facing APIs can run them too.
//! A failed check yields `Ok(Err(code))`; `Err` is reserved for buffer faults.

use super::{Check, ReturnCode};
use crate::buffer::BufferError;
use crate::objects::{BodyPartType, Creep, ObjectKind, ObjectView, ResourceType, Spawn, StructureType};
use crate::position::{Direction, ROOM_SIZE};
use crate::room::RoomState;
use crate::rules::GameRules;

pub const BUILD_RANGE: u32 = 3;
pub const UPGRADE_RANGE: u32 = 3;

macro_rules! ensure {
    ($cond:expr, $code:expr) => {
        if !$cond {
            return Ok(Err($code));
        }
    };
}

fn check_creep_common(creep: &Creep, participant: &str) -> Result<Check, BufferError> {
    ensure!(creep.is_owned_by(participant)?, ReturnCode::NotOwner);
    Ok(Ok(()))
}

fn in_range(a: &ObjectView, b: &ObjectView, range: u32) -> Result<bool, BufferError> {
    Ok(a.pos()?.range_to(&b.pos()?) <= range)
}

pub fn check_build(creep: &Creep, participant: &str, target: Option<&ObjectView>) -> Result<Check, BufferError> {
    if let Err(code) = check_creep_common(creep, participant)? {
        return Ok(Err(code));
    }
    ensure!(creep.active_parts(BodyPartType::Work)? > 0, ReturnCode::NoBodypart);
    ensure!(creep.store().get(ResourceType::Energy)? > 0, ReturnCode::NotEnoughResources);
    let Some(site) = target.and_then(ObjectView::as_construction_site) else {
        return Ok(Err(ReturnCode::InvalidTarget));
    };
    ensure!(in_range(creep, &site, BUILD_RANGE)?, ReturnCode::NotInRange);
    Ok(Ok(()))
}

pub fn check_harvest(creep: &Creep, participant: &str, target: Option<&ObjectView>) -> Result<Check, BufferError> {
    if let Err(code) = check_creep_common(creep, participant)? {
        return Ok(Err(code));
    }
    ensure!(creep.active_parts(BodyPartType::Work)? > 0, ReturnCode::NoBodypart);
    let Some(source) = target.and_then(ObjectView::as_source) else {
        return Ok(Err(ReturnCode::InvalidTarget));
    };
    ensure!(source.energy()? > 0, ReturnCode::NotEnoughResources);
    ensure!(in_range(creep, &source, 1)?, ReturnCode::NotInRange);
    Ok(Ok(()))
}

pub fn check_move(creep: &Creep, participant: &str, direction: Direction) -> Result<Check, BufferError> {
    if let Err(code) = check_creep_common(creep, participant)? {
        return Ok(Err(code));
    }
    ensure!(creep.fatigue()? <= 0, ReturnCode::Tired);
    ensure!(creep.active_parts(BodyPartType::Move)? > 0, ReturnCode::NoBodypart);
    ensure!(creep.pos()?.step(direction).is_some(), ReturnCode::InvalidArgs);
    Ok(Ok(()))
}

pub fn check_pickup(creep: &Creep, participant: &str, target: Option<&ObjectView>) -> Result<Check, BufferError> {
    if let Err(code) = check_creep_common(creep, participant)? {
        return Ok(Err(code));
    }
    let Some(pile) = target.and_then(ObjectView::as_resource) else {
        return Ok(Err(ReturnCode::InvalidTarget));
    };
    ensure!(
        creep.store().free_capacity(pile.resource_type()?)? > 0,
        ReturnCode::Full
    );
    ensure!(in_range(creep, &pile, 1)?, ReturnCode::NotInRange);
    Ok(Ok(()))
}

pub fn check_drop(
    creep: &Creep,
    participant: &str,
    resource: ResourceType,
    amount: Option<i32>,
) -> Result<Check, BufferError> {
    if let Err(code) = check_creep_common(creep, participant)? {
        return Ok(Err(code));
    }
    ensure!(amount.map_or(true, |amount| amount > 0), ReturnCode::InvalidArgs);
    let held = creep.store().get(resource)?;
    ensure!(held > 0, ReturnCode::NotEnoughResources);
    ensure!(amount.map_or(true, |amount| amount <= held), ReturnCode::NotEnoughResources);
    Ok(Ok(()))
}

pub fn check_transfer(
    creep: &Creep,
    participant: &str,
    target: Option<&ObjectView>,
    resource: ResourceType,
    amount: Option<i32>,
) -> Result<Check, BufferError> {
    if let Err(code) = check_creep_common(creep, participant)? {
        return Ok(Err(code));
    }
    ensure!(amount.map_or(true, |amount| amount >= 0), ReturnCode::InvalidArgs);
    let Some(target) = target.filter(|target| target.id() != creep.id()) else {
        return Ok(Err(ReturnCode::InvalidTarget));
    };
    let Some(store) = target.store() else {
        return Ok(Err(ReturnCode::InvalidTarget));
    };
    ensure!(store.accepts(resource), ReturnCode::InvalidTarget);
    ensure!(in_range(creep, target, 1)?, ReturnCode::NotInRange);
    let held = creep.store().get(resource)?;
    ensure!(held > 0, ReturnCode::NotEnoughResources);
    ensure!(amount.map_or(true, |amount| amount <= held), ReturnCode::NotEnoughResources);
    let free = store.free_capacity(resource)?;
    ensure!(free > 0, ReturnCode::Full);
    ensure!(amount.map_or(true, |amount| amount <= free), ReturnCode::Full);
    Ok(Ok(()))
}

pub fn check_withdraw(
    creep: &Creep,
    participant: &str,
    target: Option<&ObjectView>,
    resource: ResourceType,
    amount: Option<i32>,
) -> Result<Check, BufferError> {
    if let Err(code) = check_creep_common(creep, participant)? {
        return Ok(Err(code));
    }
    ensure!(amount.map_or(true, |amount| amount >= 0), ReturnCode::InvalidArgs);
    let Some(target) = target.filter(|target| target.kind().is_structure()) else {
        return Ok(Err(ReturnCode::InvalidTarget));
    };
    let Some(store) = target.store() else {
        return Ok(Err(ReturnCode::InvalidTarget));
    };
    if let Some(owner) = target.owner()? {
        ensure!(owner == participant, ReturnCode::NotOwner);
    }
    ensure!(in_range(creep, target, 1)?, ReturnCode::NotInRange);
    let available = store.get(resource)?;
    ensure!(available > 0, ReturnCode::NotEnoughResources);
    ensure!(amount.map_or(true, |amount| amount <= available), ReturnCode::NotEnoughResources);
    let free = creep.store().free_capacity(resource)?;
    ensure!(free > 0, ReturnCode::Full);
    ensure!(amount.map_or(true, |amount| amount <= free), ReturnCode::Full);
    Ok(Ok(()))
}

pub fn check_upgrade_controller(
    creep: &Creep,
    participant: &str,
    target: Option<&ObjectView>,
) -> Result<Check, BufferError> {
    if let Err(code) = check_creep_common(creep, participant)? {
        return Ok(Err(code));
    }
    ensure!(creep.active_parts(BodyPartType::Work)? > 0, ReturnCode::NoBodypart);
    ensure!(creep.store().get(ResourceType::Energy)? > 0, ReturnCode::NotEnoughResources);
    let Some(controller) = target.and_then(ObjectView::as_controller) else {
        return Ok(Err(ReturnCode::InvalidTarget));
    };
    ensure!(controller.is_owned_by(participant)?, ReturnCode::NotOwner);
    ensure!(in_range(creep, &controller, UPGRADE_RANGE)?, ReturnCode::NotInRange);
    Ok(Ok(()))
}

pub fn check_spawn_creep(
    spawn: &Spawn,
    participant: &str,
    room: &RoomState,
    body: &[BodyPartType],
    name: &str,
    rules: &GameRules,
) -> Result<Check, BufferError> {
    ensure!(spawn.is_owned_by(participant)?, ReturnCode::NotOwner);
    ensure!(
        !body.is_empty() && body.len() <= rules.max_creep_size,
        ReturnCode::InvalidArgs
    );
    ensure!(!name.is_empty(), ReturnCode::InvalidArgs);
    for object in room.objects() {
        if let Some(creep) = object.as_creep() {
            ensure!(creep.name()? != name, ReturnCode::NameExists);
        }
    }
    let cost: i32 = body.iter().map(|part| part.cost()).sum();
    ensure!(
        spawn.store().get(ResourceType::Energy)? >= cost,
        ReturnCode::NotEnoughResources
    );
    Ok(Ok(()))
}

pub fn check_create_construction_site(
    room: &RoomState,
    participant: &str,
    x: u8,
    y: u8,
    structure: StructureType,
    rules: &GameRules,
) -> Result<Check, BufferError> {
    ensure!(room.owner() == Some(participant), ReturnCode::NotOwner);
    ensure!(x < ROOM_SIZE && y < ROOM_SIZE, ReturnCode::InvalidArgs);
    ensure!(room.terrain().is_walkable(x, y), ReturnCode::InvalidTarget);
    let mut sites = 0usize;
    for object in room.objects() {
        if object.kind() == ObjectKind::ConstructionSite {
            sites += 1;
        }
        let pos = object.pos()?;
        if pos.x() != x || pos.y() != y {
            continue;
        }
        ensure!(object.kind() != ObjectKind::ConstructionSite, ReturnCode::InvalidTarget);
        ensure!(object.kind() != structure.to_kind(), ReturnCode::InvalidTarget);
        if structure != StructureType::Road {
            ensure!(!object.kind().is_obstacle(), ReturnCode::InvalidTarget);
        }
    }
    ensure!(sites < rules.max_construction_sites, ReturnCode::Full);
    Ok(Ok(()))
}

pub fn check_place_spawn(room: &RoomState, x: u8, y: u8, name: &str) -> Result<Check, BufferError> {
    ensure!(room.owner().is_none(), ReturnCode::InvalidTarget);
    ensure!(x < ROOM_SIZE && y < ROOM_SIZE, ReturnCode::InvalidArgs);
    ensure!(!name.is_empty(), ReturnCode::InvalidArgs);
    ensure!(room.terrain().is_walkable(x, y), ReturnCode::InvalidTarget);
    ensure!(
        room.objects().any(|object| object.kind() == ObjectKind::Controller),
        ReturnCode::InvalidTarget
    );
    Ok(Ok(()))
}
