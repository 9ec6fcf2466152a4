//! Auto-spawn add-on.
//!
//! Registers the `autoSpawn` room field, the host-only `placeSpawn` room verb
//! and two pre-tick hooks. A room claimed with the spawn name `auto` turns the
//! participant's first spawn construction site into a finished spawn.

use serde::Deserialize;

use super::checks;
use super::structures::create_structure;
use super::{IntentOutcome, ProcessorContext, ProcessorError, ProcessorRegistry, RoomIntentOptions};
use crate::objects::{ObjectKind, ObjectView, StructureType};
use crate::position::RoomPosition;
use crate::schema::ExtensionValue;

pub const AUTO_SPAWN_FIELD: &str = "autoSpawn";
pub const AUTO_SPAWN_NAME: &str = "auto";

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceSpawnParams {
    pub x: u8,
    pub y: u8,
    pub name: String,
}

pub(crate) fn register(registry: &mut ProcessorRegistry) {
    registry
        .schema_mut()
        .register_room_field(AUTO_SPAWN_FIELD, ExtensionValue::Bool(false));
    registry.register_room_intent(
        "placeSpawn",
        RoomIntentOptions {
            before: Some("createConstructionSite".to_string()),
            internal: true,
        },
        place_spawn,
    );
    registry.register_pre_tick(ObjectKind::Controller, reset_lost_room);
    registry.register_pre_tick(ObjectKind::ConstructionSite, finish_spawn_site);
}

fn auto_spawn_enabled(ctx: &ProcessorContext<'_>) -> bool {
    ctx.room
        .extension(AUTO_SPAWN_FIELD)
        .and_then(ExtensionValue::as_bool)
        .unwrap_or(false)
}

fn set_auto_spawn(ctx: &mut ProcessorContext<'_>, enabled: bool) {
    ctx.room.set_extension(AUTO_SPAWN_FIELD, ExtensionValue::Bool(enabled));
    ctx.did_update();
}

fn reset_lost_room(ctx: &mut ProcessorContext<'_>, object: &ObjectView) -> Result<(), ProcessorError> {
    let Some(controller) = object.as_controller() else {
        return Ok(());
    };
    if controller.level()? == 0 && auto_spawn_enabled(ctx) {
        set_auto_spawn(ctx, false);
    }
    Ok(())
}

fn finish_spawn_site(ctx: &mut ProcessorContext<'_>, object: &ObjectView) -> Result<(), ProcessorError> {
    let Some(site) = object.as_construction_site() else {
        return Ok(());
    };
    if site.structure_type()? != StructureType::Spawn || !auto_spawn_enabled(ctx) {
        return Ok(());
    }
    let pos = site.pos()?;
    let owner = site.owner()?;
    let name = site.name()?;
    ctx.remove(site.id())?;
    let spawn = create_structure(ctx, StructureType::Spawn, pos, owner.as_deref(), &name)?;
    set_auto_spawn(ctx, false);
    tracing::info!(room = ctx.room.name(), spawn = %spawn.id(), %name, "auto-spawn site completed");
    Ok(())
}

fn place_spawn(
    ctx: &mut ProcessorContext<'_>,
    participant: &str,
    params: PlaceSpawnParams,
) -> Result<IntentOutcome, ProcessorError> {
    if let Err(code) = checks::check_place_spawn(&*ctx.room, params.x, params.y, &params.name)? {
        return Ok(IntentOutcome::Rejected(code));
    }

    let mut cleared = Vec::new();
    for object in ctx.room.objects() {
        if object.kind() == ObjectKind::Controller {
            continue;
        }
        if object.owner()?.is_some() || object.hits()? > 0 {
            cleared.push(object.id());
        }
    }
    for id in cleared {
        ctx.remove(id)?;
    }

    let controller = ctx
        .room
        .objects()
        .find_map(ObjectView::as_controller)
        .ok_or_else(|| ctx.invariant("placeSpawn passed its check without a controller"))?;
    controller.set_owner(Some(participant))?;
    controller.set_level(1)?;
    controller.set_progress(0)?;
    controller.set_downgrade_time(ctx.time + ctx.rules.controller_downgrade_time)?;
    ctx.room.set_owner(Some(participant.to_string()));

    if params.name == AUTO_SPAWN_NAME {
        set_auto_spawn(ctx, true);
    } else {
        let pos = RoomPosition::new(ctx.room.coord(), params.x, params.y)
            .map_err(|err| ctx.invariant(format!("placeSpawn position: {err}")))?;
        create_structure(ctx, StructureType::Spawn, pos, Some(participant), &params.name)?;
    }

    ctx.room.set_cumulative_energy_harvested(0);
    ctx.room.set_safe_mode_until(ctx.time + ctx.rules.safe_mode_duration);
    ctx.did_update();
    tracing::info!(room = ctx.room.name(), participant, name = %params.name, "room claimed");
    Ok(IntentOutcome::Applied)
}
