//! Creep intents and the creep pre-tick and tick hooks.

use serde::Deserialize;

use super::checks;
use super::{IntentOutcome, ProcessorContext, ProcessorError, ProcessorRegistry, TickOutcome};
use crate::objects::{ActionKind, BodyPartType, Creep, ObjectId, ObjectKind, ObjectView, ResourceType};
use crate::position::Direction;
use crate::terrain::TerrainType;

#[derive(Debug, Clone, Deserialize)]
pub struct TargetParams {
    pub id: ObjectId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveParams {
    pub direction: Direction,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropParams {
    pub resource_type: ResourceType,
    #[serde(default)]
    pub amount: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferParams {
    pub id: ObjectId,
    pub resource_type: ResourceType,
    #[serde(default)]
    pub amount: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoParams {}

pub const MOVE_POWER: i32 = 2;

pub(crate) fn register(registry: &mut ProcessorRegistry) {
    registry.register_intent(ObjectKind::Creep, "build", build);
    registry.register_intent(ObjectKind::Creep, "drop", drop_carried);
    registry.register_intent(ObjectKind::Creep, "harvest", harvest);
    registry.register_intent(ObjectKind::Creep, "move", move_creep);
    registry.register_intent(ObjectKind::Creep, "pickup", pickup);
    registry.register_intent(ObjectKind::Creep, "suicide", suicide);
    registry.register_intent(ObjectKind::Creep, "transfer", transfer);
    registry.register_intent(ObjectKind::Creep, "upgradeController", upgrade_controller);
    registry.register_intent(ObjectKind::Creep, "withdraw", withdraw);

    registry.register_pre_tick(ObjectKind::Creep, |ctx, object| {
        Ok(as_creep(ctx, object)?.clear_actions()?)
    });
    registry.register_tick(ObjectKind::Creep, tick);
}

fn as_creep(ctx: &ProcessorContext<'_>, object: &ObjectView) -> Result<Creep, ProcessorError> {
    object
        .as_creep()
        .ok_or_else(|| ctx.invariant(format!("{} {} dispatched as creep", object.kind(), object.id())))
}

fn build(
    ctx: &mut ProcessorContext<'_>,
    object: &ObjectView,
    participant: &str,
    params: TargetParams,
) -> Result<IntentOutcome, ProcessorError> {
    let creep = as_creep(ctx, object)?;
    let target = ctx.find(params.id);
    if let Err(code) = checks::check_build(&creep, participant, target.as_ref())? {
        return Ok(IntentOutcome::Rejected(code));
    }
    let Some(site) = target.as_ref().and_then(ObjectView::as_construction_site) else {
        return Err(ctx.invariant("build target vanished after its check"));
    };
    let power = creep.power(BodyPartType::Work, ctx.rules.build_power)?;
    let store = creep.store();
    let energy = (site.progress_total()? - site.progress()?)
        .min(store.get(ResourceType::Energy)?)
        .min(power);
    if energy > 0 {
        store.subtract(ResourceType::Energy, energy)?;
        site.set_progress(site.progress()? + energy)?;
        creep.push_action(ActionKind::Build, site.pos()?)?;
    }
    Ok(IntentOutcome::Applied)
}

fn harvest(
    ctx: &mut ProcessorContext<'_>,
    object: &ObjectView,
    participant: &str,
    params: TargetParams,
) -> Result<IntentOutcome, ProcessorError> {
    let creep = as_creep(ctx, object)?;
    let target = ctx.find(params.id);
    if let Err(code) = checks::check_harvest(&creep, participant, target.as_ref())? {
        return Ok(IntentOutcome::Rejected(code));
    }
    let Some(source) = target.as_ref().and_then(ObjectView::as_source) else {
        return Err(ctx.invariant("harvest target vanished after its check"));
    };
    let amount = creep
        .power(BodyPartType::Work, ctx.rules.harvest_power)?
        .min(source.energy()?);
    source.set_energy(source.energy()? - amount)?;
    if source.next_regeneration_time()? == 0 {
        source.set_next_regeneration_time(ctx.time + ctx.rules.energy_regen_time)?;
    }

    let store = creep.store();
    let kept = amount.min(store.free_capacity(ResourceType::Energy)?);
    store.add(ResourceType::Energy, kept)?;
    ctx.drop_resource(creep.pos()?, ResourceType::Energy, amount - kept)?;

    let harvested = ctx.room.cumulative_energy_harvested() + i64::from(amount);
    ctx.room.set_cumulative_energy_harvested(harvested);
    creep.push_action(ActionKind::Harvest, source.pos()?)?;
    Ok(IntentOutcome::Applied)
}

fn move_creep(
    ctx: &mut ProcessorContext<'_>,
    object: &ObjectView,
    participant: &str,
    params: MoveParams,
) -> Result<IntentOutcome, ProcessorError> {
    let creep = as_creep(ctx, object)?;
    if let Err(code) = checks::check_move(&creep, participant, params.direction)? {
        return Ok(IntentOutcome::Rejected(code));
    }
    if let Some(destination) = creep.pos()?.step(params.direction) {
        ctx.movement.add(creep.id(), destination);
    }
    Ok(IntentOutcome::Applied)
}

fn pickup(
    ctx: &mut ProcessorContext<'_>,
    object: &ObjectView,
    participant: &str,
    params: TargetParams,
) -> Result<IntentOutcome, ProcessorError> {
    let creep = as_creep(ctx, object)?;
    let target = ctx.find(params.id);
    if let Err(code) = checks::check_pickup(&creep, participant, target.as_ref())? {
        return Ok(IntentOutcome::Rejected(code));
    }
    let Some(pile) = target.as_ref().and_then(ObjectView::as_resource) else {
        return Err(ctx.invariant("pickup target vanished after its check"));
    };
    let resource = pile.resource_type()?;
    let store = creep.store();
    let amount = store.free_capacity(resource)?.min(pile.amount()?);
    store.add(resource, amount)?;
    let left = pile.amount()? - amount;
    pile.set_amount(left)?;
    if left <= 0 {
        ctx.remove(pile.id())?;
    }
    Ok(IntentOutcome::Applied)
}

fn drop_carried(
    ctx: &mut ProcessorContext<'_>,
    object: &ObjectView,
    participant: &str,
    params: DropParams,
) -> Result<IntentOutcome, ProcessorError> {
    let creep = as_creep(ctx, object)?;
    if let Err(code) = checks::check_drop(&creep, participant, params.resource_type, params.amount)? {
        return Ok(IntentOutcome::Rejected(code));
    }
    let store = creep.store();
    let amount = params
        .amount
        .unwrap_or(store.get(params.resource_type)?);
    store.subtract(params.resource_type, amount)?;
    ctx.drop_resource(creep.pos()?, params.resource_type, amount)?;
    Ok(IntentOutcome::Applied)
}

fn suicide(
    ctx: &mut ProcessorContext<'_>,
    object: &ObjectView,
    participant: &str,
    _params: NoParams,
) -> Result<IntentOutcome, ProcessorError> {
    let creep = as_creep(ctx, object)?;
    if !creep.is_owned_by(participant)? {
        return Ok(IntentOutcome::Rejected(super::ReturnCode::NotOwner));
    }
    ctx.remove(creep.id())?;
    Ok(IntentOutcome::Applied)
}

fn transfer(
    ctx: &mut ProcessorContext<'_>,
    object: &ObjectView,
    participant: &str,
    params: TransferParams,
) -> Result<IntentOutcome, ProcessorError> {
    let creep = as_creep(ctx, object)?;
    let target = ctx.find(params.id);
    let resource = params.resource_type;
    if let Err(code) = checks::check_transfer(&creep, participant, target.as_ref(), resource, params.amount)? {
        return Ok(IntentOutcome::Rejected(code));
    }
    let Some(target_store) = target.as_ref().and_then(ObjectView::store) else {
        return Err(ctx.invariant("transfer target lost its store after its check"));
    };
    let store = creep.store();
    let amount = params
        .amount
        .unwrap_or(i32::MAX)
        .min(store.get(resource)?)
        .min(target_store.free_capacity(resource)?);
    store.subtract(resource, amount)?;
    target_store.add(resource, amount)?;
    Ok(IntentOutcome::Applied)
}

fn upgrade_controller(
    ctx: &mut ProcessorContext<'_>,
    object: &ObjectView,
    participant: &str,
    params: TargetParams,
) -> Result<IntentOutcome, ProcessorError> {
    let creep = as_creep(ctx, object)?;
    let target = ctx.find(params.id);
    if let Err(code) = checks::check_upgrade_controller(&creep, participant, target.as_ref())? {
        return Ok(IntentOutcome::Rejected(code));
    }
    let Some(controller) = target.as_ref().and_then(ObjectView::as_controller) else {
        return Err(ctx.invariant("upgrade target vanished after its check"));
    };
    let store = creep.store();
    let energy = creep
        .power(BodyPartType::Work, ctx.rules.upgrade_controller_power)?
        .min(store.get(ResourceType::Energy)?);
    store.subtract(ResourceType::Energy, energy)?;
    controller.set_progress(controller.progress()? + energy)?;
    controller.set_downgrade_time(ctx.time + ctx.rules.controller_downgrade_time)?;
    creep.push_action(ActionKind::UpgradeController, controller.pos()?)?;
    Ok(IntentOutcome::Applied)
}

fn withdraw(
    ctx: &mut ProcessorContext<'_>,
    object: &ObjectView,
    participant: &str,
    params: TransferParams,
) -> Result<IntentOutcome, ProcessorError> {
    let creep = as_creep(ctx, object)?;
    let target = ctx.find(params.id);
    let resource = params.resource_type;
    if let Err(code) = checks::check_withdraw(&creep, participant, target.as_ref(), resource, params.amount)? {
        return Ok(IntentOutcome::Rejected(code));
    }
    let Some(target_store) = target.as_ref().and_then(ObjectView::store) else {
        return Err(ctx.invariant("withdraw target lost its store after its check"));
    };
    let store = creep.store();
    let amount = params
        .amount
        .unwrap_or(i32::MAX)
        .min(store.free_capacity(resource)?)
        .min(target_store.get(resource)?);
    target_store.subtract(resource, amount)?;
    store.add(resource, amount)?;
    Ok(IntentOutcome::Applied)
}

fn tick(ctx: &mut ProcessorContext<'_>, object: &ObjectView) -> Result<TickOutcome, ProcessorError> {
    let creep = as_creep(ctx, object)?;
    let age_time = creep.age_time()?;
    if (age_time != 0 && ctx.time >= age_time) || creep.hits()? <= 0 {
        let pos = creep.pos()?;
        for (resource, amount) in creep.store().contents()? {
            ctx.drop_resource(pos, resource, amount)?;
        }
        ctx.remove(creep.id())?;
        return Ok(TickOutcome::Removed);
    }
    if creep.hits()? > creep.hits_max()? {
        creep.set_hits(creep.hits_max()?)?;
    }

    let move_power = creep.power(BodyPartType::Move, MOVE_POWER)?;
    if let Some(destination) = ctx.movement.get(creep.id()) {
        creep.set_pos(destination)?;
        let mut road = None;
        for candidate in ctx.room.objects_at(destination.x(), destination.y())? {
            if let Some(found) = candidate.as_road() {
                road = Some(found);
                break;
            }
        }
        let base = match road {
            Some(road) => {
                let wearout = ctx.rules.road_wearout * creep.body()?.len() as u64;
                road.set_next_decay_time(road.next_decay_time()?.saturating_sub(wearout))?;
                1
            }
            None => match ctx.room.terrain().get(destination.x(), destination.y()) {
                TerrainType::Swamp => 10,
                _ => 2,
            },
        };
        creep.set_fatigue((creep.weight()? * base - move_power).max(0))?;
    } else {
        let fatigue = creep.fatigue()?;
        if fatigue > 0 {
            creep.set_fatigue(fatigue - fatigue.min(move_power))?;
        }
    }
    Ok(TickOutcome::Continue)
}
