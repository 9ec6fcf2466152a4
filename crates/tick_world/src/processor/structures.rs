//! Tick hooks for structures, sources, dropped resources and construction sites.

use super::{ProcessorContext, ProcessorError, ProcessorRegistry, TickOutcome};
use crate::objects::{ObjectKind, ObjectView, ResourceType, StoreSpec, StructureType};
use crate::position::RoomPosition;
use crate::schema::{NewObject, ObjectSpec};

pub(crate) fn register(registry: &mut ProcessorRegistry) {
    registry.register_tick(ObjectKind::ConstructionSite, complete_site);
    registry.register_tick(ObjectKind::Container, decay_container);
    registry.register_tick(ObjectKind::Controller, level_controller);
    registry.register_tick(ObjectKind::Resource, decay_resource);
    registry.register_tick(ObjectKind::Road, decay_road);
    registry.register_tick(ObjectKind::Source, regenerate_source);
}

/// Inserts a freshly built structure.
pub(crate) fn create_structure(
    ctx: &mut ProcessorContext<'_>,
    structure: StructureType,
    pos: RoomPosition,
    owner: Option<&str>,
    name: &str,
) -> Result<ObjectView, ProcessorError> {
    let rules = ctx.rules;
    let time = ctx.time;
    let body = match structure {
        StructureType::Road => ObjectSpec::Road {
            next_decay_time: time + rules.road_decay_time,
        },
        StructureType::Container => ObjectSpec::Container {
            store: StoreSpec::with_capacity(rules.container_capacity),
            next_decay_time: time + rules.container_decay_time,
        },
        StructureType::Spawn => ObjectSpec::Spawn {
            name: name.to_string(),
            store: StoreSpec::with_capacity(rules.spawn_energy_capacity)
                .with(ResourceType::Energy, rules.spawn_energy_start),
        },
        StructureType::Tower => ObjectSpec::Tower {
            store: StoreSpec::with_capacity(rules.tower_capacity),
        },
    };
    // Roads and containers stay unowned.
    let owner = match structure {
        StructureType::Spawn | StructureType::Tower => owner,
        StructureType::Road | StructureType::Container => None,
    };
    let hits = rules.structure_hits(structure);
    ctx.insert(|id| {
        let object = NewObject::new(id, pos, body).with_hits(hits, hits);
        match owner {
            Some(owner) => object.owned_by(owner),
            None => object,
        }
    })
}

fn complete_site(ctx: &mut ProcessorContext<'_>, object: &ObjectView) -> Result<TickOutcome, ProcessorError> {
    let Some(site) = object.as_construction_site() else {
        return Ok(TickOutcome::Continue);
    };
    if site.progress()? < site.progress_total()? {
        return Ok(TickOutcome::Continue);
    }
    let structure = site.structure_type()?;
    let pos = site.pos()?;
    let owner = site.owner()?;
    let name = site.name()?;
    ctx.remove(site.id())?;
    create_structure(ctx, structure, pos, owner.as_deref(), &name)?;
    Ok(TickOutcome::Removed)
}

fn decay_road(ctx: &mut ProcessorContext<'_>, object: &ObjectView) -> Result<TickOutcome, ProcessorError> {
    let Some(road) = object.as_road() else {
        return Ok(TickOutcome::Continue);
    };
    if ctx.time < road.next_decay_time()? {
        return Ok(TickOutcome::Continue);
    }
    let hits = road.hits()? - ctx.rules.road_decay_amount;
    if hits <= 0 {
        ctx.remove(road.id())?;
        return Ok(TickOutcome::Removed);
    }
    road.set_hits(hits)?;
    road.set_next_decay_time(ctx.time + ctx.rules.road_decay_time)?;
    Ok(TickOutcome::Continue)
}

fn decay_container(ctx: &mut ProcessorContext<'_>, object: &ObjectView) -> Result<TickOutcome, ProcessorError> {
    let Some(container) = object.as_container() else {
        return Ok(TickOutcome::Continue);
    };
    if ctx.time < container.next_decay_time()? {
        return Ok(TickOutcome::Continue);
    }
    let hits = container.hits()? - ctx.rules.container_decay;
    if hits <= 0 {
        let pos = container.pos()?;
        for (resource, amount) in container.store().contents()? {
            ctx.drop_resource(pos, resource, amount)?;
        }
        ctx.remove(container.id())?;
        return Ok(TickOutcome::Removed);
    }
    container.set_hits(hits)?;
    container.set_next_decay_time(ctx.time + ctx.rules.container_decay_time)?;
    Ok(TickOutcome::Continue)
}

fn decay_resource(ctx: &mut ProcessorContext<'_>, object: &ObjectView) -> Result<TickOutcome, ProcessorError> {
    let Some(pile) = object.as_resource() else {
        return Ok(TickOutcome::Continue);
    };
    let amount = pile.amount()?;
    let divisor = ctx.rules.energy_decay.max(1);
    let decay = amount / divisor + i32::from(amount % divisor != 0);
    let left = amount - decay;
    if left <= 0 {
        ctx.remove(pile.id())?;
        return Ok(TickOutcome::Removed);
    }
    pile.set_amount(left)?;
    Ok(TickOutcome::Continue)
}

fn regenerate_source(ctx: &mut ProcessorContext<'_>, object: &ObjectView) -> Result<TickOutcome, ProcessorError> {
    let Some(source) = object.as_source() else {
        return Ok(TickOutcome::Continue);
    };
    let next = source.next_regeneration_time()?;
    if next != 0 && ctx.time >= next {
        source.set_energy(source.energy_capacity()?)?;
        source.set_next_regeneration_time(0)?;
    }
    Ok(TickOutcome::Continue)
}

fn level_controller(ctx: &mut ProcessorContext<'_>, object: &ObjectView) -> Result<TickOutcome, ProcessorError> {
    let Some(controller) = object.as_controller() else {
        return Ok(TickOutcome::Continue);
    };
    let mut level = controller.level()?;
    if level <= 0 {
        return Ok(TickOutcome::Continue);
    }
    let mut progress = controller.progress()?;
    let start = level;
    while let Some(needed) = ctx.rules.controller_level_progress(level) {
        if progress < needed {
            break;
        }
        progress -= needed;
        level += 1;
    }
    if level != start {
        controller.set_level(level)?;
        controller.set_progress(progress)?;
        tracing::debug!(room = ctx.room.name(), level, "controller levelled up");
    }
    Ok(TickOutcome::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::GameRules;
    use crate::schema::{read, RoomBuilder, SchemaRegistry};
    use crate::objects::ObjectId;

    fn pos(x: u8, y: u8) -> RoomPosition {
        RoomPosition::in_room("W1N1", x, y).unwrap()
    }

    #[test]
    fn resource_pile_decays_by_ceiling_fraction() {
        let blob = RoomBuilder::new("W1N1")
            .unwrap()
            .object(NewObject::new(
                ObjectId(1),
                pos(2, 2),
                ObjectSpec::Resource {
                    resource: ResourceType::Energy,
                    amount: 1500,
                },
            ))
            .unwrap()
            .build()
            .unwrap();
        let mut room = read(&SchemaRegistry::new(), blob).unwrap();
        let rules = GameRules::default();
        let mut ctx = ProcessorContext::new(&mut room, &rules, 1);
        let pile = ctx.require(ObjectId(1)).unwrap();
        assert_eq!(decay_resource(&mut ctx, &pile).unwrap(), TickOutcome::Continue);
        assert_eq!(pile.as_resource().unwrap().amount().unwrap(), 1498);
    }

    #[test]
    fn finished_site_becomes_its_structure() {
        let blob = RoomBuilder::new("W1N1")
            .unwrap()
            .object(
                NewObject::new(
                    ObjectId(1),
                    pos(4, 4),
                    ObjectSpec::ConstructionSite {
                        structure: StructureType::Spawn,
                        progress: 15_000,
                        progress_total: 15_000,
                        name: "Spawn2".to_string(),
                    },
                )
                .owned_by("amy"),
            )
            .unwrap()
            .build()
            .unwrap();
        let mut room = read(&SchemaRegistry::new(), blob).unwrap();
        let rules = GameRules::default();
        let mut ctx = ProcessorContext::new(&mut room, &rules, 7);
        let site = ctx.require(ObjectId(1)).unwrap();
        assert_eq!(complete_site(&mut ctx, &site).unwrap(), TickOutcome::Removed);

        let spawn = room.objects().find_map(|object| object.as_spawn()).unwrap();
        assert_eq!(spawn.name().unwrap(), "Spawn2");
        assert!(spawn.is_owned_by("amy").unwrap());
        assert_eq!(spawn.hits().unwrap(), rules.spawn_hits);
        assert!(!room.contains(ObjectId(1)));
    }
}
