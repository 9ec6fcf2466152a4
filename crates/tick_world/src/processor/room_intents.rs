//! Room-level verbs that are not tied to an existing object.

use serde::Deserialize;

use super::checks;
use super::{IntentOutcome, ProcessorContext, ProcessorError, ProcessorRegistry, ReturnCode, RoomIntentOptions};
use crate::objects::StructureType;
use crate::position::RoomPosition;
use crate::schema::{NewObject, ObjectSpec};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConstructionSiteParams {
    pub x: u8,
    pub y: u8,
    pub structure_type: StructureType,
    #[serde(default)]
    pub name: Option<String>,
}

pub(crate) fn register(registry: &mut ProcessorRegistry) {
    registry.register_room_intent(
        "createConstructionSite",
        RoomIntentOptions::default(),
        create_construction_site,
    );
}

fn create_construction_site(
    ctx: &mut ProcessorContext<'_>,
    participant: &str,
    params: CreateConstructionSiteParams,
) -> Result<IntentOutcome, ProcessorError> {
    if let Err(code) = checks::check_create_construction_site(
        &*ctx.room,
        participant,
        params.x,
        params.y,
        params.structure_type,
        ctx.rules,
    )? {
        return Ok(IntentOutcome::Rejected(code));
    }
    let name = params.name.unwrap_or_default();
    // A spawn keeps the site's name once built.
    if params.structure_type == StructureType::Spawn && name.is_empty() {
        return Ok(IntentOutcome::Rejected(ReturnCode::InvalidArgs));
    }
    let Ok(pos) = RoomPosition::new(ctx.room.coord(), params.x, params.y) else {
        return Ok(IntentOutcome::Rejected(ReturnCode::InvalidArgs));
    };
    let progress_total = ctx.rules.construction_cost(params.structure_type);
    let structure = params.structure_type;
    let site = ctx.insert(|id| {
        NewObject::new(
            id,
            pos,
            ObjectSpec::ConstructionSite {
                structure,
                progress: 0,
                progress_total,
                name,
            },
        )
        .owned_by(participant)
    })?;
    tracing::debug!(
        room = ctx.room.name(),
        site = %site.id(),
        structure = ?structure,
        "construction site placed"
    );
    Ok(IntentOutcome::Applied)
}
