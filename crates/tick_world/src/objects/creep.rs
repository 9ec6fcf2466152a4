use serde::{Deserialize, Serialize};

use super::Store;
use crate::buffer::BufferError;
use crate::position::RoomPosition;
use crate::schema::layout;

pub const BODYPART_HITS: i32 = 100;
pub const CARRY_CAPACITY: i32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyPartType {
    Move,
    Work,
    Carry,
    Attack,
    RangedAttack,
    Heal,
    Claim,
    Tough,
}

impl BodyPartType {
    pub const ALL: [BodyPartType; 8] = [
        BodyPartType::Move,
        BodyPartType::Work,
        BodyPartType::Carry,
        BodyPartType::Attack,
        BodyPartType::RangedAttack,
        BodyPartType::Heal,
        BodyPartType::Claim,
        BodyPartType::Tough,
    ];

    pub fn tag(self) -> u8 {
        match self {
            BodyPartType::Move => 1,
            BodyPartType::Work => 2,
            BodyPartType::Carry => 3,
            BodyPartType::Attack => 4,
            BodyPartType::RangedAttack => 5,
            BodyPartType::Heal => 6,
            BodyPartType::Claim => 7,
            BodyPartType::Tough => 8,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|part| part.tag() == tag)
    }

    /// Spawn energy cost.
    pub fn cost(self) -> i32 {
        match self {
            BodyPartType::Move => 50,
            BodyPartType::Work => 100,
            BodyPartType::Carry => 50,
            BodyPartType::Attack => 80,
            BodyPartType::RangedAttack => 150,
            BodyPartType::Heal => 250,
            BodyPartType::Claim => 600,
            BodyPartType::Tough => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyPart {
    #[serde(rename = "type")]
    pub part: BodyPartType,
    pub hits: i32,
}

impl BodyPart {
    pub fn new(part: BodyPartType) -> Self {
        Self {
            part,
            hits: BODYPART_HITS,
        }
    }

    pub fn is_active(&self) -> bool {
        self.hits > 0
    }
}

/// Visual action recorded for the tick it happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    Build,
    Harvest,
    UpgradeController,
}

impl ActionKind {
    fn tag(self) -> u8 {
        match self {
            ActionKind::Build => 1,
            ActionKind::Harvest => 2,
            ActionKind::UpgradeController => 3,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ActionKind::Build),
            2 => Some(ActionKind::Harvest),
            3 => Some(ActionKind::UpgradeController),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub action: ActionKind,
    pub x: u8,
    pub y: u8,
}

typed_view!(
    /// A unit controlled by a participant.
    Creep,
    Creep,
    as_creep
);

impl Creep {
    pub fn name(&self) -> Result<String, BufferError> {
        self.read_var_str(layout::CREEP_NAME, "creep name")
    }

    pub fn body(&self) -> Result<Vec<BodyPart>, BufferError> {
        let raw = self.read_var(layout::CREEP_BODY, layout::BODY_PART_LEN)?;
        raw.chunks_exact(layout::BODY_PART_LEN)
            .map(|chunk| {
                let part = BodyPartType::from_tag(chunk[0]).ok_or_else(|| self.malformed("body part"))?;
                Ok(BodyPart {
                    part,
                    hits: i32::from(chunk[1]),
                })
            })
            .collect()
    }

    pub fn store(&self) -> Store {
        Store::new((**self).clone(), layout::CREEP_STORE, false)
    }

    pub fn fatigue(&self) -> Result<i32, BufferError> {
        self.read_i32(layout::CREEP_FATIGUE)
    }

    /// Tick at which the creep dies of age; zero while it is still spawning.
    pub fn age_time(&self) -> Result<u64, BufferError> {
        self.read_u64(layout::CREEP_AGE_TIME)
    }

    pub fn ticks_to_live(&self, time: u64) -> Result<Option<u64>, BufferError> {
        let age_time = self.age_time()?;
        Ok((age_time != 0).then(|| age_time.saturating_sub(time)))
    }

    pub fn active_parts(&self, part: BodyPartType) -> Result<i32, BufferError> {
        Ok(self
            .body()?
            .iter()
            .filter(|body_part| body_part.part == part && body_part.is_active())
            .count() as i32)
    }

    /// Sum of `power` over every active part of type `part`.
    pub fn power(&self, part: BodyPartType, power: i32) -> Result<i32, BufferError> {
        Ok(self.active_parts(part)? * power)
    }

    /// Parts that generate fatigue. Empty carry parts weigh nothing.
    pub fn weight(&self) -> Result<i32, BufferError> {
        let body = self.body()?;
        let heavy = body
            .iter()
            .filter(|part| !matches!(part.part, BodyPartType::Move | BodyPartType::Carry))
            .count() as i32;
        let carry_parts = body
            .iter()
            .filter(|part| part.part == BodyPartType::Carry)
            .count() as i32;
        let used = self.store().used()?;
        let loaded = (used + CARRY_CAPACITY - 1) / CARRY_CAPACITY;
        Ok(heavy + loaded.min(carry_parts))
    }

    pub fn action_log(&self) -> Result<Vec<ActionLogEntry>, BufferError> {
        let count = (self.read_u32(layout::CREEP_ACTION_COUNT)? as usize).min(layout::CREEP_ACTION_SLOTS);
        let mut entries = Vec::with_capacity(count);
        for slot in 0..count {
            let base = layout::CREEP_ACTIONS + slot * layout::CREEP_ACTION_ENTRY;
            let action =
                ActionKind::from_tag(self.read_u8(base)?).ok_or_else(|| self.malformed("action log"))?;
            entries.push(ActionLogEntry {
                action,
                x: self.read_u8(base + 1)?,
                y: self.read_u8(base + 2)?,
            });
        }
        Ok(entries)
    }

    /// Records `action` at `pos`, replacing an earlier entry of the same kind.
    pub(crate) fn push_action(&self, action: ActionKind, pos: RoomPosition) -> Result<(), BufferError> {
        let count = (self.read_u32(layout::CREEP_ACTION_COUNT)? as usize).min(layout::CREEP_ACTION_SLOTS);
        let mut slot = count;
        for index in 0..count {
            let base = layout::CREEP_ACTIONS + index * layout::CREEP_ACTION_ENTRY;
            if self.read_u8(base)? == action.tag() {
                slot = index;
                break;
            }
        }
        if slot == layout::CREEP_ACTION_SLOTS {
            return Ok(());
        }
        let base = layout::CREEP_ACTIONS + slot * layout::CREEP_ACTION_ENTRY;
        self.write_u8(base, action.tag())?;
        self.write_u8(base + 1, pos.x())?;
        self.write_u8(base + 2, pos.y())?;
        if slot == count {
            self.write_i32(layout::CREEP_ACTION_COUNT, (count + 1) as i32)?;
        }
        Ok(())
    }

    pub(crate) fn clear_actions(&self) -> Result<(), BufferError> {
        if self.read_u32(layout::CREEP_ACTION_COUNT)? != 0 {
            self.write_i32(layout::CREEP_ACTION_COUNT, 0)?;
        }
        Ok(())
    }

    pub(crate) fn set_fatigue(&self, fatigue: i32) -> Result<(), BufferError> {
        self.write_i32(layout::CREEP_FATIGUE, fatigue)
    }

    pub(crate) fn set_age_time(&self, age_time: u64) -> Result<(), BufferError> {
        self.write_u64(layout::CREEP_AGE_TIME, age_time)
    }
}
