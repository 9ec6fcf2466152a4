use serde::{Deserialize, Serialize};

use super::{ObjectKind, ResourceType, Store};
use crate::buffer::BufferError;
use crate::schema::layout;

/// Structures that can be placed as construction sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StructureType {
    Road,
    Container,
    Spawn,
    Tower,
}

impl StructureType {
    pub const ALL: [StructureType; 4] = [
        StructureType::Road,
        StructureType::Container,
        StructureType::Spawn,
        StructureType::Tower,
    ];

    pub fn tag(self) -> u8 {
        match self {
            StructureType::Road => 1,
            StructureType::Container => 2,
            StructureType::Spawn => 3,
            StructureType::Tower => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|structure| structure.tag() == tag)
    }

    pub fn to_kind(self) -> ObjectKind {
        match self {
            StructureType::Road => ObjectKind::Road,
            StructureType::Container => ObjectKind::Container,
            StructureType::Spawn => ObjectKind::Spawn,
            StructureType::Tower => ObjectKind::Tower,
        }
    }

    pub fn from_kind(kind: ObjectKind) -> Option<Self> {
        Self::ALL.into_iter().find(|structure| structure.to_kind() == kind)
    }
}

typed_view!(Road, Road, as_road);

impl Road {
    pub fn next_decay_time(&self) -> Result<u64, BufferError> {
        self.read_u64(layout::ROAD_NEXT_DECAY)
    }

    pub fn ticks_to_decay(&self, time: u64) -> Result<u64, BufferError> {
        Ok(self.next_decay_time()?.saturating_sub(time))
    }

    pub(crate) fn set_next_decay_time(&self, time: u64) -> Result<(), BufferError> {
        self.write_u64(layout::ROAD_NEXT_DECAY, time)
    }
}

typed_view!(Container, Container, as_container);

impl Container {
    pub fn store(&self) -> Store {
        Store::new((**self).clone(), layout::CONTAINER_STORE, false)
    }

    pub fn next_decay_time(&self) -> Result<u64, BufferError> {
        self.read_u64(layout::CONTAINER_NEXT_DECAY)
    }

    pub(crate) fn set_next_decay_time(&self, time: u64) -> Result<(), BufferError> {
        self.write_u64(layout::CONTAINER_NEXT_DECAY, time)
    }
}

typed_view!(Spawn, Spawn, as_spawn);

impl Spawn {
    pub fn name(&self) -> Result<String, BufferError> {
        self.read_var_str(layout::SPAWN_NAME, "spawn name")
    }

    pub fn store(&self) -> Store {
        Store::new((**self).clone(), layout::SPAWN_STORE, true)
    }
}

typed_view!(Tower, Tower, as_tower);

impl Tower {
    pub fn store(&self) -> Store {
        Store::new((**self).clone(), layout::TOWER_STORE, true)
    }
}

typed_view!(Controller, Controller, as_controller);

impl Controller {
    pub fn level(&self) -> Result<i32, BufferError> {
        self.read_i32(layout::CONTROLLER_LEVEL)
    }

    pub fn progress(&self) -> Result<i32, BufferError> {
        self.read_i32(layout::CONTROLLER_PROGRESS)
    }

    pub fn downgrade_time(&self) -> Result<u64, BufferError> {
        self.read_u64(layout::CONTROLLER_DOWNGRADE)
    }

    pub(crate) fn set_level(&self, level: i32) -> Result<(), BufferError> {
        self.write_i32(layout::CONTROLLER_LEVEL, level)
    }

    pub(crate) fn set_progress(&self, progress: i32) -> Result<(), BufferError> {
        self.write_i32(layout::CONTROLLER_PROGRESS, progress)
    }

    pub(crate) fn set_downgrade_time(&self, time: u64) -> Result<(), BufferError> {
        self.write_u64(layout::CONTROLLER_DOWNGRADE, time)
    }
}

typed_view!(Source, Source, as_source);

impl Source {
    pub fn energy(&self) -> Result<i32, BufferError> {
        self.read_i32(layout::SOURCE_ENERGY)
    }

    pub fn energy_capacity(&self) -> Result<i32, BufferError> {
        self.read_i32(layout::SOURCE_CAPACITY)
    }

    /// Zero while the source is full and no regeneration is pending.
    pub fn next_regeneration_time(&self) -> Result<u64, BufferError> {
        self.read_u64(layout::SOURCE_NEXT_REGEN)
    }

    pub(crate) fn set_energy(&self, energy: i32) -> Result<(), BufferError> {
        self.write_i32(layout::SOURCE_ENERGY, energy)
    }

    pub(crate) fn set_next_regeneration_time(&self, time: u64) -> Result<(), BufferError> {
        self.write_u64(layout::SOURCE_NEXT_REGEN, time)
    }
}

typed_view!(ConstructionSite, ConstructionSite, as_construction_site);

impl ConstructionSite {
    pub fn progress(&self) -> Result<i32, BufferError> {
        self.read_i32(layout::SITE_PROGRESS)
    }

    pub fn progress_total(&self) -> Result<i32, BufferError> {
        self.read_i32(layout::SITE_PROGRESS_TOTAL)
    }

    pub fn structure_type(&self) -> Result<StructureType, BufferError> {
        let tag = self.read_u8(layout::SITE_STRUCTURE)?;
        StructureType::from_tag(tag).ok_or_else(|| self.malformed("structure type"))
    }

    /// Name given to the structure once built (spawns only).
    pub fn name(&self) -> Result<String, BufferError> {
        self.read_var_str(layout::SITE_NAME, "site name")
    }

    pub(crate) fn set_progress(&self, progress: i32) -> Result<(), BufferError> {
        self.write_i32(layout::SITE_PROGRESS, progress)
    }
}

typed_view!(
    /// Dropped resource pile.
    Resource,
    Resource,
    as_resource
);

impl Resource {
    pub fn resource_type(&self) -> Result<ResourceType, BufferError> {
        let index = self.read_u8(layout::RESOURCE_TYPE)?;
        ResourceType::from_index(index).ok_or_else(|| self.malformed("resource type"))
    }

    pub fn amount(&self) -> Result<i32, BufferError> {
        self.read_i32(layout::RESOURCE_AMOUNT)
    }

    pub(crate) fn set_amount(&self, amount: i32) -> Result<(), BufferError> {
        self.write_i32(layout::RESOURCE_AMOUNT, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_types_map_to_kinds() {
        for structure in StructureType::ALL {
            assert_eq!(StructureType::from_tag(structure.tag()), Some(structure));
            assert_eq!(StructureType::from_kind(structure.to_kind()), Some(structure));
        }
        assert_eq!(StructureType::from_kind(ObjectKind::Creep), None);
        assert_eq!(
            serde_json::from_str::<StructureType>("\"container\"").unwrap(),
            StructureType::Container
        );
    }
}
