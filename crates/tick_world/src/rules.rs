//! Game constants the processors read. Loaded from config with these defaults.

use serde::{Deserialize, Serialize};

use crate::objects::StructureType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameRules {
    pub build_power: i32,
    pub harvest_power: i32,
    pub upgrade_controller_power: i32,
    pub creep_life_time: u64,
    pub max_creep_size: usize,
    pub road_wearout: u64,
    pub road_hits: i32,
    pub road_decay_amount: i32,
    pub road_decay_time: u64,
    pub container_hits: i32,
    pub container_capacity: i32,
    pub container_decay: i32,
    pub container_decay_time: u64,
    pub spawn_hits: i32,
    pub spawn_energy_capacity: i32,
    pub spawn_energy_start: i32,
    pub tower_hits: i32,
    pub tower_capacity: i32,
    pub energy_decay: i32,
    pub source_energy_capacity: i32,
    pub energy_regen_time: u64,
    pub safe_mode_duration: u64,
    pub controller_downgrade_time: u64,
    /// Progress needed to leave each level, starting at level 1.
    pub controller_levels: Vec<i32>,
    pub road_cost: i32,
    pub container_cost: i32,
    pub spawn_cost: i32,
    pub tower_cost: i32,
    pub max_construction_sites: usize,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            build_power: 5,
            harvest_power: 2,
            upgrade_controller_power: 1,
            creep_life_time: 1500,
            max_creep_size: 50,
            road_wearout: 1,
            road_hits: 5000,
            road_decay_amount: 100,
            road_decay_time: 1000,
            container_hits: 250_000,
            container_capacity: 2000,
            container_decay: 5000,
            container_decay_time: 100,
            spawn_hits: 5000,
            spawn_energy_capacity: 300,
            spawn_energy_start: 300,
            tower_hits: 3000,
            tower_capacity: 1000,
            energy_decay: 1000,
            source_energy_capacity: 3000,
            energy_regen_time: 300,
            safe_mode_duration: 20_000,
            controller_downgrade_time: 20_000,
            controller_levels: vec![200, 45_000, 135_000, 405_000, 1_215_000, 3_645_000, 10_935_000],
            road_cost: 300,
            container_cost: 5000,
            spawn_cost: 15_000,
            tower_cost: 5000,
            max_construction_sites: 100,
        }
    }
}

impl GameRules {
    pub fn construction_cost(&self, structure: StructureType) -> i32 {
        match structure {
            StructureType::Road => self.road_cost,
            StructureType::Container => self.container_cost,
            StructureType::Spawn => self.spawn_cost,
            StructureType::Tower => self.tower_cost,
        }
    }

    pub fn structure_hits(&self, structure: StructureType) -> i32 {
        match structure {
            StructureType::Road => self.road_hits,
            StructureType::Container => self.container_hits,
            StructureType::Spawn => self.spawn_hits,
            StructureType::Tower => self.tower_hits,
        }
    }

    /// Progress needed to reach `level + 1`, or `None` at the top level.
    pub fn controller_level_progress(&self, level: i32) -> Option<i32> {
        let index = usize::try_from(level.checked_sub(1)?).ok()?;
        self.controller_levels.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let rules: GameRules = toml::from_str("build_power = 2\nroad_wearout = 3\n").unwrap();
        assert_eq!(rules.build_power, 2);
        assert_eq!(rules.road_wearout, 3);
        assert_eq!(rules.harvest_power, GameRules::default().harvest_power);
    }

    #[test]
    fn controller_levels_are_one_based() {
        let rules = GameRules::default();
        assert_eq!(rules.controller_level_progress(0), None);
        assert_eq!(rules.controller_level_progress(1), Some(200));
        assert_eq!(rules.controller_level_progress(8), None);
    }
}
