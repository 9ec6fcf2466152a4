use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ObjectView;
use crate::buffer::BufferError;
use crate::schema::layout;

pub const RESOURCE_TYPE_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "energy")]
    Energy,
    #[serde(rename = "power")]
    Power,
    #[serde(rename = "H")]
    Hydrogen,
    #[serde(rename = "O")]
    Oxygen,
    #[serde(rename = "U")]
    Utrium,
    #[serde(rename = "L")]
    Lemergium,
    #[serde(rename = "K")]
    Keanium,
    #[serde(rename = "Z")]
    Zynthium,
}

impl ResourceType {
    pub const ALL: [ResourceType; RESOURCE_TYPE_COUNT] = [
        ResourceType::Energy,
        ResourceType::Power,
        ResourceType::Hydrogen,
        ResourceType::Oxygen,
        ResourceType::Utrium,
        ResourceType::Lemergium,
        ResourceType::Keanium,
        ResourceType::Zynthium,
    ];

    pub fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|candidate| *candidate == self)
            .unwrap_or(0)
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }
}

/// Initial contents of a store, used when building records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSpec {
    pub capacity: i32,
    pub amounts: BTreeMap<ResourceType, i32>,
}

impl StoreSpec {
    pub fn with_capacity(capacity: i32) -> Self {
        Self {
            capacity,
            amounts: BTreeMap::new(),
        }
    }

    pub fn with(mut self, resource: ResourceType, amount: i32) -> Self {
        self.amounts.insert(resource, amount);
        self
    }
}

/// View of the resource store embedded in an object record.
#[derive(Debug, Clone)]
pub struct Store {
    object: ObjectView,
    base: usize,
    energy_only: bool,
}

impl Store {
    pub(crate) fn new(object: ObjectView, base: usize, energy_only: bool) -> Self {
        Self {
            object,
            base,
            energy_only,
        }
    }

    fn amount_field(&self, resource: ResourceType) -> usize {
        self.base + layout::STORE_AMOUNTS + 4 * resource.index()
    }

    pub fn capacity(&self) -> Result<i32, BufferError> {
        self.object.read_i32(self.base + layout::STORE_CAPACITY)
    }

    pub fn accepts(&self, resource: ResourceType) -> bool {
        !self.energy_only || resource == ResourceType::Energy
    }

    pub fn get(&self, resource: ResourceType) -> Result<i32, BufferError> {
        self.object.read_i32(self.amount_field(resource))
    }

    pub fn used(&self) -> Result<i32, BufferError> {
        let mut total = 0i32;
        for resource in ResourceType::ALL {
            total = total.saturating_add(self.get(resource)?);
        }
        Ok(total)
    }

    pub fn free_capacity(&self, resource: ResourceType) -> Result<i32, BufferError> {
        if !self.accepts(resource) {
            return Ok(0);
        }
        Ok((self.capacity()? - self.used()?).max(0))
    }

    /// Non-empty entries in resource order.
    pub fn contents(&self) -> Result<Vec<(ResourceType, i32)>, BufferError> {
        let mut contents = Vec::new();
        for resource in ResourceType::ALL {
            let amount = self.get(resource)?;
            if amount > 0 {
                contents.push((resource, amount));
            }
        }
        Ok(contents)
    }

    pub(crate) fn set(&self, resource: ResourceType, amount: i32) -> Result<(), BufferError> {
        self.object.write_i32(self.amount_field(resource), amount)
    }

    pub(crate) fn add(&self, resource: ResourceType, amount: i32) -> Result<(), BufferError> {
        let current = self.get(resource)?;
        self.set(resource, current.saturating_add(amount))
    }

    pub(crate) fn subtract(&self, resource: ResourceType, amount: i32) -> Result<(), BufferError> {
        let current = self.get(resource)?;
        self.set(resource, current.saturating_sub(amount))
    }

    pub(crate) fn clear(&self) -> Result<(), BufferError> {
        for resource in ResourceType::ALL {
            self.set(resource, 0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_indices_are_stable() {
        for (index, resource) in ResourceType::ALL.into_iter().enumerate() {
            assert_eq!(resource.index(), index);
            assert_eq!(ResourceType::from_index(index as u8), Some(resource));
        }
        assert_eq!(ResourceType::from_index(8), None);
    }

    #[test]
    fn resource_names_match_wire_format() {
        assert_eq!(
            serde_json::to_string(&ResourceType::Energy).unwrap(),
            "\"energy\""
        );
        assert_eq!(
            serde_json::from_str::<ResourceType>("\"K\"").unwrap(),
            ResourceType::Keanium
        );
    }
}
