//! Typed views over object records.
//!
//! An [`ObjectView`] is a buffer handle plus the byte offset of one record. Kind
//! and id never change after creation, so they are read once when the view is
//! made; every other field is read from the buffer on access. Mutators are
//! crate-private: participant code only ever reads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::buffer::{BufferError, BufferView, InternalAccess};
use crate::position::RoomPosition;
use crate::schema::layout;

pub use creep::{
    ActionKind, ActionLogEntry, BodyPart, BodyPartType, Creep, BODYPART_HITS, CARRY_CAPACITY,
};
pub use store::{ResourceType, Store, StoreSpec, RESOURCE_TYPE_COUNT};
pub use structures::{
    ConstructionSite, Container, Controller, Resource, Road, Source, Spawn, StructureType, Tower,
};

macro_rules! typed_view {
    ($(#[$meta:meta])* $name:ident, $kind:ident, $as_fn:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name(crate::objects::ObjectView);

        impl std::ops::Deref for $name {
            type Target = crate::objects::ObjectView;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl crate::objects::ObjectView {
            pub fn $as_fn(&self) -> Option<$name> {
                (self.kind() == crate::objects::ObjectKind::$kind).then(|| $name(self.clone()))
            }
        }
    };
}

mod creep;
mod store;
mod structures;

// ============================================================================
// Identity
// ============================================================================

/// Object id, rendered as 16 hex digits on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid object id {value:?}")]
pub struct ObjectIdError {
    pub value: String,
}

impl FromStr for ObjectId {
    type Err = ObjectIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.is_empty() || value.len() > 16 {
            return Err(ObjectIdError {
                value: value.to_string(),
            });
        }
        u64::from_str_radix(value, 16)
            .map(ObjectId)
            .map_err(|_| ObjectIdError {
                value: value.to_string(),
            })
    }
}

impl TryFrom<String> for ObjectId {
    type Error = ObjectIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ObjectKind {
    Creep,
    ConstructionSite,
    Resource,
    Road,
    Container,
    Spawn,
    Tower,
    Controller,
    Source,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 9] = [
        ObjectKind::Creep,
        ObjectKind::ConstructionSite,
        ObjectKind::Resource,
        ObjectKind::Road,
        ObjectKind::Container,
        ObjectKind::Spawn,
        ObjectKind::Tower,
        ObjectKind::Controller,
        ObjectKind::Source,
    ];

    pub fn tag(self) -> u8 {
        match self {
            ObjectKind::Creep => 1,
            ObjectKind::ConstructionSite => 2,
            ObjectKind::Resource => 3,
            ObjectKind::Road => 4,
            ObjectKind::Container => 5,
            ObjectKind::Spawn => 6,
            ObjectKind::Tower => 7,
            ObjectKind::Controller => 8,
            ObjectKind::Source => 9,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::Creep => "creep",
            ObjectKind::ConstructionSite => "constructionSite",
            ObjectKind::Resource => "resource",
            ObjectKind::Road => "road",
            ObjectKind::Container => "container",
            ObjectKind::Spawn => "spawn",
            ObjectKind::Tower => "tower",
            ObjectKind::Controller => "controller",
            ObjectKind::Source => "source",
        }
    }

    /// Bytes of fixed fields, including the common header.
    pub fn fixed_len(self) -> usize {
        match self {
            ObjectKind::Creep => layout::CREEP_FIXED_LEN,
            ObjectKind::ConstructionSite => layout::SITE_FIXED_LEN,
            ObjectKind::Resource => layout::RESOURCE_FIXED_LEN,
            ObjectKind::Road => layout::ROAD_FIXED_LEN,
            ObjectKind::Container => layout::CONTAINER_FIXED_LEN,
            ObjectKind::Spawn => layout::SPAWN_FIXED_LEN,
            ObjectKind::Tower => layout::TOWER_FIXED_LEN,
            ObjectKind::Controller => layout::CONTROLLER_FIXED_LEN,
            ObjectKind::Source => layout::SOURCE_FIXED_LEN,
        }
    }

    /// Blocks movement onto its tile.
    pub fn is_obstacle(self) -> bool {
        matches!(
            self,
            ObjectKind::Spawn | ObjectKind::Tower | ObjectKind::Controller | ObjectKind::Source
        )
    }

    pub fn is_structure(self) -> bool {
        matches!(
            self,
            ObjectKind::Road
                | ObjectKind::Container
                | ObjectKind::Spawn
                | ObjectKind::Tower
                | ObjectKind::Controller
        )
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// ObjectView
// ============================================================================

#[derive(Clone)]
pub struct ObjectView {
    buffer: BufferView,
    offset: usize,
    kind: ObjectKind,
    id: ObjectId,
}

impl fmt::Debug for ObjectView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectView")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("offset", &self.offset)
            .finish()
    }
}

impl ObjectView {
    pub(crate) fn new(buffer: BufferView, offset: usize, kind: ObjectKind, id: ObjectId) -> Self {
        Self {
            buffer,
            offset,
            kind,
            id,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Backing buffer. Restricted to holders of [`InternalAccess`].
    pub fn buffer(&self, _access: &InternalAccess) -> &BufferView {
        &self.buffer
    }

    /// Byte offset of this record. Restricted to holders of [`InternalAccess`].
    pub fn offset(&self, _access: &InternalAccess) -> usize {
        self.offset
    }

    pub fn pos(&self) -> Result<RoomPosition, BufferError> {
        let packed = self.read_u32(layout::POS)?;
        RoomPosition::from_packed(packed).map_err(|_| self.malformed("pos"))
    }

    pub fn owner(&self) -> Result<Option<String>, BufferError> {
        let raw = self.buffer.read_bytes(self.offset + layout::OWNER, layout::OWNER_LEN)?;
        let end = raw.iter().position(|byte| *byte == 0).unwrap_or(raw.len());
        if end == 0 {
            return Ok(None);
        }
        String::from_utf8(raw[..end].to_vec())
            .map(Some)
            .map_err(|_| self.malformed("owner"))
    }

    pub fn is_owned_by(&self, participant: &str) -> Result<bool, BufferError> {
        Ok(self.owner()?.as_deref() == Some(participant))
    }

    pub fn hits(&self) -> Result<i32, BufferError> {
        self.read_i32(layout::HITS)
    }

    pub fn hits_max(&self) -> Result<i32, BufferError> {
        self.read_i32(layout::HITS_MAX)
    }

    pub fn is_removed(&self) -> Result<bool, BufferError> {
        Ok(self.read_u8(layout::FLAGS)? & layout::FLAG_REMOVED != 0)
    }

    /// Resource store, for kinds that carry one.
    pub fn store(&self) -> Option<Store> {
        let (base, energy_only) = match self.kind {
            ObjectKind::Creep => (layout::CREEP_STORE, false),
            ObjectKind::Container => (layout::CONTAINER_STORE, false),
            ObjectKind::Spawn => (layout::SPAWN_STORE, true),
            ObjectKind::Tower => (layout::TOWER_STORE, true),
            _ => return None,
        };
        Some(Store::new(self.clone(), base, energy_only))
    }

    pub(crate) fn set_pos(&self, pos: RoomPosition) -> Result<(), BufferError> {
        self.buffer.write_u32(self.offset + layout::POS, pos.packed())
    }

    pub(crate) fn set_owner(&self, owner: Option<&str>) -> Result<(), BufferError> {
        let mut raw = [0u8; layout::OWNER_LEN];
        if let Some(owner) = owner {
            if owner.len() > layout::OWNER_LEN {
                return Err(self.malformed("owner"));
            }
            raw[..owner.len()].copy_from_slice(owner.as_bytes());
        }
        self.buffer.write_bytes(self.offset + layout::OWNER, &raw)
    }

    pub(crate) fn set_hits(&self, hits: i32) -> Result<(), BufferError> {
        self.write_i32(layout::HITS, hits)
    }

    pub(crate) fn mark_removed(&self) -> Result<(), BufferError> {
        let flags = self.read_u8(layout::FLAGS)?;
        self.buffer
            .write_u8(self.offset + layout::FLAGS, flags | layout::FLAG_REMOVED)
    }

    pub(crate) fn record_len(&self) -> Result<usize, BufferError> {
        Ok(usize::from(self.buffer.read_u16(self.offset + layout::RECORD_LEN)?))
    }

    pub(crate) fn read_u8(&self, field: usize) -> Result<u8, BufferError> {
        self.buffer.read_u8(self.offset + field)
    }

    pub(crate) fn read_u16(&self, field: usize) -> Result<u16, BufferError> {
        self.buffer.read_u16(self.offset + field)
    }

    pub(crate) fn read_i32(&self, field: usize) -> Result<i32, BufferError> {
        self.buffer.read_i32(self.offset + field)
    }

    pub(crate) fn read_u32(&self, field: usize) -> Result<u32, BufferError> {
        self.buffer.read_u32(self.offset + field)
    }

    pub(crate) fn read_u64(&self, field: usize) -> Result<u64, BufferError> {
        self.buffer.read_u64(self.offset + field)
    }

    pub(crate) fn write_u8(&self, field: usize, value: u8) -> Result<(), BufferError> {
        self.buffer.write_u8(self.offset + field, value)
    }

    pub(crate) fn write_i32(&self, field: usize, value: i32) -> Result<(), BufferError> {
        self.buffer.write_i32(self.offset + field, value)
    }

    pub(crate) fn write_u64(&self, field: usize, value: u64) -> Result<(), BufferError> {
        self.buffer.write_u64(self.offset + field, value)
    }

    /// Reads the variable-length data referenced by the `(offset, len)` pair at
    /// `slot`, scaled by `unit` bytes per element.
    pub(crate) fn read_var(&self, slot: usize, unit: usize) -> Result<Vec<u8>, BufferError> {
        let relative = usize::from(self.read_u16(slot)?);
        let count = usize::from(self.read_u16(slot + 2)?);
        self.buffer
            .read_bytes(self.offset + relative, count * unit)
    }

    pub(crate) fn read_var_str(&self, slot: usize, field: &'static str) -> Result<String, BufferError> {
        let bytes = self.read_var(slot, 1)?;
        String::from_utf8(bytes).map_err(|_| self.malformed(field))
    }

    pub(crate) fn malformed(&self, field: &'static str) -> BufferError {
        BufferError::Malformed {
            offset: self.offset,
            field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ids_render_as_fixed_width_hex() {
        let id = ObjectId(0xab);
        assert_eq!(id.to_string(), "00000000000000ab");
        assert_eq!("00000000000000ab".parse::<ObjectId>().unwrap(), id);
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"00000000000000ab\"");
        assert!("".parse::<ObjectId>().is_err());
        assert!("xyz".parse::<ObjectId>().is_err());
        assert!("00000000000000000001".parse::<ObjectId>().is_err());
    }

    #[test]
    fn kind_tags_round_trip() {
        for kind in ObjectKind::ALL {
            assert_eq!(ObjectKind::from_tag(kind.tag()), Some(kind));
            assert!(kind.fixed_len() >= layout::COMMON_LEN);
        }
        assert_eq!(ObjectKind::from_tag(0), None);
        assert_eq!(ObjectKind::from_tag(200), None);
    }
}
