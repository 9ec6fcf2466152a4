//! Encoding of new object records and whole room blobs.

use std::collections::{BTreeMap, HashSet};

use super::codec::{assemble, CodecError};
use super::{layout, ExtensionValue, RoomHeader};
use crate::objects::{
    BodyPart, ObjectId, ObjectKind, ResourceType, StoreSpec, StructureType, BODYPART_HITS,
};
use crate::position::{RoomCoord, RoomPosition};

/// Kind-specific fields of an object to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectSpec {
    Creep {
        name: String,
        body: Vec<BodyPart>,
        store: StoreSpec,
        fatigue: i32,
        age_time: u64,
    },
    ConstructionSite {
        structure: StructureType,
        progress: i32,
        progress_total: i32,
        name: String,
    },
    Resource {
        resource: ResourceType,
        amount: i32,
    },
    Road {
        next_decay_time: u64,
    },
    Container {
        store: StoreSpec,
        next_decay_time: u64,
    },
    Spawn {
        name: String,
        store: StoreSpec,
    },
    Tower {
        store: StoreSpec,
    },
    Controller {
        level: i32,
        progress: i32,
        downgrade_time: u64,
    },
    Source {
        energy: i32,
        capacity: i32,
        next_regeneration_time: u64,
    },
}

impl ObjectSpec {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectSpec::Creep { .. } => ObjectKind::Creep,
            ObjectSpec::ConstructionSite { .. } => ObjectKind::ConstructionSite,
            ObjectSpec::Resource { .. } => ObjectKind::Resource,
            ObjectSpec::Road { .. } => ObjectKind::Road,
            ObjectSpec::Container { .. } => ObjectKind::Container,
            ObjectSpec::Spawn { .. } => ObjectKind::Spawn,
            ObjectSpec::Tower { .. } => ObjectKind::Tower,
            ObjectSpec::Controller { .. } => ObjectKind::Controller,
            ObjectSpec::Source { .. } => ObjectKind::Source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewObject {
    pub id: ObjectId,
    pub pos: RoomPosition,
    pub owner: Option<String>,
    pub hits: i32,
    pub hits_max: i32,
    pub body: ObjectSpec,
}

impl NewObject {
    /// Unowned object without hit points.
    pub fn new(id: ObjectId, pos: RoomPosition, body: ObjectSpec) -> Self {
        Self {
            id,
            pos,
            owner: None,
            hits: 0,
            hits_max: 0,
            body,
        }
    }

    /// Creep with full hit points for its body.
    pub fn creep(
        id: ObjectId,
        pos: RoomPosition,
        owner: &str,
        name: &str,
        body: Vec<BodyPart>,
        store: StoreSpec,
    ) -> Self {
        let hits = body.len() as i32 * BODYPART_HITS;
        Self {
            id,
            pos,
            owner: Some(owner.to_string()),
            hits,
            hits_max: hits,
            body: ObjectSpec::Creep {
                name: name.to_string(),
                body,
                store,
                fatigue: 0,
                age_time: 0,
            },
        }
    }

    pub fn owned_by(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    pub fn with_hits(mut self, hits: i32, hits_max: i32) -> Self {
        self.hits = hits;
        self.hits_max = hits_max;
        self
    }

    pub fn kind(&self) -> ObjectKind {
        self.body.kind()
    }
}

struct RecordWriter {
    bytes: Vec<u8>,
}

impl RecordWriter {
    fn new(kind: ObjectKind) -> Self {
        Self {
            bytes: vec![0; kind.fixed_len()],
        }
    }

    fn put(&mut self, field: usize, value: &[u8]) {
        self.bytes[field..field + value.len()].copy_from_slice(value);
    }

    fn put_i32(&mut self, field: usize, value: i32) {
        self.put(field, &value.to_le_bytes());
    }

    fn put_u64(&mut self, field: usize, value: u64) {
        self.put(field, &value.to_le_bytes());
    }

    fn put_store(&mut self, base: usize, store: &StoreSpec) {
        self.put_i32(base + layout::STORE_CAPACITY, store.capacity);
        for (resource, amount) in &store.amounts {
            self.put_i32(base + layout::STORE_AMOUNTS + 4 * resource.index(), *amount);
        }
    }

    /// Appends variable data and points `slot` at it.
    fn put_var(&mut self, slot: usize, data: &[u8], count: usize, field: &'static str) -> Result<(), CodecError> {
        let offset = u16::try_from(self.bytes.len()).map_err(|_| too_long(field))?;
        let count = u16::try_from(count).map_err(|_| too_long(field))?;
        self.bytes.extend_from_slice(data);
        self.put(slot, &offset.to_le_bytes());
        self.put(slot + 2, &count.to_le_bytes());
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<u8>, CodecError> {
        let len = u16::try_from(self.bytes.len()).map_err(|_| too_long("record"))?;
        self.put(layout::RECORD_LEN, &len.to_le_bytes());
        Ok(self.bytes)
    }
}

fn too_long(field: &'static str) -> CodecError {
    CodecError::MalformedRecord {
        offset: 0,
        reason: format!("{field} does not fit in a record"),
    }
}

/// Encodes one object record in the current layout.
pub fn encode_record(object: &NewObject) -> Result<Vec<u8>, CodecError> {
    let kind = object.kind();
    let mut record = RecordWriter::new(kind);
    record.put(layout::KIND, &[kind.tag()]);
    record.put(layout::ID, &object.id.0.to_le_bytes());
    record.put(layout::POS, &object.pos.packed().to_le_bytes());
    if let Some(owner) = &object.owner {
        if owner.is_empty() || owner.len() > layout::OWNER_LEN || owner.contains('\0') {
            return Err(CodecError::MalformedRecord {
                offset: 0,
                reason: format!("owner {owner:?} cannot be stored"),
            });
        }
        record.put(layout::OWNER, owner.as_bytes());
    }
    record.put_i32(layout::HITS, object.hits);
    record.put_i32(layout::HITS_MAX, object.hits_max);

    match &object.body {
        ObjectSpec::Creep {
            name,
            body,
            store,
            fatigue,
            age_time,
        } => {
            record.put_store(layout::CREEP_STORE, store);
            record.put_i32(layout::CREEP_FATIGUE, *fatigue);
            record.put_u64(layout::CREEP_AGE_TIME, *age_time);
            let parts: Vec<u8> = body
                .iter()
                .flat_map(|part| [part.part.tag(), part.hits.clamp(0, BODYPART_HITS) as u8])
                .collect();
            record.put_var(layout::CREEP_BODY, &parts, body.len(), "creep body")?;
            record.put_var(layout::CREEP_NAME, name.as_bytes(), name.len(), "creep name")?;
        }
        ObjectSpec::ConstructionSite {
            structure,
            progress,
            progress_total,
            name,
        } => {
            record.put_i32(layout::SITE_PROGRESS, *progress);
            record.put_i32(layout::SITE_PROGRESS_TOTAL, *progress_total);
            record.put(layout::SITE_STRUCTURE, &[structure.tag()]);
            record.put_var(layout::SITE_NAME, name.as_bytes(), name.len(), "site name")?;
        }
        ObjectSpec::Resource { resource, amount } => {
            record.put(layout::RESOURCE_TYPE, &[resource.index() as u8]);
            record.put_i32(layout::RESOURCE_AMOUNT, *amount);
        }
        ObjectSpec::Road { next_decay_time } => {
            record.put_u64(layout::ROAD_NEXT_DECAY, *next_decay_time);
        }
        ObjectSpec::Container {
            store,
            next_decay_time,
        } => {
            record.put_store(layout::CONTAINER_STORE, store);
            record.put_u64(layout::CONTAINER_NEXT_DECAY, *next_decay_time);
        }
        ObjectSpec::Spawn { name, store } => {
            record.put_store(layout::SPAWN_STORE, store);
            record.put_var(layout::SPAWN_NAME, name.as_bytes(), name.len(), "spawn name")?;
        }
        ObjectSpec::Tower { store } => {
            record.put_store(layout::TOWER_STORE, store);
        }
        ObjectSpec::Controller {
            level,
            progress,
            downgrade_time,
        } => {
            record.put_i32(layout::CONTROLLER_LEVEL, *level);
            record.put_i32(layout::CONTROLLER_PROGRESS, *progress);
            record.put_u64(layout::CONTROLLER_DOWNGRADE, *downgrade_time);
        }
        ObjectSpec::Source {
            energy,
            capacity,
            next_regeneration_time,
        } => {
            record.put_i32(layout::SOURCE_ENERGY, *energy);
            record.put_i32(layout::SOURCE_CAPACITY, *capacity);
            record.put_u64(layout::SOURCE_NEXT_REGEN, *next_regeneration_time);
        }
    }
    record.finish()
}

/// Builds a room blob from typed object specs.
#[derive(Debug, Clone)]
pub struct RoomBuilder {
    header: RoomHeader,
    records: Vec<u8>,
    count: u32,
    ids: HashSet<ObjectId>,
}

impl RoomBuilder {
    pub fn new(name: &str) -> Result<Self, CodecError> {
        RoomCoord::parse(name)?;
        Ok(Self {
            header: RoomHeader {
                name: name.to_string(),
                owner: None,
                cumulative_energy_harvested: 0,
                safe_mode_until: 0,
                extensions: BTreeMap::new(),
            },
            records: Vec::new(),
            count: 0,
            ids: HashSet::new(),
        })
    }

    pub fn owner(mut self, owner: &str) -> Self {
        self.header.owner = Some(owner.to_string());
        self
    }

    pub fn safe_mode_until(mut self, time: u64) -> Self {
        self.header.safe_mode_until = time;
        self
    }

    pub fn extension(mut self, name: &str, value: ExtensionValue) -> Self {
        self.header.extensions.insert(name.to_string(), value);
        self
    }

    pub fn object(mut self, object: NewObject) -> Result<Self, CodecError> {
        if object.pos.room_name() != self.header.name {
            return Err(CodecError::MalformedRecord {
                offset: self.records.len(),
                reason: format!("{} lies outside room {}", object.pos, self.header.name),
            });
        }
        if !self.ids.insert(object.id) {
            return Err(CodecError::DuplicateId { id: object.id });
        }
        self.records.extend_from_slice(&encode_record(&object)?);
        self.count += 1;
        Ok(self)
    }

    pub fn build(self) -> Result<Vec<u8>, CodecError> {
        assemble(&self.header, &self.records, self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::BodyPartType;

    fn pos(x: u8, y: u8) -> RoomPosition {
        RoomPosition::in_room("W1N1", x, y).unwrap()
    }

    #[test]
    fn creep_record_carries_length_and_variable_data() {
        let creep = NewObject::creep(
            ObjectId(7),
            pos(10, 10),
            "alice",
            "worker",
            vec![BodyPart::new(BodyPartType::Work), BodyPart::new(BodyPartType::Move)],
            StoreSpec::with_capacity(50),
        );
        let record = encode_record(&creep).unwrap();
        let len = u16::from_le_bytes([record[layout::RECORD_LEN], record[layout::RECORD_LEN + 1]]);
        assert_eq!(usize::from(len), record.len());
        assert_eq!(record.len(), layout::CREEP_FIXED_LEN + 4 + "worker".len());
        assert_eq!(record[layout::KIND], ObjectKind::Creep.tag());
    }

    #[test]
    fn overlong_owner_is_rejected() {
        let object = NewObject::new(ObjectId(1), pos(1, 1), ObjectSpec::Road { next_decay_time: 0 })
            .owned_by("a-participant-name-that-is-too-long");
        assert!(matches!(
            encode_record(&object),
            Err(CodecError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn builder_rejects_duplicate_ids_and_foreign_positions() {
        let road = NewObject::new(ObjectId(1), pos(1, 1), ObjectSpec::Road { next_decay_time: 0 });
        let builder = RoomBuilder::new("W1N1").unwrap().object(road.clone()).unwrap();
        assert!(matches!(
            builder.object(road),
            Err(CodecError::DuplicateId { .. })
        ));

        let elsewhere = NewObject::new(
            ObjectId(2),
            RoomPosition::in_room("E1S1", 1, 1).unwrap(),
            ObjectSpec::Road { next_decay_time: 0 },
        );
        assert!(RoomBuilder::new("W1N1").unwrap().object(elsewhere).is_err());
        assert!(RoomBuilder::new("nowhere").is_err());
    }
}
