//! Room blob reader and writer.

use std::collections::HashSet;

use super::{layout, RoomHeader, SchemaRegistry};
use crate::buffer::{slice_array, BufferError, BufferView, InternalAccess};
use crate::objects::{ObjectId, ObjectKind, ObjectView};
use crate::position::{PositionError, RoomCoord, RoomPosition};
use crate::room::RoomState;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("room blob truncated: {len} bytes, needed {needed}")]
    Truncated { len: usize, needed: usize },
    #[error("room blob has a bad magic number")]
    BadMagic,
    #[error("unsupported room schema version {version}")]
    UnsupportedVersion { version: u16 },
    #[error("room header: {message}")]
    Header { message: String },
    #[error("unknown object kind tag {tag} at offset {offset}")]
    UnknownKind { offset: usize, tag: u8 },
    #[error("malformed record at offset {offset}: {reason}")]
    MalformedRecord { offset: usize, reason: String },
    #[error("duplicate object id {id}")]
    DuplicateId { id: ObjectId },
    #[error("extension field {field} holds a {found}, expected {expected}")]
    ExtensionType {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Position(#[from] PositionError),
}

struct RecordEntry {
    offset: usize,
    kind: ObjectKind,
    id: ObjectId,
}

/// Hydrates a room from its blob.
pub fn read(schema: &SchemaRegistry, mut bytes: Vec<u8>) -> Result<RoomState, CodecError> {
    if bytes.len() < layout::PREAMBLE_LEN {
        return Err(CodecError::Truncated {
            len: bytes.len(),
            needed: layout::PREAMBLE_LEN,
        });
    }
    if bytes[..4] != layout::ROOM_MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = u16::from_le_bytes(slice_array(&bytes, layout::PREAMBLE_VERSION)?);
    if version == 0 || version > layout::SCHEMA_VERSION {
        return Err(CodecError::UnsupportedVersion { version });
    }
    let header_len = u32::from_le_bytes(slice_array(&bytes, layout::PREAMBLE_HEADER_LEN)?) as usize;
    let count = u32::from_le_bytes(slice_array(&bytes, layout::PREAMBLE_OBJECT_COUNT)?);
    let header_end = layout::PREAMBLE_LEN + header_len;
    if bytes.len() < header_end {
        return Err(CodecError::Truncated {
            len: bytes.len(),
            needed: header_end,
        });
    }

    let mut header: RoomHeader = serde_cbor::from_slice(&bytes[layout::PREAMBLE_LEN..header_end])
        .map_err(|err| CodecError::Header {
            message: err.to_string(),
        })?;
    let coord = RoomCoord::parse(&header.name)?;
    apply_registered_fields(schema, &mut header)?;

    let records = bytes.split_off(header_end);
    let entries = scan_records(&records, count, coord)?;
    let buffer = BufferView::new(records);
    let objects = entries
        .into_iter()
        .map(|entry| ObjectView::new(buffer.clone(), entry.offset, entry.kind, entry.id))
        .collect();
    Ok(RoomState::hydrate(header, coord, buffer, objects))
}

/// Serializes the live objects of a room. Removed objects are dropped.
pub fn write(room: &RoomState) -> Result<Vec<u8>, CodecError> {
    let access = InternalAccess::new();
    let mut records = Vec::new();
    let mut count = 0u32;
    for object in room.objects() {
        let len = object.record_len()?;
        let bytes = object
            .buffer(&access)
            .read_bytes(object.offset(&access), len)?;
        records.extend_from_slice(&bytes);
        count += 1;
    }
    assemble(&room.header(), &records, count)
}

pub(crate) fn assemble(header: &RoomHeader, records: &[u8], count: u32) -> Result<Vec<u8>, CodecError> {
    let encoded = serde_cbor::to_vec(header).map_err(|err| CodecError::Header {
        message: err.to_string(),
    })?;
    let header_len = u32::try_from(encoded.len()).map_err(|_| CodecError::Header {
        message: "room header too large".to_string(),
    })?;
    let mut out = Vec::with_capacity(layout::PREAMBLE_LEN + encoded.len() + records.len());
    out.extend_from_slice(&layout::ROOM_MAGIC);
    out.extend_from_slice(&layout::SCHEMA_VERSION.to_le_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&encoded);
    out.extend_from_slice(records);
    Ok(out)
}

fn apply_registered_fields(schema: &SchemaRegistry, header: &mut RoomHeader) -> Result<(), CodecError> {
    for (name, default) in schema.room_fields() {
        match header.extensions.get(name) {
            None => {
                header.extensions.insert(name.to_string(), default.clone());
            }
            Some(stored) if std::mem::discriminant(stored) != std::mem::discriminant(default) => {
                return Err(CodecError::ExtensionType {
                    field: name.to_string(),
                    expected: default.type_name(),
                    found: stored.type_name(),
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn scan_records(records: &[u8], count: u32, coord: RoomCoord) -> Result<Vec<RecordEntry>, CodecError> {
    // Every record is at least COMMON_LEN bytes, so a larger count cannot fit.
    let needed = (count as usize).saturating_mul(layout::COMMON_LEN);
    if needed > records.len() {
        return Err(CodecError::Truncated {
            len: records.len(),
            needed,
        });
    }
    let mut entries = Vec::with_capacity(count as usize);
    let mut ids = HashSet::with_capacity(count as usize);
    let mut offset = 0usize;
    for _ in 0..count {
        if records.len() < offset + layout::COMMON_LEN {
            return Err(CodecError::Truncated {
                len: records.len(),
                needed: offset + layout::COMMON_LEN,
            });
        }
        let tag = records[offset + layout::KIND];
        let kind = ObjectKind::from_tag(tag).ok_or(CodecError::UnknownKind { offset, tag })?;
        let record_len = usize::from(u16::from_le_bytes(slice_array(records, offset + layout::RECORD_LEN)?));
        if record_len < kind.fixed_len() || records.len() < offset + record_len {
            return Err(CodecError::MalformedRecord {
                offset,
                reason: format!("{kind} record length {record_len} is invalid"),
            });
        }
        let record = &records[offset..offset + record_len];
        let id = ObjectId(u64::from_le_bytes(slice_array(record, layout::ID)?));
        let pos = RoomPosition::from_packed(u32::from_le_bytes(slice_array(record, layout::POS)?))?;
        if pos.room() != coord {
            return Err(CodecError::MalformedRecord {
                offset,
                reason: format!("{kind} {id} at {pos} lies outside room {coord}"),
            });
        }
        check_variable_fields(record, kind, offset)?;

        let removed = record[layout::FLAGS] & layout::FLAG_REMOVED != 0;
        if !removed {
            if !ids.insert(id) {
                return Err(CodecError::DuplicateId { id });
            }
            entries.push(RecordEntry { offset, kind, id });
        }
        offset += record_len;
    }
    if offset != records.len() {
        return Err(CodecError::MalformedRecord {
            offset,
            reason: format!("{} trailing bytes after last record", records.len() - offset),
        });
    }
    Ok(entries)
}

fn check_variable_fields(record: &[u8], kind: ObjectKind, offset: usize) -> Result<(), CodecError> {
    let slots: &[(usize, usize)] = match kind {
        ObjectKind::Creep => &[
            (layout::CREEP_BODY, layout::BODY_PART_LEN),
            (layout::CREEP_NAME, 1),
        ],
        ObjectKind::Spawn => &[(layout::SPAWN_NAME, 1)],
        ObjectKind::ConstructionSite => &[(layout::SITE_NAME, 1)],
        _ => &[],
    };
    for (slot, unit) in slots {
        let start = usize::from(u16::from_le_bytes(slice_array(record, *slot)?));
        let len = usize::from(u16::from_le_bytes(slice_array(record, slot + 2)?)) * unit;
        if start + len > record.len() {
            return Err(CodecError::MalformedRecord {
                offset,
                reason: format!("{kind} variable field exceeds its record"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{BodyPart, BodyPartType, ResourceType, StoreSpec};
    use crate::schema::{ExtensionValue, NewObject, ObjectSpec, RoomBuilder};

    fn pos(x: u8, y: u8) -> RoomPosition {
        RoomPosition::in_room("W1N1", x, y).unwrap()
    }

    fn sample_blob() -> Vec<u8> {
        RoomBuilder::new("W1N1")
            .unwrap()
            .owner("alice")
            .extension("legacy", ExtensionValue::Text("keep".to_string()))
            .object(NewObject::creep(
                ObjectId(1),
                pos(5, 5),
                "alice",
                "c1",
                vec![BodyPart::new(BodyPartType::Carry)],
                StoreSpec::with_capacity(50).with(ResourceType::Energy, 20),
            ))
            .unwrap()
            .object(NewObject::new(
                ObjectId(2),
                pos(6, 6),
                ObjectSpec::Road { next_decay_time: 900 },
            ))
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn rejects_foreign_and_truncated_blobs() {
        assert!(matches!(
            read(&SchemaRegistry::new(), vec![0; 4]),
            Err(CodecError::Truncated { .. })
        ));
        let mut blob = sample_blob();
        blob[0] = b'X';
        assert_eq!(
            read(&SchemaRegistry::new(), blob).unwrap_err(),
            CodecError::BadMagic
        );

        let mut blob = sample_blob();
        blob[layout::PREAMBLE_VERSION] = 9;
        assert!(matches!(
            read(&SchemaRegistry::new(), blob),
            Err(CodecError::UnsupportedVersion { version: 9 })
        ));

        let mut blob = sample_blob();
        blob.pop();
        assert!(read(&SchemaRegistry::new(), blob).is_err());
    }

    #[test]
    fn oversized_object_count_is_truncation() {
        let count_at = layout::PREAMBLE_OBJECT_COUNT;
        for count in [u32::MAX, 3] {
            let mut blob = sample_blob();
            blob[count_at..count_at + 4].copy_from_slice(&count.to_le_bytes());
            assert!(matches!(
                read(&SchemaRegistry::new(), blob),
                Err(CodecError::Truncated { .. })
            ));
        }
    }

    #[test]
    fn unknown_kind_tag_is_reported() {
        let mut blob = sample_blob();
        let header_len = u32::from_le_bytes(slice_array(&blob, layout::PREAMBLE_HEADER_LEN).unwrap()) as usize;
        blob[layout::PREAMBLE_LEN + header_len + layout::KIND] = 42;
        assert!(matches!(
            read(&SchemaRegistry::new(), blob),
            Err(CodecError::UnknownKind { offset: 0, tag: 42 })
        ));
    }

    #[test]
    fn registered_fields_get_defaults_and_unknown_fields_survive() {
        let mut schema = SchemaRegistry::new();
        schema.register_room_field("autoSpawn", ExtensionValue::Bool(false));
        let room = read(&schema, sample_blob()).unwrap();
        assert_eq!(room.extension("autoSpawn"), Some(&ExtensionValue::Bool(false)));
        assert_eq!(
            room.extension("legacy"),
            Some(&ExtensionValue::Text("keep".to_string()))
        );
    }

    #[test]
    fn mistyped_registered_field_is_an_error() {
        let mut schema = SchemaRegistry::new();
        schema.register_room_field("legacy", ExtensionValue::Int(0));
        assert!(matches!(
            read(&schema, sample_blob()),
            Err(CodecError::ExtensionType { expected: "int", found: "text", .. })
        ));
    }

    #[test]
    fn unchanged_room_writes_back_identically() {
        let blob = sample_blob();
        let room = read(&SchemaRegistry::new(), blob.clone()).unwrap();
        assert_eq!(write(&room).unwrap(), blob);
    }

    #[test]
    fn mutated_room_round_trips_kinds_positions_and_fields() {
        let room = read(&SchemaRegistry::new(), sample_blob()).unwrap();
        let creep = room.get(ObjectId(1)).unwrap().as_creep().unwrap();
        creep.store().subtract(ResourceType::Energy, 5).unwrap();

        let again = read(&SchemaRegistry::new(), write(&room).unwrap()).unwrap();
        assert_eq!(again.objects().count(), 2);
        let summary = |room: &RoomState| {
            room.objects()
                .map(|object| (object.id(), object.kind(), object.pos().unwrap()))
                .collect::<Vec<_>>()
        };
        assert_eq!(summary(&again), summary(&room));
        let creep = again.get(ObjectId(1)).unwrap().as_creep().unwrap();
        assert_eq!(creep.store().get(ResourceType::Energy).unwrap(), 15);
        assert_eq!(creep.name().unwrap(), "c1");
        let road = again.get(ObjectId(2)).unwrap().as_road().unwrap();
        assert_eq!(road.next_decay_time().unwrap(), 900);
    }

    #[test]
    fn longer_records_from_newer_layouts_are_skipped_over() {
        let road = NewObject::new(ObjectId(9), pos(1, 1), ObjectSpec::Road { next_decay_time: 5 });
        let mut record = crate::schema::encode_record(&road).unwrap();
        record.extend_from_slice(&[0xAA; 8]);
        let len = record.len() as u16;
        record[layout::RECORD_LEN..layout::RECORD_LEN + 2].copy_from_slice(&len.to_le_bytes());
        let header = RoomHeader {
            name: "W1N1".to_string(),
            ..RoomHeader::default()
        };
        let blob = assemble(&header, &record, 1).unwrap();

        let room = read(&SchemaRegistry::new(), blob).unwrap();
        let road = room.get(ObjectId(9)).and_then(|object| object.as_road()).unwrap();
        assert_eq!(road.next_decay_time().unwrap(), 5);
        assert_eq!(road.record_len().unwrap(), layout::ROAD_FIXED_LEN + 8);
    }
}
