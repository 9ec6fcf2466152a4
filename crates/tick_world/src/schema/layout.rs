//! Byte layout of room blobs, schema version 1.
//!
//! A blob is a 16-byte preamble, a CBOR room header, then object records. Every
//! record starts with the common header below and carries its total length, so
//! readers skip trailing fields they do not know. Variable data (body parts,
//! names) lives after the fixed fields and is addressed by record-relative
//! `(offset: u16, len: u16)` pairs.

pub const ROOM_MAGIC: [u8; 4] = *b"TWRM";
pub const SCHEMA_VERSION: u16 = 1;

pub(crate) const PREAMBLE_LEN: usize = 16;
pub(crate) const PREAMBLE_VERSION: usize = 4;
pub(crate) const PREAMBLE_HEADER_LEN: usize = 8;
pub(crate) const PREAMBLE_OBJECT_COUNT: usize = 12;

// Common record header.
pub(crate) const KIND: usize = 0;
pub(crate) const FLAGS: usize = 1;
pub(crate) const RECORD_LEN: usize = 2;
pub(crate) const ID: usize = 4;
pub(crate) const POS: usize = 12;
pub(crate) const OWNER: usize = 16;
pub(crate) const OWNER_LEN: usize = 24;
pub(crate) const HITS: usize = 40;
pub(crate) const HITS_MAX: usize = 44;
pub(crate) const COMMON_LEN: usize = 48;

pub(crate) const FLAG_REMOVED: u8 = 0b0000_0001;

// Store: capacity followed by one amount per resource type.
pub(crate) const STORE_CAPACITY: usize = 0;
pub(crate) const STORE_AMOUNTS: usize = 4;
pub(crate) const STORE_LEN: usize = 4 + 4 * crate::objects::RESOURCE_TYPE_COUNT;

pub(crate) const CREEP_STORE: usize = COMMON_LEN;
pub(crate) const CREEP_FATIGUE: usize = CREEP_STORE + STORE_LEN;
pub(crate) const CREEP_AGE_TIME: usize = CREEP_FATIGUE + 4;
pub(crate) const CREEP_ACTION_COUNT: usize = CREEP_AGE_TIME + 8;
pub(crate) const CREEP_ACTIONS: usize = CREEP_ACTION_COUNT + 4;
pub(crate) const CREEP_ACTION_SLOTS: usize = 4;
pub(crate) const CREEP_ACTION_ENTRY: usize = 4;
pub(crate) const CREEP_BODY: usize = CREEP_ACTIONS + CREEP_ACTION_SLOTS * CREEP_ACTION_ENTRY;
pub(crate) const CREEP_NAME: usize = CREEP_BODY + 4;
pub(crate) const CREEP_FIXED_LEN: usize = CREEP_NAME + 4;
pub(crate) const BODY_PART_LEN: usize = 2;

pub(crate) const SITE_PROGRESS: usize = COMMON_LEN;
pub(crate) const SITE_PROGRESS_TOTAL: usize = SITE_PROGRESS + 4;
pub(crate) const SITE_STRUCTURE: usize = SITE_PROGRESS_TOTAL + 4;
pub(crate) const SITE_NAME: usize = SITE_STRUCTURE + 4;
pub(crate) const SITE_FIXED_LEN: usize = SITE_NAME + 4;

pub(crate) const RESOURCE_TYPE: usize = COMMON_LEN;
pub(crate) const RESOURCE_AMOUNT: usize = RESOURCE_TYPE + 4;
pub(crate) const RESOURCE_FIXED_LEN: usize = RESOURCE_AMOUNT + 4;

pub(crate) const ROAD_NEXT_DECAY: usize = COMMON_LEN;
pub(crate) const ROAD_FIXED_LEN: usize = ROAD_NEXT_DECAY + 8;

pub(crate) const CONTAINER_STORE: usize = COMMON_LEN;
pub(crate) const CONTAINER_NEXT_DECAY: usize = CONTAINER_STORE + STORE_LEN;
pub(crate) const CONTAINER_FIXED_LEN: usize = CONTAINER_NEXT_DECAY + 8;

pub(crate) const SPAWN_STORE: usize = COMMON_LEN;
pub(crate) const SPAWN_NAME: usize = SPAWN_STORE + STORE_LEN;
pub(crate) const SPAWN_FIXED_LEN: usize = SPAWN_NAME + 4;

pub(crate) const TOWER_STORE: usize = COMMON_LEN;
pub(crate) const TOWER_FIXED_LEN: usize = TOWER_STORE + STORE_LEN;

pub(crate) const CONTROLLER_LEVEL: usize = COMMON_LEN;
pub(crate) const CONTROLLER_PROGRESS: usize = CONTROLLER_LEVEL + 4;
pub(crate) const CONTROLLER_DOWNGRADE: usize = CONTROLLER_PROGRESS + 4;
pub(crate) const CONTROLLER_FIXED_LEN: usize = CONTROLLER_DOWNGRADE + 8;

pub(crate) const SOURCE_ENERGY: usize = COMMON_LEN;
pub(crate) const SOURCE_CAPACITY: usize = SOURCE_ENERGY + 4;
pub(crate) const SOURCE_NEXT_REGEN: usize = SOURCE_CAPACITY + 4;
pub(crate) const SOURCE_FIXED_LEN: usize = SOURCE_NEXT_REGEN + 8;
