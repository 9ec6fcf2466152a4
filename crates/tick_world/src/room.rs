//! One room hydrated for a tick.
//!
//! [`RoomState`] is owned by the driver and mutated by the processor.
//! [`RoomView`] is the read-only snapshot handed to sandboxes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::buffer::{BufferError, BufferView, InternalAccess};
use crate::objects::{ObjectId, ObjectView};
use crate::position::RoomCoord;
use crate::schema::{encode_record, CodecError, ExtensionValue, NewObject, RoomHeader};
use crate::terrain::Terrain;

pub struct RoomState {
    name: String,
    coord: RoomCoord,
    time: u64,
    owner: Option<String>,
    cumulative_energy_harvested: i64,
    safe_mode_until: u64,
    extensions: BTreeMap<String, ExtensionValue>,
    header_dirty: bool,
    terrain: Arc<Terrain>,
    buffer: BufferView,
    objects: Vec<ObjectView>,
    index: HashMap<ObjectId, usize>,
    serial: u64,
}

impl std::fmt::Debug for RoomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomState")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("objects", &self.index.len())
            .finish()
    }
}

impl RoomState {
    pub(crate) fn hydrate(
        header: RoomHeader,
        coord: RoomCoord,
        buffer: BufferView,
        objects: Vec<ObjectView>,
    ) -> Self {
        let index = objects
            .iter()
            .enumerate()
            .map(|(slot, object)| (object.id(), slot))
            .collect();
        Self {
            name: header.name,
            coord,
            time: 0,
            owner: header.owner,
            cumulative_energy_harvested: header.cumulative_energy_harvested,
            safe_mode_until: header.safe_mode_until,
            extensions: header.extensions,
            header_dirty: false,
            terrain: Arc::new(Terrain::plain()),
            buffer,
            objects,
            index,
            serial: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coord(&self) -> RoomCoord {
        self.coord
    }

    /// Tick the room is being processed for. Seeds new object ids.
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn set_time(&mut self, time: u64) {
        self.time = time;
        self.serial = 0;
    }

    pub fn terrain(&self) -> &Terrain {
        &self.terrain
    }

    pub fn set_terrain(&mut self, terrain: Arc<Terrain>) {
        self.terrain = terrain;
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub(crate) fn set_owner(&mut self, owner: Option<String>) {
        self.owner = owner;
        self.header_dirty = true;
    }

    pub fn cumulative_energy_harvested(&self) -> i64 {
        self.cumulative_energy_harvested
    }

    pub(crate) fn set_cumulative_energy_harvested(&mut self, amount: i64) {
        self.cumulative_energy_harvested = amount;
        self.header_dirty = true;
    }

    pub fn safe_mode_until(&self) -> u64 {
        self.safe_mode_until
    }

    pub(crate) fn set_safe_mode_until(&mut self, time: u64) {
        self.safe_mode_until = time;
        self.header_dirty = true;
    }

    pub fn extension(&self, name: &str) -> Option<&ExtensionValue> {
        self.extensions.get(name)
    }

    pub(crate) fn set_extension(&mut self, name: &str, value: ExtensionValue) {
        if self.extensions.get(name) != Some(&value) {
            self.extensions.insert(name.to_string(), value);
            self.header_dirty = true;
        }
    }

    pub(crate) fn header(&self) -> RoomHeader {
        RoomHeader {
            name: self.name.clone(),
            owner: self.owner.clone(),
            cumulative_energy_harvested: self.cumulative_energy_harvested,
            safe_mode_until: self.safe_mode_until,
            extensions: self.extensions.clone(),
        }
    }

    /// Live objects in insertion order.
    pub fn objects(&self) -> impl Iterator<Item = &ObjectView> {
        self.objects
            .iter()
            .enumerate()
            .filter(|(slot, object)| self.index.get(&object.id()) == Some(slot))
            .map(|(_, object)| object)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, id: ObjectId) -> Option<&ObjectView> {
        self.index.get(&id).map(|slot| &self.objects[*slot])
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn objects_at(&self, x: u8, y: u8) -> Result<Vec<ObjectView>, BufferError> {
        let mut found = Vec::new();
        for object in self.objects() {
            let pos = object.pos()?;
            if pos.x() == x && pos.y() == y {
                found.push(object.clone());
            }
        }
        Ok(found)
    }

    /// Derives a fresh id from the room name, tick and a per-tick serial.
    pub(crate) fn next_id(&mut self) -> ObjectId {
        loop {
            let mut hasher = blake3::Hasher::new();
            hasher.update(self.name.as_bytes());
            hasher.update(&self.time.to_le_bytes());
            hasher.update(&self.serial.to_le_bytes());
            self.serial += 1;
            let digest = hasher.finalize();
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest.as_bytes()[..8]);
            let id = ObjectId(u64::from_le_bytes(head));
            if id.0 != 0 && !self.index.contains_key(&id) {
                return id;
            }
        }
    }

    pub(crate) fn insert(&mut self, object: NewObject) -> Result<ObjectView, CodecError> {
        if object.pos.room() != self.coord {
            return Err(CodecError::MalformedRecord {
                offset: 0,
                reason: format!("{} lies outside room {}", object.pos, self.name),
            });
        }
        if self.index.contains_key(&object.id) {
            return Err(CodecError::DuplicateId { id: object.id });
        }
        let kind = object.kind();
        let record = encode_record(&object)?;
        let offset = self.buffer.append(&record)?;
        let view = ObjectView::new(self.buffer.clone(), offset, kind, object.id);
        self.index.insert(object.id, self.objects.len());
        self.objects.push(view.clone());
        Ok(view)
    }

    /// Marks the object removed. Handles to it keep reading its last state.
    pub(crate) fn remove(&mut self, id: ObjectId) -> Result<bool, BufferError> {
        let Some(slot) = self.index.remove(&id) else {
            return Ok(false);
        };
        self.objects[slot].mark_removed()?;
        Ok(true)
    }

    /// Records a change the buffer does not see.
    pub(crate) fn did_update(&mut self) {
        self.header_dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.header_dirty || self.buffer.is_dirty()
    }

    pub fn buffer(&self, _access: &InternalAccess) -> &BufferView {
        &self.buffer
    }

    pub fn detach(&self, access: &InternalAccess, reason: &str) -> bool {
        self.buffer.detach(access, reason)
    }

    pub fn view(&self) -> RoomView {
        RoomView {
            inner: Arc::new(RoomViewInner {
                name: self.name.clone(),
                owner: self.owner.clone(),
                safe_mode_until: self.safe_mode_until,
                extensions: self.extensions.clone(),
                terrain: self.terrain.clone(),
                objects: self.objects().cloned().collect(),
            }),
        }
    }
}

struct RoomViewInner {
    name: String,
    owner: Option<String>,
    safe_mode_until: u64,
    extensions: BTreeMap<String, ExtensionValue>,
    terrain: Arc<Terrain>,
    objects: Vec<ObjectView>,
}

/// Read-only snapshot of a room taken before sandboxes run.
#[derive(Clone)]
pub struct RoomView {
    inner: Arc<RoomViewInner>,
}

impl std::fmt::Debug for RoomView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomView")
            .field("name", &self.inner.name)
            .field("objects", &self.inner.objects.len())
            .finish()
    }
}

impl RoomView {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn owner(&self) -> Option<&str> {
        self.inner.owner.as_deref()
    }

    pub fn safe_mode_until(&self) -> u64 {
        self.inner.safe_mode_until
    }

    pub fn extension(&self, name: &str) -> Option<&ExtensionValue> {
        self.inner.extensions.get(name)
    }

    pub fn terrain(&self) -> &Terrain {
        &self.inner.terrain
    }

    pub fn objects(&self) -> &[ObjectView] {
        &self.inner.objects
    }

    pub fn find(&self, id: ObjectId) -> Option<&ObjectView> {
        self.inner.objects.iter().find(|object| object.id() == id)
    }
}
