//! Per-tick read context shared by every sandbox.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use tick_world_abi::{IntentReceiver, RunnerIntent};

use crate::objects::{ObjectId, ObjectView};
use crate::pathfinder::{self, RoomCallback, SearchGoal, SearchOptions, SearchOracle, SearchResult};
use crate::position::RoomPosition;
use crate::room::RoomView;

/// Where an accepted intent is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntentRoute {
    Flags,
    Room { room: String },
    Object { room: String, id: ObjectId },
}

/// Why an intent never reached a room.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DroppedIntent {
    #[error("unknown receiver {receiver}")]
    UnknownReceiver { receiver: String },
    #[error("room {room} is not part of this tick")]
    UnknownRoom { room: String },
    #[error("{verb} is reserved for the host")]
    InternalVerb { verb: String },
}

/// Time, room snapshots and the object id index for one tick.
#[derive(Clone, Default)]
pub struct WorldContext {
    time: u64,
    rooms: BTreeMap<String, RoomView>,
    blobs: BTreeMap<String, Arc<Vec<u8>>>,
    index: HashMap<ObjectId, String>,
    internal_room_verbs: BTreeSet<String>,
    oracle: Option<Arc<dyn SearchOracle>>,
}

impl fmt::Debug for WorldContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldContext")
            .field("time", &self.time)
            .field("rooms", &self.rooms.keys().collect::<Vec<_>>())
            .field("objects", &self.index.len())
            .field("oracle", &self.oracle.is_some())
            .finish()
    }
}

impl WorldContext {
    pub fn new(time: u64) -> Self {
        Self {
            time,
            ..Self::default()
        }
    }

    pub fn with_internal_room_verbs<I, S>(mut self, verbs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.internal_room_verbs = verbs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn SearchOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Adds a room snapshot and the blob it was read from.
    pub fn add_room(&mut self, view: RoomView, blob: Arc<Vec<u8>>) {
        let name = view.name().to_string();
        for object in view.objects() {
            self.index.insert(object.id(), name.clone());
        }
        self.blobs.insert(name.clone(), blob);
        self.rooms.insert(name, view);
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn room_names(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    pub fn room(&self, name: &str) -> Option<&RoomView> {
        self.rooms.get(name)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &RoomView> {
        self.rooms.values()
    }

    pub fn room_blob(&self, name: &str) -> Option<Arc<Vec<u8>>> {
        self.blobs.get(name).cloned()
    }

    pub fn room_of(&self, id: ObjectId) -> Option<&str> {
        self.index.get(&id).map(String::as_str)
    }

    pub fn find(&self, id: ObjectId) -> Option<&ObjectView> {
        self.rooms.get(self.room_of(id)?)?.find(id)
    }

    pub fn is_internal_room_verb(&self, verb: &str) -> bool {
        self.internal_room_verbs.contains(verb)
    }

    /// Resolves an intent's receiver against this tick's rooms and objects.
    pub fn route(&self, intent: &RunnerIntent) -> Result<IntentRoute, DroppedIntent> {
        match intent.target() {
            IntentReceiver::Flags => Ok(IntentRoute::Flags),
            IntentReceiver::Room(room) => {
                if !self.rooms.contains_key(room) {
                    return Err(DroppedIntent::UnknownRoom {
                        room: room.to_string(),
                    });
                }
                if self.is_internal_room_verb(&intent.intent) {
                    return Err(DroppedIntent::InternalVerb {
                        verb: intent.intent.clone(),
                    });
                }
                Ok(IntentRoute::Room {
                    room: room.to_string(),
                })
            }
            IntentReceiver::Object(receiver) => {
                let unknown = || DroppedIntent::UnknownReceiver {
                    receiver: receiver.to_string(),
                };
                let id: ObjectId = receiver.parse().map_err(|_| unknown())?;
                let room = self.room_of(id).ok_or_else(unknown)?;
                Ok(IntentRoute::Object {
                    room: room.to_string(),
                    id,
                })
            }
        }
    }

    /// Routes a host-injected intent. Internal verbs are allowed here.
    pub fn route_trusted(&self, intent: &RunnerIntent) -> Result<IntentRoute, DroppedIntent> {
        match intent.target() {
            IntentReceiver::Room(room) if self.rooms.contains_key(room) => Ok(IntentRoute::Room {
                room: room.to_string(),
            }),
            _ => self.route(intent),
        }
    }

    /// Path search through the configured oracle, if any.
    pub fn search(
        &self,
        origin: RoomPosition,
        goals: &[SearchGoal],
        room_callback: Option<RoomCallback<'_>>,
        options: &SearchOptions,
    ) -> Option<SearchResult> {
        let oracle = self.oracle.as_deref()?;
        Some(pathfinder::search(oracle, origin, goals, room_callback, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{read, NewObject, ObjectSpec, RoomBuilder, SchemaRegistry};
    use serde_json::json;

    fn world() -> WorldContext {
        let blob = RoomBuilder::new("W1N1")
            .unwrap()
            .object(NewObject::new(
                ObjectId(0xab),
                RoomPosition::in_room("W1N1", 3, 3).unwrap(),
                ObjectSpec::Road { next_decay_time: 0 },
            ))
            .unwrap()
            .build()
            .unwrap();
        let room = read(&SchemaRegistry::new(), blob.clone()).unwrap();
        let mut world = WorldContext::new(12).with_internal_room_verbs(["placeSpawn"]);
        world.add_room(room.view(), Arc::new(blob));
        world
    }

    #[test]
    fn routes_objects_rooms_and_flags() {
        let world = world();
        assert_eq!(
            world.route(&RunnerIntent::new("00000000000000ab", "move", json!({}))),
            Ok(IntentRoute::Object {
                room: "W1N1".to_string(),
                id: ObjectId(0xab),
            })
        );
        assert_eq!(
            world.route(&RunnerIntent::for_room("W1N1", "createConstructionSite", json!({}))),
            Ok(IntentRoute::Room {
                room: "W1N1".to_string()
            })
        );
        assert_eq!(
            world.route(&RunnerIntent::for_flags("create", json!({}))),
            Ok(IntentRoute::Flags)
        );
        assert!(world.find(ObjectId(0xab)).is_some());
    }

    #[test]
    fn drops_unknown_receivers_and_internal_verbs() {
        let world = world();
        assert!(matches!(
            world.route(&RunnerIntent::new("ffff", "move", json!({}))),
            Err(DroppedIntent::UnknownReceiver { .. })
        ));
        assert!(matches!(
            world.route(&RunnerIntent::new("not-an-id", "move", json!({}))),
            Err(DroppedIntent::UnknownReceiver { .. })
        ));
        assert!(matches!(
            world.route(&RunnerIntent::for_room("W9N9", "createConstructionSite", json!({}))),
            Err(DroppedIntent::UnknownRoom { .. })
        ));
        let claim = RunnerIntent::for_room("W1N1", "placeSpawn", json!({}));
        assert!(matches!(
            world.route(&claim),
            Err(DroppedIntent::InternalVerb { .. })
        ));
        assert!(world.route_trusted(&claim).is_ok());
    }
}
