//! Tick-scoped movement requests and their resolution.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::ProcessorError;
use crate::objects::{ObjectId, ObjectKind};
use crate::position::RoomPosition;
use crate::room::RoomState;

/// Requested and approved creep moves for one room pass.
#[derive(Debug, Clone, Default)]
pub struct MovementQueue {
    requests: Vec<(ObjectId, RoomPosition)>,
    approved: HashMap<ObjectId, RoomPosition>,
}

impl MovementQueue {
    /// Queues a move. A later request from the same creep replaces the earlier one.
    pub fn add(&mut self, creep: ObjectId, destination: RoomPosition) {
        match self.requests.iter_mut().find(|(id, _)| *id == creep) {
            Some(request) => request.1 = destination,
            None => self.requests.push((creep, destination)),
        }
    }

    pub fn requested(&self, creep: ObjectId) -> Option<RoomPosition> {
        self.requests
            .iter()
            .find(|(id, _)| *id == creep)
            .map(|(_, destination)| *destination)
    }

    /// Approved destination, available once the queue has been resolved.
    pub fn get(&self, creep: ObjectId) -> Option<RoomPosition> {
        self.approved.get(&creep).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Approves the moves that can happen together.
    ///
    /// Walls and obstacle structures block outright. When several creeps want
    /// the same tile the earliest request wins. A creep may only enter a tile
    /// held by another creep if that creep leaves it this tick; rejections
    /// cascade until nothing changes.
    pub fn resolve(&mut self, room: &RoomState) -> Result<(), ProcessorError> {
        let mut blocked_tiles = HashSet::new();
        let mut creep_tiles: HashMap<(u8, u8), Vec<ObjectId>> = HashMap::new();
        for object in room.objects() {
            let pos = object.pos()?;
            if object.kind().is_obstacle() {
                blocked_tiles.insert((pos.x(), pos.y()));
            } else if object.kind() == ObjectKind::Creep {
                creep_tiles.entry((pos.x(), pos.y())).or_default().push(object.id());
            }
        }

        let mut moving: Vec<(ObjectId, RoomPosition)> = self
            .requests
            .iter()
            .filter(|(id, destination)| {
                room.contains(*id)
                    && room.terrain().is_walkable(destination.x(), destination.y())
                    && !blocked_tiles.contains(&(destination.x(), destination.y()))
            })
            .copied()
            .collect();

        loop {
            let before = moving.len();

            let mut claimed: BTreeMap<(u8, u8), ObjectId> = BTreeMap::new();
            moving.retain(|(id, destination)| {
                let tile = (destination.x(), destination.y());
                match claimed.get(&tile) {
                    Some(winner) => winner == id,
                    None => {
                        claimed.insert(tile, *id);
                        true
                    }
                }
            });

            let movers: HashSet<ObjectId> = moving.iter().map(|(id, _)| *id).collect();
            moving.retain(|(id, destination)| {
                creep_tiles
                    .get(&(destination.x(), destination.y()))
                    .map_or(true, |occupants| {
                        occupants
                            .iter()
                            .all(|occupant| occupant == id || movers.contains(occupant))
                    })
            });

            if moving.len() == before {
                break;
            }
        }

        self.approved = moving.into_iter().collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{BodyPart, BodyPartType, StoreSpec};
    use crate::schema::{read, NewObject, ObjectSpec, RoomBuilder, SchemaRegistry};
    use crate::terrain::{Terrain, TerrainType};
    use std::sync::Arc;

    fn pos(x: u8, y: u8) -> RoomPosition {
        RoomPosition::in_room("W1N1", x, y).unwrap()
    }

    fn creep(id: u64, x: u8, y: u8) -> NewObject {
        NewObject::creep(
            ObjectId(id),
            pos(x, y),
            "amy",
            &format!("c{id}"),
            vec![BodyPart::new(BodyPartType::Move)],
            StoreSpec::default(),
        )
    }

    fn room(objects: Vec<NewObject>) -> RoomState {
        let mut builder = RoomBuilder::new("W1N1").unwrap();
        for object in objects {
            builder = builder.object(object).unwrap();
        }
        let mut room = read(&SchemaRegistry::new(), builder.build().unwrap()).unwrap();
        room.set_terrain(Arc::new(Terrain::plain().with(9, 9, TerrainType::Wall)));
        room
    }

    #[test]
    fn contested_tile_goes_to_earliest_request() {
        let room = room(vec![creep(1, 5, 5), creep(2, 7, 5)]);
        let mut queue = MovementQueue::default();
        queue.add(ObjectId(2), pos(6, 5));
        queue.add(ObjectId(1), pos(6, 5));
        queue.resolve(&room).unwrap();
        assert_eq!(queue.get(ObjectId(2)), Some(pos(6, 5)));
        assert_eq!(queue.get(ObjectId(1)), None);
    }

    #[test]
    fn walls_obstacles_and_stationary_creeps_block() {
        let room = room(vec![
            creep(1, 8, 8),
            creep(2, 3, 3),
            creep(3, 3, 4),
            creep(4, 20, 20),
            NewObject::new(
                ObjectId(9),
                pos(21, 21),
                ObjectSpec::Source {
                    energy: 0,
                    capacity: 3000,
                    next_regeneration_time: 0,
                },
            ),
        ]);
        let mut queue = MovementQueue::default();
        queue.add(ObjectId(1), pos(9, 9));
        queue.add(ObjectId(2), pos(3, 4));
        queue.add(ObjectId(4), pos(21, 21));
        queue.resolve(&room).unwrap();
        assert_eq!(queue.get(ObjectId(1)), None);
        assert_eq!(queue.get(ObjectId(2)), None);
        assert_eq!(queue.get(ObjectId(4)), None);
    }

    #[test]
    fn creeps_may_follow_and_swap() {
        let room = room(vec![creep(1, 5, 5), creep(2, 6, 5), creep(3, 10, 10), creep(4, 11, 10)]);
        let mut queue = MovementQueue::default();
        queue.add(ObjectId(1), pos(6, 5));
        queue.add(ObjectId(2), pos(7, 5));
        queue.add(ObjectId(3), pos(11, 10));
        queue.add(ObjectId(4), pos(10, 10));
        queue.resolve(&room).unwrap();
        assert_eq!(queue.get(ObjectId(1)), Some(pos(6, 5)));
        assert_eq!(queue.get(ObjectId(2)), Some(pos(7, 5)));
        assert_eq!(queue.get(ObjectId(3)), Some(pos(11, 10)));
        assert_eq!(queue.get(ObjectId(4)), Some(pos(10, 10)));
    }

    #[test]
    fn blocked_leader_blocks_the_chain() {
        let room = room(vec![creep(1, 5, 5), creep(2, 6, 5), creep(3, 7, 5)]);
        let mut queue = MovementQueue::default();
        queue.add(ObjectId(1), pos(6, 5));
        queue.add(ObjectId(2), pos(7, 5));
        queue.resolve(&room).unwrap();
        assert_eq!(queue.get(ObjectId(2)), None);
        assert_eq!(queue.get(ObjectId(1)), None);
    }
}
