//! Room coordinates, packed positions and movement directions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const ROOM_SIZE: u8 = 50;
const HALF_WORLD: u32 = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    #[error("invalid room name {name:?}")]
    InvalidRoomName { name: String },
    #[error("coordinate ({x}, {y}) is outside the room")]
    OutOfRoom { x: u8, y: u8 },
    #[error("invalid direction {value}")]
    InvalidDirection { value: u8 },
}

/// Room coordinate in a 256x256 world. `W0` is column 127 and `E0` column 128.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomCoord {
    pub rx: u8,
    pub ry: u8,
}

impl RoomCoord {
    pub fn parse(name: &str) -> Result<Self, PositionError> {
        let invalid = || PositionError::InvalidRoomName {
            name: name.to_string(),
        };
        if !name.is_ascii() {
            return Err(invalid());
        }
        let bytes = name.as_bytes();
        let horizontal = *bytes.first().ok_or_else(invalid)?;
        let split = name[1..]
            .find(|ch: char| ch == 'N' || ch == 'S')
            .map(|index| index + 1)
            .ok_or_else(invalid)?;
        let vertical = bytes[split];
        let x: u32 = name[1..split].parse().map_err(|_| invalid())?;
        let y: u32 = name[split + 1..].parse().map_err(|_| invalid())?;
        if x >= HALF_WORLD || y >= HALF_WORLD {
            return Err(invalid());
        }
        let rx = match horizontal {
            b'W' => HALF_WORLD - 1 - x,
            b'E' => HALF_WORLD + x,
            _ => return Err(invalid()),
        };
        let ry = match vertical {
            b'N' => HALF_WORLD - 1 - y,
            b'S' => HALF_WORLD + y,
            _ => return Err(invalid()),
        };
        Ok(Self {
            rx: rx as u8,
            ry: ry as u8,
        })
    }

    /// Identifier handed to the path oracle.
    pub fn id(&self) -> u16 {
        (u16::from(self.ry) << 8) | u16::from(self.rx)
    }

    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RoomCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (rx, ry) = (u32::from(self.rx), u32::from(self.ry));
        if rx < HALF_WORLD {
            write!(f, "W{}", HALF_WORLD - 1 - rx)?;
        } else {
            write!(f, "E{}", rx - HALF_WORLD)?;
        }
        if ry < HALF_WORLD {
            write!(f, "N{}", HALF_WORLD - 1 - ry)
        } else {
            write!(f, "S{}", ry - HALF_WORLD)
        }
    }
}

impl FromStr for RoomCoord {
    type Err = PositionError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::parse(name)
    }
}

/// Position packed as `rx << 24 | ry << 16 | x << 8 | y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct RoomPosition {
    room: RoomCoord,
    x: u8,
    y: u8,
}

impl RoomPosition {
    pub fn new(room: RoomCoord, x: u8, y: u8) -> Result<Self, PositionError> {
        if x >= ROOM_SIZE || y >= ROOM_SIZE {
            return Err(PositionError::OutOfRoom { x, y });
        }
        Ok(Self { room, x, y })
    }

    pub fn in_room(room: &str, x: u8, y: u8) -> Result<Self, PositionError> {
        Self::new(RoomCoord::parse(room)?, x, y)
    }

    pub fn from_packed(packed: u32) -> Result<Self, PositionError> {
        let [rx, ry, x, y] = packed.to_be_bytes();
        Self::new(RoomCoord { rx, ry }, x, y)
    }

    pub fn packed(&self) -> u32 {
        u32::from_be_bytes([self.room.rx, self.room.ry, self.x, self.y])
    }

    pub fn room(&self) -> RoomCoord {
        self.room
    }

    pub fn room_name(&self) -> String {
        self.room.name()
    }

    pub fn x(&self) -> u8 {
        self.x
    }

    pub fn y(&self) -> u8 {
        self.y
    }

    fn world_xy(&self) -> (i64, i64) {
        (
            i64::from(self.room.rx) * i64::from(ROOM_SIZE) + i64::from(self.x),
            i64::from(self.room.ry) * i64::from(ROOM_SIZE) + i64::from(self.y),
        )
    }

    /// Chebyshev distance in world tiles.
    pub fn range_to(&self, other: &RoomPosition) -> u32 {
        let (ax, ay) = self.world_xy();
        let (bx, by) = other.world_xy();
        (ax - bx).abs().max((ay - by).abs()) as u32
    }

    pub fn is_near_to(&self, other: &RoomPosition) -> bool {
        self.range_to(other) <= 1
    }

    /// Straight-line direction toward `other`, `None` when they coincide.
    pub fn direction_to(&self, other: &RoomPosition) -> Option<Direction> {
        let (ax, ay) = self.world_xy();
        let (bx, by) = other.world_xy();
        let offset = ((bx - ax).signum() as i8, (by - ay).signum() as i8);
        Direction::ALL
            .into_iter()
            .find(|direction| direction.offset() == offset)
    }

    /// Adjacent position in `direction`, or `None` when it would leave the room.
    pub fn step(&self, direction: Direction) -> Option<RoomPosition> {
        let (dx, dy) = direction.offset();
        let x = i16::from(self.x) + i16::from(dx);
        let y = i16::from(self.y) + i16::from(dy);
        let limit = i16::from(ROOM_SIZE);
        if !(0..limit).contains(&x) || !(0..limit).contains(&y) {
            return None;
        }
        Some(Self {
            room: self.room,
            x: x as u8,
            y: y as u8,
        })
    }
}

impl From<RoomPosition> for u32 {
    fn from(pos: RoomPosition) -> Self {
        pos.packed()
    }
}

impl TryFrom<u32> for RoomPosition {
    type Error = PositionError;

    fn try_from(packed: u32) -> Result<Self, Self::Error> {
        Self::from_packed(packed)
    }
}

impl fmt::Display for RoomPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[room {} pos {},{}]", self.room, self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Direction {
    Top = 1,
    TopRight = 2,
    Right = 3,
    BottomRight = 4,
    Bottom = 5,
    BottomLeft = 6,
    Left = 7,
    TopLeft = 8,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::Top,
        Direction::TopRight,
        Direction::Right,
        Direction::BottomRight,
        Direction::Bottom,
        Direction::BottomLeft,
        Direction::Left,
        Direction::TopLeft,
    ];

    pub fn offset(self) -> (i8, i8) {
        match self {
            Direction::Top => (0, -1),
            Direction::TopRight => (1, -1),
            Direction::Right => (1, 0),
            Direction::BottomRight => (1, 1),
            Direction::Bottom => (0, 1),
            Direction::BottomLeft => (-1, 1),
            Direction::Left => (-1, 0),
            Direction::TopLeft => (-1, -1),
        }
    }
}

impl From<Direction> for u8 {
    fn from(direction: Direction) -> Self {
        direction as u8
    }
}

impl TryFrom<u8> for Direction {
    type Error = PositionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Direction::ALL
            .get(usize::from(value).wrapping_sub(1))
            .copied()
            .ok_or(PositionError::InvalidDirection { value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_names_round_trip() {
        for name in ["W0N0", "E0S0", "W127N127", "E12S3", "W5N5"] {
            let coord = RoomCoord::parse(name).unwrap();
            assert_eq!(coord.name(), name);
        }
        assert_eq!(RoomCoord::parse("W0N0").unwrap(), RoomCoord { rx: 127, ry: 127 });
        assert_eq!(RoomCoord::parse("E0S0").unwrap(), RoomCoord { rx: 128, ry: 128 });
    }

    #[test]
    fn malformed_room_names_are_rejected() {
        for name in ["", "X1N1", "W1", "W1X1", "W128N0", "WN1", "W1N"] {
            assert!(RoomCoord::parse(name).is_err(), "{name} should be rejected");
        }
    }

    #[test]
    fn packed_positions_round_trip_and_validate() {
        let pos = RoomPosition::in_room("E3S7", 12, 49).unwrap();
        assert_eq!(RoomPosition::from_packed(pos.packed()).unwrap(), pos);
        assert!(RoomPosition::from_packed(0x8080_3200).is_err());
        assert!(RoomPosition::in_room("W1N1", 50, 0).is_err());
    }

    #[test]
    fn steps_stay_inside_the_room() {
        let corner = RoomPosition::in_room("W1N1", 0, 0).unwrap();
        assert_eq!(corner.step(Direction::Top), None);
        assert_eq!(corner.step(Direction::Left), None);
        let next = corner.step(Direction::BottomRight).unwrap();
        assert_eq!((next.x(), next.y()), (1, 1));
        assert_eq!(corner.range_to(&next), 1);
    }

    #[test]
    fn directions_deserialize_from_numbers() {
        let direction: Direction = serde_json::from_str("3").unwrap();
        assert_eq!(direction, Direction::Right);
        assert!(serde_json::from_str::<Direction>("0").is_err());
        assert!(serde_json::from_str::<Direction>("9").is_err());
        assert_eq!(serde_json::to_string(&Direction::TopLeft).unwrap(), "8");
    }

    #[test]
    fn direction_to_points_along_the_offset() {
        let origin = RoomPosition::in_room("W1N1", 10, 10).unwrap();
        let east = RoomPosition::in_room("W1N1", 14, 10).unwrap();
        let north_west = RoomPosition::in_room("W1N1", 7, 2).unwrap();
        assert_eq!(origin.direction_to(&east), Some(Direction::Right));
        assert_eq!(origin.direction_to(&north_west), Some(Direction::TopLeft));
        assert_eq!(origin.direction_to(&origin), None);
    }
}
