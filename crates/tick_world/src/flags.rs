//! Per-participant flags.
//!
//! Flags are markers a participant places on the map. They live outside room
//! state: each participant owns one [`FlagSet`], persisted as a CBOR blob and
//! changed only through `flags` intents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::position::{PositionError, RoomPosition};
use crate::processor::{Check, ReturnCode};

pub const MAX_FLAGS: usize = 10_000;
pub const MAX_FLAG_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FlagColor {
    Red = 1,
    Purple = 2,
    Blue = 3,
    Cyan = 4,
    Green = 5,
    Yellow = 6,
    Orange = 7,
    Brown = 8,
    Grey = 9,
    White = 10,
}

impl From<FlagColor> for u8 {
    fn from(color: FlagColor) -> Self {
        color as u8
    }
}

impl TryFrom<u8> for FlagColor {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => FlagColor::Red,
            2 => FlagColor::Purple,
            3 => FlagColor::Blue,
            4 => FlagColor::Cyan,
            5 => FlagColor::Green,
            6 => FlagColor::Yellow,
            7 => FlagColor::Orange,
            8 => FlagColor::Brown,
            9 => FlagColor::Grey,
            10 => FlagColor::White,
            other => return Err(format!("invalid flag color {other}")),
        })
    }
}

fn default_color() -> FlagColor {
    FlagColor::White
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
    pub name: String,
    pub pos: RoomPosition,
    pub color: FlagColor,
    pub secondary_color: FlagColor,
}

/// A decoded `flags` intent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "intent", content = "params", rename_all = "camelCase")]
pub enum FlagIntent {
    #[serde(rename_all = "camelCase")]
    Create {
        name: String,
        room: String,
        x: u8,
        y: u8,
        #[serde(default = "default_color")]
        color: FlagColor,
        #[serde(default)]
        secondary_color: Option<FlagColor>,
    },
    Remove { name: String },
    #[serde(rename_all = "camelCase")]
    SetColor {
        name: String,
        color: FlagColor,
        #[serde(default)]
        secondary_color: Option<FlagColor>,
    },
    SetPosition { name: String, room: String, x: u8, y: u8 },
}

impl FlagIntent {
    /// Decodes `verb` and its parameters. `None` for unknown verbs or bad params.
    pub fn decode(verb: &str, params: &JsonValue) -> Option<Self> {
        let envelope = serde_json::json!({ "intent": verb, "params": params });
        serde_json::from_value(envelope).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlagBlobError {
    #[error("flag blob encode failed: {0}")]
    Encode(String),
    #[error("flag blob decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSet {
    flags: BTreeMap<String, Flag>,
}

fn position(room: &str, x: u8, y: u8) -> Result<RoomPosition, PositionError> {
    RoomPosition::in_room(room, x, y)
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Flag> {
        self.flags.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.flags.values()
    }

    pub fn apply(&mut self, intent: FlagIntent) -> Check {
        match intent {
            FlagIntent::Create {
                name,
                room,
                x,
                y,
                color,
                secondary_color,
            } => {
                if name.is_empty() || name.len() > MAX_FLAG_NAME_LEN {
                    return Err(ReturnCode::InvalidArgs);
                }
                if self.flags.contains_key(&name) {
                    return Err(ReturnCode::NameExists);
                }
                if self.flags.len() >= MAX_FLAGS {
                    return Err(ReturnCode::Full);
                }
                let pos = position(&room, x, y).map_err(|_| ReturnCode::InvalidArgs)?;
                self.flags.insert(
                    name.clone(),
                    Flag {
                        name,
                        pos,
                        color,
                        secondary_color: secondary_color.unwrap_or(color),
                    },
                );
            }
            FlagIntent::Remove { name } => {
                self.flags.remove(&name).ok_or(ReturnCode::NotFound)?;
            }
            FlagIntent::SetColor {
                name,
                color,
                secondary_color,
            } => {
                let flag = self.flags.get_mut(&name).ok_or(ReturnCode::NotFound)?;
                flag.color = color;
                flag.secondary_color = secondary_color.unwrap_or(color);
            }
            FlagIntent::SetPosition { name, room, x, y } => {
                let pos = position(&room, x, y).map_err(|_| ReturnCode::InvalidArgs)?;
                let flag = self.flags.get_mut(&name).ok_or(ReturnCode::NotFound)?;
                flag.pos = pos;
            }
        }
        Ok(())
    }

    pub fn to_blob(&self) -> Result<Vec<u8>, FlagBlobError> {
        serde_cbor::to_vec(self).map_err(|err| FlagBlobError::Encode(err.to_string()))
    }

    pub fn from_blob(bytes: &[u8]) -> Result<Self, FlagBlobError> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        serde_cbor::from_slice(bytes).map_err(|err| FlagBlobError::Decode(err.to_string()))
    }
}
