//! Room blob schema: layout constants, the room codec and the record builder.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod builder;
pub mod codec;
pub mod layout;

pub use builder::{encode_record, NewObject, ObjectSpec, RoomBuilder};
pub use codec::{read, write, CodecError};

/// Value of a room extension field declared by an add-on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtensionValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl ExtensionValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ExtensionValue::Bool(_) => "bool",
            ExtensionValue::Int(_) => "int",
            ExtensionValue::Text(_) => "text",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ExtensionValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ExtensionValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ExtensionValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for ExtensionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionValue::Bool(value) => write!(f, "{value}"),
            ExtensionValue::Int(value) => write!(f, "{value}"),
            ExtensionValue::Text(value) => f.write_str(value),
        }
    }
}

/// Room-scoped state stored ahead of the object records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomHeader {
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub cumulative_energy_harvested: i64,
    #[serde(default)]
    pub safe_mode_until: u64,
    #[serde(default)]
    pub extensions: BTreeMap<String, ExtensionValue>,
}

/// Extension fields known to the running engine.
///
/// Add-ons register their room fields once at startup. The codec fills
/// registered fields missing from a blob with their default and keeps fields it
/// does not know about untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRegistry {
    room_fields: BTreeMap<String, ExtensionValue>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_room_field(&mut self, name: impl Into<String>, default: ExtensionValue) -> &mut Self {
        self.room_fields.insert(name.into(), default);
        self
    }

    pub fn room_field(&self, name: &str) -> Option<&ExtensionValue> {
        self.room_fields.get(name)
    }

    pub fn room_fields(&self) -> impl Iterator<Item = (&str, &ExtensionValue)> {
        self.room_fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_values_keep_their_type_through_cbor() {
        let mut header = RoomHeader {
            name: "W1N1".to_string(),
            ..RoomHeader::default()
        };
        header
            .extensions
            .insert("flag".to_string(), ExtensionValue::Bool(true));
        header
            .extensions
            .insert("count".to_string(), ExtensionValue::Int(-3));
        header
            .extensions
            .insert("label".to_string(), ExtensionValue::Text("x".to_string()));

        let bytes = serde_cbor::to_vec(&header).unwrap();
        let decoded: RoomHeader = serde_cbor::from_slice(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn registry_overwrites_defaults_by_name() {
        let mut registry = SchemaRegistry::new();
        registry
            .register_room_field("autoSpawn", ExtensionValue::Bool(false))
            .register_room_field("autoSpawn", ExtensionValue::Bool(true));
        assert_eq!(
            registry.room_field("autoSpawn"),
            Some(&ExtensionValue::Bool(true))
        );
        assert_eq!(registry.room_fields().count(), 1);
    }
}
