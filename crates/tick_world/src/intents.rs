//! Intents grouped for one room, as handed to the processor and persisted as a
//! per-room intent blob.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tick_world_abi::ParticipantId;

use crate::objects::ObjectId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentSubmission {
    pub participant: ParticipantId,
    #[serde(default)]
    pub params: JsonValue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomIntents {
    /// Room-level verbs.
    #[serde(default)]
    pub room: BTreeMap<String, Vec<IntentSubmission>>,
    /// Object id, then verb.
    #[serde(default)]
    pub objects: BTreeMap<ObjectId, BTreeMap<String, Vec<IntentSubmission>>>,
}

#[derive(Debug, thiserror::Error)]
#[error("intent blob: {message}")]
pub struct IntentBlobError {
    pub message: String,
}

impl RoomIntents {
    pub fn is_empty(&self) -> bool {
        self.room.is_empty() && self.objects.is_empty()
    }

    pub fn push_room(&mut self, participant: &str, verb: &str, params: JsonValue) {
        self.room
            .entry(verb.to_string())
            .or_default()
            .push(IntentSubmission {
                participant: participant.to_string(),
                params,
            });
    }

    pub fn push_object(&mut self, participant: &str, id: ObjectId, verb: &str, params: JsonValue) {
        self.objects
            .entry(id)
            .or_default()
            .entry(verb.to_string())
            .or_default()
            .push(IntentSubmission {
                participant: participant.to_string(),
                params,
            });
    }

    /// Total number of submissions.
    pub fn len(&self) -> usize {
        let room: usize = self.room.values().map(Vec::len).sum();
        let objects: usize = self
            .objects
            .values()
            .flat_map(|verbs| verbs.values())
            .map(Vec::len)
            .sum();
        room + objects
    }

    /// Puts every submission list in participant order. The sort is stable, so
    /// one participant's repeated submissions keep their order.
    pub fn normalize(&mut self) {
        let lists = self
            .room
            .values_mut()
            .chain(self.objects.values_mut().flat_map(|verbs| verbs.values_mut()));
        for list in lists {
            list.sort_by(|a, b| a.participant.cmp(&b.participant));
        }
    }

    pub fn merge(&mut self, other: RoomIntents) {
        for (verb, submissions) in other.room {
            self.room.entry(verb).or_default().extend(submissions);
        }
        for (id, verbs) in other.objects {
            let target = self.objects.entry(id).or_default();
            for (verb, submissions) in verbs {
                target.entry(verb).or_default().extend(submissions);
            }
        }
    }

    pub fn to_blob(&self) -> Result<Vec<u8>, IntentBlobError> {
        serde_cbor::to_vec(self).map_err(|err| IntentBlobError {
            message: err.to_string(),
        })
    }

    pub fn from_blob(bytes: &[u8]) -> Result<Self, IntentBlobError> {
        serde_cbor::from_slice(bytes).map_err(|err| IntentBlobError {
            message: err.to_string(),
        })
    }
}
