//! One world tick: sandboxes, intent routing, room passes, serialization.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tick_world_abi::{ParticipantId, RoomName, RunnerIntent, SandboxFault};

use crate::buffer::InternalAccess;
use crate::config::DriverConfig;
use crate::flags::{FlagBlobError, FlagIntent, FlagSet};
use crate::intents::{IntentBlobError, RoomIntents};
use crate::pathfinder::SearchOracle;
use crate::processor::{ProcessorError, ProcessorRegistry, ProcessorStats};
use crate::room::RoomState;
use crate::rules::GameRules;
use crate::sandbox::{ConsoleOutput, Sandbox, SandboxTickOutput};
use crate::schema::{read, write, CodecError};
use crate::terrain::Terrain;
use crate::world::{IntentRoute, WorldContext};

const RELEASED_PREFIX: &str = "Accessed a released object from a previous tick";

/// Detach reason for every buffer hydrated at `time`.
pub fn released_reason(time: u64) -> String {
    format!("{RELEASED_PREFIX}[{time}]")
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("room {room}: {source}")]
    Codec { room: RoomName, source: CodecError },
    #[error("room blob stored as {room} is named {found}")]
    RoomNameMismatch { room: RoomName, found: RoomName },
    #[error("room {room}: {source}")]
    Processor { room: RoomName, source: ProcessorError },
    #[error(transparent)]
    IntentBlob(#[from] IntentBlobError),
    #[error("flags of {participant}: {source}")]
    FlagBlob {
        participant: ParticipantId,
        source: FlagBlobError,
    },
}

/// Intent submitted from outside any sandbox, such as a console command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalIntent {
    pub participant: ParticipantId,
    #[serde(flatten)]
    pub intent: RunnerIntent,
}

#[derive(Debug, Clone, Default)]
pub struct TickInput {
    pub time: u64,
    pub rooms: BTreeMap<RoomName, Vec<u8>>,
    pub terrain: BTreeMap<RoomName, Arc<Terrain>>,
    pub console_eval: BTreeMap<ParticipantId, Vec<String>>,
    pub external_intents: Vec<ExternalIntent>,
    /// Flag blobs from the previous tick.
    pub flags: BTreeMap<ParticipantId, Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct ParticipantArtifacts {
    pub console: ConsoleOutput,
    /// `None` when the participant had no sandbox this tick.
    pub memory: Option<Vec<u8>>,
    /// Set only when a flag intent ran.
    pub flags: Option<Vec<u8>>,
    pub visuals: BTreeMap<RoomName, Vec<String>>,
    /// This participant's intents, one CBOR blob per room.
    pub intents: BTreeMap<RoomName, Vec<u8>>,
    pub fault: Option<SandboxFault>,
    pub fuel_used: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickStats {
    pub rooms: usize,
    pub participants: usize,
    pub faults: usize,
    pub intents_routed: u64,
    pub intents_dropped: u64,
    pub flag_intents: u64,
    pub flag_rejections: u64,
    pub processor: ProcessorStats,
    pub per_room: BTreeMap<RoomName, ProcessorStats>,
}

#[derive(Debug, Clone, Default)]
pub struct TickOutput {
    pub time: u64,
    pub rooms: BTreeMap<RoomName, Vec<u8>>,
    pub participants: BTreeMap<ParticipantId, ParticipantArtifacts>,
    pub stats: TickStats,
}

struct RoomPass {
    name: RoomName,
    room: RoomState,
    result: Result<(Vec<u8>, ProcessorStats), DriverError>,
}

pub struct TickDriver {
    registry: Arc<ProcessorRegistry>,
    rules: GameRules,
    oracle: Option<Arc<dyn SearchOracle>>,
    config: DriverConfig,
}

impl std::fmt::Debug for TickDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickDriver")
            .field("rules", &self.rules)
            .field("oracle", &self.oracle.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl TickDriver {
    pub fn new(registry: ProcessorRegistry, rules: GameRules) -> Self {
        Self {
            registry: Arc::new(registry),
            rules,
            oracle: None,
            config: DriverConfig::default(),
        }
    }

    /// Driver over the standard processors.
    pub fn standard(rules: GameRules) -> Self {
        Self::new(ProcessorRegistry::standard(), rules)
    }

    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn SearchOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    pub fn run_tick(&self, input: TickInput, sandboxes: &mut [Sandbox]) -> Result<TickOutput, DriverError> {
        let TickInput {
            time,
            rooms: blobs,
            terrain,
            console_eval,
            external_intents,
            flags,
        } = input;
        let mut stats = TickStats::default();

        let (rooms, world) = self.hydrate(time, blobs, &terrain)?;
        stats.rooms = rooms.len();

        let outputs = self.run_sandboxes(&world, &console_eval, sandboxes);

        let mut participants: BTreeMap<ParticipantId, ParticipantArtifacts> = BTreeMap::new();
        let mut routed: BTreeMap<ParticipantId, Vec<(IntentRoute, RunnerIntent)>> = BTreeMap::new();
        for output in outputs {
            stats.intents_dropped += output.dropped_intents;
            if output.fault.is_some() {
                stats.faults += 1;
            }
            routed
                .entry(output.participant.clone())
                .or_default()
                .extend(output.intents);
            let artifacts = participants.entry(output.participant).or_default();
            artifacts.console = output.console;
            artifacts.memory = Some(output.memory);
            artifacts.visuals = output.visuals;
            artifacts.fault = output.fault;
            artifacts.fuel_used = output.fuel_used;
        }

        for external in external_intents {
            match world.route_trusted(&external.intent) {
                Ok(route) => {
                    participants.entry(external.participant.clone()).or_default();
                    routed
                        .entry(external.participant)
                        .or_default()
                        .push((route, external.intent));
                }
                Err(dropped) => {
                    stats.intents_dropped += 1;
                    tracing::warn!(participant = %external.participant, %dropped, "external intent dropped");
                }
            }
        }
        stats.participants = participants.len();

        let mut room_intents: BTreeMap<RoomName, RoomIntents> = BTreeMap::new();
        for (participant, intents) in routed {
            let mut flag_intents = Vec::new();
            let mut own: BTreeMap<RoomName, RoomIntents> = BTreeMap::new();
            for (route, intent) in intents {
                stats.intents_routed += 1;
                match route {
                    IntentRoute::Flags => flag_intents.push(intent),
                    IntentRoute::Room { room } => {
                        own.entry(room)
                            .or_default()
                            .push_room(&participant, &intent.intent, intent.params);
                    }
                    IntentRoute::Object { room, id } => {
                        own.entry(room)
                            .or_default()
                            .push_object(&participant, id, &intent.intent, intent.params);
                    }
                }
            }

            let artifacts = participants.entry(participant.clone()).or_default();
            if !flag_intents.is_empty() {
                let previous = flags.get(&participant).map(Vec::as_slice).unwrap_or_default();
                let blob = apply_flag_intents(&participant, previous, flag_intents, &mut stats)?;
                artifacts.flags = Some(blob);
            }
            for (room, intents) in own {
                artifacts.intents.insert(room.clone(), intents.to_blob()?);
                room_intents.entry(room).or_default().merge(intents);
            }
        }
        for intents in room_intents.values_mut() {
            intents.normalize();
        }

        let passes = self.process_rooms(time, rooms, &room_intents);

        let reason = released_reason(time);
        let access = InternalAccess::new();
        for pass in &passes {
            pass.room.detach(&access, &reason);
        }
        drop(world);

        let mut next_rooms = BTreeMap::new();
        for pass in passes {
            let (blob, room_stats) = pass.result?;
            stats.processor.merge(&room_stats);
            stats.per_room.insert(pass.name.clone(), room_stats);
            next_rooms.insert(pass.name, blob);
        }

        tracing::info!(
            time,
            rooms = stats.rooms,
            participants = stats.participants,
            faults = stats.faults,
            applied = stats.processor.applied,
            rejected = stats.processor.rejected_total(),
            dropped = stats.intents_dropped,
            "tick complete"
        );
        Ok(TickOutput {
            time,
            rooms: next_rooms,
            participants,
            stats,
        })
    }

    fn hydrate(
        &self,
        time: u64,
        blobs: BTreeMap<RoomName, Vec<u8>>,
        terrain: &BTreeMap<RoomName, Arc<Terrain>>,
    ) -> Result<(Vec<RoomState>, Arc<WorldContext>), DriverError> {
        let order = self.registry.room_intent_order();
        let internal = order
            .into_iter()
            .filter(|verb| self.registry.is_internal_room_verb(verb));
        let mut world = WorldContext::new(time).with_internal_room_verbs(internal);
        if let Some(oracle) = &self.oracle {
            world = world.with_oracle(oracle.clone());
        }

        let mut rooms = Vec::with_capacity(blobs.len());
        for (name, blob) in blobs {
            let mut room = read(self.registry.schema(), blob.clone()).map_err(|source| DriverError::Codec {
                room: name.clone(),
                source,
            })?;
            if room.name() != name {
                return Err(DriverError::RoomNameMismatch {
                    room: name,
                    found: room.name().to_string(),
                });
            }
            room.set_time(time);
            if let Some(terrain) = terrain.get(&name) {
                room.set_terrain(terrain.clone());
            }
            world.add_room(room.view(), Arc::new(blob));
            rooms.push(room);
        }
        Ok((rooms, Arc::new(world)))
    }

    fn run_sandboxes(
        &self,
        world: &Arc<WorldContext>,
        console_eval: &BTreeMap<ParticipantId, Vec<String>>,
        sandboxes: &mut [Sandbox],
    ) -> Vec<SandboxTickOutput> {
        let run = |sandbox: &mut Sandbox| {
            let eval = console_eval
                .get(sandbox.participant())
                .map(Vec::as_slice)
                .unwrap_or_default();
            sandbox.run_tick(world.clone(), eval)
        };
        if self.config.parallel {
            sandboxes.par_iter_mut().map(run).collect()
        } else {
            sandboxes.iter_mut().map(run).collect()
        }
    }

    fn process_rooms(
        &self,
        time: u64,
        rooms: Vec<RoomState>,
        room_intents: &BTreeMap<RoomName, RoomIntents>,
    ) -> Vec<RoomPass> {
        let empty = RoomIntents::default();
        let process = |mut room: RoomState| {
            let name = room.name().to_string();
            let intents = room_intents.get(&name).unwrap_or(&empty);
            let result = self
                .registry
                .process_room(&mut room, intents, &self.rules, time)
                .map_err(|source| DriverError::Processor {
                    room: name.clone(),
                    source,
                })
                .and_then(|room_stats| {
                    let blob = write(&room).map_err(|source| DriverError::Codec {
                        room: name.clone(),
                        source,
                    })?;
                    Ok((blob, room_stats))
                });
            if let Err(err) = &result {
                tracing::warn!(room = %name, %err, "room pass failed");
            }
            RoomPass { name, room, result }
        };
        if self.config.parallel {
            rooms.into_par_iter().map(process).collect()
        } else {
            rooms.into_iter().map(process).collect()
        }
    }
}

fn apply_flag_intents(
    participant: &str,
    previous: &[u8],
    intents: Vec<RunnerIntent>,
    stats: &mut TickStats,
) -> Result<Vec<u8>, DriverError> {
    let flag_error = |source| DriverError::FlagBlob {
        participant: participant.to_string(),
        source,
    };
    let mut set = FlagSet::from_blob(previous).map_err(flag_error)?;
    for intent in intents {
        stats.flag_intents += 1;
        let Some(flag_intent) = FlagIntent::decode(&intent.intent, &intent.params) else {
            stats.flag_rejections += 1;
            tracing::debug!(participant, verb = %intent.intent, "malformed flag intent");
            continue;
        };
        if let Err(code) = set.apply(flag_intent) {
            stats.flag_rejections += 1;
            tracing::debug!(participant, verb = %intent.intent, ?code, "flag intent rejected");
        }
    }
    set.to_blob().map_err(flag_error)
}
