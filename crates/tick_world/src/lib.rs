pub mod buffer;
pub mod config;
pub mod driver;
pub mod flags;
pub mod intents;
pub mod objects;
pub mod pathfinder;
pub mod persistence;
pub mod position;
pub mod processor;
pub mod room;
pub mod rules;
pub mod sandbox;
pub mod schema;
pub mod terrain;
pub mod world;

pub use buffer::{BufferError, BufferView, InternalAccess};
pub use config::{ConfigError, DriverConfig, EngineConfig, DEFAULT_CONFIG_FILE_NAME};
pub use driver::{
    released_reason, DriverError, ExternalIntent, ParticipantArtifacts, TickDriver, TickInput,
    TickOutput, TickStats,
};
pub use flags::{Flag, FlagColor, FlagIntent, FlagSet, MAX_FLAGS};
pub use intents::{IntentSubmission, RoomIntents};
pub use objects::{
    BodyPart, BodyPartType, ConstructionSite, Container, Controller, Creep, ObjectId, ObjectKind,
    ObjectView, Resource, ResourceType, Road, Source, Spawn, Store, StructureType, Tower,
};
pub use pathfinder::{
    OracleOutcome, SearchCosts, SearchGoal, SearchLimits, SearchOptions, SearchOracle, SearchResult,
};
pub use persistence::{
    load_rooms, room_key, save_rooms, BlobStorage, InMemoryBlobStorage, LocalBlobStorage,
    StorageError,
};
pub use position::{Direction, RoomCoord, RoomPosition};
pub use processor::{
    Check, ProcessorContext, ProcessorError, ProcessorRegistry, ProcessorStats, ReturnCode,
    RoomIntentOptions,
};
pub use room::{RoomState, RoomView};
pub use rules::GameRules;
pub use sandbox::{
    CodeCompiler, LoopMode, ParticipantCode, ProgramPhase, Sandbox, SandboxTickOutput,
};
pub use schema::{read, write, CodecError, ExtensionValue, NewObject, ObjectSpec, RoomBuilder, SchemaRegistry};
pub use terrain::{Terrain, TerrainType};
pub use world::{IntentRoute, WorldContext};

pub use tick_world_abi::{
    ConsoleFd, ModuleSource, RunnerIntent, SandboxFault, SandboxFaultCode, SandboxLimits,
};
