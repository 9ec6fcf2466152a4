//! tick_world_demo binary
//!
//! Seeds one unclaimed room, claims it for a participant running the built-in
//! harvester program and advances the world for a number of ticks. Room blobs
//! can be persisted under `--storage-dir`.

use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use tick_world::persistence::save_rooms;
use tick_world::sandbox::programs::{register_builtin_programs, HARVESTER_PROGRAM};
use tick_world::sandbox::NativeModuleCompiler;
use tick_world::{
    CodeCompiler, EngineConfig, ExternalIntent, LocalBlobStorage, NewObject, ObjectId, ObjectSpec,
    ParticipantCode, RoomBuilder, RoomPosition, RunnerIntent, Sandbox, TickDriver, TickInput,
};
use tick_world_wasm_executor::WasmExecutorConfig;

#[derive(Parser, Debug)]
#[command(name = "tick_world_demo", about = "Tick world demo", version)]
struct Args {
    /// Number of ticks to run
    #[arg(long, env = "TICK_WORLD_DEMO_TICKS", default_value_t = 20)]
    ticks: u64,

    /// Participant that claims the room
    #[arg(long, default_value = "amy")]
    participant: String,

    /// Room to seed
    #[arg(long, default_value = "W1N1")]
    room: String,

    /// Directory for persisted room blobs
    #[arg(long, env = "TICK_WORLD_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Engine config file; defaults to tick_world.toml or the environment
    #[arg(long)]
    config: Option<PathBuf>,
}

fn seed_room(name: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    let pos = |x, y| RoomPosition::in_room(name, x, y);
    let blob = RoomBuilder::new(name)?
        .object(NewObject::new(
            ObjectId(1),
            pos(25, 10)?,
            ObjectSpec::Controller {
                level: 0,
                progress: 0,
                downgrade_time: 0,
            },
        ))?
        .object(NewObject::new(
            ObjectId(2),
            pos(20, 28)?,
            ObjectSpec::Source {
                energy: 3000,
                capacity: 3000,
                next_regeneration_time: 0,
            },
        ))?
        .build()?;
    Ok(blob)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("tick_world=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::from_config_file(path)?,
        None => EngineConfig::from_default_sources()?,
    };

    let mut native = NativeModuleCompiler::new();
    register_builtin_programs(&mut native);
    let compiler = Arc::new(CodeCompiler::new(
        native,
        WasmExecutorConfig::from_limits(&config.sandbox),
    )?);
    let mut sandboxes = vec![Sandbox::new(
        args.participant.clone(),
        ParticipantCode::native(HARVESTER_PROGRAM),
        compiler,
        config.sandbox.clone(),
    )];

    let driver = TickDriver::standard(config.rules.clone()).with_config(config.driver.clone());
    let storage = args.storage_dir.as_ref().map(LocalBlobStorage::new);

    let mut rooms = BTreeMap::from([(args.room.clone(), seed_room(&args.room)?)]);
    let mut flags = BTreeMap::new();
    for time in 1..=args.ticks {
        let external_intents = if time == 1 {
            vec![ExternalIntent {
                participant: args.participant.clone(),
                intent: RunnerIntent::for_room(
                    &args.room,
                    "placeSpawn",
                    json!({ "x": 20, "y": 20, "name": "Spawn1" }),
                ),
            }]
        } else {
            Vec::new()
        };
        let output = driver.run_tick(
            TickInput {
                time,
                rooms,
                external_intents,
                flags: flags.clone(),
                ..TickInput::default()
            },
            &mut sandboxes,
        )?;

        if let Some(storage) = &storage {
            save_rooms(storage, time, &output.rooms)?;
        }
        for (participant, artifacts) in &output.participants {
            for line in &artifacts.console.log {
                println!("[{time}] {participant}: {line}");
            }
            for line in &artifacts.console.errors {
                eprintln!("[{time}] {participant} error: {line}");
            }
            if let Some(blob) = &artifacts.flags {
                flags.insert(participant.clone(), blob.clone());
            }
        }
        println!(
            "tick {time}: applied={} rejected={} dropped={} faults={}",
            output.stats.processor.applied,
            output.stats.processor.rejected_total(),
            output.stats.intents_dropped,
            output.stats.faults,
        );
        rooms = output.rooms;
    }
    Ok(())
}
