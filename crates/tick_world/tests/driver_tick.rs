mod common;

use std::collections::BTreeMap;

use serde_json::json;
use tick_world::sandbox::programs::HARVESTER_PROGRAM;
use tick_world::{
    DriverConfig, ExternalIntent, FlagSet, GameRules, ParticipantCode, ResourceType, RunnerIntent, Sandbox,
    SandboxLimits, TickDriver, TickInput,
};

use common::{hydrate, native_compiler, seed_room, ROOM};

fn claim(participant: &str) -> ExternalIntent {
    ExternalIntent {
        participant: participant.to_string(),
        intent: RunnerIntent::for_room(ROOM, "placeSpawn", json!({ "x": 20, "y": 20, "name": "Spawn1" })),
    }
}

#[test]
fn harvester_claims_spawns_and_keeps_memory() {
    let driver = TickDriver::standard(GameRules::default());
    let mut sandboxes = vec![Sandbox::new(
        "amy",
        ParticipantCode::native(HARVESTER_PROGRAM),
        native_compiler(|_| {}),
        SandboxLimits::default(),
    )];

    let first = driver
        .run_tick(
            TickInput {
                time: 1,
                rooms: BTreeMap::from([(ROOM.to_string(), seed_room())]),
                external_intents: vec![claim("amy")],
                ..TickInput::default()
            },
            &mut sandboxes,
        )
        .unwrap();
    assert_eq!(first.stats.processor.applied, 1);
    let room = hydrate(&first.rooms[ROOM]);
    assert_eq!(room.owner(), Some("amy"));
    let spawn = room
        .objects()
        .find_map(|object| object.as_spawn())
        .expect("spawn placed");
    assert_eq!(spawn.name().unwrap(), "Spawn1");

    let second = driver
        .run_tick(
            TickInput {
                time: 2,
                rooms: first.rooms,
                ..TickInput::default()
            },
            &mut sandboxes,
        )
        .unwrap();
    assert_eq!(second.stats.processor.applied, 1);
    let artifacts = &second.participants["amy"];
    assert!(artifacts.intents.contains_key(ROOM));
    assert!(artifacts.fault.is_none());
    let memory: serde_json::Value = serde_json::from_slice(artifacts.memory.as_deref().unwrap()).unwrap();
    assert_eq!(memory["spawned"], 1);
    assert_eq!(memory["lastTick"], 2);

    let room = hydrate(&second.rooms[ROOM]);
    let creep = room
        .objects()
        .find_map(|object| object.as_creep())
        .expect("creep spawned");
    assert_eq!(creep.name().unwrap(), "harvester0");
    assert_eq!((creep.pos().unwrap().x(), creep.pos().unwrap().y()), (20, 19));
    let spawn = room.objects().find_map(|object| object.as_spawn()).unwrap();
    assert_eq!(spawn.store().get(ResourceType::Energy).unwrap(), 100);
}

#[test]
fn identical_ticks_produce_identical_rooms() {
    let run = |config: DriverConfig| {
        TickDriver::standard(GameRules::default())
            .with_config(config)
            .run_tick(
                TickInput {
                    time: 1,
                    rooms: BTreeMap::from([(ROOM.to_string(), seed_room())]),
                    external_intents: vec![claim("bob"), claim("amy")],
                    ..TickInput::default()
                },
                &mut [],
            )
            .unwrap()
    };
    let parallel = run(DriverConfig { parallel: true });
    let serial = run(DriverConfig { parallel: false });
    assert_eq!(parallel.rooms, serial.rooms);
    assert_eq!(parallel.stats, serial.stats);

    // Submissions are ordered by participant, so amy claims first.
    assert_eq!(hydrate(&parallel.rooms[ROOM]).owner(), Some("amy"));
    assert_eq!(parallel.stats.processor.applied, 1);
    assert_eq!(parallel.stats.processor.rejected_total(), 1);
}

#[test]
fn flag_intents_produce_a_flag_blob() {
    let driver = TickDriver::standard(GameRules::default());
    let output = driver
        .run_tick(
            TickInput {
                time: 4,
                rooms: BTreeMap::from([(ROOM.to_string(), seed_room())]),
                external_intents: vec![
                    ExternalIntent {
                        participant: "amy".to_string(),
                        intent: RunnerIntent::for_flags(
                            "create",
                            json!({ "name": "home", "room": ROOM, "x": 5, "y": 6 }),
                        ),
                    },
                    ExternalIntent {
                        participant: "amy".to_string(),
                        intent: RunnerIntent::for_flags("remove", json!({ "name": "missing" })),
                    },
                ],
                ..TickInput::default()
            },
            &mut [],
        )
        .unwrap();

    assert_eq!(output.stats.flag_intents, 2);
    assert_eq!(output.stats.flag_rejections, 1);
    let blob = output.participants["amy"].flags.as_ref().expect("flag blob");
    let flags = FlagSet::from_blob(blob).unwrap();
    let home = flags.get("home").expect("flag created");
    assert_eq!((home.pos.x(), home.pos.y()), (5, 6));
    assert!(output.participants["amy"].memory.is_none());
}

#[test]
fn unknown_external_receivers_are_dropped() {
    let driver = TickDriver::standard(GameRules::default());
    let output = driver
        .run_tick(
            TickInput {
                time: 1,
                rooms: BTreeMap::from([(ROOM.to_string(), seed_room())]),
                external_intents: vec![
                    ExternalIntent {
                        participant: "amy".to_string(),
                        intent: RunnerIntent::new("00000000000000ff", "move", json!({ "direction": 1 })),
                    },
                    ExternalIntent {
                        participant: "amy".to_string(),
                        intent: RunnerIntent::for_room("E5S5", "placeSpawn", json!({})),
                    },
                ],
                ..TickInput::default()
            },
            &mut [],
        )
        .unwrap();
    assert_eq!(output.stats.intents_dropped, 2);
    assert_eq!(output.stats.intents_routed, 0);
    assert_eq!(hydrate(&output.rooms[ROOM]).owner(), None);
}

#[test]
fn corrupt_room_blob_aborts_the_tick() {
    let driver = TickDriver::standard(GameRules::default());
    let err = driver
        .run_tick(
            TickInput {
                time: 1,
                rooms: BTreeMap::from([(ROOM.to_string(), b"garbage".to_vec())]),
                ..TickInput::default()
            },
            &mut [],
        )
        .unwrap_err();
    assert!(err.to_string().starts_with("room W1N1"));
}
