//! Per-room intent processing.
//!
//! A [`ProcessorRegistry`] holds, for every object kind in registration order,
//! pre-tick hooks, verb-keyed intent handlers and tick hooks, plus the
//! room-level intent handlers. [`ProcessorRegistry::process_room`] advances one
//! room by one tick:
//!
//! 1. pre-tick hooks over every live object,
//! 2. room intents in declared order, then object intents,
//! 3. movement resolution,
//! 4. tick hooks over every object live at that point.
//!
//! Every step walks kinds in registration order and objects in insertion
//! order, so the same inputs always produce the same room.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::buffer::BufferError;
use crate::intents::{IntentSubmission, RoomIntents};
use crate::objects::{ObjectId, ObjectKind, ObjectView, ResourceType};
use crate::position::RoomPosition;
use crate::room::RoomState;
use crate::rules::GameRules;
use crate::schema::{CodecError, NewObject, ObjectSpec, SchemaRegistry};

pub mod autospawn;
pub mod checks;
pub mod creep;
pub mod movement;
pub mod room_intents;
pub mod spawn;
pub mod structures;

pub use movement::MovementQueue;


// ============================================================================
// Outcomes and errors
// ============================================================================

/// Why a validator refused an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnCode {
    NotOwner,
    NoPath,
    NameExists,
    Busy,
    NotFound,
    NotEnoughResources,
    InvalidTarget,
    Full,
    NotInRange,
    InvalidArgs,
    Tired,
    NoBodypart,
    RclNotEnough,
}

impl ReturnCode {
    pub fn code(self) -> i32 {
        match self {
            ReturnCode::NotOwner => -1,
            ReturnCode::NoPath => -2,
            ReturnCode::NameExists => -3,
            ReturnCode::Busy => -4,
            ReturnCode::NotFound => -5,
            ReturnCode::NotEnoughResources => -6,
            ReturnCode::InvalidTarget => -7,
            ReturnCode::Full => -8,
            ReturnCode::NotInRange => -9,
            ReturnCode::InvalidArgs => -10,
            ReturnCode::Tired => -11,
            ReturnCode::NoBodypart => -12,
            ReturnCode::RclNotEnough => -14,
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Result of a `check*` validator.
pub type Check = Result<(), ReturnCode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentOutcome {
    Applied,
    Rejected(ReturnCode),
}

impl From<Check> for IntentOutcome {
    fn from(check: Check) -> Self {
        match check {
            Ok(()) => IntentOutcome::Applied,
            Err(code) => IntentOutcome::Rejected(code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// The object is gone; skip its remaining hooks.
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("object {id} is indexed but missing")]
    MissingObject { id: ObjectId },
    #[error("room {room}: {message}")]
    Invariant { room: String, message: String },
}

/// Diagnostic counters for one room pass. Rejections are not errors; these
/// counters are how always-failing validators show up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorStats {
    pub applied: u64,
    pub rejected: BTreeMap<String, BTreeMap<ReturnCode, u64>>,
    pub malformed: u64,
    pub unknown_verbs: u64,
    pub unknown_receivers: u64,
}

impl ProcessorStats {
    fn record(&mut self, verb: &str, outcome: Option<IntentOutcome>) {
        match outcome {
            Some(IntentOutcome::Applied) => self.applied += 1,
            Some(IntentOutcome::Rejected(code)) => {
                *self
                    .rejected
                    .entry(verb.to_string())
                    .or_default()
                    .entry(code)
                    .or_default() += 1;
            }
            None => self.malformed += 1,
        }
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejected.values().flat_map(|codes| codes.values()).sum()
    }

    pub fn merge(&mut self, other: &ProcessorStats) {
        self.applied += other.applied;
        self.malformed += other.malformed;
        self.unknown_verbs += other.unknown_verbs;
        self.unknown_receivers += other.unknown_receivers;
        for (verb, codes) in &other.rejected {
            let target = self.rejected.entry(verb.clone()).or_default();
            for (code, count) in codes {
                *target.entry(*code).or_default() += count;
            }
        }
    }
}

// ============================================================================
// Context
// ============================================================================

/// Mutable state threaded through every hook of one room pass.
pub struct ProcessorContext<'a> {
    pub room: &'a mut RoomState,
    pub rules: &'a GameRules,
    pub time: u64,
    pub movement: MovementQueue,
}

impl<'a> ProcessorContext<'a> {
    pub fn new(room: &'a mut RoomState, rules: &'a GameRules, time: u64) -> Self {
        room.set_time(time);
        Self {
            room,
            rules,
            time,
            movement: MovementQueue::default(),
        }
    }

    pub fn find(&self, id: ObjectId) -> Option<ObjectView> {
        self.room.get(id).cloned()
    }

    /// Looks up an object the caller knows is live.
    pub fn require(&self, id: ObjectId) -> Result<ObjectView, ProcessorError> {
        self.find(id).ok_or(ProcessorError::MissingObject { id })
    }

    pub fn insert(&mut self, build: impl FnOnce(ObjectId) -> NewObject) -> Result<ObjectView, ProcessorError> {
        let id = self.room.next_id();
        Ok(self.room.insert(build(id))?)
    }

    pub fn remove(&mut self, id: ObjectId) -> Result<(), ProcessorError> {
        if !self.room.remove(id)? {
            return Err(ProcessorError::MissingObject { id });
        }
        Ok(())
    }

    pub fn did_update(&mut self) {
        self.room.did_update();
    }

    /// Drops resources on the ground, merging into a pile of the same type.
    pub fn drop_resource(
        &mut self,
        pos: RoomPosition,
        resource: ResourceType,
        amount: i32,
    ) -> Result<(), ProcessorError> {
        if amount <= 0 {
            return Ok(());
        }
        for object in self.room.objects_at(pos.x(), pos.y())? {
            if let Some(pile) = object.as_resource() {
                if pile.resource_type()? == resource {
                    pile.set_amount(pile.amount()?.saturating_add(amount))?;
                    return Ok(());
                }
            }
        }
        self.insert(|id| NewObject::new(id, pos, ObjectSpec::Resource { resource, amount }))?;
        Ok(())
    }

    pub(crate) fn invariant(&self, message: impl Into<String>) -> ProcessorError {
        ProcessorError::Invariant {
            room: self.room.name().to_string(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

type PreTickHook =
    Arc<dyn Fn(&mut ProcessorContext<'_>, &ObjectView) -> Result<(), ProcessorError> + Send + Sync>;
type TickHook = Arc<
    dyn Fn(&mut ProcessorContext<'_>, &ObjectView) -> Result<TickOutcome, ProcessorError>
        + Send
        + Sync,
>;
/// Returns `None` when the parameters do not decode.
type IntentHandler = Arc<
    dyn Fn(
            &mut ProcessorContext<'_>,
            &ObjectView,
            &str,
            &JsonValue,
        ) -> Result<Option<IntentOutcome>, ProcessorError>
        + Send
        + Sync,
>;
type RoomIntentHandler = Arc<
    dyn Fn(&mut ProcessorContext<'_>, &str, &JsonValue) -> Result<Option<IntentOutcome>, ProcessorError>
        + Send
        + Sync,
>;

#[derive(Default)]
struct KindProcessors {
    pre_tick: Vec<PreTickHook>,
    intents: Vec<(String, IntentHandler)>,
    tick: Vec<TickHook>,
}

/// Ordering and trust options for a room-level verb.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomIntentOptions {
    /// Verb this one must run ahead of.
    pub before: Option<String>,
    /// Accepted only from host-injected intents.
    pub internal: bool,
}

struct RoomIntentEntry {
    verb: String,
    options: RoomIntentOptions,
    handler: RoomIntentHandler,
}

fn decode<P: DeserializeOwned>(params: &JsonValue) -> Option<P> {
    // Verbs without parameters accept an absent payload.
    let params = if params.is_null() {
        JsonValue::Object(Default::default())
    } else {
        params.clone()
    };
    serde_json::from_value(params).ok()
}

pub struct ProcessorRegistry {
    kinds: Vec<(ObjectKind, KindProcessors)>,
    room_intents: Vec<RoomIntentEntry>,
    schema: SchemaRegistry,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("kinds", &self.kinds.iter().map(|(kind, _)| *kind).collect::<Vec<_>>())
            .field("room_intents", &self.room_intent_order())
            .finish()
    }
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            kinds: Vec::new(),
            room_intents: Vec::new(),
            schema: SchemaRegistry::new(),
        }
    }

    /// Registry with every built-in processor and the auto-spawn add-on.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for kind in [
            ObjectKind::ConstructionSite,
            ObjectKind::Container,
            ObjectKind::Controller,
            ObjectKind::Creep,
            ObjectKind::Resource,
            ObjectKind::Road,
            ObjectKind::Source,
            ObjectKind::Spawn,
            ObjectKind::Tower,
        ] {
            registry.register_kind(kind);
        }
        creep::register(&mut registry);
        spawn::register(&mut registry);
        structures::register(&mut registry);
        room_intents::register(&mut registry);
        autospawn::register(&mut registry);
        registry
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn schema_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.schema
    }

    /// Fixes the position of `kind` in the processing order.
    pub fn register_kind(&mut self, kind: ObjectKind) {
        self.kind_entry(kind);
    }

    fn kind_entry(&mut self, kind: ObjectKind) -> &mut KindProcessors {
        let slot = match self.kinds.iter().position(|(entry, _)| *entry == kind) {
            Some(slot) => slot,
            None => {
                self.kinds.push((kind, KindProcessors::default()));
                self.kinds.len() - 1
            }
        };
        &mut self.kinds[slot].1
    }

    pub fn register_pre_tick<F>(&mut self, kind: ObjectKind, hook: F)
    where
        F: Fn(&mut ProcessorContext<'_>, &ObjectView) -> Result<(), ProcessorError> + Send + Sync + 'static,
    {
        self.kind_entry(kind).pre_tick.push(Arc::new(hook));
    }

    pub fn register_tick<F>(&mut self, kind: ObjectKind, hook: F)
    where
        F: Fn(&mut ProcessorContext<'_>, &ObjectView) -> Result<TickOutcome, ProcessorError>
            + Send
            + Sync
            + 'static,
    {
        self.kind_entry(kind).tick.push(Arc::new(hook));
    }

    /// Registers `verb` for `kind`. Parameters are decoded into `P` before the
    /// handler runs; submissions that do not decode are dropped.
    pub fn register_intent<P, F>(&mut self, kind: ObjectKind, verb: &str, handler: F)
    where
        P: DeserializeOwned + 'static,
        F: Fn(&mut ProcessorContext<'_>, &ObjectView, &str, P) -> Result<IntentOutcome, ProcessorError>
            + Send
            + Sync
            + 'static,
    {
        let handler: IntentHandler = Arc::new(move |ctx, object, participant, params| {
            match decode::<P>(params) {
                Some(params) => handler(ctx, object, participant, params).map(Some),
                None => Ok(None),
            }
        });
        let entry = self.kind_entry(kind);
        match entry.intents.iter_mut().find(|(name, _)| name == verb) {
            Some(existing) => existing.1 = handler,
            None => entry.intents.push((verb.to_string(), handler)),
        }
    }

    pub fn register_room_intent<P, F>(&mut self, verb: &str, options: RoomIntentOptions, handler: F)
    where
        P: DeserializeOwned + 'static,
        F: Fn(&mut ProcessorContext<'_>, &str, P) -> Result<IntentOutcome, ProcessorError>
            + Send
            + Sync
            + 'static,
    {
        let handler: RoomIntentHandler = Arc::new(move |ctx, participant, params| {
            match decode::<P>(params) {
                Some(params) => handler(ctx, participant, params).map(Some),
                None => Ok(None),
            }
        });
        self.room_intents.retain(|entry| entry.verb != verb);
        self.room_intents.push(RoomIntentEntry {
            verb: verb.to_string(),
            options,
            handler,
        });
    }

    pub fn is_internal_room_verb(&self, verb: &str) -> bool {
        self.room_intents
            .iter()
            .any(|entry| entry.verb == verb && entry.options.internal)
    }

    pub fn has_object_verb(&self, kind: ObjectKind, verb: &str) -> bool {
        self.kinds
            .iter()
            .filter(|(entry, _)| *entry == kind)
            .any(|(_, processors)| processors.intents.iter().any(|(name, _)| name == verb))
    }

    /// Room verbs in execution order: a verb registered `before: X` runs ahead
    /// of `X`, otherwise registration order holds.
    pub fn room_intent_order(&self) -> Vec<&str> {
        let count = self.room_intents.len();
        let position = |verb: &str| self.room_intents.iter().position(|entry| entry.verb == verb);
        // Edge i -> j means i runs before j.
        let mut blockers = vec![0usize; count];
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (index, entry) in self.room_intents.iter().enumerate() {
            if let Some(target) = entry.options.before.as_deref().and_then(position) {
                if target != index {
                    edges[index].push(target);
                    blockers[target] += 1;
                }
            }
        }
        let mut ready: BTreeSet<usize> = (0..count).filter(|index| blockers[*index] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for target in &edges[next] {
                blockers[*target] -= 1;
                if blockers[*target] == 0 {
                    ready.insert(*target);
                }
            }
        }
        if order.len() < count {
            tracing::warn!("room intent ordering has a cycle, using registration order for the rest");
            for index in 0..count {
                if !order.contains(&index) {
                    order.push(index);
                }
            }
        }
        order
            .into_iter()
            .map(|index| self.room_intents[index].verb.as_str())
            .collect()
    }

    /// Advances `room` by one tick. Any error means the room's state must be
    /// discarded.
    pub fn process_room(
        &self,
        room: &mut RoomState,
        intents: &RoomIntents,
        rules: &GameRules,
        time: u64,
    ) -> Result<ProcessorStats, ProcessorError> {
        let mut stats = ProcessorStats::default();
        let mut ctx = ProcessorContext::new(room, rules, time);

        for (kind, processors) in &self.kinds {
            if processors.pre_tick.is_empty() {
                continue;
            }
            for object in live_of_kind(&ctx, *kind) {
                for hook in &processors.pre_tick {
                    if !ctx.room.contains(object.id()) {
                        break;
                    }
                    hook(&mut ctx, &object)?;
                }
            }
        }

        self.run_room_intents(&mut ctx, intents, &mut stats)?;
        self.run_object_intents(&mut ctx, intents, &mut stats)?;

        ctx.movement.resolve(&*ctx.room)?;

        // Objects created by tick hooks wait for the next tick.
        let live_at_start: Vec<Vec<ObjectView>> = self
            .kinds
            .iter()
            .map(|(kind, _)| live_of_kind(&ctx, *kind))
            .collect();
        for ((_, processors), objects) in self.kinds.iter().zip(live_at_start) {
            if processors.tick.is_empty() {
                continue;
            }
            for object in objects {
                for hook in &processors.tick {
                    if !ctx.room.contains(object.id()) {
                        break;
                    }
                    if hook(&mut ctx, &object)? == TickOutcome::Removed {
                        break;
                    }
                }
            }
        }

        if stats.rejected_total() > 0 || stats.malformed > 0 || stats.unknown_receivers > 0 {
            tracing::debug!(
                room = ctx.room.name(),
                time,
                applied = stats.applied,
                rejected = stats.rejected_total(),
                malformed = stats.malformed,
                unknown_verbs = stats.unknown_verbs,
                unknown_receivers = stats.unknown_receivers,
                "room intents resolved"
            );
        }
        Ok(stats)
    }

    fn run_room_intents(
        &self,
        ctx: &mut ProcessorContext<'_>,
        intents: &RoomIntents,
        stats: &mut ProcessorStats,
    ) -> Result<(), ProcessorError> {
        let order = self.room_intent_order();
        for verb in intents.room.keys() {
            if !order.contains(&verb.as_str()) {
                stats.unknown_verbs += 1;
            }
        }
        for verb in order {
            let Some(submissions) = intents.room.get(verb) else {
                continue;
            };
            let Some(entry) = self.room_intents.iter().find(|entry| entry.verb == verb) else {
                continue;
            };
            for submission in by_participant(submissions) {
                let outcome = (entry.handler)(ctx, &submission.participant, &submission.params)?;
                stats.record(verb, outcome);
            }
        }
        Ok(())
    }

    fn run_object_intents(
        &self,
        ctx: &mut ProcessorContext<'_>,
        intents: &RoomIntents,
        stats: &mut ProcessorStats,
    ) -> Result<(), ProcessorError> {
        if intents.objects.is_empty() {
            return Ok(());
        }
        for id in intents.objects.keys() {
            if !ctx.room.contains(*id) {
                stats.unknown_receivers += 1;
            }
        }
        for (kind, processors) in &self.kinds {
            for object in live_of_kind(ctx, *kind) {
                let Some(verbs) = intents.objects.get(&object.id()) else {
                    continue;
                };
                for verb in verbs.keys() {
                    if !processors.intents.iter().any(|(name, _)| name == verb) {
                        stats.unknown_verbs += 1;
                    }
                }
                for (verb, handler) in &processors.intents {
                    let Some(submissions) = verbs.get(verb) else {
                        continue;
                    };
                    for submission in by_participant(submissions) {
                        if !ctx.room.contains(object.id()) {
                            break;
                        }
                        let outcome = handler(ctx, &object, &submission.participant, &submission.params)?;
                        stats.record(verb, outcome);
                    }
                }
            }
        }
        Ok(())
    }
}

fn live_of_kind(ctx: &ProcessorContext<'_>, kind: ObjectKind) -> Vec<ObjectView> {
    ctx.room
        .objects()
        .filter(|object| object.kind() == kind)
        .cloned()
        .collect()
}

fn by_participant(submissions: &[IntentSubmission]) -> Vec<&IntentSubmission> {
    let mut ordered: Vec<&IntentSubmission> = submissions.iter().collect();
    ordered.sort_by(|a, b| a.participant.cmp(&b.participant));
    ordered
}
