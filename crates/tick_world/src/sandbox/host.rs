//! [`ModuleHost`] implementation backed by the tick's [`WorldContext`].

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tick_world_abi::{
    ConsoleFd, ModuleExports, ModuleHost, RoomName, RunnerIntent, SandboxFault, SandboxFaultCode,
    SandboxLimits, MAIN_MODULE,
};

use super::loader::ModuleLoader;
use crate::world::{IntentRoute, WorldContext};

/// Console lines written during one tick, split by stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleOutput {
    pub log: Vec<String>,
    pub results: Vec<String>,
    pub errors: Vec<String>,
    /// Set once the byte cap dropped output.
    pub truncated: bool,
}

impl ConsoleOutput {
    pub fn is_empty(&self) -> bool {
        self.log.is_empty() && self.results.is_empty() && self.errors.is_empty()
    }
}

/// What a participant produced during one tick.
#[derive(Debug, Clone, Default)]
pub struct HostTickState {
    pub intents: Vec<(IntentRoute, RunnerIntent)>,
    pub submitted: u32,
    pub dropped: u64,
    pub console: ConsoleOutput,
    console_bytes: u64,
    pub memory: Vec<u8>,
    pub visuals: BTreeMap<RoomName, Vec<String>>,
    pub fuel_used: u64,
}

pub struct SandboxHost {
    this: Weak<SandboxHost>,
    participant: String,
    world: Arc<WorldContext>,
    limits: SandboxLimits,
    loader: Arc<ModuleLoader>,
    /// `None` when the budget is too large to represent.
    deadline: Option<Instant>,
    state: Mutex<HostTickState>,
}

impl std::fmt::Debug for SandboxHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxHost")
            .field("participant", &self.participant)
            .field("time", &self.world.time())
            .finish()
    }
}

impl SandboxHost {
    pub fn new(
        participant: impl Into<String>,
        world: Arc<WorldContext>,
        limits: SandboxLimits,
        loader: Arc<ModuleLoader>,
        memory: Vec<u8>,
    ) -> Arc<Self> {
        let deadline = Instant::now().checked_add(Duration::from_millis(limits.max_cpu_ms));
        let participant = participant.into();
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            participant,
            world,
            limits,
            loader,
            deadline,
            state: Mutex::new(HostTickState {
                memory,
                ..HostTickState::default()
            }),
        })
    }

    pub fn world(&self) -> &WorldContext {
        &self.world
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Takes everything recorded so far.
    pub fn take_state(&self) -> HostTickState {
        let mut state = self.state.lock();
        let taken = std::mem::take(&mut *state);
        state.memory = taken.memory.clone();
        taken
    }

    fn handle(&self) -> Result<Arc<dyn ModuleHost>, SandboxFault> {
        let host: Arc<dyn ModuleHost> = self.this.upgrade().ok_or_else(|| {
            SandboxFault::new(
                MAIN_MODULE,
                SandboxFaultCode::SandboxUnavailable,
                "sandbox host already released",
            )
        })?;
        Ok(host)
    }
}

impl ModuleHost for SandboxHost {
    fn participant(&self) -> &str {
        &self.participant
    }

    fn time(&self) -> u64 {
        self.world.time()
    }

    fn require(&self, name: &str) -> Result<ModuleExports, SandboxFault> {
        self.check_deadline()?;
        self.loader.require(name, &self.handle()?)
    }

    fn call_export(&self, module: &str, export: &str) -> Result<(), SandboxFault> {
        self.check_deadline()?;
        self.loader.call_export(module, export, &self.handle()?)
    }

    fn submit_intent(&self, intent: RunnerIntent) -> Result<(), SandboxFault> {
        self.check_deadline()?;
        let mut state = self.state.lock();
        if state.submitted >= self.limits.max_intents {
            return Err(SandboxFault::new(
                MAIN_MODULE,
                SandboxFaultCode::IntentLimitExceeded,
                format!("intent limit of {} reached", self.limits.max_intents),
            ));
        }
        state.submitted += 1;
        match self.world.route(&intent) {
            Ok(route) => state.intents.push((route, intent)),
            Err(dropped) => {
                state.dropped += 1;
                tracing::warn!(participant = %self.participant, verb = %intent.intent, %dropped, "intent dropped");
            }
        }
        Ok(())
    }

    fn write_console(&self, fd: ConsoleFd, text: &str) {
        let mut state = self.state.lock();
        let len = text.len() as u64;
        if state.console_bytes + len > self.limits.max_console_bytes {
            state.console.truncated = true;
            return;
        }
        state.console_bytes += len;
        let line = text.to_string();
        match fd {
            ConsoleFd::Log => state.console.log.push(line),
            ConsoleFd::Result => state.console.results.push(line),
            ConsoleFd::Error => state.console.errors.push(line),
        }
    }

    fn room_names(&self) -> Vec<RoomName> {
        self.world.room_names()
    }

    fn room_blob(&self, room: &str) -> Option<Vec<u8>> {
        self.world.room_blob(room).map(|blob| blob.as_ref().clone())
    }

    fn memory(&self) -> Vec<u8> {
        self.state.lock().memory.clone()
    }

    fn set_memory(&self, bytes: Vec<u8>) -> Result<(), SandboxFault> {
        if bytes.len() as u64 > self.limits.max_memory_bytes {
            return Err(SandboxFault::new(
                MAIN_MODULE,
                SandboxFaultCode::MemoryLimitExceeded,
                format!(
                    "memory of {} bytes exceeds the {} byte limit",
                    bytes.len(),
                    self.limits.max_memory_bytes
                ),
            ));
        }
        self.state.lock().memory = bytes;
        Ok(())
    }

    fn push_visual(&self, room: &str, payload: String) -> Result<(), SandboxFault> {
        if self.world.room(room).is_none() {
            return Ok(());
        }
        self.state
            .lock()
            .visuals
            .entry(room.to_string())
            .or_default()
            .push(payload);
        Ok(())
    }

    fn fuel_remaining(&self) -> u64 {
        self.limits
            .max_fuel
            .saturating_sub(self.state.lock().fuel_used)
    }

    fn consume_fuel(&self, used: u64) {
        let mut state = self.state.lock();
        state.fuel_used = state.fuel_used.saturating_add(used);
    }

    fn check_deadline(&self) -> Result<(), SandboxFault> {
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(SandboxFault::new(
                MAIN_MODULE,
                SandboxFaultCode::Timeout,
                format!("tick deadline of {} ms exceeded", self.limits.max_cpu_ms),
            ));
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::native::NativeModuleCompiler;
    use crate::schema::{read, RoomBuilder, SchemaRegistry};
    use serde_json::json;

    fn host(limits: SandboxLimits) -> Arc<SandboxHost> {
        let blob = RoomBuilder::new("W1N1").unwrap().build().unwrap();
        let room = read(&SchemaRegistry::new(), blob.clone()).unwrap();
        let mut world = WorldContext::new(5).with_internal_room_verbs(["placeSpawn"]);
        world.add_room(room.view(), Arc::new(blob));
        let loader = Arc::new(ModuleLoader::new(
            Arc::new(NativeModuleCompiler::new()),
            BTreeMap::new(),
        ));
        SandboxHost::new("amy", Arc::new(world), limits, loader, b"{}".to_vec())
    }

    #[test]
    fn intents_are_routed_capped_and_dropped() {
        let host = host(SandboxLimits {
            max_intents: 3,
            ..SandboxLimits::default()
        });
        host.submit_intent(RunnerIntent::for_room("W1N1", "createConstructionSite", json!({})))
            .unwrap();
        host.submit_intent(RunnerIntent::for_room("W1N1", "placeSpawn", json!({})))
            .unwrap();
        host.submit_intent(RunnerIntent::new("00000000000000aa", "move", json!({})))
            .unwrap();
        let fault = host
            .submit_intent(RunnerIntent::for_flags("create", json!({})))
            .unwrap_err();
        assert_eq!(fault.code, SandboxFaultCode::IntentLimitExceeded);

        let state = host.take_state();
        assert_eq!(state.intents.len(), 1);
        assert_eq!(state.dropped, 2);
        assert_eq!(state.memory, b"{}".to_vec());
    }

    #[test]
    fn console_and_memory_caps() {
        let host = host(SandboxLimits {
            max_console_bytes: 8,
            max_memory_bytes: 4,
            ..SandboxLimits::default()
        });
        host.write_console(ConsoleFd::Log, "hello");
        host.write_console(ConsoleFd::Error, "world!");
        host.write_console(ConsoleFd::Result, "ok");
        let fault = host.set_memory(vec![0; 5]).unwrap_err();
        assert_eq!(fault.code, SandboxFaultCode::MemoryLimitExceeded);
        host.set_memory(vec![1, 2]).unwrap();

        let state = host.take_state();
        assert_eq!(state.console.log, vec!["hello".to_string()]);
        assert!(state.console.errors.is_empty());
        assert_eq!(state.console.results, vec!["ok".to_string()]);
        assert!(state.console.truncated);
        assert_eq!(state.memory, vec![1, 2]);
    }

    #[test]
    fn expired_deadline_faults_host_calls() {
        let host = host(SandboxLimits {
            max_cpu_ms: 0,
            ..SandboxLimits::default()
        });
        let fault = host.check_deadline().unwrap_err();
        assert_eq!(fault.code, SandboxFaultCode::Timeout);
        assert!(host
            .submit_intent(RunnerIntent::for_flags("create", json!({})))
            .is_err());
    }

    #[test]
    fn fuel_is_shared_across_calls() {
        let host = host(SandboxLimits {
            max_fuel: 100,
            ..SandboxLimits::default()
        });
        host.consume_fuel(30);
        host.consume_fuel(30);
        assert_eq!(host.fuel_remaining(), 40);
    }
}
