//! Host functions linked into every guest under the `env` module.
//!
//! Return conventions: non-negative values are lengths or success, `-1` means the
//! request was malformed or the target does not exist, `-2` means a limit was hit.
//! Loader and deadline faults trap the guest and keep the original fault so the
//! caller sees its code.

use std::sync::Arc;

use tick_world_abi::{ConsoleFd, ModuleHost, RunnerIntent, SandboxFault, SandboxFaultCode};
use wasmtime::{Caller, Linker, Memory};

use crate::instance::GuestState;
use crate::HOST_IMPORT_MODULE;

const MALFORMED: i32 = -1;
const LIMIT_HIT: i32 = -2;

pub(crate) fn define(linker: &mut Linker<GuestState>) -> wasmtime::Result<()> {
    linker.func_wrap(
        HOST_IMPORT_MODULE,
        "time",
        |caller: Caller<'_, GuestState>| -> wasmtime::Result<i64> {
            let host = host_of(&caller)?;
            Ok(host.time() as i64)
        },
    )?;

    linker.func_wrap(
        HOST_IMPORT_MODULE,
        "room_count",
        |caller: Caller<'_, GuestState>| -> wasmtime::Result<i32> {
            let host = host_of(&caller)?;
            Ok(host.room_names().len() as i32)
        },
    )?;

    linker.func_wrap(
        HOST_IMPORT_MODULE,
        "room_name",
        |mut caller: Caller<'_, GuestState>, index: i32, ptr: i32, cap: i32| -> wasmtime::Result<i32> {
            let host = enter(&mut caller)?;
            let Some(name) = room_at(host.as_ref(), index) else {
                return Ok(MALFORMED);
            };
            write_bounded(&mut caller, ptr, cap, name.as_bytes())
        },
    )?;

    linker.func_wrap(
        HOST_IMPORT_MODULE,
        "room_len",
        |mut caller: Caller<'_, GuestState>, index: i32| -> wasmtime::Result<i32> {
            let host = enter(&mut caller)?;
            let blob = room_at(host.as_ref(), index).and_then(|name| host.room_blob(&name));
            Ok(blob.map_or(MALFORMED, |bytes| bytes.len() as i32))
        },
    )?;

    linker.func_wrap(
        HOST_IMPORT_MODULE,
        "room_read",
        |mut caller: Caller<'_, GuestState>, index: i32, ptr: i32, cap: i32| -> wasmtime::Result<i32> {
            let host = enter(&mut caller)?;
            let Some(blob) = room_at(host.as_ref(), index).and_then(|name| host.room_blob(&name))
            else {
                return Ok(MALFORMED);
            };
            write_bounded(&mut caller, ptr, cap, &blob)
        },
    )?;

    linker.func_wrap(
        HOST_IMPORT_MODULE,
        "intent",
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> wasmtime::Result<i32> {
            let host = enter(&mut caller)?;
            let bytes = read_guest(&mut caller, ptr, len)?;
            let Ok(intent) = serde_json::from_slice::<RunnerIntent>(&bytes) else {
                return Ok(MALFORMED);
            };
            match host.submit_intent(intent) {
                Ok(()) => Ok(0),
                Err(fault) if fault.code == SandboxFaultCode::IntentLimitExceeded => Ok(LIMIT_HIT),
                Err(fault) => Err(record_fault(&mut caller, fault)),
            }
        },
    )?;

    linker.func_wrap(
        HOST_IMPORT_MODULE,
        "console",
        |mut caller: Caller<'_, GuestState>, fd: i32, ptr: i32, len: i32| -> wasmtime::Result<()> {
            let host = enter(&mut caller)?;
            let bytes = read_guest(&mut caller, ptr, len)?;
            let fd = ConsoleFd::try_from(fd).unwrap_or(ConsoleFd::Log);
            host.write_console(fd, &String::from_utf8_lossy(&bytes));
            Ok(())
        },
    )?;

    linker.func_wrap(
        HOST_IMPORT_MODULE,
        "require",
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> wasmtime::Result<()> {
            let host = enter(&mut caller)?;
            let name = read_guest_str(&mut caller, ptr, len)?;
            match host.require(&name) {
                Ok(_) => Ok(()),
                Err(fault) => Err(record_fault(&mut caller, fault)),
            }
        },
    )?;

    linker.func_wrap(
        HOST_IMPORT_MODULE,
        "call",
        |mut caller: Caller<'_, GuestState>,
         module_ptr: i32,
         module_len: i32,
         export_ptr: i32,
         export_len: i32|
         -> wasmtime::Result<()> {
            let host = enter(&mut caller)?;
            let module = read_guest_str(&mut caller, module_ptr, module_len)?;
            let export = read_guest_str(&mut caller, export_ptr, export_len)?;
            match host.call_export(&module, &export) {
                Ok(()) => Ok(()),
                Err(fault) => Err(record_fault(&mut caller, fault)),
            }
        },
    )?;

    linker.func_wrap(
        HOST_IMPORT_MODULE,
        "memory_len",
        |caller: Caller<'_, GuestState>| -> wasmtime::Result<i32> {
            let host = host_of(&caller)?;
            Ok(host.memory().len() as i32)
        },
    )?;

    linker.func_wrap(
        HOST_IMPORT_MODULE,
        "memory_read",
        |mut caller: Caller<'_, GuestState>, ptr: i32, cap: i32| -> wasmtime::Result<i32> {
            let host = enter(&mut caller)?;
            let memory = host.memory();
            write_bounded(&mut caller, ptr, cap, &memory)
        },
    )?;

    linker.func_wrap(
        HOST_IMPORT_MODULE,
        "memory_write",
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> wasmtime::Result<i32> {
            let host = enter(&mut caller)?;
            let bytes = read_guest(&mut caller, ptr, len)?;
            Ok(match host.set_memory(bytes) {
                Ok(()) => 0,
                Err(_) => LIMIT_HIT,
            })
        },
    )?;

    linker.func_wrap(
        HOST_IMPORT_MODULE,
        "visual",
        |mut caller: Caller<'_, GuestState>,
         room_ptr: i32,
         room_len: i32,
         ptr: i32,
         len: i32|
         -> wasmtime::Result<i32> {
            let host = enter(&mut caller)?;
            let room = read_guest_str(&mut caller, room_ptr, room_len)?;
            let payload = read_guest_str(&mut caller, ptr, len)?;
            Ok(match host.push_visual(&room, payload) {
                Ok(()) => 0,
                Err(_) => LIMIT_HIT,
            })
        },
    )?;

    Ok(())
}

fn host_of(caller: &Caller<'_, GuestState>) -> wasmtime::Result<Arc<dyn ModuleHost>> {
    caller
        .data()
        .host
        .clone()
        .ok_or_else(|| wasmtime::Error::msg("host called outside of a sandbox call"))
}

/// Fetches the host and enforces the wall-clock deadline.
fn enter(caller: &mut Caller<'_, GuestState>) -> wasmtime::Result<Arc<dyn ModuleHost>> {
    let host = host_of(caller)?;
    if let Err(fault) = host.check_deadline() {
        return Err(record_fault(caller, fault));
    }
    Ok(host)
}

fn record_fault(caller: &mut Caller<'_, GuestState>, fault: SandboxFault) -> wasmtime::Error {
    let message = fault.to_string();
    caller.data_mut().fault = Some(fault);
    wasmtime::Error::msg(message)
}

fn room_at(host: &dyn ModuleHost, index: i32) -> Option<String> {
    let index = usize::try_from(index).ok()?;
    host.room_names().into_iter().nth(index)
}

fn guest_memory(caller: &mut Caller<'_, GuestState>) -> wasmtime::Result<Memory> {
    caller
        .get_export("memory")
        .and_then(|export| export.into_memory())
        .ok_or_else(|| wasmtime::Error::msg("guest does not export memory"))
}

fn guest_range(ptr: i32, len: i32) -> wasmtime::Result<(usize, usize)> {
    let start = usize::try_from(ptr).map_err(|_| wasmtime::Error::msg("negative guest pointer"))?;
    let len = usize::try_from(len).map_err(|_| wasmtime::Error::msg("negative guest length"))?;
    Ok((start, len))
}

fn read_guest(caller: &mut Caller<'_, GuestState>, ptr: i32, len: i32) -> wasmtime::Result<Vec<u8>> {
    let (start, len) = guest_range(ptr, len)?;
    let memory = guest_memory(caller)?;
    // Bounds are checked against guest memory before anything is copied.
    let bytes = start
        .checked_add(len)
        .and_then(|end| memory.data(&*caller).get(start..end))
        .ok_or_else(|| wasmtime::Error::msg("guest range out of bounds"))?;
    Ok(bytes.to_vec())
}

fn read_guest_str(caller: &mut Caller<'_, GuestState>, ptr: i32, len: i32) -> wasmtime::Result<String> {
    let bytes = read_guest(caller, ptr, len)?;
    String::from_utf8(bytes).map_err(|_| wasmtime::Error::msg("guest string is not utf-8"))
}

/// Copies `bytes` into guest memory when they fit in `cap`; returns the full
/// length either way so the guest can retry with a larger buffer.
fn write_bounded(
    caller: &mut Caller<'_, GuestState>,
    ptr: i32,
    cap: i32,
    bytes: &[u8],
) -> wasmtime::Result<i32> {
    let (start, cap) = guest_range(ptr, cap)?;
    let len = i32::try_from(bytes.len()).map_err(|_| wasmtime::Error::msg("payload too large"))?;
    if bytes.len() > cap {
        return Ok(len);
    }
    let memory = guest_memory(caller)?;
    memory
        .write(&mut *caller, start, bytes)
        .map_err(|err| wasmtime::Error::msg(err.to_string()))?;
    Ok(len)
}
