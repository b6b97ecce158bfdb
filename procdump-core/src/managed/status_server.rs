// Status-socket server (spec §4.6 "Status-socket server"): accepts profiler
// callbacks reporting per-dump status and liveness.
//
// Threading model grounded on the spec's "one helper thread per connection"
// shape (§5 "transient helper threads ... status-socket acceptor") and on
// `libdd-crashtracker::collector::collector_manager`'s pattern of a
// dedicated accept/handle loop per forked helper.

use crate::config::Configuration;
use crate::error::ProcDumpError;
use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

pub const MAX_CONCURRENT_CALLBACKS: usize = 50;
pub const MAX_DUMP_PATH_LEN: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilerStatus {
    DumpSucceeded,
    DumpFailed,
    Fatal,
    HealthPing,
}

impl ProfilerStatus {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'1' => Some(ProfilerStatus::DumpSucceeded),
            b'2' => Some(ProfilerStatus::DumpFailed),
            b'F' => Some(ProfilerStatus::Fatal),
            b'H' => Some(ProfilerStatus::HealthPing),
            _ => None,
        }
    }
}

pub fn status_socket_path(orchestrator_pid: i32, target_pid: i32) -> PathBuf {
    let tmp = std::env::var("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(tmp)
        .join("procdump")
        .join(format!("procdump-status-{orchestrator_pid}-{target_pid}"))
}

/// Reads one framed status message: 4-byte payload length, 1-byte status,
/// 4-byte dump-path length, dump-path bytes (spec §6 "Profiler ->
/// orchestrator status frame"). Oversize payloads are rejected by closing
/// the connection.
fn read_status_message(stream: &mut UnixStream) -> Result<(ProfilerStatus, String), ProcDumpError> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .map_err(|e| ProcDumpError::Ipc(format!("short read on status frame length: {e}")))?;
    let payload_len = u32::from_le_bytes(len_buf);
    if payload_len > MAX_DUMP_PATH_LEN + 64 {
        return Err(ProcDumpError::Ipc(format!("oversize status payload: {payload_len} bytes")));
    }

    let mut status_buf = [0u8; 1];
    stream
        .read_exact(&mut status_buf)
        .map_err(|e| ProcDumpError::Ipc(format!("short read on status byte: {e}")))?;
    let status = ProfilerStatus::from_byte(status_buf[0])
        .ok_or_else(|| ProcDumpError::Ipc(format!("unknown status byte 0x{:02X}", status_buf[0])))?;

    if status == ProfilerStatus::HealthPing {
        return Ok((status, String::new()));
    }

    let mut path_len_buf = [0u8; 4];
    stream
        .read_exact(&mut path_len_buf)
        .map_err(|e| ProcDumpError::Ipc(format!("short read on dump-path length: {e}")))?;
    let path_len = u32::from_le_bytes(path_len_buf);
    if path_len > MAX_DUMP_PATH_LEN {
        return Err(ProcDumpError::Ipc(format!("dump path too long: {path_len} bytes")));
    }

    let mut path_buf = vec![0u8; path_len as usize];
    stream
        .read_exact(&mut path_buf)
        .map_err(|e| ProcDumpError::Ipc(format!("short read on dump-path bytes: {e}")))?;
    let path = String::from_utf8_lossy(&path_buf).to_string();

    Ok((status, path))
}

/// Binds the status socket, signals readiness to any injector waiting on
/// `config.handles.status_socket_ready`, then accepts profiler callbacks
/// until the dump cap is reached or `config.handles.quit` is set.
pub fn run(config: Arc<Configuration>) -> Result<(), ProcDumpError> {
    let dir = std::env::var("TMPDIR")
        .map(|t| PathBuf::from(t).join("procdump"))
        .unwrap_or_else(|_| PathBuf::from("/tmp/procdump"));
    fs::create_dir_all(&dir).map_err(|e| ProcDumpError::Environment(format!("cannot create {}: {e}", dir.display())))?;

    let orchestrator_pid = std::process::id() as i32;
    let path = status_socket_path(orchestrator_pid, config.pid());
    let _ = fs::remove_file(&path);

    let listener = UnixListener::bind(&path)
        .map_err(|e| ProcDumpError::Ipc(format!("failed to bind status socket {}: {e}", path.display())))?;
    let mut perms = fs::metadata(&path)
        .map_err(|e| ProcDumpError::Ipc(format!("cannot stat status socket: {e}")))?
        .permissions();
    perms.set_mode(0o777);
    let _ = fs::set_permissions(&path, perms);

    *config.external.status_socket_path.lock().unwrap() = Some(path.clone());

    {
        let (ready, cvar) = &*config.handles.status_socket_ready;
        let mut ready = ready.lock().unwrap();
        *ready = true;
        cvar.notify_all();
    }

    let in_flight = Arc::new(AtomicUsize::new(0));
    listener
        .set_nonblocking(true)
        .map_err(|e| ProcDumpError::Ipc(format!("cannot set status socket nonblocking: {e}")))?;

    loop {
        if config.is_quitting() || config.dump_cap_reached() {
            break;
        }
        match listener.accept() {
            Ok((stream, _addr)) => {
                if in_flight.load(Ordering::SeqCst) >= MAX_CONCURRENT_CALLBACKS {
                    drop(stream);
                    continue;
                }
                in_flight.fetch_add(1, Ordering::SeqCst);
                let config = Arc::clone(&config);
                let in_flight = Arc::clone(&in_flight);
                thread::spawn(move || {
                    handle_connection(&config, stream);
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(std::time::Duration::from_millis(100));
            }
            Err(_) => break,
        }
    }

    let _ = fs::remove_file(&path);
    Ok(())
}

fn handle_connection(config: &Configuration, mut stream: UnixStream) {
    loop {
        match read_status_message(&mut stream) {
            Ok((ProfilerStatus::DumpSucceeded, path)) => {
                let count = config.counters.dumps_collected();
                tracing::info!("Core dump {count} generated: {path}");
                config.counters.record_dump_collected(config.sampling.max_dumps);
                if config.dump_cap_reached() {
                    config.request_quit();
                    break;
                }
            }
            Ok((ProfilerStatus::DumpFailed, path)) => {
                tracing::warn!("managed dump attempt failed for path {path}");
            }
            Ok((ProfilerStatus::Fatal, _)) => {
                tracing::error!("profiler reported a fatal error; retiring target");
                config.request_quit();
                break;
            }
            Ok((ProfilerStatus::HealthPing, _)) => {}
            Err(e) => {
                tracing::debug!("status connection closed: {e}");
                break;
            }
        }
    }
}

pub fn wait_for_ready(config: &Configuration, timeout: std::time::Duration) -> bool {
    let (ready, cvar) = &*config.handles.status_socket_ready;
    let guard = ready.lock().unwrap();
    if *guard {
        return true;
    }
    let (guard, result) = cvar.wait_timeout(guard, timeout).unwrap();
    *guard || !result.timed_out()
}

#[allow(dead_code)]
fn cancel_socket_path(target_pid: i32) -> PathBuf {
    let tmp = std::env::var("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(tmp).join("procdump").join(format!("procdump-cancel-{target_pid}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_socket_path_matches_spec_shape() {
        let path = status_socket_path(111, 222);
        assert!(path.ends_with("procdump/procdump-status-111-222"));
    }

    #[test]
    fn cancel_socket_path_matches_spec_shape() {
        let path = cancel_socket_path(222);
        assert!(path.ends_with("procdump/procdump-cancel-222"));
    }
}
