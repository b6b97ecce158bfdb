// Profiler injector (spec §4.6 "Profiler injector"): opens a stream socket
// to the target's diagnostics endpoint and sends an attach-profiler frame.
//
// Grounded on `libdd-crashtracker::collector::collector_manager`'s use of a
// `UnixStream` for a one-shot local-IPC exchange, and on spec §6's wire
// layout for the attach-profiler payload.

use super::protocol::{build_client_data, encode_attach_profiler, send_request_and_read_result, HRESULT_PROFILER_ALREADY_ATTACHED};
use crate::error::ProcDumpError;
use std::fs;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Attach timeout (spec §5 "Timeouts").
pub const ATTACH_TIMEOUT_MS: u32 = 5000;
/// Detach timeout (spec §5 "Timeouts"); observed by the caller when waiting
/// for the profiler to unload after the dump cap is reached.
pub const DETACH_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Finds the first socket path in the `/proc/net/unix` listing whose
/// filename begins `dotnet-diagnostic-<pid>`. Split out from
/// `find_diagnostics_socket` so the matching logic can be unit-tested
/// without a real `/proc/net/unix`.
fn match_diagnostics_socket(proc_net_unix: &str, pid: i32) -> Option<String> {
    let needle = format!("dotnet-diagnostic-{pid}");
    for line in proc_net_unix.lines().skip(1) {
        let path_field = line.split_whitespace().last()?;
        if let Some(filename) = Path::new(path_field).file_name().and_then(|f| f.to_str()) {
            if filename.starts_with(&needle) {
                return Some(path_field.to_string());
            }
        }
    }
    None
}

/// Scans `/proc/net/unix` for a socket path beginning
/// `dotnet-diagnostic-<pid>` under `$TMPDIR` (else `/tmp`). Best-effort, as
/// spec §4.3 step 2 describes: a miss just means "not a managed process".
pub fn find_diagnostics_socket(pid: i32) -> Option<PathBuf> {
    let contents = fs::read_to_string("/proc/net/unix").ok()?;
    match_diagnostics_socket(&contents, pid).map(PathBuf::from)
}

/// Is the target PID a managed process (spec §4.3 step 2)?
pub fn is_managed_process(pid: i32) -> bool {
    find_diagnostics_socket(pid).is_some()
}

/// Attaches the profiler at `profiler_path` into the target by sending an
/// attach-profiler frame over its diagnostics endpoint (spec §4.6, §6).
pub fn attach_profiler(
    diagnostics_socket: &Path,
    profiler_clsid: [u8; 16],
    profiler_path: &Path,
    trigger_kind: &str,
    output_path: &str,
    orchestrator_pid: i32,
    extra_client_data_fields: &[String],
) -> Result<(), ProcDumpError> {
    let client_data = build_client_data(trigger_kind, output_path, orchestrator_pid, extra_client_data_fields);
    let frame = encode_attach_profiler(
        ATTACH_TIMEOUT_MS,
        &profiler_clsid,
        profiler_path.to_string_lossy().as_ref(),
        client_data.as_bytes(),
    );

    let mut stream = UnixStream::connect(diagnostics_socket)
        .map_err(|e| ProcDumpError::Ipc(format!("failed to connect to diagnostics endpoint: {e}")))?;
    stream
        .set_read_timeout(Some(Duration::from_millis(ATTACH_TIMEOUT_MS as u64)))
        .map_err(|e| ProcDumpError::Ipc(format!("failed to set read timeout: {e}")))?;

    let hresult = send_request_and_read_result(&mut stream, &frame)?;
    if hresult == 0 {
        Ok(())
    } else if hresult == HRESULT_PROFILER_ALREADY_ATTACHED {
        Err(ProcDumpError::Ipc("profiler already loaded in target".into()))
    } else {
        Err(ProcDumpError::Ipc(format!("attach-profiler failed, hresult=0x{hresult:08X}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_PROC_NET_UNIX: &str = "Num       RefCount Protocol Flags    Type St Inode Path\n\
ffff0001: 00000002 00000000 00010000 0001 01 12345 /tmp/dotnet-diagnostic-4242-1-socket\n\
ffff0002: 00000002 00000000 00010000 0001 01 12346 /tmp/other.sock\n";

    #[test]
    fn matches_diagnostics_socket_for_target_pid() {
        let found = match_diagnostics_socket(SAMPLE_PROC_NET_UNIX, 4242);
        assert_eq!(found.as_deref(), Some("/tmp/dotnet-diagnostic-4242-1-socket"));
    }

    #[test]
    fn no_match_for_unrelated_pid() {
        assert!(match_diagnostics_socket(SAMPLE_PROC_NET_UNIX, 9999).is_none());
    }
}
