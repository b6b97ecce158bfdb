pub mod injector;
pub mod profiler_asset;
pub mod protocol;
pub mod status_server;

use crate::config::Configuration;
use crate::error::ProcDumpError;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A fixed, orchestrator-owned CLSID identifying the procdump profiler to
/// the runtime's attach protocol (spec §4.6 "Profiler injector"). Not a
/// secret; it only has to be unique and stable across releases.
pub const PROFILER_CLSID: [u8; 16] = *b"PROCDUMP-CLSID01";

/// Ties the profiler extractor, injector, status-socket server, and target
/// liveness sentinel together (spec §4.6). One instance supervises exactly
/// one managed target.
pub struct ManagedMonitor {
    status_thread: Option<JoinHandle<()>>,
    sentinel_thread: Option<JoinHandle<()>>,
    profiler_path: std::path::PathBuf,
}

impl ManagedMonitor {
    /// Starts the status-socket server, waits for it to be listening (the
    /// "Ordering guarantee" in spec §4.6), extracts and injects the
    /// profiler, then starts the liveness sentinel. The managed trigger
    /// thread calls this once per target before entering its own wait loop.
    pub fn start(
        config: Arc<Configuration>,
        trigger_kind: &str,
        extra_client_data_fields: Vec<String>,
    ) -> Result<Self, ProcDumpError> {
        let server_config = Arc::clone(&config);
        let status_thread = thread::spawn(move || {
            if let Err(e) = status_server::run(server_config) {
                tracing::error!("status socket server exited with error: {e}");
            }
        });

        if !status_server::wait_for_ready(&config, Duration::from_secs(5)) {
            return Err(ProcDumpError::Ipc("status socket did not become ready in time".into()));
        }

        let profiler_path = profiler_asset::extract()?;

        let diagnostics_socket = injector::find_diagnostics_socket(config.pid())
            .ok_or_else(|| ProcDumpError::target(config.pid(), "target has no diagnostics endpoint"))?;

        let output_path = match &config.output.base_filename {
            Some(_) => config.output.dump_dir.to_string_lossy().to_string(),
            None => format!("{}/", config.output.dump_dir.to_string_lossy()),
        };

        injector::attach_profiler(
            &diagnostics_socket,
            PROFILER_CLSID,
            &profiler_path,
            trigger_kind,
            &output_path,
            std::process::id() as i32,
            &extra_client_data_fields,
        )?;

        let sentinel_config = Arc::clone(&config);
        let sentinel_thread = thread::spawn(move || target_liveness_sentinel(sentinel_config));

        Ok(Self {
            status_thread: Some(status_thread),
            sentinel_thread: Some(sentinel_thread),
            profiler_path,
        })
    }

    pub fn join(mut self) {
        if let Some(t) = self.status_thread.take() {
            let _ = t.join();
        }
        if let Some(t) = self.sentinel_thread.take() {
            let _ = t.join();
        }
        profiler_asset::cleanup(&self.profiler_path);
    }
}

/// Polls target existence every cycle; on target death, sets quit so the
/// status server's accept loop (which also checks quit) unblocks and tears
/// down (spec §4.6 "Target liveness sentinel").
fn target_liveness_sentinel(config: Arc<Configuration>) {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    loop {
        if config.is_quitting() {
            return;
        }
        if kill(Pid::from_raw(config.pid()), None).is_err() {
            config.counters.set_terminated();
            config.request_quit();
            return;
        }
        thread::sleep(Duration::from_millis(config.sampling.polling_interval_ms));
    }
}
