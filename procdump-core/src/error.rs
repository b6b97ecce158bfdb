// Error taxonomy (spec §7), one variant family per class. Mirrors the
// `thiserror`-per-subsystem style of `libdd-crashtracker`'s
// `CrashHandlerError` / `CollectorSpawnError`.

use thiserror::Error;

/// The six error classes from spec §7. Trigger threads retire their own
/// target on `Target`/`Ipc`/`Resource` errors without aborting the process;
/// only the supervisor calls `std::process::exit` (spec §7 "Propagation").
#[derive(Debug, Error)]
pub enum ProcDumpError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("environment error: {0}")]
    Environment(String),

    #[error("target error (pid {pid}): {message}")]
    Target { pid: i32, message: String },

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("resource tracking error: {0}")]
    Resource(String),

    #[error("internal error at {location}: {message}")]
    Internal { location: &'static str, message: String },
}

impl ProcDumpError {
    pub fn internal(location: &'static str, message: impl Into<String>) -> Self {
        ProcDumpError::Internal {
            location,
            message: message.into(),
        }
    }

    pub fn target(pid: i32, message: impl Into<String>) -> Self {
        ProcDumpError::Target {
            pid,
            message: message.into(),
        }
    }

    /// `true` for classes that are fatal to the whole orchestrator at
    /// startup (Configuration, Environment); `false` for classes that only
    /// retire the affected target (Target, Ipc, Resource, and non-critical
    /// Internal errors).
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(self, ProcDumpError::Configuration(_) | ProcDumpError::Environment(_))
    }
}

/// One line per dump attempt (spec §7 "User-visible failure").
pub fn format_dump_failure(err: &ProcDumpError) -> String {
    format!("An error occurred while generating the core dump: {err}")
}

pub fn format_dump_success(dumps_collected: u32, path: &str) -> String {
    format!("Core dump {dumps_collected} generated: {path}")
}
