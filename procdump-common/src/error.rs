// Shared error taxonomy glue. The fine-grained per-subsystem error enums
// live in procdump-core; this module only carries the handful of error
// kinds needed by the external-collaborator surface implemented here
// (process sampling), following the `thiserror`-per-module style of
// `libdd-crashtracker::collector::crash_handler::CrashHandlerError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("process {0} not found")]
    NotFound(i32),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {field} from /proc/{pid}/stat")]
    Parse { pid: i32, field: &'static str },
}
