pub mod error;
pub mod logging;
pub mod process;
pub mod waitable;

pub use error::SampleError;
pub use process::{sample, ProcessStat, ProcessState, ProcessUids};
pub use waitable::{wait_any, wait_for_quit, Event, Semaphore, WaitHandle, WaitOutcome};
