pub mod config;
pub mod dump;
pub mod error;
pub mod managed;
pub mod restrack;
pub mod signal_controller;
pub mod supervisor;
pub mod triggers;

pub use config::{Configuration, ConfigId, DumpKind, Identity, TargetSelector};
pub use error::ProcDumpError;
