pub mod naming;
pub mod writer;

pub use writer::{write_dump, DumpOutcome};
