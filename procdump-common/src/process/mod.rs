pub mod scan;
pub mod stat;

pub use scan::{list_pids, pids_in_group, pids_matching_name, resolve_name_to_pid};
pub use stat::{clock_ticks_per_second, sample, system_uptime_seconds, ProcessStat, ProcessState, ProcessUids};
