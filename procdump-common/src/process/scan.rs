// Minimal `/proc` scanner: resolves a process name or PGID to PID(s).
//
// Spec §4.7 calls this an external collaborator ("resolve name to PID by
// scanning /proc"); implemented here rather than stubbed so the workspace
// is a runnable whole, same rationale as `process::stat`.

use super::stat::sample;

/// Every numeric entry directly under `/proc`.
pub fn list_pids() -> Vec<i32> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()))
        .collect()
}

/// First PID whose `comm` equals `name` exactly.
pub fn resolve_name_to_pid(name: &str) -> Option<i32> {
    list_pids().into_iter().find(|&pid| sample(pid).map(|s| s.comm == name).unwrap_or(false))
}

/// Every PID whose `comm` equals `name` exactly.
pub fn pids_matching_name(name: &str) -> Vec<i32> {
    list_pids()
        .into_iter()
        .filter(|&pid| sample(pid).map(|s| s.comm == name).unwrap_or(false))
        .collect()
}

/// Every PID whose process group is `pgid`.
pub fn pids_in_group(pgid: i32) -> Vec<i32> {
    list_pids()
        .into_iter()
        .filter(|&pid| sample(pid).map(|s| s.pgid == pgid).unwrap_or(false))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_pids_includes_self() {
        let pids = list_pids();
        assert!(pids.contains(&(std::process::id() as i32)));
    }

    #[test]
    fn pids_in_group_includes_self_own_group() {
        let pgid = nix::unistd::getpgrp().as_raw();
        let pids = pids_in_group(pgid);
        assert!(pids.contains(&(std::process::id() as i32)));
    }
}
