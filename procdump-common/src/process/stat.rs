// Process sampler: a single point-in-time read of a target's
// /proc/<pid>/stat (+ /proc/<pid>/status for UIDs, + /proc/<pid>/fdinfo for
// the fd count) producing a `ProcessStat` record.
//
// Spec §4.2 calls this component an external collaborator of the core
// ("the `/proc/<pid>/stat` parser... appear only as the interfaces the core
// consumes"): the core only ever depends on the `sample()` function
// signature below, never on these parsing details. It is implemented here,
// rather than stubbed, so the workspace is a runnable whole.
//
// Field layout grounded on `proc(5)`; no retry on failure per spec §4.2.

use crate::error::SampleError;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Sleeping,
    DiskSleep,
    Zombie,
    Stopped,
    TracingStop,
    Dead,
    Other(char),
}

impl From<char> for ProcessState {
    fn from(c: char) -> Self {
        match c {
            'R' => ProcessState::Running,
            'S' => ProcessState::Sleeping,
            'D' => ProcessState::DiskSleep,
            'Z' => ProcessState::Zombie,
            'T' => ProcessState::Stopped,
            't' => ProcessState::TracingStop,
            'X' | 'x' => ProcessState::Dead,
            other => ProcessState::Other(other),
        }
    }
}

/// Real/effective/saved/filesystem UIDs, read from `/proc/<pid>/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessUids {
    pub real: u32,
    pub effective: u32,
    pub saved: u32,
    pub filesystem: u32,
}

/// Snapshot of `/proc/<pid>/stat` plus derived fields (spec §3).
#[derive(Debug, Clone)]
pub struct ProcessStat {
    pub pid: i32,
    pub comm: String,
    pub state: ProcessState,
    pub ppid: i32,
    pub pgid: i32,
    pub utime: u64,
    pub stime: u64,
    pub start_time_ticks: u64,
    pub rss_pages: u64,
    pub swap_pages: u64,
    pub num_threads: u64,
    pub flags: u32,
    pub num_filedescriptors: u64,
    pub uids: Option<ProcessUids>,
}

fn proc_path(pid: i32, leaf: &str) -> String {
    format!("/proc/{pid}/{leaf}")
}

/// Parses a `/proc/<pid>/stat` line. The comm field is delimited by the
/// first `(` and the last `)` so it tolerates spaces and parentheses inside
/// the process name.
fn parse_stat_line(pid: i32, line: &str) -> Result<ProcessStat, SampleError> {
    let open = line.find('(').ok_or(SampleError::Parse { pid, field: "comm_open" })?;
    let close = line.rfind(')').ok_or(SampleError::Parse { pid, field: "comm_close" })?;
    if close < open {
        return Err(SampleError::Parse { pid, field: "comm" });
    }
    let comm = line[open + 1..close].to_string();
    let rest = line[close + 1..].trim_start();
    let fields: Vec<&str> = rest.split_whitespace().collect();

    // Fields after `comm`, 1-indexed in proc(5) starting at field 3 (state).
    // fields[0] = state (field 3), fields[1] = ppid (4), fields[2] = pgrp (5)
    // ... fields[10] = utime (14), fields[11] = stime (15)
    // ... fields[16] = num_threads (20), fields[18] = starttime (22)
    // ... fields[20] = rss (24) in pages, fields[6] = flags (9)
    let get = |idx: usize, field: &'static str| -> Result<&str, SampleError> {
        fields.get(idx).copied().ok_or(SampleError::Parse { pid, field })
    };

    let state = ProcessState::from(get(0, "state")?.chars().next().unwrap_or('?'));
    let ppid: i32 = get(1, "ppid")?.parse().map_err(|_| SampleError::Parse { pid, field: "ppid" })?;
    let pgid: i32 = get(2, "pgrp")?.parse().map_err(|_| SampleError::Parse { pid, field: "pgrp" })?;
    let flags: u32 = get(6, "flags")?.parse().map_err(|_| SampleError::Parse { pid, field: "flags" })?;
    let utime: u64 = get(10, "utime")?.parse().map_err(|_| SampleError::Parse { pid, field: "utime" })?;
    let stime: u64 = get(11, "stime")?.parse().map_err(|_| SampleError::Parse { pid, field: "stime" })?;
    let num_threads: u64 = get(16, "num_threads")?.parse().map_err(|_| SampleError::Parse { pid, field: "num_threads" })?;
    let start_time_ticks: u64 = get(18, "starttime")?.parse().map_err(|_| SampleError::Parse { pid, field: "starttime" })?;
    let rss_pages: u64 = get(20, "rss")?.parse().map_err(|_| SampleError::Parse { pid, field: "rss" })?;

    Ok(ProcessStat {
        pid,
        comm,
        state,
        ppid,
        pgid,
        utime,
        stime,
        start_time_ticks,
        rss_pages,
        swap_pages: 0,
        num_threads,
        flags,
        num_filedescriptors: 0,
        uids: None,
    })
}

fn read_swap_and_uids(pid: i32) -> (u64, Option<ProcessUids>) {
    let Ok(contents) = fs::read_to_string(proc_path(pid, "status")) else {
        return (0, None);
    };
    let mut swap_pages = 0u64;
    let mut uids = None;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("VmSwap:") {
            if let Some(kb) = rest.trim().split_whitespace().next() {
                if let Ok(kb) = kb.parse::<u64>() {
                    swap_pages = kb * 1024 / page_size_bytes();
                }
            }
        } else if let Some(rest) = line.strip_prefix("Uid:") {
            let parts: Vec<u32> = rest
                .split_whitespace()
                .filter_map(|p| p.parse().ok())
                .collect();
            if parts.len() == 4 {
                uids = Some(ProcessUids {
                    real: parts[0],
                    effective: parts[1],
                    saved: parts[2],
                    filesystem: parts[3],
                });
            }
        }
    }
    (swap_pages, uids)
}

fn page_size_bytes() -> u64 {
    // SAFETY: sysconf(_SC_PAGESIZE) has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}

/// Counts entries under `/proc/<pid>/fdinfo`, minus the two directory
/// entries `.` and `..` (spec §3).
fn count_file_descriptors(pid: i32) -> u64 {
    match fs::read_dir(proc_path(pid, "fdinfo")) {
        Ok(entries) => entries.count() as u64,
        Err(_) => 0,
    }
}

/// Single-shot read of a target's process stats. No retry: failure to open
/// or parse returns `SampleError::NotFound`-or-better, leaving the caller
/// to decide (spec §4.2).
pub fn sample(pid: i32) -> Result<ProcessStat, SampleError> {
    let stat_path = proc_path(pid, "stat");
    if !Path::new(&stat_path).exists() {
        return Err(SampleError::NotFound(pid));
    }
    let contents = fs::read_to_string(&stat_path).map_err(|source| SampleError::Read {
        path: stat_path.clone(),
        source,
    })?;
    let mut stat = parse_stat_line(pid, contents.trim_end())?;
    let (swap_pages, uids) = read_swap_and_uids(pid);
    stat.swap_pages = swap_pages;
    stat.uids = uids;
    stat.num_filedescriptors = count_file_descriptors(pid);
    Ok(stat)
}

/// Clock ticks per second, used to convert `utime`/`stime`/`starttime` into
/// seconds for the CPU% formula in spec §4.2.
pub fn clock_ticks_per_second() -> u64 {
    // SAFETY: sysconf(_SC_CLK_TCK) has no preconditions.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as u64
    } else {
        100
    }
}

/// System uptime in seconds, read from `/proc/uptime`, used alongside
/// `clock_ticks_per_second` for the CPU% formula.
pub fn system_uptime_seconds() -> Result<f64, SampleError> {
    let contents = fs::read_to_string("/proc/uptime").map_err(|source| SampleError::Read {
        path: "/proc/uptime".to_string(),
        source,
    })?;
    contents
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or(SampleError::Parse { pid: 0, field: "uptime" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stat_line_with_simple_comm() {
        let line = "123 (bash) S 1 123 123 0 -1 4194304 100 0 0 0 10 5 0 0 20 0 1 0 5000 1000000 200 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 1 0 0 0 0 0 0 0 0 0 0 0 0 0";
        let stat = parse_stat_line(123, line).unwrap();
        assert_eq!(stat.comm, "bash");
        assert_eq!(stat.state, ProcessState::Sleeping);
        assert_eq!(stat.ppid, 1);
        assert_eq!(stat.pgid, 123);
        assert_eq!(stat.utime, 10);
        assert_eq!(stat.stime, 5);
        assert_eq!(stat.num_threads, 1);
        assert_eq!(stat.start_time_ticks, 5000);
        assert_eq!(stat.rss_pages, 200);
    }

    #[test]
    fn parses_comm_containing_parens_and_spaces() {
        let line = "42 (my (weird) proc) R 1 42 42 0 -1 0 0 0 0 0 1 1 0 0 20 0 2 0 10 0 0 0 1 1 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0";
        let stat = parse_stat_line(42, line).unwrap();
        assert_eq!(stat.comm, "my (weird) proc");
        assert_eq!(stat.num_threads, 2);
    }

    #[test]
    fn sample_returns_not_found_for_missing_pid() {
        let err = sample(i32::MAX - 1).unwrap_err();
        assert!(matches!(err, SampleError::NotFound(_)));
    }

    #[test]
    fn sample_self_succeeds() {
        let pid = std::process::id() as i32;
        let stat = sample(pid).expect("sampling self should succeed");
        assert_eq!(stat.pid, pid);
        assert!(stat.num_threads >= 1);
    }
}
