// Dump filename generation and parsing (spec §4.3 step 3, §8 round-trip
// property). Grounded on the original `sanitize()` in `src/GenHelpers.c`
// (replace every non-alphanumeric character with `_`) and
// `GetCoreDumpName()` in `src/CoreDumpWriter.c` for the `<proc>_<kind>_<ts>`
// shape.

use crate::config::DumpKind;
use chrono::Local;
use std::path::{Path, PathBuf};

/// Replaces every non-alphanumeric character with `_`, matching the
/// original C `sanitize()`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Builds the dump output path for this attempt (spec §4.3 step 3): either
/// `<dir>/<base>` when a base filename is configured, or
/// `<dir>/<sanitized_proc>_<kind>_<timestamp>` otherwise.
pub fn build_dump_path(dir: &Path, proc_name: &str, kind: DumpKind, base_filename: Option<&str>) -> PathBuf {
    match base_filename {
        Some(base) => dir.join(base),
        None => {
            let sanitized = sanitize(proc_name);
            let filename = format!("{sanitized}_{}_{}", kind.as_str(), timestamp_now());
            dir.join(filename)
        }
    }
}

/// The external core-writer tool appends `.<pid>` to whatever prefix it was
/// given (spec §6 "Filesystem surface"). This mirrors that for the native
/// dump path so callers can predict the file gcore will actually produce.
pub fn append_pid_suffix(prefix: &Path, pid: i32) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(format!(".{pid}"));
    PathBuf::from(s)
}

/// Parsed components of a default-named dump file, recovered by splitting
/// on `_` (spec §8 "Round-trip").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDumpName {
    pub proc_name: String,
    pub kind: String,
    pub timestamp: String,
}

/// Splits a filename of the form `<proc>_<kind>_<YYYY-MM-DD_HH:MM:SS>` back
/// into its three components. The timestamp contains underscores itself
/// (date/time separator), so this anchors on the known kind vocabulary
/// rather than naively splitting into three parts.
pub fn parse_dump_name(filename: &str) -> Option<ParsedDumpName> {
    const KINDS: &[&str] = &[
        "commit", "cpu", "thread", "filedesc", "signal", "time", "exception", "manual",
    ];
    for kind in KINDS {
        let needle = format!("_{kind}_");
        if let Some(pos) = filename.find(&needle) {
            let proc_name = filename[..pos].to_string();
            let timestamp = filename[pos + needle.len()..].to_string();
            if proc_name.is_empty() || timestamp.is_empty() {
                continue;
            }
            return Some(ParsedDumpName {
                proc_name,
                kind: (*kind).to_string(),
                timestamp,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_non_alnum() {
        assert_eq!(sanitize("my proc/1"), "my_proc_1");
        assert_eq!(sanitize("bash"), "bash");
    }

    #[test]
    fn build_dump_path_uses_base_filename_when_set() {
        let path = build_dump_path(Path::new("/tmp"), "bash", DumpKind::Cpu, Some("custom"));
        assert_eq!(path, PathBuf::from("/tmp/custom"));
    }

    #[test]
    fn default_name_round_trips_through_parser() {
        let path = build_dump_path(Path::new("/tmp"), "my proc", DumpKind::Signal, None);
        let filename = path.file_name().unwrap().to_str().unwrap();
        let parsed = parse_dump_name(filename).expect("should parse");
        assert_eq!(parsed.proc_name, "my_proc");
        assert_eq!(parsed.kind, "signal");
        assert!(!parsed.timestamp.is_empty());
    }

    #[test]
    fn append_pid_suffix_adds_dot_pid() {
        let path = append_pid_suffix(Path::new("/tmp/foo_cpu_ts"), 4242);
        assert_eq!(path, PathBuf::from("/tmp/foo_cpu_ts.4242"));
    }
}
