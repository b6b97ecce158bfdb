// Argument parsing (spec §6 "CLI"). `-flag` and `/flag` are accepted
// case-insensitively, so before handing argv to clap we rewrite tokens into
// clap's own `-x`/`--xyz` convention.
//
// Grounded on `datadog-profiling-replayer`'s `clap` usage for the derive
// style, and on the original `ParseArgvOrConfigFile` pass that normalizes
// `-`/`/` prefixes case-insensitively before individual flags are matched.

use clap::Parser;
use procdump_core::config::{OutputConfig, Sampling, Thresholds};
use procdump_core::{ProcDumpError, TargetSelector};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "procdump", about = "Generates core dumps for a Linux process based on monitored triggers")]
pub struct Cli {
    #[arg(short = 'n', value_name = "COUNT")]
    num_dumps: Option<u32>,

    #[arg(short = 's', value_name = "SECONDS")]
    cooldown_seconds: Option<u64>,

    #[arg(short = 'c', value_name = "PERCENT")]
    cpu_above: Option<f64>,

    #[arg(long = "cl", value_name = "PERCENT")]
    cpu_below: Option<f64>,

    #[arg(short = 'm', value_name = "MB[,MB...]")]
    memory_above: Option<String>,

    #[arg(long = "ml", value_name = "MB")]
    memory_below: Option<u64>,

    #[arg(long = "tc", value_name = "COUNT")]
    thread_count: Option<u64>,

    #[arg(long = "fc", value_name = "COUNT")]
    file_descriptor_count: Option<u64>,

    #[arg(long = "sig", value_name = "SIGNO")]
    signal_number: Option<i32>,

    #[arg(short = 'e')]
    managed_exception: bool,

    #[arg(short = 'f', value_name = "NAME[,NAME...]")]
    exception_filter: Option<String>,

    #[arg(long = "gcgen", value_name = "GENERATION")]
    gc_generation: Option<u32>,

    #[arg(long = "gcm", value_name = "MB[,MB...]")]
    gc_heap_mb: Option<String>,

    #[arg(long = "restrack")]
    restrack: bool,

    #[arg(long = "pf", value_name = "MS")]
    polling_interval_ms: Option<u64>,

    #[arg(short = 'o')]
    overwrite: bool,

    #[arg(long = "log")]
    diagnostic_log: bool,

    #[arg(short = 'w')]
    wait_for_name: bool,

    #[arg(long = "pgid")]
    interpret_as_pgid: bool,

    /// Target (PID, PGID, or process name), then optionally an output
    /// directory or directory+filename.
    #[arg(value_name = "TARGET [PATH]")]
    positionals: Vec<String>,
}

impl Cli {
    /// Rewrites argv so every `-flag`/`/flag` token becomes the `-x`/`--xyz`
    /// clap already understands, lowercasing the flag name for
    /// case-insensitivity. Argument values (the tokens that follow a flag)
    /// are left untouched.
    pub fn normalize_args(args: impl Iterator<Item = String>) -> Vec<String> {
        args.enumerate()
            .map(|(i, arg)| if i == 0 { arg } else { normalize_token(&arg) })
            .collect()
    }
}

/// Flag names this CLI understands, lowercased and without a leading `-`/`/`.
/// Only a token whose stripped, lowercased form is one of these gets
/// rewritten; anything else (an absolute path positional like
/// `/var/crash`, a negative-looking value) passes through untouched.
const KNOWN_FLAGS: &[&str] = &[
    "n", "s", "c", "cl", "m", "ml", "tc", "fc", "sig", "e", "f", "gcgen", "gcm", "restrack", "pf", "o", "log", "w",
    "pgid", "h", "help", "v", "version",
];

fn normalize_token(arg: &str) -> String {
    let rest = match arg.strip_prefix('/').or_else(|| arg.strip_prefix('-')) {
        Some(rest) if !rest.is_empty() => rest,
        _ => return arg.to_string(),
    };
    let lower = rest.to_ascii_lowercase();
    if !KNOWN_FLAGS.contains(&lower.as_str()) {
        return arg.to_string();
    }
    if lower.chars().count() <= 1 {
        format!("-{lower}")
    } else {
        format!("--{lower}")
    }
}

/// Everything the supervisor needs to start monitoring, built from a parsed
/// `Cli` (spec §3 groups these as Identity/Thresholds/Sampling/Output, minus
/// the identity which the supervisor resolves itself from the selector).
#[derive(Debug)]
pub struct ParsedArgs {
    pub selector: TargetSelector,
    pub thresholds: Thresholds,
    pub sampling: Sampling,
    pub output: OutputConfig,
    pub diagnostic_log: bool,
}

fn parse_mb_list(raw: &str) -> Result<Vec<u64>, ProcDumpError> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<u64>()
                .map_err(|_| ProcDumpError::Configuration(format!("invalid MB value: {part}")))
        })
        .collect()
}

fn parse_name_list(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

fn resolve_target(target: &str, as_pgid: bool, wait: bool) -> Result<TargetSelector, ProcDumpError> {
    if as_pgid {
        let pgid = target
            .parse::<i32>()
            .map_err(|_| ProcDumpError::Configuration(format!("-pgid requires a numeric target, got '{target}'")))?;
        return Ok(TargetSelector::Pgid(pgid));
    }
    if let Ok(pid) = target.parse::<i32>() {
        return Ok(TargetSelector::Pid(pid));
    }
    Ok(TargetSelector::Name {
        name: target.to_string(),
        wait,
    })
}

/// Splits the optional second positional into a dump directory and an
/// optional base filename (spec §6 "positional | path|file | output dir, or
/// directory+filename").
fn resolve_output(path: Option<&str>) -> OutputConfig {
    let Some(path) = path else {
        return OutputConfig::default();
    };
    let path = PathBuf::from(path);
    if path.is_dir() {
        return OutputConfig {
            dump_dir: path,
            ..OutputConfig::default()
        };
    }
    let dump_dir = path.parent().filter(|p| !p.as_os_str().is_empty()).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    let base_filename = path.file_name().map(|n| n.to_string_lossy().into_owned());
    OutputConfig {
        dump_dir,
        base_filename,
        ..OutputConfig::default()
    }
}

impl TryFrom<Cli> for ParsedArgs {
    type Error = ProcDumpError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let target = cli
            .positionals
            .first()
            .ok_or_else(|| ProcDumpError::Configuration("a target PID, PGID, or process name is required".into()))?;
        let selector = resolve_target(target, cli.interpret_as_pgid, cli.wait_for_name)?;

        let num_dumps = cli.num_dumps.unwrap_or(procdump_core::config::DEFAULT_MAX_DUMPS);
        if !(1..=procdump_core::config::MAX_DUMPS_CAP).contains(&num_dumps) {
            return Err(ProcDumpError::Configuration(format!(
                "-n must be between 1 and {}, got {num_dumps}",
                procdump_core::config::MAX_DUMPS_CAP
            )));
        }

        let mut thresholds = Thresholds::default();
        match (cli.cpu_above, cli.cpu_below) {
            (Some(above), _) => thresholds.cpu_percent = Some(above),
            (None, Some(below)) => {
                thresholds.cpu_percent = Some(below);
                thresholds.cpu_below = true;
            }
            (None, None) => {}
        }

        if let Some(raw) = &cli.memory_above {
            thresholds.memory_mb = parse_mb_list(raw)?;
        }
        if let Some(mb) = cli.memory_below {
            thresholds.memory_mb = vec![mb];
            thresholds.memory_below = true;
        }

        thresholds.thread_count = cli.thread_count;
        thresholds.file_descriptor_count = cli.file_descriptor_count;
        thresholds.signal_number = cli.signal_number;
        thresholds.restrack_enabled = cli.restrack;

        if cli.managed_exception {
            thresholds.exception_filter = match &cli.exception_filter {
                Some(raw) => parse_name_list(raw),
                None => vec!["*".to_string()],
            };
        }

        thresholds.gc_generation = cli.gc_generation;
        if let Some(raw) = &cli.gc_heap_mb {
            thresholds.gc_heap_mb = parse_mb_list(raw)?;
        }

        if !thresholds.any_configured() {
            thresholds.timer_enabled = true;
        }

        let sampling = Sampling {
            polling_interval_ms: cli.polling_interval_ms.unwrap_or(procdump_core::config::MIN_POLLING_INTERVAL_MS),
            threshold_cooldown_seconds: cli.cooldown_seconds.unwrap_or(procdump_core::config::DEFAULT_COOLDOWN_SECONDS),
            max_dumps: num_dumps,
        }
        .clamp_polling_interval();

        let output = OutputConfig {
            overwrite: cli.overwrite,
            ..resolve_output(cli.positionals.get(1).map(|s| s.as_str()))
        };

        Ok(ParsedArgs {
            selector,
            thresholds,
            sampling,
            output,
            diagnostic_log: cli.diagnostic_log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ParsedArgs {
        let argv: Vec<String> = std::iter::once("procdump".to_string()).chain(args.iter().map(|s| s.to_string())).collect();
        let normalized = Cli::normalize_args(argv.into_iter());
        let cli = Cli::try_parse_from(normalized).expect("should parse");
        ParsedArgs::try_from(cli).expect("should convert")
    }

    #[test]
    fn dash_and_slash_prefixes_are_equivalent() {
        let dash = parse(&["-n", "3", "1234"]);
        let slash = parse(&["/N", "3", "1234"]);
        assert_eq!(dash.sampling.max_dumps, slash.sampling.max_dumps);
        assert_eq!(dash.sampling.max_dumps, 3);
    }

    #[test]
    fn numeric_target_resolves_to_pid() {
        let parsed = parse(&["1234"]);
        assert!(matches!(parsed.selector, TargetSelector::Pid(1234)));
    }

    #[test]
    fn name_target_resolves_to_name_selector() {
        let parsed = parse(&["-w", "myapp"]);
        match parsed.selector {
            TargetSelector::Name { name, wait } => {
                assert_eq!(name, "myapp");
                assert!(wait);
            }
            other => panic!("expected Name selector, got {other:?}"),
        }
    }

    #[test]
    fn absolute_path_positional_is_not_mistaken_for_a_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_str().unwrap().to_string();
        let parsed = parse(&["-n", "1", "-c", "50", "1234", &dir]);
        assert_eq!(parsed.output.dump_dir, tmp.path());
    }

    #[test]
    fn pgid_flag_forces_pgid_selector() {
        let parsed = parse(&["-pgid", "42"]);
        assert!(matches!(parsed.selector, TargetSelector::Pgid(42)));
    }

    #[test]
    fn no_threshold_defaults_to_timer() {
        let parsed = parse(&["1234"]);
        assert!(parsed.thresholds.timer_enabled);
    }

    #[test]
    fn cpu_threshold_suppresses_default_timer() {
        let parsed = parse(&["-c", "50", "1234"]);
        assert_eq!(parsed.thresholds.cpu_percent, Some(50.0));
        assert!(!parsed.thresholds.timer_enabled);
    }

    #[test]
    fn managed_exception_without_filter_matches_all() {
        let parsed = parse(&["-e", "1234"]);
        assert_eq!(parsed.thresholds.exception_filter, vec!["*".to_string()]);
    }

    #[test]
    fn dump_count_out_of_range_is_a_configuration_error() {
        let argv: Vec<String> = Cli::normalize_args(vec!["procdump".to_string(), "-n".to_string(), "500".to_string(), "1234".to_string()].into_iter());
        let cli = Cli::try_parse_from(argv).unwrap();
        let err = ParsedArgs::try_from(cli).unwrap_err();
        assert!(matches!(err, ProcDumpError::Configuration(_)));
    }

    #[test]
    fn missing_target_is_a_configuration_error() {
        let argv: Vec<String> = Cli::normalize_args(vec!["procdump".to_string()].into_iter());
        let cli = Cli::try_parse_from(argv).unwrap();
        let err = ParsedArgs::try_from(cli).unwrap_err();
        assert!(matches!(err, ProcDumpError::Configuration(_)));
    }
}
