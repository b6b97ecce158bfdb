// Structured logging setup.
//
// Grounded on `datadog-log`'s `tracing_subscriber::registry()...with(...)`
// layering style (datadog-log/src/logger.rs): a formatting layer always
// writes to stdout, and when the `-log` CLI flag is set (spec §6) an
// additional layer mirrors every event to syslog, matching the original
// C implementation's `include/Logging.h` / `src/Logging.c` behavior where
// `-log` turns on a second sink without disabling the first.
//
// `Trace(...)` call sites in the original source (debug-only, paired with a
// LOCATION) become `tracing::trace!(location = ..., ...)` here; see spec §7.

use std::sync::Mutex;
use syslog::{Facility, Formatter3164};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer};

/// Forwards formatted tracing events to the system log.
struct SyslogLayer {
    logger: Mutex<syslog::Logger<syslog::LoggerBackend, Formatter3164>>,
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S> Layer<S> for SyslogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let line = format!("{}: {}", event.metadata().target(), visitor.message);

        let Ok(mut logger) = self.logger.lock() else {
            return;
        };
        let _ = match *event.metadata().level() {
            Level::ERROR => logger.err(line),
            Level::WARN => logger.warning(line),
            Level::INFO => logger.info(line),
            Level::DEBUG | Level::TRACE => logger.debug(line),
        };
    }
}

/// Initializes the global `tracing` subscriber: a stdout formatter always,
/// plus syslog when `enable_syslog` is set (the `-log` flag).
pub fn init(enable_syslog: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    if enable_syslog {
        let formatter = Formatter3164 {
            facility: Facility::LOG_USER,
            hostname: None,
            process: "procdump".into(),
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter)?;
        let syslog_layer = SyslogLayer {
            logger: Mutex::new(logger),
        };
        tracing::subscriber::set_global_default(registry.with(syslog_layer))
            .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
    } else {
        tracing::subscriber::set_global_default(registry)
            .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
    }

    Ok(())
}
