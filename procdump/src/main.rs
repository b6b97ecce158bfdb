mod banner;
mod cli;

use clap::Parser;
use cli::{Cli, ParsedArgs};
use procdump_common::waitable::Event;
use procdump_core::signal_controller::SignalController;
use procdump_core::supervisor::Supervisor;
use std::sync::Arc;

fn fatal(message: impl std::fmt::Display) -> ! {
    eprintln!("{message}");
    banner::print_usage();
    std::process::exit(-1);
}

fn main() {
    banner::print_banner();

    let argv = Cli::normalize_args(std::env::args());
    let cli = match Cli::try_parse_from(argv) {
        Ok(cli) => cli,
        Err(e) => {
            e.print().ok();
            std::process::exit(-1);
        }
    };

    let parsed = match ParsedArgs::try_from(cli) {
        Ok(parsed) => parsed,
        Err(e) => fatal(e),
    };

    if let Err(e) = procdump_common::logging::init(parsed.diagnostic_log) {
        fatal(format_args!("failed to initialize logging: {e}"));
    }

    let global_quit = Arc::new(Event::manual_reset());
    let supervisor = Arc::new(Supervisor::new(Arc::clone(&global_quit)));

    // Installed before any trigger thread is spawned so the blocked signal
    // mask is inherited by every thread the supervisor goes on to create.
    let controller = match SignalController::install(Arc::clone(&supervisor), Arc::clone(&global_quit)) {
        Ok(c) => c,
        Err(e) => fatal(format_args!("failed to install signal controller: {e}")),
    };

    supervisor.run(parsed.selector, parsed.thresholds, parsed.sampling, parsed.output, parsed.diagnostic_log);

    // Not joined: the handler thread only returns once a signal arrives, and
    // monitoring can also end on its own (target death, dump cap). Either
    // way the process exits here; the OS reclaims the blocked sigwait thread.
    drop(controller);
}
