use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::{Format, Severity};
use sloggers::Build;

/// Builds the process-global [`slog::Logger`]. Every long-lived component
/// should derive a child logger from this one with `log.new(o!("component"
/// => ..))` rather than building its own.
pub fn init(verbose: bool, json: bool) -> slog::Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(if verbose {
        Severity::Trace
    } else {
        Severity::Info
    });
    builder.destination(Destination::Stderr);
    builder.format(if json { Format::Json } else { Format::Full });
    builder
        .build()
        .expect("logger config is static and always builds")
}
