//! Default logger construction, mirroring the terminal-outputter setup the
//! rest of this stack uses: a `sloggers` TOML config handed to `slog`.

use slog::Logger;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds a terminal logger at `level`, for callers that want engine
/// activity on stderr without writing their own `slog::Drain`.
pub fn terminal_logger(level: Severity) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level);
    builder.destination(Destination::Stderr);
    builder.build().unwrap_or_else(|_| Logger::root(slog::Discard, slog::o!()))
}

/// A logger that discards everything, for tests and embedders that supply
/// their own `slog::Logger` via `EngineConfig`.
pub fn silent_logger() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}
