pub use slog::{crit, debug, error, info, o, trace, warn};
pub use slog::{Discard, Logger};

/// Builds the default terminal logger. Records go to stderr, colorized when
/// the destination is a tty.
pub fn init() -> Logger {
    use sloggers::{Config, LoggerConfig};

    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("Logger config must parse");

    config.build_logger().expect("Logger construction failed")
}

/// A logger that swallows every record. Components fall back to this when no
/// parent logger is supplied.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}

/// Derives a component logger from an optional parent.
pub(crate) fn child<'a, L: Into<Option<&'a Logger>>>(log: L) -> Logger {
    match log.into() {
        Some(log) => log.new(o!()),
        None => discard(),
    }
}
