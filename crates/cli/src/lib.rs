//! Library side of the `hookwright` command line tool.

pub mod commands;

/// Installs the global `tracing` subscriber: INFO by default, DEBUG when `verbose`.
pub fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}
