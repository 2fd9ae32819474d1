//! Tracing setup for the harness.
//!
//! Log lines go to stderr (or a log file via `--output`) so the run
//! reporters keep stdout to themselves; `RUST_LOG` overrides the
//! defaults at runtime.

use std::io::IsTerminal as _;

use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing::{
        self,
        metadata::LevelFilter,
        subscriber::{EnvFilter, fmt::writer::BoxMakeWriter},
    },
};

use crate::Args;

pub fn init_tracing(args: &Args) -> Result<(), BoxError> {
    let default_level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let (writer, ansi) = match args.output.as_deref() {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            (BoxMakeWriter::new(file), false)
        }
        None => (
            BoxMakeWriter::new(std::io::stderr),
            std::io::stderr().is_terminal(),
        ),
    };

    let subscriber = tracing::subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(env_filter)
        .with_writer(writer);

    if args.pretty {
        subscriber.pretty().try_init()?;
    } else {
        subscriber.try_init()?;
    }

    tracing::debug!("tracing initialized");
    Ok(())
}
