use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::core::error::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    /// The terminal UI owns the screen: only log when a file was given.
    FileOnly,
}

pub fn init(filter: &str, file: Option<&Path>, target: LogTarget) -> Result<(), DispatchError> {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    match (file, target) {
        (Some(path), _) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .ok();
        }
        (None, LogTarget::Stderr) => {
            builder.with_writer(std::io::stderr).try_init().ok();
        }
        (None, LogTarget::FileOnly) => {}
    }
    Ok(())
}
