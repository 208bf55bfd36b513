use std::fs::{self, File};
use std::io;
use std::sync::Mutex;

use chrono::Local;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

/// Two sinks: stdout at the configured level and a timestamped file under
/// `logs/` at DEBUG.
pub fn init(verbose: bool) -> io::Result<()> {
    let stdout_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    fs::create_dir_all("logs")?;
    let path = format!(
        "logs/dronebot_{}.log",
        Local::now().format("%Y-%m-%d-%H-%M-%S")
    );
    let file = File::create(path)?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stdout)
                .with_filter(stdout_level),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(LevelFilter::DEBUG),
        )
        .init();
    Ok(())
}
