//! Grows a buffer every tick until the memory threshold stops the loop.

use loop_daemon::{Daemon, LogConfig, Result};
use std::time::Duration;
use tracing::info;

fn main() -> Result<()> {
    loop_daemon::logging::init_logging(&LogConfig::default())?;

    let mut accumulator: Vec<String> = Vec::new();
    let mut daemon = Daemon::builder()
        .memory_limit("64M")?
        .ttl(Duration::from_secs(30))
        .loop_interval(Duration::from_millis(10))
        .build();

    daemon.run_with_callback(move |d| {
        accumulator.push("x".repeat(1024 * 1024));
        info!(
            buffers = accumulator.len(),
            rss = d.memory_usage().unwrap_or(0),
            "Grew accumulator"
        );
        Ok(())
    })?;

    info!(
        code = ?daemon.shutdown_code(),
        reason = daemon.shutdown_reason().unwrap_or("none"),
        iterations = daemon.iterations(),
        "Loop finished"
    );
    std::process::exit(daemon.shutdown_code().map_or(0, i32::from));
}
