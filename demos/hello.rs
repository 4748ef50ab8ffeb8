//! Prints "hello" every half second until the TTL, the memory limit or
//! Ctrl+C stops it.
//!
//! ```text
//! cargo run --example hello -- --ttl 3
//! cargo run --example hello -- --no-daemon
//! ```

use clap::Parser;
use loop_daemon::command::{CommandRunner, DaemonArgs, DaemonCommand};
use loop_daemon::logging::init_logging;
use loop_daemon::{Config, Daemon, Result, WorkError};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "hello", about = "Say hello until told to stop")]
struct Cli {
    #[command(flatten)]
    daemon: DaemonArgs,

    /// Exclusive run: refuse to start when another instance is running
    #[arg(long)]
    unique: bool,
}

struct Hello {
    count: u64,
}

impl DaemonCommand for Hello {
    fn name(&self) -> &str {
        "demo:hello"
    }

    fn configure(&mut self, daemon: &mut Daemon) {
        if daemon.ttl().is_none() {
            daemon.set_ttl(Some(Duration::from_secs(10)));
        }
        if daemon.loop_interval().is_none() {
            daemon.set_loop_interval(Some(Duration::from_millis(500)));
        }
    }

    fn setup(&mut self) -> std::result::Result<(), WorkError> {
        info!("starting");
        Ok(())
    }

    fn execute(&mut self, _daemon: &mut Daemon) -> std::result::Result<(), WorkError> {
        self.count += 1;
        println!("hello #{}", self.count);
        Ok(())
    }

    fn on_shutdown(&mut self, daemon: &Daemon) -> i32 {
        info!(
            reason = daemon.shutdown_reason().unwrap_or("none"),
            count = self.count,
            "stopped"
        );
        daemon.shutdown_code().map_or(0, i32::from)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    init_logging(&config.logging)?;

    let mut runner = CommandRunner::from_config(Hello { count: 0 }, &config)?.unique(cli.unique);
    info!(lock = runner.lock_name(), "configured");
    let code = runner.run(&cli.daemon)?;

    std::process::exit(code);
}
