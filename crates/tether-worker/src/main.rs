//! Tether worker - hosts one entry per process for `ProcessHost`.
//!
//! Reads frames from stdin and writes frames to stdout, so all logging goes
//! to stderr.

use clap::Parser;

#[derive(Parser)]
#[command(name = "tether-worker")]
#[command(about = "Worker process for tether contexts")]
#[command(version)]
struct Cli {
    /// List the available entries and exit
    #[arg(long)]
    list: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let registry = tether_worker::registry()
        .map_err(|e| anyhow::anyhow!("{}", e.with_hint()))?;

    if cli.list {
        for name in registry.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    tracing::debug!(pid = std::process::id(), "Worker ready");
    tether_core::ipc::serve(&registry).map_err(|e| anyhow::anyhow!("{}", e.with_hint()))?;
    Ok(())
}
