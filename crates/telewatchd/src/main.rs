//! Telewatch Daemon - adaptive log monitoring
//!
//! Reads the watched process's output from stdin, classifies every line, and
//! reports analyses, stalls and progress milestones.

use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use telewatch_common::Config;
use telewatchd::{create_backend, EventAnalyzer, LogNotifier, MonitorLoop, QueueSource};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Telewatch Daemon v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        provider = %config.llm.provider,
        process = %config.process.name,
        turbo = config.optimization.turbo,
        "Configuration loaded"
    );

    let (producer, source) = QueueSource::channel("stdin");
    let shutdown = Arc::new(AtomicBool::new(false));

    // Blocking reader thread; exits with the process if stdin never closes
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if !producer.push_line(&line) {
                        break;
                    }
                }
                Err(e) => {
                    warn!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    });

    let loop_shutdown = Arc::clone(&shutdown);
    let consumer = tokio::task::spawn_blocking(move || -> Result<()> {
        let backend = create_backend(&config.llm).context("Failed to create analysis backend")?;
        if !backend.is_available() {
            warn!("Analysis backend '{}' is not reachable yet", backend.name());
        }

        let analyzer = EventAnalyzer::new(backend, &config);
        let mut monitor = MonitorLoop::new(analyzer, Box::new(LogNotifier::default()), &config);
        monitor.add_source(Box::new(source));
        monitor.run(&loop_shutdown);
        Ok(())
    });

    let signal_shutdown = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down gracefully");
            signal_shutdown.store(true, Ordering::Relaxed);
        }
    });

    consumer.await??;
    info!("Telewatch Daemon stopped");
    Ok(())
}
