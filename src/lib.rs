pub mod combo;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod extractor;
pub mod ipc;
pub mod library;
pub mod patterns;
pub mod state;
pub mod tailer;

pub use combo::{ComboEvent, ComboMatcher};
pub use config::AppConfig;
pub use engine::{Control, Engine, TrackerEvent};
pub use extractor::{Extractor, Signal};
pub use ipc::StateSnapshot;
pub use library::{Cost, PatternLibrary};
pub use state::{CharacterClass, GaugeState, SignalBoard};

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install the process-wide subscriber: a daily rolling file in `log_dir`
/// filtered by `RUST_LOG` (default `combo_watch_lib=info`), plus a panic
/// hook that routes panics through tracing. Keep the returned guard alive
/// for the process lifetime; dropping it flushes and stops the writer.
///
/// Only the binary calls this. The library itself just emits events.
pub fn init_logging(log_dir: &Path) -> WorkerGuard {
    let _ = std::fs::create_dir_all(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, "combo-watch.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("combo_watch_lib=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false) // log files should not contain ANSI colour codes
        .init();

    // Without this, panic messages only reach stderr, which nobody watches.
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        tracing::error!("PANIC at {}: {}", location, message);
    }));

    tracing::info!("combo-watch starting, logs in {}", log_dir.display());
    guard
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run the tracker until Ctrl-C or a `quit` command.
///
/// Tasks:
///   engine::run     polls the log, owns all tracking state
///   ipc::run        owns the signal board, prints JSON snapshots to stdout
///   read_commands   turns stdin lines into `Control` messages
pub async fn start(cfg: AppConfig) -> Result<()> {
    let library = Arc::new(PatternLibrary::load_or_default(&cfg.definitions_path));
    let engine = Engine::from_config(&cfg, library);

    // --- Build inter-task channels ---
    let (control_tx, control_rx) = mpsc::channel::<Control>(16);
    let (snap_tx, snap_rx)       = mpsc::channel::<StateSnapshot>(128);

    let worker = tokio::spawn(engine::run(engine, control_rx, snap_tx, cfg.poll_interval()));
    let consumer = tokio::spawn(async move {
        let mut out = tokio::io::stdout();
        ipc::run(snap_rx, &mut out).await
    });

    let interrupt_tx = control_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            let _ = interrupt_tx.send(Control::Shutdown).await;
        }
    });
    tokio::spawn(async move {
        if let Err(e) = read_commands(control_tx).await {
            tracing::warn!("Command reader stopped: {}", e);
        }
    });

    worker.await??;
    let board = consumer.await??;
    tracing::info!("Stopped with counter={} buff_ready={}", board.counter, board.buff_ready);
    Ok(())
}

async fn read_commands(control_tx: mpsc::Sender<Control>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Some(control) => {
                let stop = control == Control::Shutdown;
                if control_tx.send(control).await.is_err() || stop {
                    break;
                }
            }
            None if line.trim().is_empty() => {}
            None => tracing::warn!("Unknown command: {}", line.trim()),
        }
    }
    Ok(())
}

/// Console commands:
///
///   reset                     everything
///   reset <class>             one class
///   reset <class> <gauge>     one gauge
///   log <path>                switch log file
///   quit | exit
pub fn parse_command(line: &str) -> Option<Control> {
    let mut words = line.split_whitespace();
    match words.next()?.to_lowercase().as_str() {
        "quit" | "exit" => Some(Control::Shutdown),
        "log" => {
            let path = line.trim().splitn(2, char::is_whitespace).nth(1)?.trim();
            Some(Control::SetLogPath(path.into()))
        }
        "reset" => {
            let Some(class) = words.next() else {
                return Some(Control::ResetAll);
            };
            let class: CharacterClass = class.parse().ok()?;
            let gauge = words.collect::<Vec<_>>().join(" ");
            if gauge.is_empty() {
                return Some(Control::ResetClass(class));
            }
            let gauge = class
                .gauges()
                .iter()
                .find(|g| g.to_lowercase() == gauge.to_lowercase())
                .map_or(gauge, |g| (*g).to_owned());
            Some(Control::ResetGauge { class, gauge })
        }
        _ => None,
    }
}
