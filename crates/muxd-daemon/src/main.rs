//! muxd daemon
//!
//! Loads `muxd.yaml`, builds the engine on top of tmux, resumes sessions that
//! are still alive and logs session events until Ctrl-C. Sessions keep running
//! in tmux after the daemon exits; their records are kept in
//! `<home>/sessions.json` for the next start.

mod store;

use std::sync::Arc;

use anyhow::{Context, Result};
use muxd_core::{muxd_home, Collaborators, Engine, EngineConfig, SessionEvent, TmuxMultiplexer};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::store::{JsonSessionStore, SESSIONS_FILE_NAME};

fn log_filter() -> tracing_subscriber::EnvFilter {
    let level = if let Ok(v) = std::env::var("RUST_LOG") {
        v
    } else if let Ok(v) = std::env::var("MUXD_LOG_LEVEL") {
        match v.as_str() {
            "silent" => "off".to_string(),
            "fatal" => "error".to_string(),
            other => other.to_string(),
        }
    } else {
        "info".to_string()
    };

    tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::ScreenDelta {
            session_id,
            lines,
            idle,
            completed,
            background,
            ..
        } => info!(
            session_id = %session_id,
            lines = lines.len(),
            idle,
            completed,
            background,
            "Session output"
        ),
        SessionEvent::Error {
            session_id,
            message,
        } => warn!(session_id = %session_id, error = %message, "Session error"),
        SessionEvent::Closed { session_id, reason } => {
            info!(session_id = %session_id, reason = ?reason, "Session closed")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let home = muxd_home();
    std::fs::create_dir_all(&home).ok();

    // stderr + daily-rotated file
    let log_dir = home.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&log_dir, "muxd.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(log_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    std::panic::set_hook(Box::new(|info| {
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_default();
        eprintln!("PANIC at {}: {}", location, payload);
        error!(location = %location, "DAEMON PANIC: {}", payload);
    }));

    let config = EngineConfig::load_default().context("failed to load configuration")?;
    let mux = Arc::new(TmuxMultiplexer::new(
        config.session.tmux_binary.clone(),
        config.session.capture_lines,
    ));
    let store = JsonSessionStore::open(home.join(SESSIONS_FILE_NAME))?;
    let engine = Engine::new(
        &config,
        mux,
        Collaborators {
            store: Arc::new(store),
            ..Collaborators::default()
        },
    )?;

    let mut events = engine.sessions().subscribe();
    match engine.sessions().restore().await {
        Ok(n) => info!(count = n, "Sessions restored"),
        Err(e) => warn!(error = %e, "Failed to restore sessions"),
    }

    info!(home = %home.display(), "muxd started");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => debug!(skipped = n, "Event log lagging"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    engine.sessions().shutdown().await;
    Ok(())
}
