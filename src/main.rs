//! Application entry point: voice bridge.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (defaults on first run).
//! 3. Create the [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Open the output device and wire the session collaborators.
//! 5. Start the session and a status logger.
//! 6. Read single-letter commands from stdin until `q` or end of input.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use voice_bridge::{
    audio::{CpalCapture, CpalPlayback},
    config::AppConfig,
    protocol::WebSocketConnector,
    session::{SessionDeps, SessionObserver, SessionState, VoiceSession},
    specialist::HttpSpecialist,
};

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Logs what the session reports.
struct LogObserver;

impl SessionObserver for LogObserver {
    fn on_invocation(&self, name: &str, arguments: &Value) {
        log::info!("call: {name} {arguments}");
    }

    fn on_user_transcript(&self, text: &str) {
        log::info!("you said: {text}");
    }
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

const HELP: &str = "commands: m = toggle mute, i = interrupt, r = restart, s = status, q = quit";

async fn run_console(session: VoiceSession) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "m" => {
                let muted = session.toggle_mute();
                println!("microphone {}", if muted { "muted" } else { "live" });
            }
            "i" => {
                if !session.interrupt() {
                    println!("nothing to interrupt");
                }
            }
            "r" => {
                if session.status().state.is_live() {
                    println!("already running");
                } else if let Err(e) = session.start().await {
                    log::error!("restart failed: {e}");
                }
            }
            "s" => println!("{}", session.status().summary()),
            "q" => break,
            "" => {}
            other => println!("unknown command {other:?}; {HELP}"),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

async fn run(config: AppConfig) -> anyhow::Result<()> {
    // 4. Collaborators
    let playback = Arc::new(CpalPlayback::open(config.audio.sample_rate)?);
    let deps = SessionDeps {
        connector: Arc::new(WebSocketConnector::new(config.endpoint.clone())),
        capture: Arc::new(CpalCapture::new()),
        playback,
        specialist: Arc::new(HttpSpecialist::from_config(&config.specialist)),
        observer: Arc::new(LogObserver),
    };
    let session = VoiceSession::new(config, deps);

    // 5. Status logger, then start
    let mut status = session.subscribe();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let snapshot = status.borrow_and_update().clone();
            if snapshot.state == SessionState::Error {
                log::warn!("status: {} (press r to restart)", snapshot.summary());
            } else {
                log::info!("status: {}", snapshot.summary());
            }
        }
    });

    if let Err(e) = session.start().await {
        log::error!("session failed to start: {e}");
    }

    // 6. Console
    let result = run_console(session.clone()).await;
    session.stop();
    log::info!("voice bridge shut down");
    result
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voice bridge starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    rt.block_on(run(config))
}
