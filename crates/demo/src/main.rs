//! Couchlink Demo
//!
//! Runs a host and a handful of phone controllers over the in-memory
//! transport and logs every effect the host would apply: key strokes,
//! embedded-surface messages and dashboard navigation. One controller more
//! than the session capacity is started, so the rejection path shows up too.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use couchlink_controller::{ControllerClient, ControllerSettings, GestureCapture};
use couchlink_host::driver::{self, DispatchOutcome, InputEffects};
use couchlink_host::telemetry::init_tracing;
use couchlink_host::{SessionHost, SessionStatus};
use couchlink_transport::MemoryTransport;
use couchlink_translate::{InputTranslator, KeyStroke, Mode, NavCommand};
use couchlink_wire::{Button, SurfaceMessage, now_millis};
use tracing::info;

use config::RelayConfig;

#[derive(Parser, Debug)]
#[command(name = "couchlink-demo")]
#[command(version, about = "Scripted phone-as-controller session")]
struct Args {
    /// JSON config file with optional host, join and translator sections
    #[arg(long, env = "COUCHLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Game identifier for the session
    #[arg(long, default_value = "demo-game")]
    game: String,

    /// Number of dashboard items before the game starts
    #[arg(long, default_value_t = 12)]
    dashboard_items: usize,

    /// Origin used to print the controller join URL
    #[arg(long, default_value = "http://localhost:3000")]
    origin: String,

    /// Emit JSON log lines
    #[arg(long)]
    log_json: bool,
}

/// Effects that only log.
struct LogEffects;

impl InputEffects for LogEffects {
    fn key(&mut self, stroke: KeyStroke) -> DispatchOutcome {
        info!(key = stroke.key.key(), code = stroke.key.code(), action = ?stroke.action, "key");
        DispatchOutcome::Delivered
    }

    fn post_to_surface(&mut self, message: &SurfaceMessage) {
        let SurfaceMessage::ControllerInput {
            controller_id,
            input,
        } = message;
        info!(controller = %controller_id, kind = input.kind(), "surface message");
    }

    fn navigate(&mut self, command: NavCommand) {
        info!(?command, "dashboard");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(
        "couchlink_demo=info,couchlink_host=info,couchlink_controller=info",
        args.log_json,
    );

    let config = match &args.config {
        Some(path) => RelayConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RelayConfig::default(),
    };
    info!(?config, "starting demo");

    let transport = Arc::new(MemoryTransport::new());
    let host = SessionHost::new(transport.clone(), config.host.clone());
    let translator = InputTranslator::dashboard(config.translator.clone(), args.dashboard_items);
    let driver = driver::spawn(&host, translator, LogEffects)?;

    let code = host.create_session(&args.game, None)?;
    let status = host
        .subscribe_status()
        .wait_for(|s| !matches!(s, SessionStatus::Pending { .. }))
        .await?
        .clone();
    if let SessionStatus::Failed { reason, .. } = status {
        bail!("session {code} failed to start: {reason}");
    }
    if let Some(url) = host.controller_url(&args.origin) {
        info!(%url, "session live; controllers join at");
    }

    let mut phones = Vec::new();
    for _ in 0..=config.host.max_players {
        let phone = ControllerClient::new(transport.clone(), config.join.clone());
        match phone.try_join(&code).await {
            Ok(player_number) => {
                info!(player_number, "phone joined");
                phones.push(phone);
            }
            Err(err) => info!(error = %err, "phone turned away"),
        }
    }

    // Browse the dashboard with the first phone, then start the game.
    let mut capture = GestureCapture::new(ControllerSettings::default());
    if let Some(first) = phones.first() {
        for button in [Button::Right, Button::Down, Button::A] {
            first.send_input(capture.button_down(button, now_millis()));
            capture.button_up(button);
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
    }
    driver.set_mode(Mode::Game);

    for (i, phone) in phones.iter().enumerate() {
        phone.send_input(capture.button_down(Button::A, now_millis()));
        capture.button_up(Button::A);
        let angle = i as f64;
        if let Some(event) =
            capture.joystick_move(80.0 * angle.cos(), 80.0 * angle.sin(), 50.0, now_millis())
        {
            phone.send_input(event);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        phone.send_input(capture.joystick_end(now_millis()));
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    if let Some(last) = phones.last() {
        let id = host
            .controllers()
            .last()
            .map(|c| c.id.clone())
            .context("no controllers connected")?;
        host.disconnect_controller(&id)?;
        info!(controller = %id, still_joined = last.is_joined(), "kicked last controller");
    }

    host.end_session();
    for phone in &phones {
        phone.leave();
    }
    driver.shutdown().await;
    info!("demo finished");
    Ok(())
}
