//! Control Commands - drive browser, recording, playback and replay sessions
//!
//! Each command connects, sends one fire-and-forget message and disconnects.

use anyhow::{bail, Result};
use clap::Args;
use serde_json::Value;
use testpilot_common::{BrowserCommand, PlaybackAction, RecordingAction, ReplayAction};

use crate::output::{print_message, OutputFormat};
use crate::session::{self, Settings};

/// Parse `--params` as a JSON value
pub fn parse_params(raw: &str) -> std::result::Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {}", e))
}

#[derive(Args)]
pub struct BrowserArgs {
    /// Browser session ID
    pub session_id: String,

    /// Command (navigate, click, type, scroll, hover, screenshot, go_back, go_forward, reload, wait)
    pub command: BrowserCommand,

    /// Command parameters as JSON
    #[arg(long, value_parser = parse_params)]
    pub params: Option<Value>,
}

#[derive(Args)]
pub struct RecordArgs {
    /// Recording session ID
    pub session_id: String,

    /// Action (start, stop, pause, resume)
    pub action: RecordingAction,

    /// Action parameters as JSON
    #[arg(long, value_parser = parse_params)]
    pub params: Option<Value>,
}

#[derive(Args)]
pub struct PlaybackArgs {
    /// Playback session ID
    pub session_id: String,

    /// Action (start, stop, pause, resume, step)
    pub action: PlaybackAction,

    /// Action parameters as JSON
    #[arg(long, value_parser = parse_params)]
    pub params: Option<Value>,
}

#[derive(Args)]
pub struct ReplayArgs {
    /// Execution ID
    pub execution_id: String,

    /// Action (play, pause, seek, stop, restart)
    pub action: ReplayAction,

    /// Seek target in seconds
    #[arg(long = "at", value_name = "SECONDS")]
    pub timestamp: Option<f64>,
}

impl ReplayArgs {
    fn check(&self) -> Result<()> {
        if self.action == ReplayAction::Seek && self.timestamp.is_none() {
            bail!("seek requires --at SECONDS");
        }
        if matches!(self.timestamp, Some(t) if !t.is_finite() || t < 0.0) {
            bail!("--at must be a non-negative number of seconds");
        }
        Ok(())
    }
}

pub async fn browser(args: BrowserArgs, settings: &Settings, format: OutputFormat) -> Result<()> {
    let client = settings.connect().await?;
    let sent = client.send_browser_command(&args.session_id, args.command, args.params);
    finish(&client, sent, &format!("browser {} for {}", args.command, args.session_id), format).await
}

pub async fn record(args: RecordArgs, settings: &Settings, format: OutputFormat) -> Result<()> {
    let client = settings.connect().await?;
    let sent = client.send_recording_control(&args.session_id, args.action, args.params);
    finish(&client, sent, &format!("recording {} for {}", args.action, args.session_id), format).await
}

pub async fn playback(args: PlaybackArgs, settings: &Settings, format: OutputFormat) -> Result<()> {
    let client = settings.connect().await?;
    let sent = client.send_playback_control(&args.session_id, args.action, args.params);
    finish(&client, sent, &format!("playback {} for {}", args.action, args.session_id), format).await
}

pub async fn replay(args: ReplayArgs, settings: &Settings, format: OutputFormat) -> Result<()> {
    args.check()?;
    let client = settings.connect().await?;
    let sent = client.send_replay_control(&args.execution_id, args.action, args.timestamp);
    finish(&client, sent, &format!("replay {} for {}", args.action, args.execution_id), format).await
}

async fn finish(
    client: &testpilot_realtime::RealtimeClient,
    sent: bool,
    what: &str,
    format: OutputFormat,
) -> Result<()> {
    session::shutdown(client).await;
    if !sent {
        bail!("Could not send {}: not connected", what);
    }
    print_message(&format!("Sent {}", what), format);
    Ok(())
}
