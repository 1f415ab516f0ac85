//! Watch Command - follow a single test execution

use anyhow::Result;
use clap::Args;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use testpilot_common::{EventKind, InboundEvent};
use testpilot_realtime::{ListenerId, RealtimeClient};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::output::{print_event, print_info, print_success, print_warning, OutputFormat};
use crate::session::{self, Settings};

/// Statuses after which an execution emits nothing further
pub const TERMINAL_STATUSES: [&str; 3] = ["completed", "failed", "cancelled"];

#[derive(Args)]
pub struct WatchArgs {
    /// Execution ID
    pub execution_id: String,

    /// Stop after this many seconds without reaching a final status
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Final status carried by an event, if it has one
pub fn terminal_status(event: &InboundEvent) -> Option<&str> {
    event
        .data
        .get("status")
        .and_then(|s| s.as_str())
        .filter(|s| TERMINAL_STATUSES.contains(s))
}

/// What a watched execution produced next
#[derive(Debug)]
pub enum Update {
    Event(InboundEvent),
    Dropped(String),
    /// The connection came back and the subscription was sent again
    Restored,
}

/// An execution subscription that is renewed after every reconnect
pub struct ExecutionFeed {
    client: RealtimeClient,
    execution_id: String,
    listener: ListenerId,
    drops: ListenerId,
    states: ListenerId,
    rx: mpsc::UnboundedReceiver<Update>,
}

impl ExecutionFeed {
    /// Subscribe on a connected client; `None` when the connection is gone
    pub fn open(client: &RealtimeClient, execution_id: &str) -> Option<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let events = tx.clone();
        let listener = client.subscribe_to_execution_with(execution_id, move |event| {
            let _ = events.send(Update::Event(event.clone()));
        })?;

        let dropped = tx.clone();
        let drops = client.on(EventKind::Disconnect, move |event| {
            let reason = event.data["reason"].as_str().unwrap_or("unknown").to_string();
            let _ = dropped.send(Update::Dropped(reason));
        });

        let was_connected = AtomicBool::new(true);
        let states = client.on_connection_change(move |state| {
            let before = was_connected.swap(state.connected, Ordering::SeqCst);
            if state.connected && !before {
                let _ = tx.send(Update::Restored);
            }
        });

        Some(Self {
            client: client.clone(),
            execution_id: execution_id.to_string(),
            listener,
            drops,
            states,
            rx,
        })
    }

    /// Next update, re-subscribing upstream whenever the connection returns.
    ///
    /// Returns `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<Update> {
        let update = self.rx.recv().await?;
        if let Update::Restored = update {
            // Subscriptions do not survive the new socket; the local
            // listener does
            if self.client.subscribe_to_execution(&self.execution_id) {
                debug!("Re-subscribed to execution {}", self.execution_id);
            } else {
                warn!("Lost the connection again before re-subscribing to {}", self.execution_id);
            }
        }
        Some(update)
    }

    /// Drop the subscription and every listener the feed registered
    pub fn close(self) {
        self.client.off(self.drops);
        self.client.off_connection_change(self.states);
        self.client
            .unsubscribe_from_execution(&self.execution_id, Some(self.listener));
    }
}

pub async fn execute(args: WatchArgs, settings: &Settings, format: OutputFormat) -> Result<()> {
    let client = settings.connect().await?;

    let Some(mut feed) = ExecutionFeed::open(&client, &args.execution_id) else {
        anyhow::bail!("Connection lost before subscribing to {}", args.execution_id);
    };

    if format != OutputFormat::Json {
        print_info(&format!("Watching execution {}", args.execution_id));
    }

    let deadline = args
        .timeout
        .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));

    loop {
        let next = async {
            match deadline {
                Some(at) => tokio::time::timeout_at(at, feed.next()).await.ok(),
                None => Some(feed.next().await),
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                break;
            }
            update = next => match update {
                None => {
                    print_warning("Timed out before the execution finished");
                    break;
                }
                Some(None) => break,
                Some(Some(Update::Dropped(reason))) => {
                    print_warning(&format!("Connection lost ({}), reconnecting", reason));
                }
                Some(Some(Update::Restored)) => {
                    if format != OutputFormat::Json {
                        print_info(&format!("Reconnected, still watching {}", args.execution_id));
                    }
                }
                Some(Some(Update::Event(event))) => {
                    print_event(&event, format);
                    if let Some(status) = terminal_status(&event) {
                        if format != OutputFormat::Json {
                            print_success(&format!("Execution {} {}", args.execution_id, status));
                        }
                        break;
                    }
                }
            }
        }
    }

    feed.close();
    session::shutdown(&client).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(data: serde_json::Value) -> InboundEvent {
        InboundEvent::wrap(EventKind::ExecutionEvent, data)
    }

    #[test]
    fn test_terminal_statuses() {
        assert_eq!(terminal_status(&event(json!({"status": "completed"}))), Some("completed"));
        assert_eq!(terminal_status(&event(json!({"status": "failed"}))), Some("failed"));
        assert_eq!(terminal_status(&event(json!({"status": "cancelled"}))), Some("cancelled"));
    }

    #[test]
    fn test_running_is_not_terminal() {
        assert_eq!(terminal_status(&event(json!({"status": "running"}))), None);
        assert_eq!(terminal_status(&event(json!({"progress": 40}))), None);
        assert_eq!(terminal_status(&event(json!("completed"))), None);
    }
}
