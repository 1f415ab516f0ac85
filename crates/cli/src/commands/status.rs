//! Status Command

use anyhow::Result;
use serde::Serialize;
use testpilot_common::ConnectionState;

use crate::output::{print_item, state_marker, OutputFormat, TableDisplay};
use crate::session::Settings;

/// Connection probe result
#[derive(Debug, Serialize)]
pub struct StatusDisplay {
    pub url: String,
    #[serde(flatten)]
    pub state: ConnectionState,
}

impl TableDisplay for StatusDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Server", "State", "Connection ID", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.url.clone(),
            state_marker(&self.state),
            self.state.connection_id.clone().unwrap_or_else(|| "-".to_string()),
            self.state.error.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }
}

/// Connect once, report the resulting state and disconnect.
///
/// Returns whether the connection succeeded.
pub async fn execute(settings: &Settings, format: OutputFormat) -> Result<bool> {
    let client = settings.client()?;

    if let Err(e) = client.connect().await {
        tracing::debug!("Status probe failed: {}", e);
    }

    let display = StatusDisplay {
        url: client.config().url.clone(),
        state: client.connection_state(),
    };
    print_item(&display, format);

    let connected = display.state.connected;
    client.disconnect();
    Ok(connected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_placeholders() {
        colored::control::set_override(false);
        let display = StatusDisplay {
            url: "http://127.0.0.1:8000".into(),
            state: ConnectionState {
                error: Some("No authentication token available".into()),
                ..Default::default()
            },
        };
        assert_eq!(
            display.row(),
            vec![
                "http://127.0.0.1:8000",
                "✗ failed",
                "-",
                "No authentication token available"
            ]
        );
    }

    #[test]
    fn test_json_is_flat() {
        let display = StatusDisplay {
            url: "http://localhost".into(),
            state: ConnectionState {
                connected: true,
                connection_id: Some("sid".into()),
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&display).unwrap();
        assert_eq!(value["url"], "http://localhost");
        assert_eq!(value["connected"], true);
        assert_eq!(value["connection_id"], "sid");
    }
}
