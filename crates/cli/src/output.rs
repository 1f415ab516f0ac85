//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use testpilot_common::{ConnectionState, InboundEvent};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Print a single item
pub fn print_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            table.add_row(item.row());

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(item).unwrap_or_default());
        }
        OutputFormat::Plain => {
            for (header, value) in T::headers().iter().zip(item.row()) {
                println!("{}: {}", header, value);
            }
        }
    }
}

/// Print one streamed event.
///
/// Events arrive one at a time, so JSON output is one compact object per line.
pub fn print_event(event: &InboundEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(event).unwrap_or_default());
        }
        OutputFormat::Table | OutputFormat::Plain => println!("{}", event_line(event)),
    }
}

/// One-line human rendering of an event
pub fn event_line(event: &InboundEvent) -> String {
    let scope = event
        .execution_id
        .as_deref()
        .or(event.session_id.as_deref())
        .unwrap_or("-");
    format!(
        "{} {} [{}] {}",
        event.timestamp.dimmed(),
        event.event_type.bold(),
        scope,
        event.data
    )
}

/// Print a simple message
pub fn print_message(message: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "message": message }));
        }
        _ => {
            println!("{}", message);
        }
    }
}

/// Colored one-word rendering of a connection state
pub fn state_marker(state: &ConnectionState) -> String {
    if state.connected {
        "● connected".green().to_string()
    } else if state.connecting {
        "◐ connecting".yellow().to_string()
    } else if state.error.is_some() {
        "✗ failed".red().to_string()
    } else {
        "○ disconnected".dimmed().to_string()
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow(), message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("{} {}", "i".blue(), message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_line_prefers_execution_scope() {
        colored::control::set_override(false);
        let event = InboundEvent {
            event_type: "execution_event".into(),
            execution_id: Some("exec-1".into()),
            session_id: Some("sess-1".into()),
            data: json!({"status": "running"}),
            timestamp: "2024-05-01T12:00:00Z".into(),
            user_id: None,
        };
        assert_eq!(
            event_line(&event),
            r#"2024-05-01T12:00:00Z execution_event [exec-1] {"status":"running"}"#
        );
    }

    #[test]
    fn test_state_marker() {
        colored::control::set_override(false);
        let mut state = ConnectionState::default();
        assert_eq!(state_marker(&state), "○ disconnected");
        state.error = Some("boom".into());
        assert_eq!(state_marker(&state), "✗ failed");
        state.connected = true;
        assert_eq!(state_marker(&state), "● connected");
    }
}
