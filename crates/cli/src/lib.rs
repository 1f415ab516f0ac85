//! TestPilot CLI
//!
//! Command-line front end for the TestPilot realtime event channel: probe
//! the connection, follow executions, print server events and send
//! session control commands.

pub mod commands;
pub mod output;
pub mod session;
