//! CLI Commands

pub mod config;
pub mod control;
pub mod listen;
pub mod status;
pub mod watch;
