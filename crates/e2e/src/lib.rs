//! TestPilot E2E Test Framework
//!
//! An in-process push server speaking the same Socket.IO dialect as the
//! TestPilot backend, so the realtime client's WebSocket transport can be
//! exercised end to end without the real service.
//!
//! ```text
//! RealtimeClient ──ws──▶ MockServer (axum)
//!                          ├── handshake: 0{open} → 40{auth} → 40{sid} | 44{message}
//!                          ├── heartbeat: 2 → 3
//!                          ├── emit(name, payload) → 42["name", payload]
//!                          └── records every 42 the client sends
//! ```

pub mod error;
pub mod server;

pub use error::{E2eError, E2eResult};
pub use server::{MockServer, MockServerConfig, Received};
