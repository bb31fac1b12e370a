//! Streaming TTS worker.
//!
//! ```text
//!            ┌──────────────────────────┐
//!  client --▶│  ConnectionMultiplexer    │
//!            │   ├─ LocalSessionHandler  │──▶ SessionModel (mock/real)
//!            │   └─ RemoteSessionHandler │──▶ UpstreamPool ──▶ peer worker
//!            └──────────────────────────┘
//!                        │
//!                        ▼
//!                  HealthAgent ──▶ controller (/health/report, /health/available_servers)
//! ```
//!
//! Dependency order mirrors construction order in `main`: wire codec →
//! HealthAgent → UpstreamPool → session handlers → ConnectionMultiplexer
//! → listener.

pub mod config;
pub mod errors;
pub mod health;
pub mod model;
pub mod multiplexer;
pub mod session;
pub mod upstream;
pub mod ws;
