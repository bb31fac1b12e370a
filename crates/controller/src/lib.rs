//! Capacity registry and HTTP health repository fronting the worker
//! fleet.
//!
//! ```text
//!  worker --POST /health/report--▶  CapacityRegistry  ◀--GET /health/*--  worker / admin
//!                                        │
//!                                  sweep every 5s, T_expire=120s
//! ```

pub mod config;
pub mod errors;
pub mod http;
pub mod registry;
