//! # bazaar-server
//!
//! Realtime messaging server for the Bazaar marketplace.
//!
//! - `WebSocket` gateway at `/ws`: token handshake, per-user connection
//!   registry (multi-device), heartbeat supervision
//! - Private messages routed to every connection of the recipient, with
//!   at-least-once delivery: retries, then push fallback and forced
//!   disconnect
//! - Collaborator contracts for the marketplace backend (tokens, users,
//!   presence, message store, push) with JWT, HTTP and in-memory adapters
//! - `/health` and Prometheus `/metrics`
//! - Graceful shutdown: refuse upgrades, close sessions, drain under a deadline

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod services;
pub mod shutdown;
pub mod websocket;

pub use config::{DeliveryConfig, HeartbeatConfig, ServerConfig};
pub use errors::{ServiceError, SessionError};
pub use server::{AppState, BazaarServer, ServerHandle};
pub use services::Collaborators;
pub use shutdown::{DrainOutcome, ShutdownCoordinator};
