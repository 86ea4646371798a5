//! WebSocket connections, liveness, routing and delivery tracking.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `connection` | One live socket: outbound queue, activity signal, close state |
//! | `registry` | User → connections map, fan-out, forced disconnect |
//! | `session` | Handshake, read/write loops, teardown |
//! | `heartbeat` | Ping probes and miss counting |
//! | `presence` | Per-user online/offline publication |
//! | `router` | Inbound event dispatch, persistence hand-off |
//! | `delivery` | Pending deliveries, retries, push fallback |
//!
//! ## Data Flow
//!
//! `session` reads a frame → `router` → `registry` fan-out to the recipient,
//! with `delivery` retrying until the recipient acks or gives up.

pub mod connection;
pub mod delivery;
pub mod heartbeat;
pub mod presence;
pub mod registry;
pub mod router;
pub mod session;
