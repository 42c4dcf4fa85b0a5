//! Stream gateway
//!
//! Real-time market data and account event delivery over WebSocket.
//!
//! The core is the subscription hub:
//! - `registry`: live sessions, per-IP and per-account connection slots
//! - `index`: topic and account-session routing tables
//! - `dispatch`: inbound operation handling
//! - `fanout`: event delivery to matching sessions
//! - `reaper`: idle and stale session closing
//! - `auth`: api key resolution and account binding
//!
//! `router` and `handlers` expose the hub over HTTP with axum.

pub mod auth;
pub mod backpressure;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod fanout;
pub mod handlers;
pub mod hub;
pub mod index;
pub mod metrics;
pub mod protocol;
pub mod rate_limit;
pub mod reaper;
pub mod registry;
pub mod router;
pub mod state;

pub use config::HubConfig;
pub use hub::Hub;
