//! HTTP surface for the ephemeral-credential subsystem.
//!
//! Exposes token issuance and validation, email code delivery and
//! verification, runtime mail configuration, and per-session factor progress
//! under `/api/auth`, with per-peer request limits in front.

pub mod auth_routes;
pub mod factors;
pub mod peer;
pub mod request_throttle;
pub mod server;
pub mod state;

pub use {
    factors::{FactorGate, FactorStatus},
    server::{build_gateway_app, start_gateway},
    state::GatewayState,
};
