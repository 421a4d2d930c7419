//! Gateway: HTTP server for channel webhooks, health and history, plus the inbound
//! processing loop that hands each message to its channel's router.

mod server;

pub use server::{run_gateway, GatewayState};
