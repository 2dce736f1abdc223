//! Collaborator surface: HTTP health endpoints, the WebSocket upgrade, and
//! the process wiring that assembles stores, bus, workers, and the hub.

pub mod app;
pub mod config;
