//! Real-time push: the WebSocket hub and its per-client plumbing.
//!
//! The hub owns the `user -> clients` registry and mutates it only from its
//! control loop; everything else talks to it over channels. Each client has
//! a bounded send queue; when it fills, the hub drops the client instead of
//! blocking the write path. That trades message loss on one slow connection
//! for liveness of everyone else.

pub mod client;
pub mod hub;
pub mod message;

pub use client::{ClientConfig, ClientHandle, ClientId, ClientReceiver, client_pair};
pub use hub::{Hub, HubHandle, HubMetricsSnapshot};
pub use message::{HubMessage, PushMessage, Recipients};
