pub mod dto;
pub mod routes;
pub mod services;

pub use services::{AppServices, AppState, RunningApp, build_app};
