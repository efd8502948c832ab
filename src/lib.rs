pub mod app;
pub mod config;
pub mod entity_cache;
pub mod filter;
pub mod poller;
pub mod response_cache;
pub mod sequencer;
pub mod service;

pub use app::{Dashboard, DashboardStats};
pub use sequencer::Settled;
