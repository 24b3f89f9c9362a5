pub mod api;
pub mod client;
pub mod config;

pub use client::PceClient;
pub use config::PceConfig;
