pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod relay;
pub mod server;
pub mod tunnel;
