pub mod api;
pub mod config;
pub mod ride;
pub mod server;
pub mod ws;
