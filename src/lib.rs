pub mod auth;
pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod query;
pub mod server;
pub mod session;
pub mod table;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
