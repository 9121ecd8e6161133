pub mod auth;
pub mod client;
pub mod config;
pub mod fanout;
pub mod server;
pub mod subscribe;
pub mod tickets;
pub mod validate;

pub use config::ServerConfig;
pub use server::{start, ServerHandle};
