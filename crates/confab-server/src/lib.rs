pub mod auth;
pub mod client;
pub mod handlers;
pub mod registry;
pub mod server;
pub mod session;

pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
