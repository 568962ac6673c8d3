//! API server module exposing the chat pipeline over REST

pub mod handlers;
pub mod routes;
pub mod server;
pub mod types;

pub use server::serve_api;
