//! HTTP surface over the engine boundary.

pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{run_server, ApiServer};
