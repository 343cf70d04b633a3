//! Derailed client core: gateway session, event bus, credentials, and HTTP
//! helpers shared by the CLI and other front ends.

pub mod client;
pub mod config;
pub mod credentials;
pub mod gateway;
pub mod http;
pub mod models;
