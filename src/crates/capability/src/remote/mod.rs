//! Remote capability clients.
//!
//! Clients that reach a backend over the network:
//! - **HTTP** - generic JSON contract for agents, tools, models and retrieval services

pub mod http;

pub use http::HttpCapabilityClient;
