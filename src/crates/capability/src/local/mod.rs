//! In-process capability clients.
//!
//! Clients that answer without leaving the process:
//! - **Echo** - deterministic offline client used for dry runs and demos

pub mod echo;

pub use echo::EchoClient;
