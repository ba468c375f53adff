//! Capability clients for switchboard.
//!
//! Every backend the orchestrator can call is a *capability*: a language
//! model, an external agent, a tool, or a grounding/retrieval source. They all
//! share one async interface, [`CapabilityClient`], and are looked up through
//! an explicit [`CapabilityRegistry`] built at startup.
//!
//! # Local Clients
//!
//! - **Echo** - deterministic offline answers, used for dry runs
//!
//! # Remote Clients
//!
//! - **HTTP** - posts the JSON [`CapabilityRequest`] to an endpoint and reads a
//!   [`CapabilityOutput`] back; credentials come from a [`SecretResolver`]
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use capability::{CapabilityKind, CapabilityRegistry, CapabilityRequest, EchoClient};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = CapabilityRegistry::builder()
//!         .register(Arc::new(EchoClient::new("offline", CapabilityKind::Llm)))
//!         .build()?;
//!
//!     let client = registry.resolve(CapabilityKind::Llm, None)?;
//!     let request = CapabilityRequest::new(CapabilityKind::Llm, "What is Rust?");
//!     let output = client.invoke(&request, Duration::from_secs(30)).await?;
//!     println!("{}", output.content);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod secret;
pub mod types;

#[cfg(feature = "local")]
pub mod local;

#[cfg(feature = "remote")]
pub mod remote;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{CapabilityClient, CapabilityRegistry, CapabilityRegistryBuilder};
pub use config::HttpClientConfig;
pub use error::{CapabilityError, Result};
pub use secret::{
    Credential, CredentialKind, EnvSecretResolver, SecretResolver, StaticSecretResolver,
};
pub use types::{CapabilityKind, CapabilityOutput, CapabilityRequest, SourceRef, Usage};

#[cfg(feature = "local")]
pub use local::EchoClient;

#[cfg(feature = "remote")]
pub use remote::HttpCapabilityClient;
