//! wyrm-ai: Inference server clients and model lifecycle management
//!
//! This crate talks to a locally hosted inference server (and a hosted
//! alternative) and manages the server's lifecycle: detection, install,
//! model pulls, and update checks.

pub mod catalog;
pub mod client;
pub mod cloud;
pub mod error;
pub mod lifecycle;
pub mod platform;
pub mod provider;
pub mod stream;
pub mod types;

mod wire;

pub use catalog::{ModelSpec, PerformanceTier};
pub use client::OllamaClient;
pub use cloud::CloudClient;
pub use error::{Error, Result};
pub use lifecycle::{Lifecycle, ServerStatus, UpdateCheck};
pub use provider::ChatProvider;
pub use stream::{ChatEvent, ChatEventStream};
pub use types::{ChatMessage, ChatRole, ModelInfo};
