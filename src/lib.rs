// Public API for the binary, integration tests and embedding

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod prompts;
pub mod store;
pub mod trigger;
pub mod types;
