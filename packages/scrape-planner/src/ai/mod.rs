//! Completion-service implementations.
//!
//! Reference adapters for the `CompletionService` trait. Users can use
//! these directly or implement their own.

#[cfg(feature = "openai")]
mod openai;

#[cfg(feature = "openai")]
pub use openai::OpenAI;
