//! vox-core: Core types, traits and the queued completion client for vox
//!
//! This crate provides the foundational types shared by the provider, tool
//! and agent crates, plus `CompletionClient`, the priority-queued,
//! rate-limited front door to a chat-completion provider.

pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{
    ClientConfig, CompletionClient, CompletionOptions, PendingCompletion, RateLimitConfig,
    RateLimitStatus, RetryPolicy, TaskId,
};
pub use error::{Error, ErrorCategory};
pub use message::{Message, Role, Usage};
pub use provider::{CompletionRequest, CompletionResponse, FinishReason, Provider, ResponseFormat};
pub use tool::{Capability, Tool, ToolRegistry};

pub type Result<T> = std::result::Result<T, Error>;
