//! vox-providers: Chat-completion provider implementations for vox
//!
//! This crate provides implementations of the `Provider` trait for
//! OpenAI-compatible chat-completion APIs.

pub mod openai;

pub use openai::OpenAIProvider;
