//! Intent classification and the tool-augmented agent pipeline for vox.
//!
//! This crate provides:
//! - `IntentClassifier`: local keyword pass with a model fallback
//! - `AgentPipeline`: classify, run tools, rank findings, ask the model
//! - `Settings`: layered configuration and the `from_settings` composition root
//! - `init_logging`: tracing subscriber setup

pub mod classifier;
pub mod config;
pub mod context;
pub mod logging;
pub mod pipeline;
pub mod stats;

pub use classifier::{categorize, Category, IntentAnalysis, IntentClassifier, IntentSource};
pub use config::{AgentSettings, ApiSettings, RetrySettings, SearchSettings, Settings};
pub use context::{relevance_score, AgentContext, Finding};
pub use logging::{init_logging, LogLevel};
pub use pipeline::{AgentPipeline, PipelineConfig, PipelineReport};
pub use stats::{UsageSnapshot, UsageStats};
