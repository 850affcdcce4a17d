//! vox-tools: Built-in auxiliary tools for vox
//!
//! This crate provides the tools the agent pipeline consults before asking
//! the model:
//! - Web search: real-time information from a search API
//! - Calculator: arithmetic, percentages, powers and square roots
//! - Date/time: current time, dates and day counts

pub mod calculator;
pub mod datetime;
pub mod web_search;

use std::sync::Arc;

use vox_core::Tool;

pub use calculator::CalculatorTool;
pub use datetime::DateTimeTool;
pub use web_search::{WebSearchConfig, WebSearchTool};

/// Create the default tool set: web search, calculator and date/time.
pub fn create_default_tools(web: WebSearchConfig) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(WebSearchTool::new(web)),
        Arc::new(CalculatorTool::new()),
        Arc::new(DateTimeTool::new()),
    ]
}
