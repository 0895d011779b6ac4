//! Contract analysis backend: DOCX in, structured risk report out.
//!
//! An uploaded contract is parsed (visible text plus tracked changes),
//! key sections are located, optional legal research enriches the
//! context, and an AI provider produces issues, suggestions, a risk
//! score, and proposed redlines. The response is validated and repaired
//! before it reaches the caller.

pub mod analysis;
pub mod config;
pub mod document;
pub mod error;
pub mod limits;
pub mod pipeline;
pub mod prompt;
pub mod report;
pub mod research;
pub mod sections;
pub mod server;
pub mod validate;

pub use config::Settings;
pub use error::{ConfigError, PipelineError};
pub use report::AnalysisReport;
