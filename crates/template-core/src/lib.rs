//! Core abstractions for template compilation
//!
//! This crate provides the foundational traits and types shared by the
//! stencil engine and its callers. It defines the contract between the
//! template compiler and whoever renders data through it.
//!
//! ## Key Abstractions
//!
//! - **`TemplateParser`**: Trait for compiling template source into an executable artifact
//! - **`CompiledTemplate`**: Trait for executable template artifacts
//! - **`TemplateFlags`**: Feature flags detected during compilation
//! - **`ExecutionConfig`**: Configuration for a render run
//! - **`Formatter`** / **`FormatterRegistry`**: The formatter table consulted at compile
//!   time (name resolution) and at render time (calls)

mod formatter;

pub use formatter::{
    COUNT_FORMATTER, FnFormatter, Formatter, FormatterContext, FormatterRegistry, LoopCounter,
    find_counter,
};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during template processing
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Template parsing failed: {0}")]
    ParseError(String),

    #[error("Template compilation failed: {0}")]
    CompileError(String),

    #[error("Invalid template configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Default number of position-vector components compared when sorting
/// fragments.
pub const DEFAULT_COMPARE_DEPTH: usize = 20;

fn default_compare_depth() -> usize {
    DEFAULT_COMPARE_DEPTH
}

/// Configuration for a render run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Number of position-vector components the assembler compares.
    #[serde(default = "default_compare_depth")]
    pub compare_depth: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            compare_depth: DEFAULT_COMPARE_DEPTH,
        }
    }
}

/// Configuration for a compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Escape `&`, `<`, `>` and strip control characters in substituted strings.
    pub escape_xml: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { escape_xml: true }
    }
}

/// A struct to report features found in a compiled template.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TemplateFlags {
    /// True if at least one repeated block is declared with an `[i]`/`[i+1]` pair.
    pub has_loops: bool,
    /// True if a loop uses a `++` iterator.
    pub has_dynamic_iterators: bool,
    /// True if a marker filters rows or looks up an object in an array.
    pub has_conditions: bool,
    /// True if a marker calls at least one formatter.
    pub has_formatters: bool,
    /// Number of marker occurrences that emit output.
    pub access_points: usize,
}

/// A reusable, data-agnostic, compiled template artifact.
pub trait CompiledTemplate: Send + Sync {
    /// Executes the template against a JSON data source and returns the final text.
    fn execute(&self, data_source: &str, config: &ExecutionConfig)
    -> Result<String, TemplateError>;

    /// Returns a summary of features detected in this template.
    fn features(&self) -> TemplateFlags;
}

/// A parser responsible for compiling a template string into a `CompiledTemplate`.
pub trait TemplateParser {
    /// Parses a template source string.
    fn parse(&self, template_source: &str) -> Result<Arc<dyn CompiledTemplate>, TemplateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_config_defaults() {
        assert_eq!(ExecutionConfig::default().compare_depth, 20);
        let config: ExecutionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.compare_depth, 20);
        let config: ExecutionConfig = serde_json::from_str(r#"{"compare_depth": 4}"#).unwrap();
        assert_eq!(config.compare_depth, 4);
    }

    #[test]
    fn test_compile_options_defaults() {
        assert!(CompileOptions::default().escape_xml);
        let options: CompileOptions = serde_json::from_str(r#"{"escape_xml": false}"#).unwrap();
        assert!(!options.escape_xml);
    }

    #[test]
    fn test_error_messages() {
        let err = TemplateError::ParseError("bad marker".into());
        assert_eq!(err.to_string(), "Template parsing failed: bad marker");
        let err = TemplateError::CompileError("no builder".into());
        assert_eq!(err.to_string(), "Template compilation failed: no builder");
    }
}
