//! Stencil: a document template engine.
//!
//! Templates are plain text (usually XML from an office document) with
//! `{d.path}` markers. Repeated blocks are declared by example: the first
//! row carries `[i]` markers and a copy of it carries `[i+1]`. A template is
//! compiled once into a [`CompiledStencil`] and rendered any number of
//! times, concurrently, against JSON data.
//!
//! ```
//! let out = stencil::render("<p>Hello {d.name}</p>", &serde_json::json!({"name": "you"})).unwrap();
//! assert_eq!(out, "<p>Hello you</p>");
//! ```

pub use stencil_engine::{CompileError, CompiledStencil, Program, StencilParser};
pub use stencil_marker::MarkerError;
pub use stencil_markup::LocateError;
pub use stencil_template_core::{
    CompileOptions, CompiledTemplate, ExecutionConfig, FnFormatter, Formatter, FormatterContext,
    FormatterRegistry, TemplateError, TemplateFlags, TemplateParser,
};
pub use stencil_types::{OutputFragment, PosKey};

use serde_json::Value;

/// Compiles `template` with no formatters and renders it once.
pub fn render(template: &str, data: &Value) -> Result<String, TemplateError> {
    let compiled = CompiledStencil::compile(template, &FormatterRegistry::new(), &CompileOptions::default())?;
    Ok(compiled.render(data, None, &ExecutionConfig::default()))
}
