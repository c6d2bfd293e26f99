//! Compiler and renderer of marker templates.
//!
//! A template is compiled once:
//!
//! 1. markers are extracted and parsed into a [`stencil_types::Descriptor`]
//! 2. the [`segmenter`] locates repeated blocks and slices the static text
//! 3. the [`hierarchy`] fixes the traversal order
//! 4. the [`compiler`] lowers everything into a [`Program`]
//!
//! and rendered any number of times, concurrently, by the [`executor`]
//! followed by the [`assembler`].
//!
//! ```
//! use serde_json::json;
//! use stencil_engine::CompiledStencil;
//! use stencil_template_core::{CompileOptions, ExecutionConfig, FormatterRegistry};
//!
//! let template = CompiledStencil::compile(
//!     "<ul><li>{d[i].name}</li><li>{d[i+1].name}</li></ul>",
//!     &FormatterRegistry::new(),
//!     &CompileOptions::default(),
//! )
//! .unwrap();
//! let out = template.render(&json!([{"name": "a"}, {"name": "b"}]), None, &ExecutionConfig::default());
//! assert_eq!(out, "<ul><li>a</li><li>b</li></ul>");
//! ```

pub mod assembler;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod filter;
pub mod hierarchy;
pub mod processor;
pub mod program;
pub mod segmenter;

pub use error::CompileError;
pub use processor::{CompiledStencil, StencilParser};
pub use program::{Instruction, Program};
