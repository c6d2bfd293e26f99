//! Processor that implements the `TemplateParser` trait for marker templates.

use crate::assembler::assemble;
use crate::compiler::Compiler;
use crate::error::CompileError;
use crate::executor::execute;
use crate::hierarchy::sort_hierarchy;
use crate::program::Program;
use crate::segmenter::segment;
use log::debug;
use serde_json::Value;
use std::sync::Arc;
use stencil_marker::DescriptorBuilder;
use stencil_markup::find_markers;
use stencil_template_core::{
    CompileOptions, CompiledTemplate, ExecutionConfig, FormatterRegistry, TemplateError,
    TemplateFlags, TemplateParser,
};
use stencil_types::{ArrayRole, Descriptor, NodeKind, OutputFragment};

/// Marker template parser.
pub struct StencilParser {
    registry: Arc<FormatterRegistry>,
    options: CompileOptions,
}

impl StencilParser {
    pub fn new(registry: Arc<FormatterRegistry>) -> Self {
        Self {
            registry,
            options: CompileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }
}

impl TemplateParser for StencilParser {
    fn parse(&self, template_source: &str) -> Result<Arc<dyn CompiledTemplate>, TemplateError> {
        let compiled = CompiledStencil::compile(template_source, &self.registry, &self.options)?;
        Ok(Arc::new(compiled))
    }
}

/// Compiled marker template. Immutable, and safe to render from many threads.
#[derive(Debug, Clone)]
pub struct CompiledStencil {
    program: Program,
    features: TemplateFlags,
}

impl CompiledStencil {
    pub fn compile(
        source: &str,
        registry: &FormatterRegistry,
        options: &CompileOptions,
    ) -> Result<Self, CompileError> {
        let (xml, markers) = find_markers(source);
        let mut builder = DescriptorBuilder::new();
        for marker in &markers {
            builder.parse(&marker.name, marker.pos)?;
        }
        let mut descriptor = builder.finish();
        let text = segment(&xml, &mut descriptor)?;
        let order = sort_hierarchy(&descriptor);
        let features = detect_features(&descriptor);
        let program = Compiler::new(&descriptor, registry, options).compile(&order, &text)?;
        debug!("compiled template with {} markers: {:?}", markers.len(), features);
        Ok(Self { program, features })
    }

    /// Renders `data`, with `complement` reachable as `c`.
    pub fn render(&self, data: &Value, complement: Option<&Value>, config: &ExecutionConfig) -> String {
        let fragments = self.render_fragments(data, complement);
        assemble(fragments, &self.program.literals, config.compare_depth)
    }

    /// Unsorted fragments of one render, before assembly.
    pub fn render_fragments(&self, data: &Value, complement: Option<&Value>) -> Vec<OutputFragment> {
        execute(&self.program, data, complement)
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn features(&self) -> TemplateFlags {
        self.features
    }
}

impl CompiledTemplate for CompiledStencil {
    fn execute(&self, data_source: &str, config: &ExecutionConfig) -> Result<String, TemplateError> {
        let data: Value = serde_json::from_str(data_source)
            .map_err(|e| TemplateError::ParseError(format!("JSON parse error: {}", e)))?;
        Ok(self.render(&data, None, config))
    }

    fn features(&self) -> TemplateFlags {
        self.features
    }
}

/// Detect template features by scanning the descriptor
fn detect_features(descriptor: &Descriptor) -> TemplateFlags {
    let mut flags = TemplateFlags::default();
    for node in descriptor.iter() {
        match node.kind {
            NodeKind::Array => {
                flags.has_loops = true;
                flags.has_dynamic_iterators |= node.has_dynamic_iterator();
            }
            NodeKind::ObjectInArray => flags.has_conditions = true,
            NodeKind::Object => {}
        }
        for part in node.xml_parts.iter().filter(|p| p.role == ArrayRole::None) {
            flags.access_points += 1;
            flags.has_conditions |= !part.conditions.is_empty();
            flags.has_formatters |= !part.formatters.is_empty();
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(source: &str) -> CompiledStencil {
        CompiledStencil::compile(source, &FormatterRegistry::new(), &CompileOptions::default()).unwrap()
    }

    #[test]
    fn test_render_object_markers() {
        let template = compile("<p>{d.firstname} {d.lastname}</p>");
        let out = template.render(
            &json!({"firstname": "Ada", "lastname": "Lovelace"}),
            None,
            &ExecutionConfig::default(),
        );
        assert_eq!(out, "<p>Ada Lovelace</p>");
    }

    #[test]
    fn test_template_without_markers_is_unchanged() {
        let template = compile("<p>{not a marker}</p>");
        let out = template.render(&json!({}), None, &ExecutionConfig::default());
        assert_eq!(out, "<p>{not a marker}</p>");
        assert_eq!(template.features(), TemplateFlags::default());
    }

    #[test]
    fn test_features() {
        let template = compile("<t><r>{d[i, a > 1].n}</r><r>{d[i+1, a > 1].n}</r></t>{c.x}");
        let flags = template.features();
        assert!(flags.has_loops);
        assert!(flags.has_conditions);
        assert!(!flags.has_dynamic_iterators);
        assert!(!flags.has_formatters);
        assert_eq!(flags.access_points, 2);
    }

    #[test]
    fn test_parser_trait_executes_json() {
        let parser = StencilParser::new(Arc::new(FormatterRegistry::new()));
        let template = parser.parse("<p>{d.name}</p>").unwrap();
        let out = template.execute(r#"{"name": "x"}"#, &ExecutionConfig::default()).unwrap();
        assert_eq!(out, "<p>x</p>");
        let err = template.execute("{", &ExecutionConfig::default()).unwrap_err();
        assert!(matches!(err, TemplateError::ParseError(_)));
    }

    #[test]
    fn test_parse_errors_are_reported() {
        let parser = StencilParser::new(Arc::new(FormatterRegistry::new()));
        let err = parser.parse("<t><r>{d[i].n}</r></t>").err().unwrap();
        assert!(matches!(err, TemplateError::ParseError(_)));
    }

    #[test]
    fn test_escaping_can_be_disabled() {
        let options = CompileOptions { escape_xml: false };
        let template = CompiledStencil::compile("<p>{d.v}</p>", &FormatterRegistry::new(), &options).unwrap();
        let out = template.render(&json!({"v": "<b>"}), None, &ExecutionConfig::default());
        assert_eq!(out, "<p><b></p>");
    }
}
