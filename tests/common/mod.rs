use serde_json::Value;
use stencil::{
    CompileError, CompileOptions, CompiledStencil, ExecutionConfig, FnFormatter, FormatterContext,
    FormatterRegistry,
};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Registry with a few formatters exercising every formatter feature.
pub fn formatters() -> FormatterRegistry {
    let mut registry = FormatterRegistry::new();
    registry.register_fn("upperCase", |_, value, _| Value::String(text_of(&value).to_uppercase()));
    registry.register_fn("append", |_, value, args| {
        let suffix = args.first().map(text_of).unwrap_or_default();
        Value::String(format!("{}{}", text_of(&value), suffix))
    });
    registry.register_fn("hideBegin", |ctx, _, _| {
        ctx.is_hidden = Some(1);
        Value::String(String::new())
    });
    registry.register_fn("hideEnd", |ctx, _, _| {
        ctx.is_hidden = Some(-1);
        Value::String(String::new())
    });
    registry.register("br", FnFormatter::injecting(line_breaks));
    registry
}

fn line_breaks(_: &mut FormatterContext, value: Value, _: &[Value]) -> Value {
    Value::String(text_of(&value).replace('\n', "<br/>"))
}

pub fn compile(template: &str) -> Result<CompiledStencil, CompileError> {
    CompiledStencil::compile(template, &formatters(), &CompileOptions::default())
}

/// Compiles and renders `template` once.
pub fn render(template: &str, data: &Value) -> Result<String, CompileError> {
    Ok(compile(template)?.render(data, None, &ExecutionConfig::default()))
}
