use clap::Parser;
use log::info;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use stencil::{CompileOptions, CompiledStencil, ExecutionConfig, FormatterRegistry, TemplateError};

/// Render a marker template against JSON data
#[derive(Parser, Debug)]
#[command(name = "stencil")]
#[command(about = "Render a document template against JSON data", long_about = None)]
struct Args {
    /// Template file (any text format, usually XML)
    #[arg(value_name = "TEMPLATE")]
    template: PathBuf,

    /// JSON data, reachable as `d` in markers
    #[arg(value_name = "DATA")]
    data: PathBuf,

    /// JSON complement, reachable as `c` in markers
    #[arg(long, value_name = "FILE")]
    complement: Option<PathBuf>,

    /// JSON file with `compile` and `execution` settings
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write the result here instead of stdout
    #[arg(long, short, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    compile: CompileOptions,
    execution: ExecutionConfig,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<(), TemplateError> {
    let args = Args::parse();

    let config: ConfigFile = match &args.config {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)
            .map_err(|e| TemplateError::ConfigError(format!("{}: {}", path.display(), e)))?,
        None => ConfigFile::default(),
    };

    info!("Loading template from {}", args.template.display());
    let source = fs::read_to_string(&args.template)?;
    let template = CompiledStencil::compile(&source, &FormatterRegistry::new(), &config.compile)?;

    let data = read_json(&args.data)?;
    let complement = args.complement.as_deref().map(read_json).transpose()?;

    let out = template.render(&data, complement.as_ref(), &config.execution);
    match &args.output {
        Some(path) => {
            fs::write(path, out)?;
            info!("Wrote {}", path.display());
        }
        None => print!("{}", out),
    }
    Ok(())
}

fn read_json(path: &Path) -> Result<Value, TemplateError> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| TemplateError::ParseError(format!("JSON parse error in {}: {}", path.display(), e)))
}
