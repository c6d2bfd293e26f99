use stencil_marker::MarkerError;
use stencil_markup::LocateError;
use stencil_template_core::TemplateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Marker(#[from] MarkerError),

    #[error("Array \"{path}\" opened by marker \"{marker}\" is never closed with a +1 or ++ iterator")]
    UnterminatedArray { path: String, marker: String },

    #[error("Cannot find the repeated block of \"{path}\": {source}")]
    Locate {
        path: String,
        #[source]
        source: LocateError,
    },

    #[error("Formatter \"{name}\" does not exist. Do you mean \"{suggestion}\"?")]
    UnknownFormatter { name: String, suggestion: String },

    #[error("Impossible to generate the builder: {reason}\n{listing}")]
    Program { reason: String, listing: String },
}

impl From<CompileError> for TemplateError {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::Program { .. } => TemplateError::CompileError(err.to_string()),
            other => TemplateError::ParseError(other.to_string()),
        }
    }
}
