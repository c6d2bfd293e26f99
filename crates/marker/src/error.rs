use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarkerError {
    #[error("Cannot access parent object in \"{marker}\" (too high)")]
    ParentTooHigh { marker: String },

    #[error("Parent access must come right before the attribute in \"{marker}\"")]
    ParentStepNotLast { marker: String },

    #[error("Missing closing parenthesis in formatter of \"{marker}\"")]
    UnclosedParenthesis { marker: String },

    #[error("Unexpected parenthesis in \"{marker}\"")]
    UnexpectedParenthesis { marker: String },

    #[error("Missing closing bracket in \"{marker}\"")]
    UnclosedBracket { marker: String },

    #[error("Unterminated quoted string in \"{marker}\"")]
    UnclosedQuote { marker: String },

    #[error("\"{marker}\" closes an array that was never opened")]
    UnknownArray { marker: String },
}
