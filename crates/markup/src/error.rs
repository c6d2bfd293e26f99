use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    #[error("No tag pivot found between offsets {start} and {end}")]
    NoPivot { start: usize, end: usize },

    #[error("Repeated block starting at offset {position} is never closed")]
    UnbalancedRepetition { position: usize },
}
