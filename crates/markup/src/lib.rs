//! Markup-level helpers of the stencil compiler.
//!
//! - [`find_markers`]: pull `{d...}`/`{c...}` markers out of template text
//! - [`locate`]: find the exact boundaries of a repeated block from the
//!   positions of its `[i]` and `[i+1]` markers, by tag-balance matching

pub mod error;
pub mod locator;
pub mod markers;
pub mod tags;

pub use error::LocateError;
pub use locator::{
    Pivot, Repetition, TagPos, find_closing_tag_position, find_opening_tag_position, find_pivot,
    find_repetition_position, locate,
};
pub use markers::{Marker, ROOT_PREFIX, find_markers};
pub use tags::{Tag, TagKind, scan_tags};
