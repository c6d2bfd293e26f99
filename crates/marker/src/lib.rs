//! Marker parser of the stencil compiler.
//!
//! Each marker (`d.cars[i, sold=true].brand:upper`) is lexed character by
//! character and folded into a shared [`Descriptor`] owned by a
//! [`DescriptorBuilder`]:
//!
//! ```text
//! _root.d.cars[i].brand      -> node _rootdcars (Array), access point "brand"
//! _root.d.cars[i+1].brand    -> closes _rootdcars, records its iterators
//! _root.d.owner[id=2].name   -> node _rootdowner[id=2] (ObjectInArray)
//! ```

pub mod builder;
pub mod error;
mod lexer;

pub use builder::DescriptorBuilder;
pub use error::MarkerError;
