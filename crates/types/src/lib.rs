//! Shared data model of the stencil template compiler.
//!
//! - [`Descriptor`] / [`DescriptorNode`]: compile-time view of every data path a template reads
//! - [`AccessPoint`]: one marker occurrence bound to a node
//! - [`OutputFragment`] / [`PosKey`]: render-time output awaiting assembly
//! - [`LiteralTable`]: the side-table compiled programs reference static strings through

pub mod descriptor;
pub mod fragment;
pub mod ids;
pub mod literals;

pub use descriptor::{
    AccessPoint, ArrayRole, Condition, Descriptor, DescriptorNode, FormatterArg, FormatterCall,
    IteratorSpec, NodeKind, Operator, Span,
};
pub use fragment::{OutputFragment, PosKey};
pub use ids::{LiteralId, NodePath};
pub use literals::LiteralTable;
