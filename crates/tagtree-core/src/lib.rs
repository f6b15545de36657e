//! tagtree core model
//!
//! Building blocks shared by every tagtree crate:
//! - [`tag`]: tag URIs and tag patterns
//! - [`node`]: the tagged tree (mapping / sequence / scalar nodes)
//! - [`object`]: native object graphs and native type references
//! - [`warning`]: categorized, filterable non-fatal diagnostics

pub mod node;
pub mod object;
pub mod tag;
pub mod warning;

pub use node::{Node, NodeId, NodeValue, Scalar};
pub use object::{ListRef, MapRef, NativeObject, Object, TypeRef};
pub use tag::{TagError, TagPattern, TagUri, TagVersion};
pub use warning::{Warning, WarningCategory, Warnings};
