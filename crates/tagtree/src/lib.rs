//! tagtree
//!
//! Conversion between tagged trees and native object graphs through a
//! pluggable registry of converters.
//!
//! ```ignore
//! use std::sync::Arc;
//! use tagtree::{ExtensionRegistry, PluginRegistry, SerializationContext, Warnings};
//!
//! let registry = PluginRegistry::global().registry();
//! let ctx = SerializationContext::new(registry);
//! let mut warnings = Warnings::new();
//! let obj = tagtree::from_tree(&tree, &ctx, &mut warnings)?;
//! let back = tagtree::to_tree(&obj, &ctx)?;
//! ```

pub mod config;
pub mod error;
pub mod load;
pub mod save;

pub use config::TagtreeConfig;
pub use error::{ConversionError, Result};
pub use load::from_tree;
pub use save::to_tree;

pub use tagtree_core::{
    ListRef, MapRef, NativeObject, Node, NodeId, NodeValue, Object, Scalar, TagPattern, TagUri,
    TagVersion, TypeRef, Warning, WarningCategory, Warnings,
};
pub use tagtree_extension::{
    ConfigurationError, ConvertOptions, Converter, ConverterProxy, Deferred, Discovered,
    DiscoveryOptions, EntryPoint, EntryPointGroup, EntryPointSource, Extension, ExtensionProxy,
    ExtensionRegistry, FromTree, PackageInfo, Phase, PluginError, PluginItem, PluginRegistry,
    ResourceManager, ResourceMapping, ResourceMappingProxy, SerializationContext,
    StaticEntryPoints, TagDefinition, TagSelector, discover,
};
