//! tagtree extension layer
//!
//! Converters, extensions and how they are found:
//! - [`converter`]: the converter contract, tag selection and the
//!   validating [`ConverterProxy`]
//! - [`extension`]: extensions, tag definitions and [`ExtensionProxy`]
//! - [`registry`]: the per-session [`ExtensionRegistry`] and
//!   [`SerializationContext`]
//! - [`entry_points`]: fault-isolating plugin discovery
//! - [`plugins`]: the process-wide [`PluginRegistry`]
//! - [`resource`]: resource mappings with package provenance

pub mod converter;
pub mod entry_points;
pub mod error;
pub mod extension;
pub mod plugins;
pub mod registry;
pub mod resource;

pub use converter::{Converter, ConverterProxy, Deferred, FromTree, Phase, TagSelector};
pub use entry_points::{
    Discovered, DiscoveryOptions, EntryPoint, EntryPointGroup, EntryPointSource, PluginItem,
    StaticEntryPoints, discover,
};
pub use error::{ConfigurationError, PluginError};
pub use extension::{Extension, ExtensionInfo, ExtensionProxy, PackageInfo, TagDefinition};
pub use plugins::PluginRegistry;
pub use registry::{ConvertOptions, ExtensionRegistry, SerializationContext};
pub use resource::{ResourceManager, ResourceMapping, ResourceMappingProxy};
