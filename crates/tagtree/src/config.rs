//! Configuration file support.
//!
//! ```toml
//! [convert]
//! suppress_unresolved_tag_warnings = false
//!
//! [warnings]
//! silence = ["deprecation"]
//!
//! [plugins]
//! disabled_packages = ["broken-pkg"]
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tagtree_core::{WarningCategory, Warnings};
use tagtree_extension::{
    ConvertOptions, Discovered, DiscoveryOptions, EntryPointSource, ExtensionRegistry,
    PluginRegistry, SerializationContext, discover,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagtreeConfig {
    pub convert: ConvertOptions,
    pub warnings: WarningsSection,
    pub plugins: PluginsSection,
}

/// `[warnings]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarningsSection {
    /// Warning categories that are not recorded.
    pub silence: Vec<WarningCategory>,
}

/// `[plugins]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsSection {
    /// Packages whose entry points are skipped during discovery.
    pub disabled_packages: Vec<String>,
}

impl TagtreeConfig {
    /// Load configuration from a file. `.json` files are read as JSON,
    /// anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            return serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config {}", path.display()));
        }

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config {}", path.display()))
    }

    /// Warning collector honouring `[warnings] silence`.
    pub fn warnings(&self) -> Warnings {
        Warnings::silencing(self.warnings.silence.iter().copied())
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            disabled_packages: self.plugins.disabled_packages.iter().cloned().collect(),
            silenced_warnings: self.warnings.silence.iter().copied().collect(),
        }
    }

    /// Run plugin discovery against `source` with this configuration.
    pub fn discover(&self, source: &dyn EntryPointSource) -> Discovered {
        discover(source, &self.discovery_options())
    }

    /// Apply the plugin filters to a plugin registry.
    pub fn configure(&self, plugins: &PluginRegistry) {
        plugins.configure(self.discovery_options());
    }

    /// Serialization context over `registry` with this configuration's
    /// conversion options.
    pub fn context(&self, registry: Arc<ExtensionRegistry>) -> SerializationContext {
        SerializationContext::new(registry).with_options(self.convert.clone())
    }
}
