//! Extensions and the extension proxy.
//!
//! An [`Extension`] bundles converters with the tag definitions they are
//! resolved against. Extensions come from plugin packages (see
//! [`entry_points`](crate::entry_points)) or are registered at runtime, in
//! which case they carry no package information.

use crate::converter::{Converter, ConverterProxy};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tagtree_core::{TagUri, Warnings};
use tracing::debug;

/// A tag an extension knows about, with the schemas describing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDefinition {
    pub tag_uri: TagUri,
    #[serde(default)]
    pub schema_uris: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TagDefinition {
    pub fn new(tag_uri: TagUri) -> Self {
        Self {
            tag_uri,
            schema_uris: Vec::new(),
            title: None,
            description: None,
        }
    }

    pub fn with_schema_uri(mut self, uri: impl Into<String>) -> Self {
        self.schema_uris.push(uri.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl From<TagUri> for TagDefinition {
    fn from(tag_uri: TagUri) -> Self {
        Self::new(tag_uri)
    }
}

/// Name and version of the package that provided a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
}

impl PackageInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for PackageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

/// A bundle of converters and tag definitions.
pub trait Extension: Send + Sync {
    /// URI identifying this extension, if it has one.
    fn extension_uri(&self) -> Option<String> {
        None
    }

    fn converters(&self) -> Vec<Arc<dyn Converter>> {
        Vec::new()
    }

    fn tags(&self) -> Vec<TagDefinition> {
        Vec::new()
    }

    /// Legacy extensions may register converters that resolve several tags
    /// without a tag selector. Doing so emits a deprecation warning.
    fn legacy(&self) -> bool {
        false
    }

    fn class_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Identity of a loaded extension, shared by its converter proxies.
#[derive(Debug)]
pub struct ExtensionInfo {
    extension_uri: Option<String>,
    package: Option<PackageInfo>,
    legacy: bool,
    class_name: &'static str,
}

impl ExtensionInfo {
    pub fn new(
        extension_uri: Option<String>,
        package: Option<PackageInfo>,
        legacy: bool,
        class_name: &'static str,
    ) -> Self {
        Self {
            extension_uri,
            package,
            legacy,
            class_name,
        }
    }

    pub fn extension_uri(&self) -> Option<&str> {
        self.extension_uri.as_deref()
    }

    pub fn package(&self) -> Option<&PackageInfo> {
        self.package.as_ref()
    }

    pub fn package_name(&self) -> Option<&str> {
        self.package.as_ref().map(|p| p.name.as_str())
    }

    pub fn package_version(&self) -> Option<&str> {
        self.package.as_ref().map(|p| p.version.as_str())
    }

    pub fn legacy(&self) -> bool {
        self.legacy
    }

    pub fn class_name(&self) -> &'static str {
        self.class_name
    }

    /// `name==version`, or `(none)` for runtime-registered extensions.
    pub fn package_description(&self) -> String {
        match &self.package {
            Some(package) => package.to_string(),
            None => "(none)".to_string(),
        }
    }
}

/// A validated, loaded [`Extension`].
pub struct ExtensionProxy {
    delegate: Arc<dyn Extension>,
    info: Arc<ExtensionInfo>,
    converters: Vec<ConverterProxy>,
    tags: Vec<TagDefinition>,
}

impl ExtensionProxy {
    /// Load `delegate`, validating every converter. Fails on the first
    /// converter that does not validate.
    pub fn new(
        delegate: Arc<dyn Extension>,
        package: Option<PackageInfo>,
        warnings: &mut Warnings,
    ) -> Result<Self> {
        let info = Arc::new(ExtensionInfo::new(
            delegate.extension_uri(),
            package,
            delegate.legacy(),
            delegate.class_name(),
        ));
        let tags = delegate.tags();

        let converters = delegate
            .converters()
            .into_iter()
            .map(|c| ConverterProxy::new(c, info.clone(), &tags, warnings))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            extension = %info.class_name(),
            package = %info.package_description(),
            converters = converters.len(),
            tags = tags.len(),
            "Loaded extension"
        );

        Ok(Self {
            delegate,
            info,
            converters,
            tags,
        })
    }

    pub fn delegate(&self) -> &Arc<dyn Extension> {
        &self.delegate
    }

    pub fn info(&self) -> &Arc<ExtensionInfo> {
        &self.info
    }

    pub fn extension_uri(&self) -> Option<&str> {
        self.info.extension_uri()
    }

    pub fn package_name(&self) -> Option<&str> {
        self.info.package_name()
    }

    pub fn package_version(&self) -> Option<&str> {
        self.info.package_version()
    }

    pub fn legacy(&self) -> bool {
        self.info.legacy()
    }

    pub fn class_name(&self) -> &'static str {
        self.info.class_name()
    }

    pub fn converters(&self) -> &[ConverterProxy] {
        &self.converters
    }

    pub fn tags(&self) -> &[TagDefinition] {
        &self.tags
    }
}

impl fmt::Debug for ExtensionProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<ExtensionProxy URI: {} class: {} package: {} legacy: {}>",
            self.extension_uri().unwrap_or("(none)"),
            self.class_name(),
            self.info.package_description(),
            self.legacy()
        )
    }
}
