//! Resource mappings: key to bytes lookups provided by plugins, typically
//! schema documents keyed by URI.

use crate::extension::PackageInfo;
use indexmap::IndexMap;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Read-only mapping from resource URI to content.
pub trait ResourceMapping: Send + Sync {
    fn get(&self, uri: &str) -> Option<Cow<'_, [u8]>>;

    /// URIs available in this mapping.
    fn uris(&self) -> Vec<String>;

    fn contains(&self, uri: &str) -> bool {
        self.get(uri).is_some()
    }

    fn class_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl ResourceMapping for IndexMap<String, Vec<u8>> {
    fn get(&self, uri: &str) -> Option<Cow<'_, [u8]>> {
        IndexMap::get(self, uri).map(|v| Cow::Borrowed(v.as_slice()))
    }

    fn uris(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }
}

impl ResourceMapping for BTreeMap<String, Vec<u8>> {
    fn get(&self, uri: &str) -> Option<Cow<'_, [u8]>> {
        BTreeMap::get(self, uri).map(|v| Cow::Borrowed(v.as_slice()))
    }

    fn uris(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }
}

impl ResourceMapping for HashMap<String, Vec<u8>> {
    fn get(&self, uri: &str) -> Option<Cow<'_, [u8]>> {
        HashMap::get(self, uri).map(|v| Cow::Borrowed(v.as_slice()))
    }

    fn uris(&self) -> Vec<String> {
        let mut uris: Vec<_> = self.keys().cloned().collect();
        uris.sort();
        uris
    }
}

/// A [`ResourceMapping`] together with the package that provided it.
#[derive(Clone)]
pub struct ResourceMappingProxy {
    delegate: Arc<dyn ResourceMapping>,
    package: Option<PackageInfo>,
}

impl ResourceMappingProxy {
    pub fn new(delegate: Arc<dyn ResourceMapping>, package: Option<PackageInfo>) -> Self {
        Self { delegate, package }
    }

    pub fn get(&self, uri: &str) -> Option<Cow<'_, [u8]>> {
        self.delegate.get(uri)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.delegate.contains(uri)
    }

    pub fn uris(&self) -> Vec<String> {
        self.delegate.uris()
    }

    pub fn delegate(&self) -> &Arc<dyn ResourceMapping> {
        &self.delegate
    }

    pub fn package_name(&self) -> Option<&str> {
        self.package.as_ref().map(|p| p.name.as_str())
    }

    pub fn package_version(&self) -> Option<&str> {
        self.package.as_ref().map(|p| p.version.as_str())
    }

    pub fn class_name(&self) -> &'static str {
        self.delegate.class_name()
    }
}

impl fmt::Debug for ResourceMappingProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let package = match &self.package {
            Some(p) => p.to_string(),
            None => "(none)".to_string(),
        };
        write!(
            f,
            "<ResourceMappingProxy class: {} package: {}>",
            self.class_name(),
            package
        )
    }
}

/// First-wins lookup across several resource mappings.
#[derive(Debug, Clone, Default)]
pub struct ResourceManager {
    mappings: Vec<Arc<ResourceMappingProxy>>,
}

impl ResourceManager {
    pub fn new(mappings: Vec<Arc<ResourceMappingProxy>>) -> Self {
        Self { mappings }
    }

    pub fn get(&self, uri: &str) -> Option<Cow<'_, [u8]>> {
        self.mappings.iter().find_map(|m| m.get(uri))
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.mappings.iter().any(|m| m.contains(uri))
    }

    /// Every available URI, in mapping order, without duplicates.
    pub fn uris(&self) -> Vec<String> {
        let mut seen = indexmap::IndexSet::new();
        for mapping in &self.mappings {
            seen.extend(mapping.uris());
        }
        seen.into_iter().collect()
    }

    pub fn mappings(&self) -> &[Arc<ResourceMappingProxy>] {
        &self.mappings
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
