//! Extension registry and serialization context.
//!
//! The [`ExtensionRegistry`] is the ordered, immutable view of the active
//! extensions used by one session. When several extensions handle the same
//! tag or type, the first registered one wins.

use crate::converter::ConverterProxy;
use crate::extension::{ExtensionProxy, TagDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tagtree_core::{NativeObject, TagUri, TypeRef};
use tracing::debug;

/// Position of a converter: (extension index, converter index).
type Slot = (usize, usize);

/// Ordered set of loaded extensions with tag and type lookup.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: Vec<Arc<ExtensionProxy>>,
    converters: Vec<Slot>,
    by_tag: HashMap<TagUri, Slot>,
    definitions: HashMap<TagUri, Slot>,
}

impl ExtensionRegistry {
    /// Build a registry from extensions in priority order. Repeated
    /// extensions and repeated converters are indexed once.
    pub fn new(extensions: Vec<Arc<ExtensionProxy>>) -> Self {
        let mut unique: Vec<Arc<ExtensionProxy>> = Vec::with_capacity(extensions.len());
        for ext in extensions {
            if !unique.iter().any(|e| Arc::ptr_eq(e, &ext)) {
                unique.push(ext);
            }
        }

        let mut converters = Vec::new();
        let mut by_tag = HashMap::new();
        let mut definitions = HashMap::new();
        {
            let mut seen: HashSet<&ConverterProxy> = HashSet::new();
            for (e, ext) in unique.iter().enumerate() {
                for (d, def) in ext.tags().iter().enumerate() {
                    definitions.entry(def.tag_uri.clone()).or_insert((e, d));
                }
                for (c, converter) in ext.converters().iter().enumerate() {
                    if !seen.insert(converter) {
                        continue;
                    }
                    converters.push((e, c));
                    for tag in converter.tags() {
                        by_tag.entry(tag.clone()).or_insert((e, c));
                    }
                }
            }
        }

        debug!(
            extensions = unique.len(),
            converters = converters.len(),
            tags = by_tag.len(),
            "Built extension registry"
        );

        Self {
            extensions: unique,
            converters,
            by_tag,
            definitions,
        }
    }

    fn converter_at(&self, (e, c): Slot) -> &ConverterProxy {
        &self.extensions[e].converters()[c]
    }

    /// Converters in priority order.
    pub fn converters(&self) -> impl Iterator<Item = &ConverterProxy> {
        self.converters.iter().map(|&slot| self.converter_at(slot))
    }

    pub fn extensions(&self) -> &[Arc<ExtensionProxy>] {
        &self.extensions
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn converter_for_tag(&self, tag: &TagUri) -> Option<&ConverterProxy> {
        self.by_tag.get(tag).map(|&slot| self.converter_at(slot))
    }

    pub fn converter_for_type(&self, ty: &TypeRef) -> Option<&ConverterProxy> {
        self.converters().find(|c| c.handles_type(ty))
    }

    /// Converter for the runtime type of `obj`. Converters that name the
    /// type instead of referencing it directly are matched too.
    pub fn converter_for_object(&self, obj: &dyn NativeObject) -> Option<&ConverterProxy> {
        self.converters().find(|c| c.handles_object(obj))
    }

    pub fn handles_tag(&self, tag: &TagUri) -> bool {
        self.by_tag.contains_key(tag)
    }

    pub fn handles_type(&self, ty: &TypeRef) -> bool {
        self.converter_for_type(ty).is_some()
    }

    pub fn tag_definition(&self, tag: &TagUri) -> Option<&TagDefinition> {
        self.definitions
            .get(tag)
            .map(|&(e, d)| &self.extensions[e].tags()[d])
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("extensions", &self.extensions)
            .field("converters", &self.converters.len())
            .finish()
    }
}

// =============================================================================
// Context
// =============================================================================

/// Options consulted by the conversion pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    /// Do not warn about tags without a converter.
    pub suppress_unresolved_tag_warnings: bool,
}

/// Everything a conversion needs to know about the session. Handed to
/// every converter call.
#[derive(Debug, Clone)]
pub struct SerializationContext {
    registry: Arc<ExtensionRegistry>,
    options: ConvertOptions,
}

impl SerializationContext {
    pub fn new(registry: Arc<ExtensionRegistry>) -> Self {
        Self {
            registry,
            options: ConvertOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ConvertOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::{Converter, FromTree};
    use crate::extension::{Extension, PackageInfo};
    use tagtree_core::{Object, Warnings};

    #[derive(Debug, PartialEq)]
    struct Celsius(f64);

    struct TemperatureConverter {
        tag: &'static str,
    }

    impl Converter for TemperatureConverter {
        fn tags(&self) -> Vec<String> {
            vec![self.tag.to_string()]
        }

        fn types(&self) -> Vec<TypeRef> {
            vec![TypeRef::of::<Celsius>()]
        }

        fn to_tree(
            &self,
            obj: &Object,
            _tag: Option<&TagUri>,
            _ctx: &SerializationContext,
        ) -> anyhow::Result<Object> {
            let c = obj
                .downcast_ref::<Celsius>()
                .ok_or_else(|| anyhow::anyhow!("expected Celsius"))?;
            Ok(Object::Float(c.0))
        }

        fn from_tree(
            &self,
            node: Object,
            _tag: &TagUri,
            _ctx: &SerializationContext,
        ) -> anyhow::Result<FromTree> {
            let value = node
                .as_f64()
                .ok_or_else(|| anyhow::anyhow!("expected a number"))?;
            Ok(FromTree::ready(Object::native(Celsius(value))))
        }
    }

    struct TemperatureExtension {
        tag: &'static str,
    }

    impl Extension for TemperatureExtension {
        fn converters(&self) -> Vec<Arc<dyn Converter>> {
            vec![Arc::new(TemperatureConverter { tag: self.tag })]
        }

        fn tags(&self) -> Vec<crate::extension::TagDefinition> {
            vec![TagDefinition::new(TagUri::parse(self.tag).unwrap()).with_title(self.tag)]
        }
    }

    const TAG: &str = "tag:example.org:temperature-1.0.0";

    fn load(package: &str) -> Arc<ExtensionProxy> {
        let mut warnings = Warnings::new();
        Arc::new(
            ExtensionProxy::new(
                Arc::new(TemperatureExtension { tag: TAG }),
                Some(PackageInfo::new(package, "1.0.0")),
                &mut warnings,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_first_registered_wins() {
        let first = load("first");
        let second = load("second");
        let tag = TagUri::parse(TAG).unwrap();

        let registry = ExtensionRegistry::new(vec![first.clone(), second.clone()]);
        assert_eq!(
            registry.converter_for_tag(&tag).unwrap().package_name(),
            Some("first")
        );
        assert_eq!(
            registry
                .converter_for_object(&Celsius(1.0))
                .unwrap()
                .package_name(),
            Some("first")
        );

        let reversed = ExtensionRegistry::new(vec![second, first]);
        assert_eq!(
            reversed.converter_for_tag(&tag).unwrap().package_name(),
            Some("second")
        );
    }

    #[test]
    fn test_duplicate_extensions_are_indexed_once() {
        let ext = load("temperature");
        let registry = ExtensionRegistry::new(vec![ext.clone(), ext]);
        assert_eq!(registry.extensions().len(), 1);
        assert_eq!(registry.converters().count(), 1);
    }

    #[test]
    fn test_lookup_by_type_and_name() {
        let registry = ExtensionRegistry::new(vec![load("temperature")]);
        assert!(registry.handles_type(&TypeRef::of::<Celsius>()));
        assert!(registry.handles_type(&TypeRef::named(std::any::type_name::<Celsius>())));
        assert!(!registry.handles_type(&TypeRef::named("other::Kelvin")));
        assert!(registry.converter_for_object(&String::from("no")).is_none());
    }

    #[test]
    fn test_tag_definition_lookup() {
        let registry = ExtensionRegistry::new(vec![load("temperature")]);
        let tag = TagUri::parse(TAG).unwrap();
        assert!(registry.handles_tag(&tag));
        assert_eq!(registry.tag_definition(&tag).unwrap().title.as_deref(), Some(TAG));

        let unknown = TagUri::parse("tag:example.org:pressure-1.0.0").unwrap();
        assert!(!registry.handles_tag(&unknown));
        assert!(registry.tag_definition(&unknown).is_none());
    }

    #[test]
    fn test_registry_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ExtensionRegistry>();
        assert_send_sync::<ExtensionProxy>();
        assert_send_sync::<ConverterProxy>();
    }

    #[test]
    fn test_convert_options_default() {
        let options: ConvertOptions = serde_json::from_str("{}").unwrap();
        assert!(!options.suppress_unresolved_tag_warnings);
    }
}
