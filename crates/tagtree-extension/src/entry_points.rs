//! Plugin discovery.
//!
//! Plugins publish factories, called entry points, under one of two
//! groups. Discovery calls every factory of a group and keeps whatever
//! loads: a factory that fails or panics, and any item that does not fit
//! its group, is reported as a [`WarningCategory::PluginDiscovery`] warning
//! and skipped. Discovery itself never fails.

use crate::error::PluginError;
use crate::extension::{Extension, ExtensionProxy, PackageInfo};
use crate::resource::{ResourceMapping, ResourceMappingProxy};
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tagtree_core::{WarningCategory, Warnings};
use tracing::{debug, info};

/// Entry point group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPointGroup {
    Extensions,
    ResourceMappings,
}

impl EntryPointGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryPointGroup::Extensions => "tagtree.extensions",
            EntryPointGroup::ResourceMappings => "tagtree.resource_mappings",
        }
    }
}

impl fmt::Display for EntryPointGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something a plugin factory produces.
#[derive(Clone)]
pub enum PluginItem {
    Extension(Arc<dyn Extension>),
    ResourceMapping(Arc<dyn ResourceMapping>),
}

impl PluginItem {
    pub fn extension(ext: impl Extension + 'static) -> Self {
        PluginItem::Extension(Arc::new(ext))
    }

    pub fn resource_mapping(mapping: impl ResourceMapping + 'static) -> Self {
        PluginItem::ResourceMapping(Arc::new(mapping))
    }

    fn describe(&self) -> String {
        match self {
            PluginItem::Extension(e) => format!("extension {}", e.class_name()),
            PluginItem::ResourceMapping(m) => format!("resource mapping {}", m.class_name()),
        }
    }
}

type Factory = Arc<dyn Fn() -> Result<Vec<PluginItem>, PluginError> + Send + Sync>;

/// A named plugin factory.
#[derive(Clone)]
pub struct EntryPoint {
    pub name: String,
    pub group: EntryPointGroup,
    pub package: Option<PackageInfo>,
    factory: Factory,
}

impl EntryPoint {
    pub fn new(
        name: impl Into<String>,
        group: EntryPointGroup,
        factory: impl Fn() -> Result<Vec<PluginItem>, PluginError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            group,
            package: None,
            factory: Arc::new(factory),
        }
    }

    pub fn with_package(mut self, package: PackageInfo) -> Self {
        self.package = Some(package);
        self
    }

    /// Call the factory. Panics are caught and returned as
    /// [`PluginError::Panicked`].
    pub fn load(&self) -> Result<Vec<PluginItem>, PluginError> {
        guarded(|| (self.factory)())?
    }

    fn describe(&self) -> String {
        match &self.package {
            Some(package) => format!("{} plugin {}", package.name, self.name),
            None => format!("plugin {}", self.name),
        }
    }
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoint")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("package", &self.package)
            .finish_non_exhaustive()
    }
}

/// Run plugin code, turning a panic into [`PluginError::Panicked`].
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, PluginError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| PluginError::Panicked(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// =============================================================================
// Sources
// =============================================================================

/// Where entry points come from.
pub trait EntryPointSource: Send + Sync {
    /// Entry points of `group`, in load order.
    fn entry_points(&self, group: EntryPointGroup) -> Vec<EntryPoint>;
}

impl<T: EntryPointSource + ?Sized> EntryPointSource for &T {
    fn entry_points(&self, group: EntryPointGroup) -> Vec<EntryPoint> {
        (**self).entry_points(group)
    }
}

impl EntryPointSource for Vec<EntryPoint> {
    fn entry_points(&self, group: EntryPointGroup) -> Vec<EntryPoint> {
        self.iter().filter(|ep| ep.group == group).cloned().collect()
    }
}

/// Process-wide collection of entry points. Plugin crates register their
/// factories here when the host starts.
#[derive(Default)]
pub struct StaticEntryPoints {
    entries: RwLock<Vec<EntryPoint>>,
}

static STATIC_ENTRY_POINTS: OnceLock<StaticEntryPoints> = OnceLock::new();

impl StaticEntryPoints {
    pub fn global() -> &'static StaticEntryPoints {
        STATIC_ENTRY_POINTS.get_or_init(StaticEntryPoints::default)
    }

    pub fn register(&self, entry_point: EntryPoint) {
        debug!(
            name = %entry_point.name,
            group = %entry_point.group,
            "Registering entry point"
        );
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry_point);
    }

    /// Remove every entry point registered under `name`.
    pub fn unregister(&self, name: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|ep| ep.name != name);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EntryPointSource for StaticEntryPoints {
    fn entry_points(&self, group: EntryPointGroup) -> Vec<EntryPoint> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entry_points(group)
    }
}

// =============================================================================
// Discovery
// =============================================================================

/// Filters applied while discovering plugins.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    /// Packages whose entry points are not loaded.
    pub disabled_packages: HashSet<String>,
    /// Warning categories dropped from the result.
    pub silenced_warnings: HashSet<WarningCategory>,
}

impl DiscoveryOptions {
    fn is_disabled(&self, entry_point: &EntryPoint) -> bool {
        entry_point
            .package
            .as_ref()
            .is_some_and(|p| self.disabled_packages.contains(&p.name))
    }
}

/// Outcome of a discovery pass.
#[derive(Debug, Default)]
pub struct Discovered {
    pub extensions: Vec<Arc<ExtensionProxy>>,
    pub resource_mappings: Vec<Arc<ResourceMappingProxy>>,
    pub warnings: Warnings,
}

/// Discover extensions and resource mappings from `source`.
pub fn discover(source: &dyn EntryPointSource, options: &DiscoveryOptions) -> Discovered {
    let mut warnings = Warnings::silencing(options.silenced_warnings.iter().copied());
    let extensions = discover_extensions(source, options, &mut warnings);
    let resource_mappings = discover_resource_mappings(source, options, &mut warnings);
    info!(
        extensions = extensions.len(),
        resource_mappings = resource_mappings.len(),
        warnings = warnings.len(),
        "Plugin discovery finished"
    );
    Discovered {
        extensions,
        resource_mappings,
        warnings,
    }
}

pub fn discover_extensions(
    source: &dyn EntryPointSource,
    options: &DiscoveryOptions,
    warnings: &mut Warnings,
) -> Vec<Arc<ExtensionProxy>> {
    let mut loaded = Vec::new();
    for (entry_point, item) in load_group(source, EntryPointGroup::Extensions, options, warnings) {
        let ext = match item {
            PluginItem::Extension(ext) => ext,
            other => {
                not_conforming(
                    &entry_point,
                    &other,
                    "Extension items must implement Extension",
                    warnings,
                );
                continue;
            }
        };
        // Validation calls into the extension and its converters.
        let mut item_warnings = Warnings::silencing(options.silenced_warnings.iter().copied());
        let package = entry_point.package.clone();
        match guarded(|| ExtensionProxy::new(ext, package, &mut item_warnings)) {
            Ok(Ok(proxy)) => {
                warnings.absorb(item_warnings);
                loaded.push(Arc::new(proxy));
            }
            Ok(Err(err)) => {
                warnings.absorb(item_warnings);
                warnings.warn(
                    WarningCategory::PluginDiscovery,
                    format!(
                        "{} failed to load extension: ConfigurationError: {err}",
                        entry_point.describe()
                    ),
                );
            }
            Err(err) => {
                warnings.warn(
                    WarningCategory::PluginDiscovery,
                    format!(
                        "{} failed to load extension: {}: {err}",
                        entry_point.describe(),
                        err.kind()
                    ),
                );
            }
        }
    }
    loaded
}

pub fn discover_resource_mappings(
    source: &dyn EntryPointSource,
    options: &DiscoveryOptions,
    warnings: &mut Warnings,
) -> Vec<Arc<ResourceMappingProxy>> {
    let mut loaded = Vec::new();
    for (entry_point, item) in
        load_group(source, EntryPointGroup::ResourceMappings, options, warnings)
    {
        let mapping = match item {
            PluginItem::ResourceMapping(mapping) => mapping,
            other => {
                not_conforming(
                    &entry_point,
                    &other,
                    "Resource mapping items must implement ResourceMapping",
                    warnings,
                );
                continue;
            }
        };
        loaded.push(Arc::new(ResourceMappingProxy::new(
            mapping,
            entry_point.package.clone(),
        )));
    }
    loaded
}

/// Call every factory of `group`, flattening their items in order.
fn load_group(
    source: &dyn EntryPointSource,
    group: EntryPointGroup,
    options: &DiscoveryOptions,
    warnings: &mut Warnings,
) -> Vec<(EntryPoint, PluginItem)> {
    let mut items = Vec::new();
    for entry_point in source.entry_points(group) {
        if options.is_disabled(&entry_point) {
            debug!(name = %entry_point.name, %group, "Skipping entry point of disabled package");
            continue;
        }
        match entry_point.load() {
            Ok(loaded) => {
                debug!(
                    name = %entry_point.name,
                    %group,
                    items = loaded.len(),
                    "Loaded entry point"
                );
                items.extend(loaded.into_iter().map(|item| (entry_point.clone(), item)));
            }
            Err(err) => {
                warnings.warn(
                    WarningCategory::PluginDiscovery,
                    format!(
                        "{} failed to load ({group}): {}: {err}",
                        entry_point.describe(),
                        err.kind()
                    ),
                );
            }
        }
    }
    items
}

fn not_conforming(
    entry_point: &EntryPoint,
    item: &PluginItem,
    violation: &str,
    warnings: &mut Warnings,
) {
    let item = guarded(|| item.describe()).unwrap_or_else(|_| "unnamed item".to_string());
    warnings.warn(
        WarningCategory::PluginDiscovery,
        format!(
            "{} returned a non-conforming item ({item}): TypeError: {violation}",
            entry_point.describe(),
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::{Converter, FromTree};
    use crate::registry::SerializationContext;
    use indexmap::IndexMap;
    use tagtree_core::{Object, TagUri};

    struct NamedExtension(&'static str);

    impl Extension for NamedExtension {
        fn extension_uri(&self) -> Option<String> {
            Some(format!("asdf://example.com/extensions/{}-1.0.0", self.0))
        }
    }

    struct BadPatternConverter;

    impl Converter for BadPatternConverter {
        fn tags(&self) -> Vec<String> {
            vec!["point-*".to_string()]
        }

        fn to_tree(
            &self,
            obj: &Object,
            _tag: Option<&TagUri>,
            _ctx: &SerializationContext,
        ) -> anyhow::Result<Object> {
            Ok(obj.clone())
        }

        fn from_tree(
            &self,
            node: Object,
            _tag: &TagUri,
            _ctx: &SerializationContext,
        ) -> anyhow::Result<FromTree> {
            Ok(FromTree::Ready(node))
        }
    }

    struct BrokenExtension;

    impl Extension for BrokenExtension {
        fn converters(&self) -> Vec<Arc<dyn Converter>> {
            vec![Arc::new(BadPatternConverter)]
        }
    }

    struct ExplodingExtension;

    impl Extension for ExplodingExtension {
        fn converters(&self) -> Vec<Arc<dyn Converter>> {
            panic!("converters() exploded")
        }
    }

    fn mapping(uri: &str, content: &str) -> PluginItem {
        let mut map = IndexMap::new();
        map.insert(uri.to_string(), content.as_bytes().to_vec());
        PluginItem::resource_mapping(map)
    }

    fn package() -> PackageInfo {
        PackageInfo::new("tagtree-test", "0.1.0")
    }

    fn uris(extensions: &[Arc<ExtensionProxy>]) -> Vec<&str> {
        extensions.iter().filter_map(|e| e.extension_uri()).collect()
    }

    #[test]
    fn test_failing_factory_is_isolated() {
        let source = vec![
            EntryPoint::new("one", EntryPointGroup::Extensions, || {
                Ok(vec![PluginItem::extension(NamedExtension("one"))])
            })
            .with_package(package()),
            EntryPoint::new("two", EntryPointGroup::Extensions, || {
                Err(PluginError::failed("NOPE"))
            })
            .with_package(package()),
            EntryPoint::new("three", EntryPointGroup::Extensions, || {
                Ok(vec![PluginItem::extension(NamedExtension("three"))])
            })
            .with_package(package()),
        ];

        let discovered = discover(&source, &DiscoveryOptions::default());
        assert_eq!(
            uris(&discovered.extensions),
            vec![
                "asdf://example.com/extensions/one-1.0.0",
                "asdf://example.com/extensions/three-1.0.0"
            ]
        );
        assert_eq!(discovered.warnings.len(), 1);
        let message = &discovered.warnings.iter().next().unwrap().message;
        assert!(message.contains("plugin two"));
        assert!(message.contains("Failed: NOPE"));
    }

    #[test]
    fn test_panicking_factory_is_isolated() {
        let source = vec![
            EntryPoint::new("panics", EntryPointGroup::Extensions, || panic!("exploded")),
            EntryPoint::new("fine", EntryPointGroup::Extensions, || {
                Ok(vec![PluginItem::extension(NamedExtension("fine"))])
            }),
        ];

        let discovered = discover(&source, &DiscoveryOptions::default());
        assert_eq!(discovered.extensions.len(), 1);
        let message = &discovered.warnings.iter().next().unwrap().message;
        assert!(message.contains("Panicked"));
        assert!(message.contains("exploded"));
    }

    #[test]
    fn test_non_conforming_items_are_skipped_in_order() {
        let source = vec![
            EntryPoint::new("schemas", EntryPointGroup::ResourceMappings, || {
                Ok(vec![
                    mapping("http://somewhere.org/schemas/baz-1.0.0", "baz"),
                    PluginItem::extension(NamedExtension("misplaced")),
                    mapping("http://somewhere.org/schemas/foz-1.0.0", "foz"),
                ])
            })
            .with_package(package()),
        ];

        let discovered = discover(&source, &DiscoveryOptions::default());
        let mappings = &discovered.resource_mappings;
        assert_eq!(mappings.len(), 2);
        assert!(mappings[0].contains("http://somewhere.org/schemas/baz-1.0.0"));
        assert!(mappings[1].contains("http://somewhere.org/schemas/foz-1.0.0"));
        assert_eq!(mappings[0].package_name(), Some("tagtree-test"));
        assert_eq!(discovered.warnings.len(), 1);
        assert!(
            discovered.warnings.iter().next().unwrap().message.contains(
                "TypeError: Resource mapping items must implement ResourceMapping"
            )
        );
    }

    #[test]
    fn test_invalid_extension_is_skipped() {
        let source = vec![EntryPoint::new("exts", EntryPointGroup::Extensions, || {
            Ok(vec![
                PluginItem::extension(NamedExtension("a")),
                PluginItem::extension(BrokenExtension),
                PluginItem::extension(NamedExtension("b")),
            ])
        })];

        let discovered = discover(&source, &DiscoveryOptions::default());
        assert_eq!(
            uris(&discovered.extensions),
            vec![
                "asdf://example.com/extensions/a-1.0.0",
                "asdf://example.com/extensions/b-1.0.0"
            ]
        );
        assert_eq!(discovered.warnings.of(WarningCategory::PluginDiscovery).count(), 1);
    }

    #[test]
    fn test_panicking_extension_is_isolated() {
        let source = vec![
            EntryPoint::new("one", EntryPointGroup::Extensions, || {
                Ok(vec![PluginItem::extension(NamedExtension("one"))])
            })
            .with_package(package()),
            EntryPoint::new("two", EntryPointGroup::Extensions, || {
                Ok(vec![PluginItem::extension(ExplodingExtension)])
            })
            .with_package(package()),
            EntryPoint::new("three", EntryPointGroup::Extensions, || {
                Ok(vec![PluginItem::extension(NamedExtension("three"))])
            })
            .with_package(package()),
        ];

        let discovered = discover(&source, &DiscoveryOptions::default());
        assert_eq!(
            uris(&discovered.extensions),
            vec![
                "asdf://example.com/extensions/one-1.0.0",
                "asdf://example.com/extensions/three-1.0.0"
            ]
        );
        assert_eq!(discovered.warnings.len(), 1);
        let message = &discovered.warnings.iter().next().unwrap().message;
        assert!(message.contains("plugin two"));
        assert!(message.contains("Panicked: converters() exploded"));
    }

    #[test]
    fn test_disabled_package_is_not_loaded() {
        let source = vec![
            EntryPoint::new("off", EntryPointGroup::Extensions, || {
                panic!("disabled packages must not be called")
            })
            .with_package(PackageInfo::new("disabled", "1.0.0")),
        ];
        let options = DiscoveryOptions {
            disabled_packages: ["disabled".to_string()].into_iter().collect(),
            ..Default::default()
        };

        let discovered = discover(&source, &options);
        assert!(discovered.extensions.is_empty());
        assert!(discovered.warnings.is_empty());
    }

    #[test]
    fn test_static_entry_points_filter_by_group() {
        let source = StaticEntryPoints::default();
        source.register(EntryPoint::new("e", EntryPointGroup::Extensions, || Ok(vec![])));
        source.register(EntryPoint::new("r", EntryPointGroup::ResourceMappings, || Ok(vec![])));
        assert_eq!(source.len(), 2);
        assert_eq!(source.entry_points(EntryPointGroup::Extensions).len(), 1);

        source.unregister("e");
        assert!(source.entry_points(EntryPointGroup::Extensions).is_empty());
    }
}
