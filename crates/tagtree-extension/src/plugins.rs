//! Process-wide plugin set.
//!
//! [`PluginRegistry::global`] discovers plugins from the
//! [`StaticEntryPoints`] on first use and keeps the result until
//! [`PluginRegistry::refresh`] is called. Extensions may also be added or
//! removed at runtime; runtime additions take precedence over discovered
//! extensions.

use crate::entry_points::{self, Discovered, DiscoveryOptions, EntryPointSource, StaticEntryPoints};
use crate::error::Result;
use crate::extension::{Extension, ExtensionProxy};
use crate::registry::ExtensionRegistry;
use crate::resource::{ResourceManager, ResourceMappingProxy};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tagtree_core::{Warning, Warnings};
use tracing::info;

#[derive(Default)]
struct State {
    options: DiscoveryOptions,
    discovered: Option<Discovered>,
    /// Newest first.
    added: Vec<Arc<ExtensionProxy>>,
    /// Extension URIs or package names hidden from the discovered set.
    removed: Vec<String>,
    runtime_warnings: Warnings,
}

fn identifies(ext: &ExtensionProxy, id: &str) -> bool {
    ext.extension_uri() == Some(id) || ext.package_name() == Some(id)
}

/// Lazily discovered plugins plus runtime registrations.
pub struct PluginRegistry {
    source: Arc<dyn EntryPointSource>,
    state: RwLock<State>,
}

static GLOBAL: OnceLock<PluginRegistry> = OnceLock::new();

impl PluginRegistry {
    pub fn new(source: Arc<dyn EntryPointSource>) -> Self {
        Self {
            source,
            state: RwLock::new(State::default()),
        }
    }

    /// The registry backed by [`StaticEntryPoints::global`].
    pub fn global() -> &'static PluginRegistry {
        GLOBAL.get_or_init(|| PluginRegistry::new(Arc::new(StaticEntryPoints::global())))
    }

    /// Replace the discovery options. Takes effect at the next discovery.
    pub fn configure(&self, options: DiscoveryOptions) {
        let mut state = self.write();
        state.options = options;
        state.discovered = None;
    }

    /// Run discovery again, keeping runtime additions and removals.
    pub fn refresh(&self) {
        let mut state = self.write();
        state.discovered = None;
        self.ensure_discovered(&mut state);
    }

    /// Active extensions: runtime additions, newest first, then the
    /// discovered ones.
    pub fn extensions(&self) -> Vec<Arc<ExtensionProxy>> {
        self.with_discovered(|state| {
            let discovered = state
                .discovered
                .as_ref()
                .map(|d| d.extensions.as_slice())
                .unwrap_or_default();
            state
                .added
                .iter()
                .chain(
                    discovered
                        .iter()
                        .filter(|ext| !state.removed.iter().any(|id| identifies(ext, id))),
                )
                .cloned()
                .collect()
        })
    }

    pub fn resource_mappings(&self) -> Vec<Arc<ResourceMappingProxy>> {
        self.with_discovered(|state| {
            state
                .discovered
                .as_ref()
                .map(|d| d.resource_mappings.clone())
                .unwrap_or_default()
        })
    }

    pub fn resource_manager(&self) -> ResourceManager {
        ResourceManager::new(self.resource_mappings())
    }

    /// Register an extension without package information.
    pub fn add_extension(&self, extension: Arc<dyn Extension>) -> Result<Arc<ExtensionProxy>> {
        let silenced: Vec<_> = self.read().options.silenced_warnings.iter().copied().collect();
        let mut warnings = Warnings::silencing(silenced);
        let proxy = Arc::new(ExtensionProxy::new(extension, None, &mut warnings)?);
        let mut state = self.write();
        info!(
            extension = %proxy.class_name(),
            uri = proxy.extension_uri().unwrap_or("(none)"),
            "Registered runtime extension"
        );
        state.runtime_warnings.absorb(warnings);
        state.added.insert(0, proxy.clone());
        Ok(proxy)
    }

    /// Remove every extension whose URI or package name is `id`.
    pub fn remove_extension(&self, id: &str) {
        let mut state = self.write();
        state.added.retain(|ext| !identifies(ext, id));
        if !state.removed.iter().any(|r| r == id) {
            state.removed.push(id.to_string());
        }
        info!(id, "Removed extension");
    }

    /// Drop runtime additions and removals.
    pub fn reset_extensions(&self) {
        let mut state = self.write();
        state.added.clear();
        state.removed.clear();
        state.runtime_warnings = Warnings::new();
    }

    /// Registry over the active extensions, for one session.
    pub fn registry(&self) -> Arc<ExtensionRegistry> {
        Arc::new(ExtensionRegistry::new(self.extensions()))
    }

    /// Warnings of the last discovery pass followed by those raised by
    /// runtime registrations.
    pub fn last_warnings(&self) -> Vec<Warning> {
        let state = self.read();
        state
            .discovered
            .iter()
            .flat_map(|d| d.warnings.iter())
            .chain(state.runtime_warnings.iter())
            .cloned()
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_discovered(&self, state: &mut State) {
        if state.discovered.is_none() {
            state.discovered = Some(entry_points::discover(self.source.as_ref(), &state.options));
        }
    }

    /// Run `f` under a shared lock once discovery has happened.
    fn with_discovered<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        {
            let state = self.read();
            if state.discovered.is_some() {
                return f(&state);
            }
        }
        let mut state = self.write();
        self.ensure_discovered(&mut state);
        f(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry_points::{EntryPoint, EntryPointGroup, PluginItem};
    use crate::error::PluginError;
    use crate::extension::PackageInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct UriExtension(&'static str);

    impl Extension for UriExtension {
        fn extension_uri(&self) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    fn registry(calls: Arc<AtomicUsize>) -> PluginRegistry {
        let source = vec![
            EntryPoint::new("core", EntryPointGroup::Extensions, move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec![PluginItem::extension(UriExtension("uri:core"))])
            })
            .with_package(PackageInfo::new("core-pkg", "1.0.0")),
            EntryPoint::new("broken", EntryPointGroup::Extensions, || {
                Err(PluginError::MissingDependency("libfoo".into()))
            })
            .with_package(PackageInfo::new("broken-pkg", "0.1.0")),
        ];
        PluginRegistry::new(Arc::new(source))
    }

    fn uris(extensions: &[Arc<ExtensionProxy>]) -> Vec<String> {
        extensions
            .iter()
            .filter_map(|e| e.extension_uri().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_discovery_is_lazy_and_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let plugins = registry(calls.clone());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        plugins.extensions();
        plugins.extensions();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        plugins.refresh();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(plugins.last_warnings().len(), 1);
    }

    #[test]
    fn test_runtime_extensions_come_first() {
        let plugins = registry(Arc::new(AtomicUsize::new(0)));
        plugins.add_extension(Arc::new(UriExtension("uri:a"))).unwrap();
        plugins.add_extension(Arc::new(UriExtension("uri:b"))).unwrap();

        assert_eq!(uris(&plugins.extensions()), vec!["uri:b", "uri:a", "uri:core"]);
        assert!(plugins.extensions()[0].package_name().is_none());
    }

    #[test]
    fn test_remove_and_reset() {
        let plugins = registry(Arc::new(AtomicUsize::new(0)));
        plugins.add_extension(Arc::new(UriExtension("uri:a"))).unwrap();

        plugins.remove_extension("core-pkg");
        assert_eq!(uris(&plugins.extensions()), vec!["uri:a"]);
        plugins.remove_extension("uri:a");
        assert!(plugins.extensions().is_empty());

        plugins.reset_extensions();
        assert_eq!(uris(&plugins.extensions()), vec!["uri:core"]);
    }

    #[test]
    fn test_disabled_packages_via_configure() {
        let plugins = registry(Arc::new(AtomicUsize::new(0)));
        plugins.configure(DiscoveryOptions {
            disabled_packages: ["broken-pkg".to_string()].into_iter().collect(),
            ..Default::default()
        });
        assert_eq!(plugins.extensions().len(), 1);
        assert!(plugins.last_warnings().is_empty());
    }

    #[test]
    fn test_registry_snapshot() {
        let plugins = registry(Arc::new(AtomicUsize::new(0)));
        let registry = plugins.registry();
        assert_eq!(registry.extensions().len(), 1);
    }

    #[test]
    fn test_reads_share_the_lock_after_discovery() {
        let plugins = registry(Arc::new(AtomicUsize::new(0)));
        plugins.extensions();

        let guard = plugins.state.read().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                let counts = (plugins.extensions().len(), plugins.resource_mappings().len());
                tx.send(counts).unwrap();
            });
            let received = rx.recv_timeout(std::time::Duration::from_secs(5));
            drop(guard);
            assert_eq!(received, Ok((1, 0)));
        });
    }
}
