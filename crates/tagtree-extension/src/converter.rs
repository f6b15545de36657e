//! Converters and the validating converter proxy.
//!
//! A [`Converter`] maps instances of some native types to tagged tree
//! values and back. Converters are registered through an
//! [`Extension`](crate::extension::Extension); each one is wrapped in a
//! [`ConverterProxy`] when its extension loads, which resolves the
//! converter's tag patterns against the extension's tag definitions and
//! rejects converters that cannot work, so that errors surface at load
//! time instead of in the middle of a conversion.

use crate::error::{ConfigurationError, Result};
use crate::extension::{ExtensionInfo, TagDefinition};
use crate::registry::SerializationContext;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tagtree_core::{NativeObject, Object, TagPattern, TagUri, TypeRef, WarningCategory, Warnings};
use tracing::debug;

// =============================================================================
// Contract
// =============================================================================

/// Bidirectional conversion between native types and tagged tree values.
///
/// Implementations are stateless and shared between threads. `tags` and
/// `types` must not change over the lifetime of the instance.
pub trait Converter: Send + Sync {
    /// Tag patterns this converter handles. See [`TagPattern`] for the
    /// wildcard syntax.
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Native types this converter handles.
    fn types(&self) -> Vec<TypeRef> {
        Vec::new()
    }

    /// Convert a native object to a raw tree value: a map, a list or a
    /// primitive. Children may be returned unconverted; the pipeline
    /// converts them.
    ///
    /// `tag` is the tag selected for the output, or `None` when the
    /// selector declined to pick one. In that case the returned value is
    /// converted again as if it had been found in place of `obj`.
    fn to_tree(
        &self,
        obj: &Object,
        tag: Option<&TagUri>,
        ctx: &SerializationContext,
    ) -> anyhow::Result<Object>;

    /// Convert a raw tree value, whose children have already been
    /// converted, to a native object.
    fn from_tree(
        &self,
        node: Object,
        tag: &TagUri,
        ctx: &SerializationContext,
    ) -> anyhow::Result<FromTree>;

    /// Optional tag-selection capability.
    fn tag_selector(&self) -> Option<&dyn TagSelector> {
        None
    }

    /// Fully-qualified name of the implementing type.
    fn class_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Chooses the output tag of an object among the tags its converter
/// resolved.
pub trait TagSelector: Send + Sync {
    /// Return `None` to let [`Converter::to_tree`] produce an untagged
    /// value that the pipeline converts again.
    fn select_tag(
        &self,
        obj: &Object,
        tags: &[TagUri],
        ctx: &SerializationContext,
    ) -> Option<TagUri>;
}

// =============================================================================
// Two-phase results
// =============================================================================

/// Result of [`Converter::from_tree`].
pub enum FromTree {
    /// The object is complete.
    Ready(Object),
    /// The object is returned as a placeholder and completed once the
    /// whole tree has been converted.
    Deferred(Deferred),
}

impl FromTree {
    pub fn ready(obj: impl Into<Object>) -> Self {
        FromTree::Ready(obj.into())
    }
}

impl fmt::Debug for FromTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FromTree::Ready(obj) => f.debug_tuple("Ready").field(obj).finish(),
            FromTree::Deferred(d) => f.debug_tuple("Deferred").field(d).finish(),
        }
    }
}

/// Lifecycle of a [`Deferred`] conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    PlaceholderEmitted,
    Finished,
}

type Completion = Box<dyn FnOnce() -> anyhow::Result<()>>;

/// A conversion that yields its object before the object is complete.
///
/// The placeholder is what other nodes see when they refer back to the
/// node being converted; it must be the final object (typically a native
/// instance with interior mutability), only its content is filled in
/// later. The completion runs after every node of the tree has been
/// converted and every back-reference has been patched, so it can read
/// the finished children it captured.
pub struct Deferred {
    placeholder: Object,
    completion: Option<Completion>,
    phase: Phase,
}

impl Deferred {
    pub fn new(
        placeholder: Object,
        completion: impl FnOnce() -> anyhow::Result<()> + 'static,
    ) -> Self {
        Self {
            placeholder,
            completion: Some(Box::new(completion)),
            phase: Phase::NotStarted,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Hand out the placeholder and move to [`Phase::PlaceholderEmitted`].
    pub fn emit_placeholder(&mut self) -> Object {
        if self.phase == Phase::NotStarted {
            self.phase = Phase::PlaceholderEmitted;
        }
        self.placeholder.clone()
    }

    /// Run the completion and move to [`Phase::Finished`].
    pub fn finish(&mut self) -> anyhow::Result<()> {
        match self.phase {
            Phase::NotStarted => {
                anyhow::bail!("deferred conversion finished before its placeholder was emitted")
            }
            Phase::Finished => anyhow::bail!("deferred conversion finished twice"),
            Phase::PlaceholderEmitted => {}
        }
        self.phase = Phase::Finished;
        match self.completion.take() {
            Some(complete) => complete(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("placeholder", &self.placeholder.kind())
            .field("phase", &self.phase)
            .finish()
    }
}

// =============================================================================
// Proxy
// =============================================================================

/// Validated wrapper around a [`Converter`] registered by an extension.
#[derive(Clone)]
pub struct ConverterProxy {
    delegate: Arc<dyn Converter>,
    extension: Arc<ExtensionInfo>,
    tags: Vec<TagUri>,
    types: Vec<TypeRef>,
}

impl ConverterProxy {
    /// Resolve and validate `delegate` against the tag definitions of its
    /// extension.
    pub fn new(
        delegate: Arc<dyn Converter>,
        extension: Arc<ExtensionInfo>,
        definitions: &[TagDefinition],
        warnings: &mut Warnings,
    ) -> Result<Self> {
        let converter = delegate.class_name().to_string();

        let patterns = delegate
            .tags()
            .iter()
            .map(|p| TagPattern::parse(p))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|source| ConfigurationError::MalformedTagPattern {
                converter: converter.clone(),
                source,
            })?;
        let types = delegate.types();

        if patterns.is_empty() && types.is_empty() {
            debug!(converter = %converter, "Converter declares neither tags nor types");
        }

        if let Some(bad) = types.iter().find(|t| !t.is_well_formed()) {
            return Err(ConfigurationError::TypeMismatch {
                converter,
                type_name: bad.name().to_string(),
            });
        }

        let tags: Vec<TagUri> = definitions
            .iter()
            .map(|d| &d.tag_uri)
            .filter(|uri| patterns.iter().any(|p| p.matches(uri)))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if tags.len() > 1 && delegate.tag_selector().is_none() {
            if !extension.legacy() {
                return Err(ConfigurationError::AmbiguousTags {
                    converter,
                    tags: tags.iter().map(|t| t.to_string()).collect(),
                });
            }
            warnings.warn(
                WarningCategory::Deprecation,
                format!(
                    "Converter {converter} handles multiple tags for this extension, but does not \
                     implement a tag selector. Using '{}' for every object. This will be an error \
                     in a future version",
                    tags[0]
                ),
            );
        }

        debug!(
            converter = %converter,
            tags = tags.len(),
            types = types.len(),
            "Resolved converter"
        );

        Ok(Self {
            delegate,
            extension,
            tags,
            types,
        })
    }

    /// Concrete tags handled, sorted.
    pub fn tags(&self) -> &[TagUri] {
        &self.tags
    }

    pub fn types(&self) -> &[TypeRef] {
        &self.types
    }

    /// True when one of the declared types is `ty`, directly or by name.
    pub fn handles_type(&self, ty: &TypeRef) -> bool {
        self.types
            .iter()
            .any(|t| t == ty || t.name() == ty.name())
    }

    /// True when `obj` is an instance of one of the declared types.
    pub fn handles_object(&self, obj: &dyn NativeObject) -> bool {
        self.types.iter().any(|t| t.matches(obj))
    }

    /// Tag to write `obj` with. Delegates to the converter's selector when
    /// it has one, otherwise returns the first resolved tag.
    pub fn select_tag(&self, obj: &Object, ctx: &SerializationContext) -> Option<TagUri> {
        match self.delegate.tag_selector() {
            Some(selector) => selector.select_tag(obj, &self.tags, ctx),
            None => self.tags.first().cloned(),
        }
    }

    pub fn to_tree(
        &self,
        obj: &Object,
        tag: Option<&TagUri>,
        ctx: &SerializationContext,
    ) -> anyhow::Result<Object> {
        self.delegate.to_tree(obj, tag, ctx)
    }

    pub fn from_tree(
        &self,
        node: Object,
        tag: &TagUri,
        ctx: &SerializationContext,
    ) -> anyhow::Result<FromTree> {
        self.delegate.from_tree(node, tag, ctx)
    }

    pub fn delegate(&self) -> &Arc<dyn Converter> {
        &self.delegate
    }

    /// Identity of the extension that registered this converter.
    pub fn extension(&self) -> &Arc<ExtensionInfo> {
        &self.extension
    }

    pub fn package_name(&self) -> Option<&str> {
        self.extension.package_name()
    }

    pub fn package_version(&self) -> Option<&str> {
        self.extension.package_version()
    }

    pub fn class_name(&self) -> &'static str {
        self.delegate.class_name()
    }

    fn identity(&self) -> (usize, usize) {
        (
            Arc::as_ptr(&self.delegate) as *const () as usize,
            Arc::as_ptr(&self.extension) as usize,
        )
    }
}

impl PartialEq for ConverterProxy {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for ConverterProxy {}

impl Hash for ConverterProxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Debug for ConverterProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<ConverterProxy class: {} package: {}>",
            self.class_name(),
            self.extension.package_description()
        )
    }
}
