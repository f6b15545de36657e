//! Error types for extension loading and plugin discovery

use tagtree_core::TagError;
use thiserror::Error;

/// Result type for extension validation
pub type Result<T> = std::result::Result<T, ConfigurationError>;

/// Errors raised while validating an extension or one of its converters.
///
/// Fatal to the extension involved, never to the process: discovery turns
/// them into warnings and skips the extension.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A converter declared a tag pattern that does not parse
    #[error("Converter {converter} declares a malformed tag pattern: {source}")]
    MalformedTagPattern {
        converter: String,
        #[source]
        source: TagError,
    },

    /// A converter declared a type reference that cannot name a type
    #[error("Converter {converter} declares an invalid type '{type_name}'")]
    TypeMismatch {
        converter: String,
        type_name: String,
    },

    /// A converter resolved several tags without being able to choose one
    #[error(
        "Converter {converter} handles multiple tags for this extension ({}), but does not implement a tag selector",
        .tags.join(", ")
    )]
    AmbiguousTags {
        converter: String,
        tags: Vec<String>,
    },
}

/// Errors returned by plugin factories.
///
/// Discovery never propagates these; each one becomes a plugin-discovery
/// warning naming the entry point.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The factory could not produce its items
    #[error("{0}")]
    Failed(String),

    /// The factory depends on something that is not available
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// The factory panicked
    #[error("{0}")]
    Panicked(String),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PluginError {
    /// Create a new failure
    pub fn failed(msg: impl Into<String>) -> Self {
        PluginError::Failed(msg.into())
    }

    /// Short name of the error kind, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            PluginError::Failed(_) => "Failed",
            PluginError::MissingDependency(_) => "MissingDependency",
            PluginError::Panicked(_) => "Panicked",
            PluginError::Other(_) => "Error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_tags_message_lists_tags() {
        let err = ConfigurationError::AmbiguousTags {
            converter: "geo::PointConverter".into(),
            tags: vec!["tag:a:point-1.0.0".into(), "tag:a:point-1.1.0".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("geo::PointConverter"));
        assert!(msg.contains("tag:a:point-1.0.0, tag:a:point-1.1.0"));
    }

    #[test]
    fn test_plugin_error_kind() {
        assert_eq!(PluginError::failed("NOPE").kind(), "Failed");
        assert_eq!(PluginError::failed("NOPE").to_string(), "NOPE");
        let other: PluginError = anyhow::anyhow!("boom").into();
        assert_eq!(other.kind(), "Error");
    }
}
