//! Error types for the conversion pipeline

use thiserror::Error;

/// Result type for conversions
pub type Result<T> = std::result::Result<T, ConversionError>;

/// Errors that abort one conversion call
#[derive(Debug, Error)]
pub enum ConversionError {
    /// No converter handles the object's type
    #[error("{type_name} is not serializable by tagtree")]
    Unrepresentable { type_name: String },

    /// A converter returned something that is not a tree value
    #[error("Converter {converter} returned an invalid tree value of kind {kind}")]
    InvalidTreeValue { converter: String, kind: String },

    /// A converter failed
    #[error("Converter {converter} failed for tag {tag}: {source}")]
    Converter {
        tag: String,
        converter: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ConversionError {
    pub(crate) fn converter(
        tag: Option<&tagtree_core::TagUri>,
        converter: &str,
        source: anyhow::Error,
    ) -> Self {
        ConversionError::Converter {
            tag: tag.map_or_else(|| "(none)".to_string(), |t| t.to_string()),
            converter: converter.to_string(),
            source,
        }
    }
}
