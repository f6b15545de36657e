//! Non-fatal diagnostics.
//!
//! Conditions that degrade a result without failing it (an unknown tag in
//! the input, a plugin that does not load, a deprecated converter setup)
//! are recorded as categorized [`Warning`]s. Callers can silence whole
//! categories. Every recorded warning is also emitted as a `tracing` event.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

/// Category of a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningCategory {
    /// A tag in the input has no registered converter.
    UnresolvedTag,
    /// A plugin factory failed, or returned a non-conforming item.
    PluginDiscovery,
    /// A converter relies on behavior that will become an error.
    Deprecation,
}

impl fmt::Display for WarningCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningCategory::UnresolvedTag => write!(f, "unresolved-tag"),
            WarningCategory::PluginDiscovery => write!(f, "plugin-discovery"),
            WarningCategory::Deprecation => write!(f, "deprecation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub category: WarningCategory,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Collector for warnings raised during one operation.
#[derive(Debug, Clone, Default)]
pub struct Warnings {
    records: Vec<Warning>,
    silenced: HashSet<WarningCategory>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collector that drops the given categories.
    pub fn silencing(categories: impl IntoIterator<Item = WarningCategory>) -> Self {
        Self {
            records: Vec::new(),
            silenced: categories.into_iter().collect(),
        }
    }

    pub fn silence(&mut self, category: WarningCategory) {
        self.silenced.insert(category);
    }

    pub fn is_silenced(&self, category: WarningCategory) -> bool {
        self.silenced.contains(&category)
    }

    /// Record a warning unless its category is silenced.
    pub fn warn(&mut self, category: WarningCategory, message: impl Into<String>) {
        let message = message.into();
        if self.is_silenced(category) {
            debug!(%category, "silenced warning: {message}");
            return;
        }
        warn!(%category, "{message}");
        self.records.push(Warning { category, message });
    }

    /// Move the warnings of `other` into this collector, applying this
    /// collector's filter.
    pub fn absorb(&mut self, other: Warnings) {
        for w in other.records {
            if !self.is_silenced(w.category) {
                self.records.push(w);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.records.iter()
    }

    /// Warnings of one category, in emission order.
    pub fn of(&self, category: WarningCategory) -> impl Iterator<Item = &Warning> {
        self.records.iter().filter(move |w| w.category == category)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_vec(self) -> Vec<Warning> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order() {
        let mut warnings = Warnings::new();
        warnings.warn(WarningCategory::UnresolvedTag, "first");
        warnings.warn(WarningCategory::Deprecation, "second");

        let messages: Vec<_> = warnings.iter().map(|w| w.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
        assert_eq!(warnings.of(WarningCategory::Deprecation).count(), 1);
    }

    #[test]
    fn test_silenced_category_is_dropped() {
        let mut warnings = Warnings::silencing([WarningCategory::UnresolvedTag]);
        warnings.warn(WarningCategory::UnresolvedTag, "ignored");
        warnings.warn(WarningCategory::PluginDiscovery, "kept");
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings.iter().next().unwrap().category,
            WarningCategory::PluginDiscovery
        );
    }

    #[test]
    fn test_absorb_applies_filter() {
        let mut source = Warnings::new();
        source.warn(WarningCategory::Deprecation, "old converter");
        source.warn(WarningCategory::PluginDiscovery, "broken plugin");

        let mut target = Warnings::silencing([WarningCategory::Deprecation]);
        target.absorb(source);
        assert_eq!(target.len(), 1);
        assert_eq!(target.iter().next().unwrap().message, "broken plugin");
    }

    #[test]
    fn test_category_serde_names() {
        let json = serde_json::to_string(&WarningCategory::UnresolvedTag).unwrap();
        assert_eq!(json, "\"unresolved-tag\"");
        let parsed: WarningCategory = serde_json::from_str("\"plugin-discovery\"").unwrap();
        assert_eq!(parsed, WarningCategory::PluginDiscovery);
    }
}
