//! Static Wikidata property catalog.
//!
//! Relations are only offered to the model when their property id appears in
//! this catalog; the label shown to the model comes from here as well.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read property catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("property catalog is not a JSON list of {{id, label}}: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct PropertyEntry {
    id: String,
    label: String,
}

/// Property id (`P19`) to English label.
#[derive(Debug, Clone, Default)]
pub struct PropertyCatalog {
    labels: HashMap<String, String>,
}

impl PropertyCatalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::from_json(&text)?;
        tracing::info!(path = %path.display(), properties = catalog.len(), "loaded property catalog");
        Ok(catalog)
    }

    /// Extra fields on each entry are ignored.
    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        let entries: Vec<PropertyEntry> = serde_json::from_str(text)?;
        Ok(entries.into_iter().map(|e| (e.id, e.label)).collect())
    }

    pub fn label(&self, id: &str) -> Option<&str> {
        self.labels.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PropertyCatalog {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            labels: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
