//! Option and message catalogs with locale-scoped caches.

mod fallback;
pub mod messages;
pub mod options;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use fallback::{bundled_options, default_message};
pub use messages::{MessageCatalogResolver, MessageSource};
pub use options::{OptionCatalogClient, OptionItem, OptionSet, OptionSource, OptionsView};

/// Lower-cased language tag, passed explicitly to every catalog call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locale(String);

impl Locale {
    pub fn new(tag: &str) -> Self {
        let normalized = tag.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            Self("en".to_string())
        } else {
            Self(normalized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::new("en")
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    #[error("no catalog entry for {context}/{field} ({locale})")]
    NotFound {
        context: String,
        field: String,
        locale: Locale,
    },
    #[error("catalog payload could not be decoded: {0}")]
    Decode(String),
}
