use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Catalog source baked into fresh installs.
pub const DEFAULT_CATALOG_URL: &str = "https://songs.nongbox.dev/catalog.json";

const CATALOG_SOURCES_KEY: &str = "catalog-sources";
const MANIFEST_CORRUPTION_KEY: &str = "manifest-load-failure";
const LEGACY_MIGRATED_KEY: &str = "legacy-migrated";

/// Host-provided key/value storage for persistent settings (the game mod's
/// saved values). Strings and bools cover everything stored here.
pub trait SettingsStore: Send {
    fn get_string(&self, key: &str) -> Option<String>;
    fn set_string(&mut self, key: &str, value: &str);
    fn get_bool(&self, key: &str) -> Option<bool>;
    fn set_bool(&mut self, key: &str, value: bool);
}

/// In-memory store for tests and for hosts without settings plumbing.
#[derive(Debug, Default)]
pub struct MemorySettings {
    strings: HashMap<String, String>,
    bools: HashMap<String, bool>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get_string(&self, key: &str) -> Option<String> {
        self.strings.get(key).cloned()
    }

    fn set_string(&mut self, key: &str, value: &str) {
        self.strings.insert(key.to_string(), value.to_string());
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.bools.get(key).copied()
    }

    fn set_bool(&mut self, key: &str, value: bool) {
        self.bools.insert(key.to_string(), value);
    }
}

/// One configured catalog source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSource {
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CatalogSource {
    pub fn new(url: impl Into<String>) -> Self {
        CatalogSource {
            url: url.into(),
            enabled: true,
        }
    }
}

fn default_sources() -> Vec<CatalogSource> {
    vec![CatalogSource::new(DEFAULT_CATALOG_URL)]
}

/// Typed accessors over the raw store.
pub struct Settings {
    store: Box<dyn SettingsStore>,
}

impl Settings {
    pub fn new(store: Box<dyn SettingsStore>) -> Self {
        Settings { store }
    }

    pub fn in_memory() -> Self {
        Settings::new(Box::new(MemorySettings::new()))
    }

    /// Configured catalog sources. Unset or malformed configuration falls
    /// back to the built-in default source.
    pub fn catalog_sources(&self) -> Vec<CatalogSource> {
        let Some(raw) = self.store.get_string(CATALOG_SOURCES_KEY) else {
            return default_sources();
        };
        match serde_json::from_str(&raw) {
            Ok(sources) => sources,
            Err(e) => {
                warn!("Ignoring malformed catalog source list: {}", e);
                default_sources()
            }
        }
    }

    pub fn enabled_catalog_sources(&self) -> Vec<CatalogSource> {
        self.catalog_sources()
            .into_iter()
            .filter(|s| s.enabled)
            .collect()
    }

    pub fn set_catalog_sources(&mut self, sources: &[CatalogSource]) {
        match serde_json::to_string(sources) {
            Ok(json) => self.store.set_string(CATALOG_SOURCES_KEY, &json),
            Err(e) => warn!("Failed to serialize catalog source list: {}", e),
        }
    }

    /// Record that a manifest file failed to load and was set aside, so the
    /// UI can tell the user their data needs attention.
    pub fn note_manifest_corruption(&mut self) {
        self.store.set_bool(MANIFEST_CORRUPTION_KEY, true);
    }

    /// One-shot read of the corruption notice. Reading clears it.
    pub fn take_corruption_notice(&mut self) -> bool {
        let seen = self.store.get_bool(MANIFEST_CORRUPTION_KEY).unwrap_or(false);
        if seen {
            self.store.set_bool(MANIFEST_CORRUPTION_KEY, false);
        }
        seen
    }

    pub fn legacy_migrated(&self) -> bool {
        self.store.get_bool(LEGACY_MIGRATED_KEY).unwrap_or(false)
    }

    pub fn set_legacy_migrated(&mut self) {
        self.store.set_bool(LEGACY_MIGRATED_KEY, true);
    }
}
