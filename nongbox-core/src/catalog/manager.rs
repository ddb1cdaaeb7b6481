use crate::asset_id::AssetId;
use crate::catalog::{Catalog, CatalogEntry, CatalogFile, CATALOG_SCHEMA_VERSION};
use crate::data_dir::DataDir;
use crate::events::{Event, EventBus};
use crate::settings::CatalogSource;
use crate::variant::CatalogEntryKey;
use crate::variant_set::VariantSet;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Unsupported catalog schema version {0}")]
    UnsupportedVersion(u32),
    #[error("Catalog declares no id")]
    MissingId,
    #[error("Malformed catalog payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a catalog install changed, for wiring registrations afterwards.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub catalog_id: String,
    /// Assets the freshly installed entries apply to, deduplicated.
    pub asset_ids: Vec<AssetId>,
    /// True when a previous catalog with the same id was replaced.
    pub replaced: bool,
}

/// Owns every installed catalog and the lookups around them.
///
/// Handles:
/// - validating and installing fetched payloads (a catalog with a known id
///   is replaced wholesale)
/// - the payload disk cache, so previously seen catalogs work offline
/// - the asset-to-entries reverse index
/// - a display-name cache that outlives entry removal, so variants sourced
///   from an entry keep a label after the catalog moves on
///
/// Parsing and indexing are synchronous; fetching happens elsewhere and
/// hands payloads in.
pub struct CatalogManager {
    dir: DataDir,
    events: EventBus,
    catalogs: HashMap<String, Catalog>,
    by_asset: HashMap<AssetId, Vec<CatalogEntryKey>>,
    names: HashMap<CatalogEntryKey, String>,
}

impl CatalogManager {
    pub fn new(dir: DataDir, events: EventBus) -> Self {
        CatalogManager {
            dir,
            events,
            catalogs: HashMap::new(),
            by_asset: HashMap::new(),
            names: HashMap::new(),
        }
    }

    pub fn catalogs(&self) -> impl Iterator<Item = &Catalog> {
        self.catalogs.values()
    }

    pub fn get(&self, catalog_id: &str) -> Option<&Catalog> {
        self.catalogs.get(catalog_id)
    }

    pub fn resolve(&self, key: &CatalogEntryKey) -> Option<&CatalogEntry> {
        self.catalogs.get(&key.catalog_id)?.entries.get(&key.entry_id)
    }

    /// Entries offering audio for an asset, ordered by catalog then entry id.
    pub fn entries_for(&self, asset_id: AssetId) -> &[CatalogEntryKey] {
        self.by_asset
            .get(&asset_id)
            .map(|keys| keys.as_slice())
            .unwrap_or(&[])
    }

    /// The entry's current name, falling back to the name it had when last
    /// seen. `None` only for keys this manager never saw.
    pub fn display_name(&self, key: &CatalogEntryKey) -> Option<&str> {
        if let Some(entry) = self.resolve(key) {
            return Some(&entry.name);
        }
        self.names.get(key).map(|s| s.as_str())
    }

    /// Validate and install a fetched payload, then write it to the disk
    /// cache so the catalog is available offline next start.
    pub fn install_fetched(
        &mut self,
        payload: &[u8],
        source_url: &str,
    ) -> Result<InstallOutcome, CatalogError> {
        let outcome = self.install_payload(payload, source_url)?;
        let cache_path = self.dir.index_cache_path(source_url);
        if let Err(e) = std::fs::write(&cache_path, payload) {
            warn!(
                "Failed to cache catalog {} to {}: {}",
                outcome.catalog_id,
                cache_path.display(),
                e
            );
        }
        Ok(outcome)
    }

    /// Install whatever cached payloads exist for the given sources. Missing
    /// or unreadable caches are skipped; one bad source never blocks the
    /// rest.
    pub fn warm_start(&mut self, sources: &[CatalogSource]) -> Vec<InstallOutcome> {
        let mut outcomes = Vec::new();
        for source in sources {
            if !source.enabled {
                continue;
            }
            let path = self.dir.index_cache_path(&source.url);
            if !path.exists() {
                debug!("No cached catalog for {}", source.url);
                continue;
            }
            let loaded = std::fs::read(&path)
                .map_err(CatalogError::from)
                .and_then(|payload| self.install_payload(&payload, &source.url));
            match loaded {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("Ignoring cached catalog for {}: {}", source.url, e),
            }
        }
        outcomes
    }

    /// Drop the catalog fetched from `url`, with its cache file. Returns the
    /// removed catalog's id.
    pub fn remove_by_url(&mut self, url: &str) -> Option<String> {
        let id = self.catalogs.values().find(|c| c.url == url)?.id.clone();
        self.remove_catalog(&id);
        let cache_path = self.dir.index_cache_path(url);
        if let Err(e) = std::fs::remove_file(&cache_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to drop catalog cache {}: {}", cache_path.display(), e);
            }
        }
        Some(id)
    }

    /// Register every entry applying to the set's asset. Already-registered
    /// entries are left alone, so this is safe to call repeatedly.
    pub fn register_into(&self, set: &mut VariantSet) {
        for key in self.entries_for(set.asset_id()) {
            if set.registered_entries().contains(key) {
                continue;
            }
            let Some(entry) = self.resolve(key) else {
                continue;
            };
            if let Err(e) = set.register_catalog_entry(key.clone(), &entry.asset_ids) {
                warn!("Failed to register catalog entry {}: {}", key, e);
            }
        }
    }

    fn install_payload(
        &mut self,
        payload: &[u8],
        source_url: &str,
    ) -> Result<InstallOutcome, CatalogError> {
        let file: CatalogFile = serde_json::from_slice(payload)?;
        if file.manifest != CATALOG_SCHEMA_VERSION {
            return Err(CatalogError::UnsupportedVersion(file.manifest));
        }
        if file.id.trim().is_empty() {
            return Err(CatalogError::MissingId);
        }

        let (catalog, issues) = Catalog::from_file(file, source_url);
        for issue in &issues {
            warn!(
                "Skipping catalog entry {}/{}: {}",
                catalog.id, issue.entry_id, issue.message
            );
            self.events.emit(Event::CatalogEntryError {
                catalog_id: catalog.id.clone(),
                message: format!("Entry {}: {}", issue.entry_id, issue.message),
            });
        }

        let replaced = self.remove_catalog(&catalog.id);

        let mut asset_ids: Vec<AssetId> = catalog
            .entries
            .values()
            .flat_map(|e| e.asset_ids.iter().copied())
            .collect();
        asset_ids.sort();
        asset_ids.dedup();

        for entry in catalog.entries.values() {
            self.names.insert(entry.key.clone(), entry.name.clone());
        }
        self.index_catalog(&catalog);

        info!(
            "Installed catalog {} with {} entries from {}",
            catalog.id,
            catalog.entries.len(),
            source_url
        );
        let outcome = InstallOutcome {
            catalog_id: catalog.id.clone(),
            asset_ids,
            replaced,
        };
        self.catalogs.insert(catalog.id.clone(), catalog);
        Ok(outcome)
    }

    fn remove_catalog(&mut self, catalog_id: &str) -> bool {
        if self.catalogs.remove(catalog_id).is_none() {
            return false;
        }
        for keys in self.by_asset.values_mut() {
            keys.retain(|k| k.catalog_id != catalog_id);
        }
        self.by_asset.retain(|_, keys| !keys.is_empty());
        true
    }

    fn index_catalog(&mut self, catalog: &Catalog) {
        for entry in catalog.entries.values() {
            for &asset_id in &entry.asset_ids {
                self.by_asset
                    .entry(asset_id)
                    .or_default()
                    .push(entry.key.clone());
            }
        }
        for keys in self.by_asset.values_mut() {
            keys.sort_by(|a, b| {
                (a.catalog_id.as_str(), a.entry_id.as_str())
                    .cmp(&(b.catalog_id.as_str(), b.entry_id.as_str()))
            });
            keys.dedup();
        }
    }
}
