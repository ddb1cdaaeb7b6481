use crate::asset_id::AssetId;
use crate::data_dir::DataDir;
use crate::events::{Event, EventBus};
use crate::settings::Settings;
use crate::variant::{Variant, VariantId};
use crate::variant_set::{DefaultSeed, VariantSet, VariantSetError};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Asset {0} is not tracked")]
    UnknownAsset(AssetId),
    #[error("Variant set error: {0}")]
    Set(#[from] VariantSetError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Owns every `VariantSet` and the persistence around them.
///
/// Handles:
/// - the startup scan of `manifest/`, setting aside files that fail to parse
/// - set access and creation with seed metadata
/// - user intents (add, select, delete, replace) as mutate-persist-notify
/// - dirty tracking, so batch saves only rewrite what changed
///
/// Events are published only after initialization, so the startup scan and
/// migration never flood subscribers with intermediate states.
pub struct ManifestStore {
    dir: DataDir,
    events: EventBus,
    sets: HashMap<AssetId, VariantSet>,
    dirty: HashSet<AssetId>,
    initialized: bool,
}

impl ManifestStore {
    pub fn new(dir: DataDir, events: EventBus) -> Self {
        ManifestStore {
            dir,
            events,
            sets: HashMap::new(),
            dirty: HashSet::new(),
            initialized: false,
        }
    }

    pub fn dir(&self) -> &DataDir {
        &self.dir
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Scan the manifest directory and load every per-asset file.
    ///
    /// A file that fails to parse is renamed to `.bak`, noted in settings and
    /// skipped; one bad file never aborts the scan.
    pub fn initialize(&mut self, settings: &mut Settings) -> Result<(), ManifestError> {
        self.dir.ensure_layout()?;
        let mut loaded = 0usize;
        let mut failed = 0usize;
        for entry in std::fs::read_dir(self.dir.manifest_dir())? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(asset_id) = asset_id_from_file_name(&path) else {
                warn!("Skipping manifest with unrecognized name: {}", path.display());
                continue;
            };
            let parsed = std::fs::read(&path)
                .map_err(VariantSetError::from)
                .and_then(|bytes| VariantSet::from_slice(asset_id, &bytes));
            match parsed {
                Ok(set) => {
                    self.sets.insert(asset_id, set);
                    loaded += 1;
                }
                Err(e) => {
                    warn!("Failed to load manifest for asset {}: {}", asset_id, e);
                    set_aside(&path);
                    settings.note_manifest_corruption();
                    failed += 1;
                }
            }
        }
        self.initialized = true;
        if failed > 0 {
            info!("Loaded {} asset manifests, set aside {}", loaded, failed);
        } else {
            info!("Loaded {} asset manifests", loaded);
        }
        Ok(())
    }

    pub fn get(&self, asset_id: AssetId) -> Option<&VariantSet> {
        self.sets.get(&asset_id)
    }

    /// Mutable access marks the set dirty; prefer the intent methods, which
    /// also persist and notify.
    pub fn get_mut(&mut self, asset_id: AssetId) -> Option<&mut VariantSet> {
        let set = self.sets.get_mut(&asset_id);
        if set.is_some() {
            self.dirty.insert(asset_id);
        }
        set
    }

    /// Fetch or create the set for an asset. The seed only matters when the
    /// set does not exist yet; an existing set keeps its default untouched.
    pub fn ensure(&mut self, asset_id: AssetId, seed: DefaultSeed) -> &mut VariantSet {
        self.dirty.insert(asset_id);
        self.sets
            .entry(asset_id)
            .or_insert_with(|| VariantSet::new(asset_id, seed))
    }

    pub fn asset_ids(&self) -> Vec<AssetId> {
        let mut ids: Vec<AssetId> = self.sets.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn sets(&self) -> impl Iterator<Item = &VariantSet> {
        self.sets.values()
    }

    /// Mutable walk over every set, for in-memory annotations like catalog
    /// registrations that are not persisted and need no dirty marking.
    pub fn sets_mut(&mut self) -> impl Iterator<Item = &mut VariantSet> {
        self.sets.values_mut()
    }

    /// Drop all registrations into a catalog across every set. Used when a
    /// catalog is replaced by a fresh fetch.
    pub fn unregister_catalog(&mut self, catalog_id: &str) {
        for set in self.sets.values_mut() {
            set.unregister_catalog(catalog_id);
        }
    }

    /// Persist one set, or every dirty set.
    ///
    /// The batch form is best-effort: a set that fails to write stays dirty
    /// and is logged, the rest still gets saved.
    pub fn save(&mut self, asset_id: Option<AssetId>) -> Result<(), ManifestError> {
        match asset_id {
            Some(id) => {
                let set = self.sets.get(&id).ok_or(ManifestError::UnknownAsset(id))?;
                set.commit(&self.dir)?;
                self.dirty.remove(&id);
                Ok(())
            }
            None => {
                let ids: Vec<AssetId> = self.dirty.iter().copied().collect();
                for id in ids {
                    let Some(set) = self.sets.get(&id) else {
                        self.dirty.remove(&id);
                        continue;
                    };
                    match set.commit(&self.dir) {
                        Ok(()) => {
                            self.dirty.remove(&id);
                        }
                        Err(e) => warn!("Failed to save manifest for asset {}: {}", id, e),
                    }
                }
                Ok(())
            }
        }
    }

    /// Add a variant to a tracked asset, persist and notify. Returns the
    /// stored variant's id.
    pub fn add_variant(
        &mut self,
        asset_id: AssetId,
        variant: Variant,
    ) -> Result<VariantId, ManifestError> {
        let set = self
            .sets
            .get_mut(&asset_id)
            .ok_or(ManifestError::UnknownAsset(asset_id))?;
        let id = set.add(variant)?.id().clone();
        self.persist(asset_id);
        self.notify_state_changed(asset_id);
        Ok(id)
    }

    /// Point the active selection of an asset at a variant.
    pub fn select_variant(
        &mut self,
        asset_id: AssetId,
        variant_id: &VariantId,
    ) -> Result<(), ManifestError> {
        let set = self
            .sets
            .get_mut(&asset_id)
            .ok_or(ManifestError::UnknownAsset(asset_id))?;
        set.set_active(variant_id)?;
        self.persist(asset_id);
        self.notify_state_changed(asset_id);
        Ok(())
    }

    pub fn delete_variant(
        &mut self,
        asset_id: AssetId,
        variant_id: &VariantId,
        delete_audio_file: bool,
    ) -> Result<(), ManifestError> {
        let set = self
            .sets
            .get_mut(&asset_id)
            .ok_or(ManifestError::UnknownAsset(asset_id))?;
        set.delete(variant_id, delete_audio_file)?;
        self.persist(asset_id);
        if self.initialized {
            self.events.emit(Event::VariantDeleted {
                asset_id,
                variant_id: variant_id.clone(),
            });
        }
        Ok(())
    }

    pub fn delete_variant_audio(
        &mut self,
        asset_id: AssetId,
        variant_id: &VariantId,
    ) -> Result<(), ManifestError> {
        let set = self
            .sets
            .get_mut(&asset_id)
            .ok_or(ManifestError::UnknownAsset(asset_id))?;
        set.delete_audio(variant_id)?;
        self.persist(asset_id);
        self.notify_state_changed(asset_id);
        Ok(())
    }

    pub fn delete_all_variants(
        &mut self,
        asset_id: AssetId,
        delete_audio_files: bool,
    ) -> Result<(), ManifestError> {
        let set = self
            .sets
            .get_mut(&asset_id)
            .ok_or(ManifestError::UnknownAsset(asset_id))?;
        set.delete_all(delete_audio_files);
        self.persist(asset_id);
        self.notify_state_changed(asset_id);
        Ok(())
    }

    /// Swap a variant while keeping its id.
    pub fn replace_variant(
        &mut self,
        asset_id: AssetId,
        variant_id: &VariantId,
        variant: Variant,
    ) -> Result<(), ManifestError> {
        let set = self
            .sets
            .get_mut(&asset_id)
            .ok_or(ManifestError::UnknownAsset(asset_id))?;
        set.replace(variant_id, variant)?;
        self.persist(asset_id);
        self.notify_state_changed(asset_id);
        Ok(())
    }

    /// Update an asset's default metadata once the host has the real song
    /// record. No-op (and no event) when nothing changed.
    pub fn refresh_default(
        &mut self,
        asset_id: AssetId,
        seed: &DefaultSeed,
    ) -> Result<bool, ManifestError> {
        let set = self
            .sets
            .get_mut(&asset_id)
            .ok_or(ManifestError::UnknownAsset(asset_id))?;
        let changed = set.refresh_default(seed);
        if changed {
            self.persist(asset_id);
            self.notify_state_changed(asset_id);
        }
        Ok(changed)
    }

    /// Commit with retry-on-next-save semantics: a failed write keeps the
    /// set dirty and logs, it does not undo the in-memory change.
    fn persist(&mut self, asset_id: AssetId) {
        self.dirty.insert(asset_id);
        let Some(set) = self.sets.get(&asset_id) else {
            return;
        };
        match set.commit(&self.dir) {
            Ok(()) => {
                self.dirty.remove(&asset_id);
            }
            Err(e) => warn!("Failed to save manifest for asset {}: {}", asset_id, e),
        }
    }

    fn notify_state_changed(&self, asset_id: AssetId) {
        if self.initialized {
            self.events.emit(Event::StateChanged { asset_id });
        }
    }
}

fn asset_id_from_file_name(path: &Path) -> Option<AssetId> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.parse::<i64>().ok())
        .map(AssetId::new)
}

/// Rename an unreadable manifest next to itself so the data survives for
/// manual recovery.
fn set_aside(path: &Path) {
    let backup = path.with_extension("json.bak");
    if let Err(e) = std::fs::rename(path, &backup) {
        warn!(
            "Failed to set aside corrupt manifest {}: {}",
            path.display(),
            e
        );
    }
}
