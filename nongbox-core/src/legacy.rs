use crate::asset_id::AssetId;
use crate::data_dir::DataDir;
use crate::manifest_store::{ManifestError, ManifestStore};
use crate::settings::Settings;
use crate::variant::{LocalVariant, Variant, VariantInfo};
use crate::variant_set::{DefaultSeed, VariantSet, VariantSetError};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Variant set error: {0}")]
    Set(#[from] VariantSetError),
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One asset entry in the retired flat manifest. Everything was local paths;
/// hosted and streamed variants did not exist yet.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyAsset {
    default_path: PathBuf,
    #[serde(default)]
    active_path: Option<PathBuf>,
    #[serde(default)]
    songs: Vec<LegacySong>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacySong {
    path: PathBuf,
    #[serde(default)]
    name: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    start_offset: i64,
}

impl LegacySong {
    /// Old files sometimes carried blank names; fall back to the file stem.
    fn display_name(&self) -> String {
        let trimmed = self.name.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown")
            .to_string()
    }
}

/// What a completed migration did, for logging and the embedder's UI.
#[derive(Debug)]
pub struct MigrationReport {
    pub assets_converted: usize,
    pub variants_added: usize,
    pub archive_path: PathBuf,
}

/// Fold the retired flat manifest into the per-asset store, once.
///
/// Returns `Ok(None)` when there is nothing to migrate: the marker is set or
/// no legacy file exists. A legacy file that fails to parse is archived
/// without conversion so the data survives for manual recovery. On success
/// the file is archived under `backups/`, optionally deleted, and the marker
/// is set so the migration never runs again.
pub fn migrate_if_needed(
    store: &mut ManifestStore,
    settings: &mut Settings,
    remove_source: bool,
) -> Result<Option<MigrationReport>, MigrationError> {
    if settings.legacy_migrated() {
        return Ok(None);
    }
    let source = store.dir().legacy_manifest_path();
    if !source.exists() {
        return Ok(None);
    }
    info!("Migrating legacy manifest {}", source.display());

    let bytes = std::fs::read(&source)?;
    let assets: HashMap<String, LegacyAsset> = match serde_json::from_slice(&bytes) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Legacy manifest is unreadable, archiving as-is: {}", e);
            let archive_path = archive(store.dir(), &source, remove_source)?;
            settings.set_legacy_migrated();
            return Ok(Some(MigrationReport {
                assets_converted: 0,
                variants_added: 0,
                archive_path,
            }));
        }
    };

    let mut entries: Vec<(AssetId, LegacyAsset)> = Vec::new();
    for (raw_id, asset) in assets {
        match raw_id.parse::<i64>() {
            Ok(value) => entries.push((AssetId::new(value), asset)),
            Err(_) => warn!("Skipping legacy entry with unrecognized asset id {raw_id:?}"),
        }
    }
    entries.sort_by_key(|(id, _)| *id);

    let mut assets_converted = 0usize;
    let mut variants_added = 0usize;
    for (asset_id, legacy) in &entries {
        variants_added += convert_asset(store, *asset_id, legacy)?;
        assets_converted += 1;
    }

    let archive_path = archive(store.dir(), &source, remove_source)?;
    settings.set_legacy_migrated();
    info!(
        "Legacy migration done: {} assets, {} variants added, archive at {}",
        assets_converted,
        variants_added,
        archive_path.display()
    );
    Ok(Some(MigrationReport {
        assets_converted,
        variants_added,
        archive_path,
    }))
}

/// Convert one legacy asset entry and persist the result. Returns how many
/// variants the merge actually added.
fn convert_asset(
    store: &mut ManifestStore,
    asset_id: AssetId,
    legacy: &LegacyAsset,
) -> Result<usize, MigrationError> {
    let seed = legacy
        .songs
        .iter()
        .find(|s| s.path == legacy.default_path)
        .map(|s| DefaultSeed::new(s.display_name(), s.artist.clone(), legacy.default_path.clone()))
        .unwrap_or_else(|| DefaultSeed::unknown(legacy.default_path.clone()));

    // Stage the legacy songs as a set of their own and merge it in, so a
    // pre-existing set keeps its contents and the dedup rules are the same
    // ones adds use.
    let mut staged = VariantSet::new(asset_id, seed.clone());
    for song in &legacy.songs {
        if song.path == legacy.default_path {
            continue;
        }
        let mut info = VariantInfo::new(asset_id, song.display_name(), song.artist.clone());
        info.start_offset_ms = song.start_offset;
        let variant = Variant::Local(LocalVariant::new(info, song.path.clone()));
        if let Err(e) = staged.add(variant) {
            debug!("Skipping legacy song {}: {}", song.path.display(), e);
        }
    }

    let set = store.ensure(asset_id, seed);
    let added = set.merge(&staged)?;

    // The legacy selection carries over only when that variant arrived in
    // this merge; a set that already existed keeps its own pick.
    if let Some(active) = legacy
        .active_path
        .as_ref()
        .filter(|p| **p != legacy.default_path)
    {
        let target = set
            .variants()
            .find(|v| v.path() == Some(active.as_path()))
            .map(|v| v.id().clone());
        if let Some(id) = target {
            if added.contains(&id) {
                if let Err(e) = set.set_active(&id) {
                    warn!("Could not restore legacy selection for asset {asset_id}: {e}");
                }
            }
        }
    }

    store.save(Some(asset_id))?;
    Ok(added.len())
}

/// Copy the legacy file into `backups/` with a UTC stamp in the name.
fn archive(
    dir: &DataDir,
    source: &Path,
    remove_source: bool,
) -> Result<PathBuf, MigrationError> {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let archive_path = dir.backups_dir().join(format!("nong_data-{stamp}.json"));
    std::fs::copy(source, &archive_path)?;
    if remove_source {
        if let Err(e) = std::fs::remove_file(source) {
            warn!("Failed to remove migrated legacy manifest: {}", e);
        }
    }
    Ok(archive_path)
}
