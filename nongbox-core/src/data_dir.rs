use crate::asset_id::AssetId;
use crate::variant::VariantId;
use sha2::{Digest, Sha256};
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};

/// Typed wrapper for the mod's save directory.
///
/// Centralizes the on-disk layout so callers never hand-build paths:
/// - `manifest/<asset id>.json`: one variant-set file per asset
/// - `nongs/<variant id>.<ext>`: downloaded audio
/// - `indexes-cache/<sha256(url)>.json`: cached catalog payloads
/// - `backups/`: archived legacy manifests
/// - `nong_data.json`: the pre-migration flat manifest
#[derive(Debug, Clone, PartialEq)]
pub struct DataDir(PathBuf);

impl DataDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DataDir(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn manifest_dir(&self) -> PathBuf {
        self.0.join("manifest")
    }

    pub fn nongs_dir(&self) -> PathBuf {
        self.0.join("nongs")
    }

    pub fn indexes_cache_dir(&self) -> PathBuf {
        self.0.join("indexes-cache")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.0.join("backups")
    }

    pub fn asset_manifest_path(&self, asset_id: AssetId) -> PathBuf {
        self.manifest_dir().join(format!("{asset_id}.json"))
    }

    /// Download target for a variant's audio. `extension` has no leading dot.
    pub fn nong_path(&self, variant_id: &VariantId, extension: &str) -> PathBuf {
        self.nongs_dir()
            .join(format!("{}.{}", variant_id, extension))
    }

    /// Cache file for a catalog source, keyed by the hash of its URL so
    /// sources never collide regardless of their declared ids.
    pub fn index_cache_path(&self, url: &str) -> PathBuf {
        self.indexes_cache_dir()
            .join(format!("{}.json", url_cache_key(url)))
    }

    pub fn legacy_manifest_path(&self) -> PathBuf {
        self.0.join("nong_data.json")
    }

    /// Create every directory of the layout.
    pub fn ensure_layout(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.manifest_dir())?;
        std::fs::create_dir_all(self.nongs_dir())?;
        std::fs::create_dir_all(self.indexes_cache_dir())?;
        std::fs::create_dir_all(self.backups_dir())?;
        Ok(())
    }
}

fn url_cache_key(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

impl Deref for DataDir {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DataDir {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}
