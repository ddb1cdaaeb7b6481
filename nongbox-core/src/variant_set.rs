use crate::asset_id::AssetId;
use crate::data_dir::DataDir;
use crate::variant::{
    CatalogEntryKey, HostedVariant, LocalVariant, StreamedVariant, Variant, VariantId, VariantInfo,
    VariantKind,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Schema version written to per-asset manifest files.
pub const SET_SCHEMA_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum VariantSetError {
    #[error("No variant with id {0}")]
    NotFound(VariantId),
    #[error("Variant {0} has not been downloaded")]
    NotDownloaded(VariantId),
    #[error("Audio file for variant {0} is missing from disk")]
    NotOnDisk(VariantId),
    #[error("The default variant cannot be deleted or replaced")]
    DefaultProtected,
    #[error("Local variants keep their audio file; delete the variant instead")]
    LocalAudioProtected,
    #[error("An equivalent variant already exists")]
    Duplicate,
    #[error("A variant with id {0} already exists")]
    IdInUse(VariantId),
    #[error("Variant name must not be empty")]
    EmptyName,
    #[error("Download URL must not be empty")]
    EmptyUrl,
    #[error("Video id must not be empty")]
    EmptyVideoId,
    #[error("Variant belongs to asset {found}, this set tracks {expected}")]
    AssetMismatch { expected: AssetId, found: AssetId },
    #[error("Catalog entry {key} does not apply to asset {asset_id}")]
    EntryNotApplicable {
        key: CatalogEntryKey,
        asset_id: AssetId,
    },
    #[error("Catalog entry {0} is already registered")]
    EntryAlreadyRegistered(CatalogEntryKey),
    #[error("Unsupported manifest schema version {0}")]
    UnsupportedVersion(u32),
    #[error("Manifest serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata used to seed the default variant of a fresh set.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultSeed {
    pub name: String,
    pub artist: String,
    pub path: PathBuf,
}

impl DefaultSeed {
    pub fn new(name: impl Into<String>, artist: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        DefaultSeed {
            name: name.into(),
            artist: artist.into(),
            path: path.into(),
        }
    }

    /// Placeholder for assets whose song record the host has not produced yet.
    pub fn unknown(path: impl Into<PathBuf>) -> Self {
        DefaultSeed::new("Unknown", "", path)
    }
}

/// Borrowed view of any variant in a set. This is what lookups hand out;
/// callers never hold positions into the underlying collections.
#[derive(Debug, Clone, Copy)]
pub enum VariantRef<'a> {
    Local(&'a LocalVariant),
    Hosted(&'a HostedVariant),
    Streamed(&'a StreamedVariant),
}

impl<'a> VariantRef<'a> {
    pub fn info(&self) -> &'a VariantInfo {
        match self {
            VariantRef::Local(v) => &v.info,
            VariantRef::Hosted(v) => &v.info,
            VariantRef::Streamed(v) => &v.info,
        }
    }

    pub fn id(&self) -> &'a VariantId {
        &self.info().id
    }

    pub fn kind(&self) -> VariantKind {
        match self {
            VariantRef::Local(_) => VariantKind::Local,
            VariantRef::Hosted(_) => VariantKind::Hosted,
            VariantRef::Streamed(_) => VariantKind::Streamed,
        }
    }

    pub fn path(&self) -> Option<&'a Path> {
        match self {
            VariantRef::Local(v) => Some(&v.path),
            VariantRef::Hosted(v) => v.path.as_deref(),
            VariantRef::Streamed(v) => v.path.as_deref(),
        }
    }

    pub fn is_downloadable(&self) -> bool {
        !matches!(self, VariantRef::Local(_))
    }

    pub fn to_owned(&self) -> Variant {
        match self {
            VariantRef::Local(v) => Variant::Local((*v).clone()),
            VariantRef::Hosted(v) => Variant::Hosted((*v).clone()),
            VariantRef::Streamed(v) => Variant::Streamed((*v).clone()),
        }
    }

    fn same_source(&self, other: &Variant) -> bool {
        if !self.info().metadata_matches(other.info()) {
            return false;
        }
        match (self, other) {
            (VariantRef::Local(a), Variant::Local(b)) => a.path == b.path,
            (VariantRef::Hosted(a), Variant::Hosted(b)) => a.url == b.url,
            (VariantRef::Streamed(a), Variant::Streamed(b)) => a.video_id == b.video_id,
            _ => false,
        }
    }
}

/// On-disk shape of one per-asset manifest file.
#[derive(Debug, Serialize, Deserialize)]
struct SetFile {
    version: u32,
    default: LocalVariant,
    active: VariantId,
    #[serde(default)]
    locals: Vec<LocalVariant>,
    #[serde(default)]
    hosted: Vec<HostedVariant>,
    #[serde(default)]
    streamed: Vec<StreamedVariant>,
}

/// Every variant known for one asset.
///
/// Owns the always-present default (the game's own audio, wrapped as a local
/// variant), the active selection, and the non-default variants grouped by
/// kind. Catalog entries applying to this asset are tracked by key only; the
/// entries themselves live in `CatalogManager` and are not persisted here.
///
/// Maintained invariants:
/// - the default exists for the set's whole lifetime and its id never changes
/// - `active` always refers to a variant present in the set
/// - no two variants share an id
/// - a set with zero non-default variants has no manifest file on disk
#[derive(Debug, Clone, PartialEq)]
pub struct VariantSet {
    asset_id: AssetId,
    default: LocalVariant,
    active: VariantId,
    locals: Vec<LocalVariant>,
    hosted: Vec<HostedVariant>,
    streamed: Vec<StreamedVariant>,
    registered: Vec<CatalogEntryKey>,
}

impl VariantSet {
    pub fn new(asset_id: AssetId, seed: DefaultSeed) -> Self {
        let default = LocalVariant::new(
            VariantInfo::new(asset_id, seed.name, seed.artist),
            seed.path,
        );
        let active = default.info.id.clone();
        VariantSet {
            asset_id,
            default,
            active,
            locals: Vec::new(),
            hosted: Vec::new(),
            streamed: Vec::new(),
            registered: Vec::new(),
        }
    }

    pub fn asset_id(&self) -> AssetId {
        self.asset_id
    }

    pub fn default_variant(&self) -> &LocalVariant {
        &self.default
    }

    pub fn active_id(&self) -> &VariantId {
        &self.active
    }

    pub fn is_default(&self, id: &VariantId) -> bool {
        self.default.info.id == *id
    }

    pub fn is_active(&self, id: &VariantId) -> bool {
        self.active == *id
    }

    /// Resolve the active variant. The set invariant keeps `active` valid, so
    /// the default fallback only covers state corrupted behind our back.
    pub fn active(&self) -> VariantRef<'_> {
        match self.find(&self.active) {
            Some(v) => v,
            None => VariantRef::Local(&self.default),
        }
    }

    pub fn find(&self, id: &VariantId) -> Option<VariantRef<'_>> {
        self.variants_with_default().find(|v| v.id() == id)
    }

    /// Non-default variants in stored order: locals, then hosted, then
    /// streamed.
    pub fn variants(&self) -> impl Iterator<Item = VariantRef<'_>> {
        self.locals
            .iter()
            .map(VariantRef::Local)
            .chain(self.hosted.iter().map(VariantRef::Hosted))
            .chain(self.streamed.iter().map(VariantRef::Streamed))
    }

    fn variants_with_default(&self) -> impl Iterator<Item = VariantRef<'_>> {
        std::iter::once(VariantRef::Local(&self.default)).chain(self.variants())
    }

    pub fn locals(&self) -> &[LocalVariant] {
        &self.locals
    }

    pub fn hosted(&self) -> &[HostedVariant] {
        &self.hosted
    }

    pub fn streamed(&self) -> &[StreamedVariant] {
        &self.streamed
    }

    /// Number of non-default variants.
    pub fn len(&self) -> usize {
        self.locals.len() + self.hosted.len() + self.streamed.len()
    }

    /// True when only the default remains.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn registered_entries(&self) -> &[CatalogEntryKey] {
        &self.registered
    }

    /// The registered catalog entry whose derived variant id matches, if any.
    pub fn registered_entry_for(&self, variant_id: &VariantId) -> Option<&CatalogEntryKey> {
        self.registered.iter().find(|k| k.variant_id() == *variant_id)
    }

    fn validate(&self, variant: &Variant) -> Result<(), VariantSetError> {
        let info = variant.info();
        if info.name.trim().is_empty() {
            return Err(VariantSetError::EmptyName);
        }
        if info.asset_id != self.asset_id {
            return Err(VariantSetError::AssetMismatch {
                expected: self.asset_id,
                found: info.asset_id,
            });
        }
        match variant {
            Variant::Hosted(v) if v.url.trim().is_empty() => Err(VariantSetError::EmptyUrl),
            Variant::Streamed(v) if v.video_id.trim().is_empty() => {
                Err(VariantSetError::EmptyVideoId)
            }
            _ => Ok(()),
        }
    }

    fn push_variant(&mut self, variant: Variant) -> VariantRef<'_> {
        match variant {
            Variant::Local(v) => {
                self.locals.push(v);
                VariantRef::Local(&self.locals[self.locals.len() - 1])
            }
            Variant::Hosted(v) => {
                self.hosted.push(v);
                VariantRef::Hosted(&self.hosted[self.hosted.len() - 1])
            }
            Variant::Streamed(v) => {
                self.streamed.push(v);
                VariantRef::Streamed(&self.streamed[self.streamed.len() - 1])
            }
        }
    }

    fn take(&mut self, id: &VariantId) -> Option<Variant> {
        if let Some(i) = self.locals.iter().position(|v| v.info.id == *id) {
            return Some(Variant::Local(self.locals.remove(i)));
        }
        if let Some(i) = self.hosted.iter().position(|v| v.info.id == *id) {
            return Some(Variant::Hosted(self.hosted.remove(i)));
        }
        if let Some(i) = self.streamed.iter().position(|v| v.info.id == *id) {
            return Some(Variant::Streamed(self.streamed.remove(i)));
        }
        None
    }

    /// Add a variant. Rejects empty names/URLs, foreign asset ids, reused
    /// ids and variants equivalent to one already present (same source and
    /// metadata). Returns a handle to the stored variant.
    pub fn add(&mut self, variant: Variant) -> Result<VariantRef<'_>, VariantSetError> {
        self.validate(&variant)?;
        if self.find(variant.id()).is_some() {
            return Err(VariantSetError::IdInUse(variant.id().clone()));
        }
        if self.variants_with_default().any(|v| v.same_source(&variant)) {
            return Err(VariantSetError::Duplicate);
        }
        Ok(self.push_variant(variant))
    }

    /// Point the active selection at `id`.
    ///
    /// The default is always selectable. Anything else must have its audio on
    /// disk: hosted/streamed variants fail with `NotDownloaded` before their
    /// first fetch, and any variant whose file has gone missing fails with
    /// `NotOnDisk`.
    pub fn set_active(&mut self, id: &VariantId) -> Result<(), VariantSetError> {
        if self.is_default(id) {
            self.active = id.clone();
            return Ok(());
        }
        let variant = self
            .find(id)
            .ok_or_else(|| VariantSetError::NotFound(id.clone()))?;
        match variant.path() {
            None => return Err(VariantSetError::NotDownloaded(id.clone())),
            Some(path) if !path.exists() => return Err(VariantSetError::NotOnDisk(id.clone())),
            Some(_) => {}
        }
        self.active = id.clone();
        Ok(())
    }

    /// Remove a non-default variant. If it was active, the selection falls
    /// back to the default. With `delete_audio_file` the backing file is
    /// removed too, best-effort.
    pub fn delete(
        &mut self,
        id: &VariantId,
        delete_audio_file: bool,
    ) -> Result<Variant, VariantSetError> {
        if self.is_default(id) {
            return Err(VariantSetError::DefaultProtected);
        }
        let removed = self
            .take(id)
            .ok_or_else(|| VariantSetError::NotFound(id.clone()))?;
        if self.active == *id {
            self.active = self.default.info.id.clone();
        }
        if delete_audio_file {
            if let Some(path) = removed.path() {
                self.remove_variant_file(path);
            }
        }
        Ok(removed)
    }

    /// Drop a downloaded file while keeping the variant listed. Only makes
    /// sense for hosted/streamed variants; locals are their file.
    pub fn delete_audio(&mut self, id: &VariantId) -> Result<(), VariantSetError> {
        let variant = self
            .find(id)
            .ok_or_else(|| VariantSetError::NotFound(id.clone()))?;
        match variant.kind() {
            VariantKind::Local => return Err(VariantSetError::LocalAudioProtected),
            VariantKind::Hosted | VariantKind::Streamed => {}
        }
        let path = match variant.path() {
            Some(p) => p.to_path_buf(),
            None => return Err(VariantSetError::NotDownloaded(id.clone())),
        };
        self.remove_variant_file(&path);
        if let Some(v) = self.hosted.iter_mut().find(|v| v.info.id == *id) {
            v.path = None;
        } else if let Some(v) = self.streamed.iter_mut().find(|v| v.info.id == *id) {
            v.path = None;
        }
        if self.active == *id {
            self.active = self.default.info.id.clone();
        }
        Ok(())
    }

    /// Remove every non-default variant and reset the selection.
    pub fn delete_all(&mut self, delete_audio_files: bool) {
        if delete_audio_files {
            for v in self.variants() {
                if let Some(path) = v.path() {
                    self.remove_variant_file(path);
                }
            }
        }
        self.locals.clear();
        self.hosted.clear();
        self.streamed.clear();
        self.active = self.default.info.id.clone();
    }

    /// Never touches the default's audio, whatever a variant claims as its
    /// path.
    fn remove_variant_file(&self, path: &Path) {
        if path == self.default.path.as_path() {
            return;
        }
        remove_audio_file(path);
    }

    /// Swap a variant for a new one while keeping its external id, so held
    /// references stay valid. Used for metadata fixes and source corrections.
    pub fn replace(
        &mut self,
        id: &VariantId,
        mut variant: Variant,
    ) -> Result<VariantRef<'_>, VariantSetError> {
        if self.is_default(id) {
            return Err(VariantSetError::DefaultProtected);
        }
        if self.find(id).is_none() {
            return Err(VariantSetError::NotFound(id.clone()));
        }
        variant.info_mut().id = id.clone();
        self.validate(&variant)?;
        let duplicate = self
            .variants_with_default()
            .any(|v| v.id() != id && v.same_source(&variant));
        if duplicate {
            return Err(VariantSetError::Duplicate);
        }
        let on_disk = variant.path().is_some_and(|p| p.exists());
        self.take(id);
        if self.active == *id && !on_disk {
            self.active = self.default.info.id.clone();
        }
        Ok(self.push_variant(variant))
    }

    /// Fill a downloaded file path in on an existing variant.
    pub fn set_variant_path(
        &mut self,
        id: &VariantId,
        path: PathBuf,
    ) -> Result<(), VariantSetError> {
        if let Some(v) = self.locals.iter_mut().find(|v| v.info.id == *id) {
            v.path = path;
            return Ok(());
        }
        if let Some(v) = self.hosted.iter_mut().find(|v| v.info.id == *id) {
            v.path = Some(path);
            return Ok(());
        }
        if let Some(v) = self.streamed.iter_mut().find(|v| v.info.id == *id) {
            v.path = Some(path);
            return Ok(());
        }
        Err(VariantSetError::NotFound(id.clone()))
    }

    /// Fold another set for the same asset into this one.
    ///
    /// Skips incoming variants already present by (name, artist, offset) and
    /// variants whose path is just a copy of the source set's default audio.
    /// Running the same merge twice adds nothing the second time. Returns the
    /// ids actually added.
    pub fn merge(&mut self, other: &VariantSet) -> Result<Vec<VariantId>, VariantSetError> {
        if other.asset_id != self.asset_id {
            return Err(VariantSetError::AssetMismatch {
                expected: self.asset_id,
                found: other.asset_id,
            });
        }
        let mut added = Vec::new();
        for incoming in other.variants() {
            if incoming.path() == Some(other.default.path.as_path()) {
                continue;
            }
            let duplicate = self.variants_with_default().any(|v| {
                let a = v.info();
                let b = incoming.info();
                a.name == b.name && a.artist == b.artist && a.start_offset_ms == b.start_offset_ms
            });
            if duplicate {
                continue;
            }
            let mut owned = incoming.to_owned();
            owned.info_mut().asset_id = self.asset_id;
            if self.find(owned.id()).is_some() {
                owned.info_mut().id = VariantId::random();
            }
            added.push(owned.id().clone());
            self.push_variant(owned);
        }
        Ok(added)
    }

    /// Note that a catalog entry offers audio for this asset. Fails when the
    /// entry does not actually list this asset or is already registered.
    pub fn register_catalog_entry(
        &mut self,
        key: CatalogEntryKey,
        applies_to: &[AssetId],
    ) -> Result<(), VariantSetError> {
        if !applies_to.contains(&self.asset_id) {
            return Err(VariantSetError::EntryNotApplicable {
                key,
                asset_id: self.asset_id,
            });
        }
        if self.registered.contains(&key) {
            return Err(VariantSetError::EntryAlreadyRegistered(key));
        }
        self.registered.push(key);
        Ok(())
    }

    /// Drop every registration pointing into the given catalog. Used when a
    /// catalog is replaced by a fresh fetch.
    pub fn unregister_catalog(&mut self, catalog_id: &str) {
        self.registered.retain(|k| k.catalog_id != catalog_id);
    }

    /// Update the default's metadata once the host produces the real song
    /// record. Returns whether anything changed.
    pub fn refresh_default(&mut self, seed: &DefaultSeed) -> bool {
        let changed = self.default.info.name != seed.name
            || self.default.info.artist != seed.artist
            || self.default.path != seed.path;
        if changed {
            self.default.info.name = seed.name.clone();
            self.default.info.artist = seed.artist.clone();
            self.default.path = seed.path.clone();
        }
        changed
    }

    /// Registered catalog entries that have not been downloaded yet, i.e.
    /// entries with no variant in the set under their derived id.
    pub fn unmaterialized_entries(&self) -> Vec<&CatalogEntryKey> {
        self.registered
            .iter()
            .filter(|k| self.find(&k.variant_id()).is_none())
            .collect()
    }

    /// Write this set to its manifest file, or remove the file when only the
    /// default remains.
    pub fn commit(&self, dir: &DataDir) -> Result<(), VariantSetError> {
        let path = dir.asset_manifest_path(self.asset_id);
        if self.is_empty() {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(());
        }
        let file = SetFile {
            version: SET_SCHEMA_VERSION,
            default: self.default.clone(),
            active: self.active.clone(),
            locals: self.locals.clone(),
            hosted: self.hosted.clone(),
            streamed: self.streamed.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(&path, json)?;
        Ok(())
    }

    pub fn load(dir: &DataDir, asset_id: AssetId) -> Result<Self, VariantSetError> {
        let bytes = std::fs::read(dir.asset_manifest_path(asset_id))?;
        Self::from_slice(asset_id, &bytes)
    }

    /// Parse a manifest file. The asset id comes from the file name and wins
    /// over whatever the payload claims. Duplicate ids are dropped and a
    /// dangling or no-longer-on-disk active selection falls back to the
    /// default, so a hand-edited file can degrade but not wedge the set.
    pub fn from_slice(asset_id: AssetId, bytes: &[u8]) -> Result<Self, VariantSetError> {
        let file: SetFile = serde_json::from_slice(bytes)?;
        if file.version != SET_SCHEMA_VERSION {
            return Err(VariantSetError::UnsupportedVersion(file.version));
        }

        let mut set = VariantSet {
            asset_id,
            default: file.default,
            active: file.active,
            locals: file.locals,
            hosted: file.hosted,
            streamed: file.streamed,
            registered: Vec::new(),
        };

        if set.default.info.asset_id != asset_id {
            warn!(
                "Manifest for asset {} claims asset {}, using the file name",
                asset_id, set.default.info.asset_id
            );
        }
        set.default.info.asset_id = asset_id;
        for v in set.locals.iter_mut() {
            v.info.asset_id = asset_id;
        }
        for v in set.hosted.iter_mut() {
            v.info.asset_id = asset_id;
        }
        for v in set.streamed.iter_mut() {
            v.info.asset_id = asset_id;
        }

        let mut seen: HashSet<VariantId> = HashSet::new();
        seen.insert(set.default.info.id.clone());
        set.locals.retain(|v| keep_unique(&mut seen, &v.info.id));
        set.hosted.retain(|v| keep_unique(&mut seen, &v.info.id));
        set.streamed.retain(|v| keep_unique(&mut seen, &v.info.id));

        let active_ok = match set.find(&set.active) {
            None => false,
            Some(v) => {
                set.is_default(&set.active) || v.path().is_some_and(|p| p.exists())
            }
        };
        if !active_ok {
            warn!(
                "Active variant {} for asset {} is gone or off disk, falling back to default",
                set.active, asset_id
            );
            set.active = set.default.info.id.clone();
        }

        Ok(set)
    }
}

fn keep_unique(seen: &mut HashSet<VariantId>, id: &VariantId) -> bool {
    let fresh = seen.insert(id.clone());
    if !fresh {
        warn!("Dropping variant with duplicate id {}", id);
    }
    fresh
}

/// Audio file removal is best-effort; a locked or already-missing file must
/// not fail the state change that triggered it.
fn remove_audio_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove audio file {}: {}", path.display(), e),
    }
}
