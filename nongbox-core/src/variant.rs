use crate::asset_id::AssetId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Stable reference to an entry inside a published catalog.
///
/// Stored instead of a pointer so a catalog refresh can replace the owning
/// `Catalog` wholesale without dangling references; resolution goes through
/// `CatalogManager`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogEntryKey {
    pub catalog_id: String,
    pub entry_id: String,
}

impl CatalogEntryKey {
    pub fn new(catalog_id: impl Into<String>, entry_id: impl Into<String>) -> Self {
        CatalogEntryKey {
            catalog_id: catalog_id.into(),
            entry_id: entry_id.into(),
        }
    }

    /// The variant id a download of this entry materializes under.
    ///
    /// Derived, not random, so downloading the same entry twice collapses
    /// onto one variant and one file under `nongs/`. Catalog validation
    /// rejects entry ids that are blank or contain `-`, so distinct keys
    /// always derive distinct ids: the text after the last `-` is the entry
    /// id, whatever the catalog id looks like. Nothing parses these back.
    pub fn variant_id(&self) -> VariantId {
        VariantId(format!("{}-{}", self.catalog_id, self.entry_id))
    }
}

impl fmt::Display for CatalogEntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.catalog_id, self.entry_id)
    }
}

/// Opaque token identifying one variant within its set.
///
/// Random for user-added variants, derived from the catalog entry key for
/// catalog-sourced ones. External callers hold these instead of positions or
/// paths; they stay stable across saves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(String);

impl VariantId {
    pub fn new(value: impl Into<String>) -> Self {
        VariantId(value.into())
    }

    pub fn random() -> Self {
        VariantId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display metadata shared by every variant kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantInfo {
    pub id: VariantId,
    pub asset_id: AssetId,
    pub name: String,
    #[serde(default)]
    pub artist: String,
    /// Level or context label the variant was made for, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Playback start offset in milliseconds.
    #[serde(default)]
    pub start_offset_ms: i64,
    /// Catalog entry this variant came from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_entry: Option<CatalogEntryKey>,
}

impl VariantInfo {
    /// Fresh metadata with a random id and no offset.
    pub fn new(asset_id: AssetId, name: impl Into<String>, artist: impl Into<String>) -> Self {
        VariantInfo {
            id: VariantId::random(),
            asset_id,
            name: name.into(),
            artist: artist.into(),
            level: None,
            start_offset_ms: 0,
            catalog_entry: None,
        }
    }

    /// Equality over the user-visible fields, ignoring id and provenance.
    pub fn metadata_matches(&self, other: &VariantInfo) -> bool {
        self.name == other.name
            && self.artist == other.artist
            && self.start_offset_ms == other.start_offset_ms
            && self.level == other.level
    }
}

/// A variant backed by a file the user already has on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalVariant {
    #[serde(flatten)]
    pub info: VariantInfo,
    pub path: PathBuf,
}

impl LocalVariant {
    pub fn new(info: VariantInfo, path: impl Into<PathBuf>) -> Self {
        LocalVariant {
            info,
            path: path.into(),
        }
    }
}

/// A variant served from a direct download URL. `path` is set once the audio
/// has been fetched to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostedVariant {
    #[serde(flatten)]
    pub info: VariantInfo,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl HostedVariant {
    pub fn new(info: VariantInfo, url: impl Into<String>) -> Self {
        HostedVariant {
            info,
            url: url.into(),
            path: None,
        }
    }

    pub fn is_downloaded(&self) -> bool {
        self.path.as_deref().is_some_and(|p| p.exists())
    }
}

/// A variant referenced through a streaming service video id. `path` is set
/// once the audio has been extracted to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamedVariant {
    #[serde(flatten)]
    pub info: VariantInfo,
    pub video_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StreamedVariant {
    pub fn new(info: VariantInfo, video_id: impl Into<String>) -> Self {
        StreamedVariant {
            info,
            video_id: video_id.into(),
            path: None,
        }
    }
}

/// Which kind of source a variant is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    Local,
    Hosted,
    Streamed,
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VariantKind::Local => "local",
            VariantKind::Hosted => "hosted",
            VariantKind::Streamed => "streamed",
        };
        write!(f, "{s}")
    }
}

/// One playable audio source for an asset.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Local(LocalVariant),
    Hosted(HostedVariant),
    Streamed(StreamedVariant),
}

impl Variant {
    pub fn info(&self) -> &VariantInfo {
        match self {
            Variant::Local(v) => &v.info,
            Variant::Hosted(v) => &v.info,
            Variant::Streamed(v) => &v.info,
        }
    }

    pub fn info_mut(&mut self) -> &mut VariantInfo {
        match self {
            Variant::Local(v) => &mut v.info,
            Variant::Hosted(v) => &mut v.info,
            Variant::Streamed(v) => &mut v.info,
        }
    }

    pub fn id(&self) -> &VariantId {
        &self.info().id
    }

    pub fn asset_id(&self) -> AssetId {
        self.info().asset_id
    }

    pub fn kind(&self) -> VariantKind {
        match self {
            Variant::Local(_) => VariantKind::Local,
            Variant::Hosted(_) => VariantKind::Hosted,
            Variant::Streamed(_) => VariantKind::Streamed,
        }
    }

    /// Resolved filesystem path, if the audio is on disk.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Variant::Local(v) => Some(&v.path),
            Variant::Hosted(v) => v.path.as_deref(),
            Variant::Streamed(v) => v.path.as_deref(),
        }
    }

    pub fn set_path(&mut self, path: PathBuf) {
        match self {
            Variant::Local(v) => v.path = path,
            Variant::Hosted(v) => v.path = Some(path),
            Variant::Streamed(v) => v.path = Some(path),
        }
    }

    /// Hosted and streamed variants can be (re)fetched; locals cannot.
    pub fn is_downloadable(&self) -> bool {
        !matches!(self, Variant::Local(_))
    }

    /// Source equivalence used for duplicate rejection on add.
    ///
    /// Locals match on path, hosted on URL, streamed on video id, always
    /// together with the user-visible metadata. Different kinds never match.
    pub fn same_source(&self, other: &Variant) -> bool {
        if !self.info().metadata_matches(other.info()) {
            return false;
        }
        match (self, other) {
            (Variant::Local(a), Variant::Local(b)) => a.path == b.path,
            (Variant::Hosted(a), Variant::Hosted(b)) => a.url == b.url,
            (Variant::Streamed(a), Variant::Streamed(b)) => a.video_id == b.video_id,
            _ => false,
        }
    }
}

impl From<LocalVariant> for Variant {
    fn from(v: LocalVariant) -> Self {
        Variant::Local(v)
    }
}

impl From<HostedVariant> for Variant {
    fn from(v: HostedVariant) -> Self {
        Variant::Hosted(v)
    }
}

impl From<StreamedVariant> for Variant {
    fn from(v: StreamedVariant) -> Self {
        Variant::Streamed(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str) -> VariantInfo {
        VariantInfo::new(AssetId::new(42), name, "Artist")
    }

    #[test]
    fn test_catalog_key_derives_variant_id() {
        // Catalog ids may contain '-'; validated entry ids never do, so the
        // text after the last '-' is always the entry id.
        let key = CatalogEntryKey::new("song-file-hub", "e17");
        assert_eq!(key.variant_id(), VariantId::new("song-file-hub-e17"));
        // Stable across calls, unlike random ids.
        assert_eq!(key.variant_id(), key.variant_id());
    }

    #[test]
    fn test_random_variant_ids_are_unique() {
        assert_ne!(VariantId::random(), VariantId::random());
    }

    #[test]
    fn test_same_source_local() {
        let a = Variant::Local(LocalVariant::new(info("Song"), "/music/a.mp3"));
        let b = Variant::Local(LocalVariant::new(info("Song"), "/music/a.mp3"));
        let other_path = Variant::Local(LocalVariant::new(info("Song"), "/music/b.mp3"));
        assert!(a.same_source(&b));
        assert!(!a.same_source(&other_path));
    }

    #[test]
    fn test_same_source_hosted_requires_matching_metadata() {
        let a = Variant::Hosted(HostedVariant::new(info("Song"), "https://x/a.mp3"));
        let same = Variant::Hosted(HostedVariant::new(info("Song"), "https://x/a.mp3"));
        let renamed = Variant::Hosted(HostedVariant::new(info("Song v2"), "https://x/a.mp3"));
        assert!(a.same_source(&same));
        // Same URL under different metadata is a distinct variant.
        assert!(!a.same_source(&renamed));
    }

    #[test]
    fn test_same_source_never_crosses_kinds() {
        let local = Variant::Local(LocalVariant::new(info("Song"), "/music/a.mp3"));
        let hosted = Variant::Hosted(HostedVariant::new(info("Song"), "https://x/a.mp3"));
        assert!(!local.same_source(&hosted));
    }

    #[test]
    fn test_path_and_downloadable() {
        let mut hosted = Variant::Hosted(HostedVariant::new(info("Song"), "https://x/a.mp3"));
        assert!(hosted.is_downloadable());
        assert_eq!(hosted.path(), None);
        hosted.set_path(PathBuf::from("/data/nongs/abc.mp3"));
        assert_eq!(hosted.path(), Some(Path::new("/data/nongs/abc.mp3")));

        let local = Variant::Local(LocalVariant::new(info("Song"), "/music/a.mp3"));
        assert!(!local.is_downloadable());
        assert_eq!(local.path(), Some(Path::new("/music/a.mp3")));
    }

    #[test]
    fn test_hosted_serializes_flat() {
        let hosted = HostedVariant::new(info("Song"), "https://x/a.mp3");
        let value = serde_json::to_value(&hosted).unwrap();
        // Info fields sit next to url rather than under a nested object.
        assert!(value.get("id").is_some());
        assert!(value.get("url").is_some());
        assert!(value.get("info").is_none());
        assert!(value.get("path").is_none());
        assert!(value.get("level").is_none());

        let back: HostedVariant = serde_json::from_value(value).unwrap();
        assert_eq!(back, hosted);
    }
}
