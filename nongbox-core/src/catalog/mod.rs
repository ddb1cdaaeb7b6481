use crate::asset_id::AssetId;
use crate::variant::CatalogEntryKey;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub mod file;
mod manager;

pub use file::{
    CatalogFeatures, CatalogFile, CatalogLinks, ReportFeature, SubmitFeature, SubmitKind,
    CATALOG_SCHEMA_VERSION,
};
pub use manager::{CatalogError, CatalogManager, InstallOutcome};

use file::{CatalogNongs, HostedEntryFile, YoutubeEntryFile};

/// Where a catalog entry's audio comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum EntrySource {
    /// Direct download URL.
    Url(String),
    /// Streaming service video id.
    Video(String),
}

/// One downloadable variant description inside a catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub key: CatalogEntryKey,
    pub name: String,
    pub artist: String,
    pub start_offset_ms: i64,
    pub source: EntrySource,
    /// Assets this entry offers audio for.
    pub asset_ids: Vec<AssetId>,
    /// Level ids the entry is curated for, if the catalog lists any.
    pub levels: Vec<i64>,
}

/// A published catalog after validation, keyed into by entry id.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub id: String,
    pub name: String,
    /// The URL this catalog was actually fetched from.
    pub url: String,
    pub description: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub links: CatalogLinks,
    pub features: CatalogFeatures,
    pub entries: HashMap<String, CatalogEntry>,
}

/// An entry that failed validation and was left out of the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryIssue {
    pub entry_id: String,
    pub message: String,
}

impl Catalog {
    /// Build the in-memory catalog from a parsed document, stamping the URL
    /// the fetch actually used. Bad entries are skipped and reported; they
    /// never take the rest of the catalog down with them.
    pub(crate) fn from_file(file: CatalogFile, source_url: &str) -> (Catalog, Vec<EntryIssue>) {
        let catalog_id = file.id;
        let name = if file.name.trim().is_empty() {
            catalog_id.clone()
        } else {
            file.name
        };

        let mut entries = HashMap::new();
        let mut issues = Vec::new();
        collect_entries(&catalog_id, file.nongs, &mut entries, &mut issues);

        let catalog = Catalog {
            id: catalog_id,
            name,
            url: source_url.to_string(),
            description: file.description,
            last_update: file.last_update,
            links: file.links,
            features: file.features,
            entries,
        };
        (catalog, issues)
    }
}

fn collect_entries(
    catalog_id: &str,
    nongs: CatalogNongs,
    entries: &mut HashMap<String, CatalogEntry>,
    issues: &mut Vec<EntryIssue>,
) {
    // Sorted walk keeps issue ordering stable across runs.
    let mut hosted: Vec<(String, HostedEntryFile)> = nongs.hosted.into_iter().collect();
    hosted.sort_by(|a, b| a.0.cmp(&b.0));
    for (entry_id, e) in hosted {
        let checked = check_entry(&entry_id, &e.name, &e.url, "download URL", &e.songs);
        insert_entry(
            catalog_id,
            entry_id,
            checked,
            CatalogEntry {
                key: CatalogEntryKey::new(catalog_id, ""),
                name: e.name,
                artist: e.artist,
                start_offset_ms: e.start_offset,
                source: EntrySource::Url(e.url),
                asset_ids: adjust_songs(&e.songs),
                levels: e.levels,
            },
            entries,
            issues,
        );
    }

    let mut youtube: Vec<(String, YoutubeEntryFile)> = nongs.youtube.into_iter().collect();
    youtube.sort_by(|a, b| a.0.cmp(&b.0));
    for (entry_id, e) in youtube {
        let checked = check_entry(&entry_id, &e.name, &e.video_id, "video id", &e.songs);
        insert_entry(
            catalog_id,
            entry_id,
            checked,
            CatalogEntry {
                key: CatalogEntryKey::new(catalog_id, ""),
                name: e.name,
                artist: e.artist,
                start_offset_ms: e.start_offset,
                source: EntrySource::Video(e.video_id),
                asset_ids: adjust_songs(&e.songs),
                levels: e.levels,
            },
            entries,
            issues,
        );
    }
}

fn check_entry(
    entry_id: &str,
    name: &str,
    source: &str,
    source_label: &str,
    songs: &[i64],
) -> Option<String> {
    if entry_id.trim().is_empty() {
        return Some("entry has no id".to_string());
    }
    // A '-' inside the entry id would let two different keys derive the same
    // "<catalogId>-<entryId>" variant id.
    if entry_id.contains('-') {
        return Some("entry id contains '-'".to_string());
    }
    if name.trim().is_empty() {
        return Some("entry has no name".to_string());
    }
    if source.trim().is_empty() {
        return Some(format!("entry has no {source_label}"));
    }
    if songs.is_empty() {
        return Some("entry lists no songs".to_string());
    }
    None
}

fn insert_entry(
    catalog_id: &str,
    entry_id: String,
    issue: Option<String>,
    mut entry: CatalogEntry,
    entries: &mut HashMap<String, CatalogEntry>,
    issues: &mut Vec<EntryIssue>,
) {
    if let Some(message) = issue {
        issues.push(EntryIssue { entry_id, message });
        return;
    }
    if entries.contains_key(&entry_id) {
        issues.push(EntryIssue {
            entry_id,
            message: "duplicate entry id".to_string(),
        });
        return;
    }
    entry.key = CatalogEntryKey::new(catalog_id, entry_id.clone());
    entries.insert(entry_id, entry);
}

fn adjust_songs(songs: &[i64]) -> Vec<AssetId> {
    // Catalogs only describe remote songs, never bundled client tracks.
    songs.iter().map(|&raw| AssetId::adjust(raw, false)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> CatalogFile {
        serde_json::from_value(serde_json::json!({
            "manifest": 1,
            "id": "hub",
            "name": "Song File Hub",
            "nongs": {
                "hosted": {
                    "e1": {
                        "name": "Remix",
                        "artist": "A",
                        "startOffset": 1500,
                        "url": "https://hub.example/a.mp3",
                        "songs": [42, 43]
                    },
                    "nameless": { "url": "https://hub.example/b.mp3", "songs": [44] },
                    "unrouted": { "name": "Lost", "url": "https://hub.example/c.mp3", "songs": [] }
                },
                "youtube": {
                    "y1": { "name": "Cover", "videoId": "abc123", "songs": [42] },
                    "y2": { "name": "No id", "videoId": "", "songs": [42] }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_from_file_keeps_good_entries_and_reports_bad_ones() {
        let (catalog, issues) = Catalog::from_file(document(), "https://hub.example/catalog.json");

        assert_eq!(catalog.id, "hub");
        assert_eq!(catalog.url, "https://hub.example/catalog.json");
        assert_eq!(catalog.entries.len(), 2);

        let e1 = &catalog.entries["e1"];
        assert_eq!(e1.key, CatalogEntryKey::new("hub", "e1"));
        assert_eq!(e1.start_offset_ms, 1500);
        assert_eq!(e1.asset_ids, vec![AssetId::new(42), AssetId::new(43)]);
        assert!(matches!(e1.source, EntrySource::Url(ref u) if u == "https://hub.example/a.mp3"));

        let y1 = &catalog.entries["y1"];
        assert!(matches!(y1.source, EntrySource::Video(ref v) if v == "abc123"));

        let mut flagged: Vec<&str> = issues.iter().map(|i| i.entry_id.as_str()).collect();
        flagged.sort();
        assert_eq!(flagged, vec!["nameless", "unrouted", "y2"]);
    }

    #[test]
    fn test_from_file_rejects_blank_and_dashed_entry_ids() {
        let doc: CatalogFile = serde_json::from_value(serde_json::json!({
            "manifest": 1,
            "id": "hub",
            "name": "Song File Hub",
            "nongs": {
                "hosted": {
                    "good": { "name": "Remix", "url": "https://hub.example/a.mp3", "songs": [42] },
                    "bad-id": { "name": "Dashed", "url": "https://hub.example/b.mp3", "songs": [42] },
                    "": { "name": "Blank", "url": "https://hub.example/c.mp3", "songs": [42] }
                }
            }
        }))
        .unwrap();
        let (catalog, issues) = Catalog::from_file(doc, "https://hub.example/catalog.json");

        assert_eq!(catalog.entries.len(), 1);
        assert!(catalog.entries.contains_key("good"));
        let mut flagged: Vec<(&str, &str)> = issues
            .iter()
            .map(|i| (i.entry_id.as_str(), i.message.as_str()))
            .collect();
        flagged.sort();
        assert_eq!(
            flagged,
            vec![("", "entry has no id"), ("bad-id", "entry id contains '-'")]
        );
    }

    #[test]
    fn test_from_file_falls_back_to_id_for_blank_name() {
        let mut doc = document();
        doc.name = String::new();
        let (catalog, _) = Catalog::from_file(doc, "https://hub.example/catalog.json");
        assert_eq!(catalog.name, "hub");
    }
}
