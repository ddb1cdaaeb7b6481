use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Catalog wire schema version this build understands.
pub const CATALOG_SCHEMA_VERSION: u32 = 1;

/// A catalog document as published. Field names are camelCase on the wire;
/// `manifest` carries the schema version.
///
/// Everything except `manifest` and `id` is optional or defaulted, so a
/// sparse document parses and entry-level validation decides what survives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogFile {
    pub manifest: u32,
    /// Self-declared source URL. The fetcher stamps the URL it actually
    /// used, which wins over this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub links: CatalogLinks,
    #[serde(default)]
    pub features: CatalogFeatures,
    #[serde(default)]
    pub nongs: CatalogNongs,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<String>,
}

/// Optional interactions a catalog offers beyond downloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFeatures {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit: Option<SubmitFeature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportFeature>,
}

/// Where and what the catalog accepts as user submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitFeature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub accepts: Vec<SubmitKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitKind {
    Local,
    Hosted,
    Youtube,
}

/// Where to report broken or mislabeled entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFeature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The entry collections, one map per source kind, keyed by entry id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogNongs {
    #[serde(default)]
    pub hosted: HashMap<String, HostedEntryFile>,
    #[serde(default)]
    pub youtube: HashMap<String, YoutubeEntryFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostedEntryFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artist: String,
    /// Playback start offset in milliseconds.
    #[serde(default)]
    pub start_offset: i64,
    #[serde(default)]
    pub url: String,
    /// Raw song ids this entry applies to.
    #[serde(default)]
    pub songs: Vec<i64>,
    /// Level ids the entry is curated for.
    #[serde(default)]
    pub levels: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YoutubeEntryFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub start_offset: i64,
    #[serde(default)]
    pub video_id: String,
    #[serde(default)]
    pub songs: Vec<i64>,
    #[serde(default)]
    pub levels: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_camel_case_document() {
        let json = r#"{
            "manifest": 1,
            "url": "https://hub.example/catalog.json",
            "id": "hub",
            "name": "Song File Hub",
            "description": "Community uploads",
            "lastUpdate": "2025-04-01T12:00:00Z",
            "links": { "discord": "https://discord.gg/hub" },
            "features": {
                "submit": { "url": "https://hub.example/submit", "accepts": ["hosted", "youtube"] },
                "report": { "url": "https://hub.example/report" }
            },
            "nongs": {
                "hosted": {
                    "e1": {
                        "name": "Remix",
                        "artist": "A",
                        "startOffset": 1500,
                        "url": "https://hub.example/a.mp3",
                        "songs": [42],
                        "levels": [91001]
                    }
                },
                "youtube": {
                    "y1": { "name": "Cover", "videoId": "abc123", "songs": [42] }
                }
            }
        }"#;

        let file: CatalogFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.manifest, CATALOG_SCHEMA_VERSION);
        assert_eq!(file.id, "hub");
        assert!(file.last_update.is_some());
        assert_eq!(file.links.discord.as_deref(), Some("https://discord.gg/hub"));
        let submit = file.features.submit.unwrap();
        assert_eq!(submit.accepts, vec![SubmitKind::Hosted, SubmitKind::Youtube]);
        assert_eq!(file.nongs.hosted["e1"].start_offset, 1500);
        assert_eq!(file.nongs.hosted["e1"].levels, vec![91001]);
        assert_eq!(file.nongs.youtube["y1"].video_id, "abc123");
    }

    #[test]
    fn test_sparse_document_parses_with_defaults() {
        let file: CatalogFile = serde_json::from_str(r#"{"manifest": 1, "id": "tiny"}"#).unwrap();
        assert_eq!(file.id, "tiny");
        assert!(file.name.is_empty());
        assert!(file.nongs.hosted.is_empty());
        assert!(file.features.submit.is_none());
    }

    #[test]
    fn test_missing_version_is_a_parse_error() {
        let result = serde_json::from_str::<CatalogFile>(r#"{"id": "hub"}"#);
        assert!(result.is_err());
    }
}
