use crate::asset_id::AssetId;
use crate::catalog::{CatalogManager, EntrySource};
use crate::data_dir::DataDir;
use crate::events::{DownloadSource, Event, EventBus};
use crate::file_picker::AUDIO_EXTENSIONS;
use crate::manifest_store::ManifestStore;
use crate::variant::{CatalogEntryKey, HostedVariant, Variant, VariantId, VariantInfo};
use crate::variant_set::{VariantRef, VariantSet};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub mod transport;

pub use transport::{HttpTransport, ProgressCallback, Transport, TransportError};

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("No downloadable variant or catalog entry with id {0}")]
    NotFound(VariantId),
    #[error("Variant {0} is already downloaded")]
    AlreadyDownloaded(VariantId),
    #[error("A download for variant {0} is already running")]
    InProgress(VariantId),
    #[error("Streamed sources cannot be downloaded yet")]
    StreamedUnsupported,
}

/// Messages transfer tasks send back to the control loop. Transfers never
/// touch shared state themselves; every mutation happens where these are
/// received.
#[derive(Debug)]
pub enum TransferUpdate {
    /// A catalog fetch completed.
    CatalogFetched {
        url: String,
        result: Result<Vec<u8>, TransportError>,
    },
    /// Bytes arrived for a variant download.
    DownloadProgress {
        variant_id: VariantId,
        received: u64,
        total: u64,
    },
    /// A variant download completed.
    DownloadDone {
        variant_id: VariantId,
        result: Result<Vec<u8>, TransportError>,
    },
}

/// Snapshot of what to do with the bytes, taken when the transfer starts so
/// a catalog refresh mid-download cannot change the outcome.
enum PendingSource {
    /// Refetch of a hosted variant already in the set.
    Variant { url: String },
    /// Materialization of a catalog entry into, on success, a new hosted
    /// variant.
    Entry {
        key: CatalogEntryKey,
        name: String,
        artist: String,
        start_offset_ms: i64,
        url: String,
    },
}

impl PendingSource {
    fn url(&self) -> &str {
        match self {
            PendingSource::Variant { url } => url,
            PendingSource::Entry { url, .. } => url,
        }
    }
}

struct InFlight {
    asset_id: AssetId,
    source: PendingSource,
    /// Highest fraction reported so far; `None` until the first report.
    last_fraction: Option<f32>,
}

/// Runs variant downloads without ever blocking callers.
///
/// Handles:
/// - resolving what a variant id means (hosted refetch or catalog entry)
/// - one transfer per variant id at a time
/// - progress fan-out that never repeats or lowers a fraction
/// - completion: write under `nongs/`, update the set, persist, notify,
///   and roll the file back when the set rejects the result
pub struct DownloadManager {
    dir: DataDir,
    events: EventBus,
    transport: Arc<dyn Transport>,
    updates: mpsc::UnboundedSender<TransferUpdate>,
    in_flight: HashMap<VariantId, InFlight>,
}

impl DownloadManager {
    pub fn new(
        dir: DataDir,
        events: EventBus,
        transport: Arc<dyn Transport>,
        updates: mpsc::UnboundedSender<TransferUpdate>,
    ) -> Self {
        DownloadManager {
            dir,
            events,
            transport,
            updates,
            in_flight: HashMap::new(),
        }
    }

    pub fn is_downloading(&self, variant_id: &VariantId) -> bool {
        self.in_flight.contains_key(variant_id)
    }

    /// Kick off a download for a variant id and return immediately.
    ///
    /// Resolution order: a variant already in the set (hosted refetch,
    /// streamed rejected), then a registered catalog entry with that derived
    /// id. Completion and failures arrive as events.
    pub fn start(
        &mut self,
        set: &VariantSet,
        catalogs: &CatalogManager,
        variant_id: &VariantId,
    ) -> Result<(), DownloadError> {
        if self.in_flight.contains_key(variant_id) {
            return Err(DownloadError::InProgress(variant_id.clone()));
        }
        let asset_id = set.asset_id();

        if let Some(variant) = set.find(variant_id) {
            return match variant {
                VariantRef::Local(_) => Err(DownloadError::NotFound(variant_id.clone())),
                VariantRef::Streamed(_) => Err(DownloadError::StreamedUnsupported),
                VariantRef::Hosted(v) if v.is_downloaded() => {
                    Err(DownloadError::AlreadyDownloaded(variant_id.clone()))
                }
                VariantRef::Hosted(v) => {
                    self.spawn_transfer(
                        asset_id,
                        variant_id.clone(),
                        PendingSource::Variant { url: v.url.clone() },
                    );
                    Ok(())
                }
            };
        }

        if let Some(key) = set.registered_entry_for(variant_id) {
            if let Some(entry) = catalogs.resolve(key) {
                return match &entry.source {
                    EntrySource::Video(_) => Err(DownloadError::StreamedUnsupported),
                    EntrySource::Url(url) => {
                        self.spawn_transfer(
                            asset_id,
                            variant_id.clone(),
                            PendingSource::Entry {
                                key: key.clone(),
                                name: entry.name.clone(),
                                artist: entry.artist.clone(),
                                start_offset_ms: entry.start_offset_ms,
                                url: url.clone(),
                            },
                        );
                        Ok(())
                    }
                };
            }
        }

        Err(DownloadError::NotFound(variant_id.clone()))
    }

    fn spawn_transfer(&mut self, asset_id: AssetId, variant_id: VariantId, source: PendingSource) {
        let url = source.url().to_string();
        info!("Starting download of {} from {}", variant_id, url);
        self.in_flight.insert(
            variant_id.clone(),
            InFlight {
                asset_id,
                source,
                last_fraction: None,
            },
        );

        let transport = Arc::clone(&self.transport);
        let updates = self.updates.clone();
        let progress_updates = self.updates.clone();
        let progress_id = variant_id.clone();
        let progress: ProgressCallback = Box::new(move |received, total| {
            let _ = progress_updates.send(TransferUpdate::DownloadProgress {
                variant_id: progress_id.clone(),
                received,
                total,
            });
        });
        tokio::spawn(async move {
            let result = transport.fetch(&url, Some(progress)).await;
            let _ = updates.send(TransferUpdate::DownloadDone { variant_id, result });
        });
    }

    /// Fold a progress report into an event. The first report of a transfer
    /// always goes out; later ones only when the fraction strictly rises,
    /// even if the server's totals shift mid-transfer.
    pub fn handle_progress(&mut self, variant_id: &VariantId, received: u64, total: u64) {
        let Some(flight) = self.in_flight.get_mut(variant_id) else {
            return;
        };
        let fraction = if total > 0 {
            (received as f32 / total as f32).clamp(0.0, 1.0)
        } else {
            0.0
        };
        if flight.last_fraction.is_some_and(|last| fraction <= last) {
            return;
        }
        flight.last_fraction = Some(fraction);
        let asset_id = flight.asset_id;
        self.events.emit(Event::DownloadProgress {
            asset_id,
            variant_id: variant_id.clone(),
            fraction,
        });
    }

    /// Land a finished transfer: write the audio, update the owning set,
    /// persist and notify. An empty payload or a set that rejects the result
    /// fails the download and leaves no file behind.
    pub fn handle_done(
        &mut self,
        store: &mut ManifestStore,
        variant_id: &VariantId,
        result: Result<Vec<u8>, TransportError>,
    ) {
        let Some(flight) = self.in_flight.remove(variant_id) else {
            warn!("Completion for unknown download {}", variant_id);
            return;
        };
        let asset_id = flight.asset_id;

        let bytes = match result {
            Err(e) => {
                self.fail(asset_id, variant_id, failure_message(&e));
                return;
            }
            Ok(bytes) if bytes.is_empty() => {
                self.fail(asset_id, variant_id, "Received an empty file".to_string());
                return;
            }
            Ok(bytes) => bytes,
        };

        let extension = extension_from_url(flight.source.url());
        let path = self.dir.nong_path(variant_id, &extension);
        if let Err(e) = std::fs::write(&path, &bytes) {
            warn!("Failed to write {}: {}", path.display(), e);
            self.fail(asset_id, variant_id, "Could not write the audio file".to_string());
            return;
        }

        let Some(set) = store.get_mut(asset_id) else {
            warn!("Download {} finished for untracked asset {}", variant_id, asset_id);
            remove_partial(&path);
            self.fail(asset_id, variant_id, "Asset is no longer tracked".to_string());
            return;
        };

        let (source, variant) = match flight.source {
            PendingSource::Variant { .. } => {
                if let Err(e) = set.set_variant_path(variant_id, path.clone()) {
                    warn!("Downloaded variant {} vanished: {}", variant_id, e);
                    remove_partial(&path);
                    self.fail(asset_id, variant_id, "Variant no longer exists".to_string());
                    return;
                }
                match set.find(variant_id) {
                    Some(v) => (
                        DownloadSource::Variant {
                            variant_id: variant_id.clone(),
                        },
                        v.to_owned(),
                    ),
                    None => {
                        remove_partial(&path);
                        self.fail(asset_id, variant_id, "Variant no longer exists".to_string());
                        return;
                    }
                }
            }
            PendingSource::Entry {
                key,
                name,
                artist,
                start_offset_ms,
                url,
            } => {
                let mut info = VariantInfo::new(asset_id, name, artist);
                info.id = variant_id.clone();
                info.start_offset_ms = start_offset_ms;
                info.catalog_entry = Some(key.clone());
                let mut hosted = HostedVariant::new(info, url);
                hosted.path = Some(path.clone());

                match set.add(Variant::Hosted(hosted)) {
                    Err(e) => {
                        warn!("Set rejected downloaded entry {}: {}", key, e);
                        remove_partial(&path);
                        self.fail(asset_id, variant_id, e.to_string());
                        return;
                    }
                    Ok(added) => {
                        let variant = added.to_owned();
                        // A freshly fetched catalog entry becomes the pick.
                        if let Err(e) = set.set_active(variant_id) {
                            warn!("Could not activate downloaded variant {}: {}", variant_id, e);
                        }
                        (DownloadSource::Catalog { key }, variant)
                    }
                }
            }
        };

        if let Err(e) = store.save(Some(asset_id)) {
            warn!("Failed to persist asset {} after download: {}", asset_id, e);
        }
        info!("Download of {} finished", variant_id);
        self.events.emit(Event::DownloadFinished {
            asset_id,
            source,
            variant,
        });
    }

    fn fail(&self, asset_id: AssetId, variant_id: &VariantId, message: String) {
        warn!("Download of {} failed: {}", variant_id, message);
        self.events.emit(Event::DownloadFailed {
            asset_id,
            variant_id: variant_id.clone(),
            message,
        });
    }
}

/// Turn transport failures into strings fit for direct display.
fn failure_message(error: &TransportError) -> String {
    match error {
        TransportError::Status(503) => {
            "The song host is under maintenance, try again later".to_string()
        }
        TransportError::Status(code) => format!("Download failed with status {code}"),
        TransportError::Network(message) => format!("Download failed: {message}"),
    }
}

/// Extract the audio extension from a download URL, defaulting to mp3.
///
/// Parses the URL and reads the extension off its path component, so query
/// strings and fragments never leak into file names.
fn extension_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed.path().rsplit('.').next().and_then(|ext| {
                let lower = ext.to_lowercase();
                if AUDIO_EXTENSIONS.contains(&lower.as_str()) {
                    Some(lower)
                } else {
                    None
                }
            })
        })
        .unwrap_or_else(|| "mp3".to_string())
}

fn remove_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("Failed to remove partial download {}: {}", path.display(), e);
    }
}
