use crate::asset_id::AssetId;
use crate::variant::{CatalogEntryKey, Variant, VariantId};
use tokio::sync::broadcast;

/// Where a finished download came from.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadSource {
    /// An already-known hosted or streamed variant was fetched to disk.
    Variant { variant_id: VariantId },
    /// A catalog entry was materialized into a brand-new variant.
    Catalog { key: CatalogEntryKey },
}

/// Events published to UI layers and other observers.
///
/// Fan-out replaces per-concern listener registration: subscribers get one
/// typed stream and filter for what they care about. Delivery is
/// fire-and-forget; a slow subscriber drops oldest events.
#[derive(Debug, Clone)]
pub enum Event {
    /// The active selection or variant list of an asset changed.
    StateChanged { asset_id: AssetId },
    /// A variant was removed from an asset's set.
    VariantDeleted {
        asset_id: AssetId,
        variant_id: VariantId,
    },
    /// Bytes arrived for an in-flight download. `fraction` is in `0.0..=1.0`
    /// and never decreases for a given transfer; it stays at `0.0` when the
    /// host does not announce a length.
    DownloadProgress {
        asset_id: AssetId,
        variant_id: VariantId,
        fraction: f32,
    },
    /// A download finished and the set was updated.
    DownloadFinished {
        asset_id: AssetId,
        source: DownloadSource,
        variant: Variant,
    },
    /// A download was abandoned. `message` is ready for direct display.
    DownloadFailed {
        asset_id: AssetId,
        variant_id: VariantId,
        message: String,
    },
    /// A catalog entry failed validation and was skipped.
    CatalogEntryError { catalog_id: String, message: String },
}

/// Cloneable publish side of the event stream.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish to whoever is listening. No subscribers is not an error.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
