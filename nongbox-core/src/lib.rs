//! Per-asset audio variant management: local, hosted and streamed
//! alternatives to a game's built-in songs, persisted as one JSON manifest
//! per asset, enriched by published catalogs and fetched without ever
//! blocking the caller.

pub mod asset_id;
pub mod catalog;
pub mod data_dir;
pub mod download;
pub mod events;
pub mod file_picker;
pub mod legacy;
pub mod manifest_store;
pub mod service;
pub mod settings;
pub mod variant;
pub mod variant_set;

pub use asset_id::AssetId;
pub use catalog::{
    Catalog, CatalogEntry, CatalogError, CatalogManager, EntrySource, InstallOutcome,
};
pub use data_dir::DataDir;
pub use download::{
    DownloadError, DownloadManager, HttpTransport, ProgressCallback, Transport, TransportError,
};
pub use events::{DownloadSource, Event, EventBus};
pub use file_picker::{validate_audio_path, FilePicker, PickError, AUDIO_EXTENSIONS};
pub use legacy::{migrate_if_needed, MigrationError, MigrationReport};
pub use manifest_store::{ManifestError, ManifestStore};
pub use service::{Command, NongService, NongServiceHandle, ServiceError};
pub use settings::{CatalogSource, MemorySettings, Settings, SettingsStore, DEFAULT_CATALOG_URL};
pub use variant::{
    CatalogEntryKey, HostedVariant, LocalVariant, StreamedVariant, Variant, VariantId, VariantInfo,
    VariantKind,
};
pub use variant_set::{DefaultSeed, VariantRef, VariantSet, VariantSetError};
