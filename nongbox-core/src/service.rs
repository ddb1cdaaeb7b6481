use crate::asset_id::AssetId;
use crate::catalog::CatalogManager;
use crate::data_dir::DataDir;
use crate::download::{
    DownloadError, DownloadManager, HttpTransport, TransferUpdate, Transport,
};
use crate::events::{Event, EventBus};
use crate::file_picker::{validate_audio_path, FilePicker, PickError};
use crate::legacy::{self, MigrationError};
use crate::manifest_store::{ManifestError, ManifestStore};
use crate::settings::{CatalogSource, Settings};
use crate::variant::{CatalogEntryKey, LocalVariant, Variant, VariantId, VariantInfo};
use crate::variant_set::DefaultSeed;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("Download error: {0}")]
    Download(#[from] DownloadError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
    #[error("File pick error: {0}")]
    Pick(#[from] PickError),
    #[error("Service is no longer running")]
    Stopped,
}

/// Requests the control loop accepts over the handle.
///
/// Commands are fire-and-forget; results surface as events. Embedders that
/// run the service on their own thread call the operation methods directly
/// instead and get `Result`s back.
#[derive(Debug)]
pub enum Command {
    EnsureAsset {
        asset_id: AssetId,
        seed: DefaultSeed,
    },
    AddLocalVariant {
        asset_id: AssetId,
        name: String,
        artist: String,
        start_offset_ms: i64,
        path: PathBuf,
    },
    SelectVariant {
        asset_id: AssetId,
        variant_id: VariantId,
    },
    DeleteVariant {
        asset_id: AssetId,
        variant_id: VariantId,
        delete_audio_file: bool,
    },
    DeleteVariantAudio {
        asset_id: AssetId,
        variant_id: VariantId,
    },
    DeleteAllVariants {
        asset_id: AssetId,
        delete_audio_files: bool,
    },
    DownloadVariant {
        asset_id: AssetId,
        variant_id: VariantId,
    },
    RefreshCatalogs,
    SaveAll,
}

/// Handle for sending commands and subscribing to events.
#[derive(Clone)]
pub struct NongServiceHandle {
    commands_tx: mpsc::UnboundedSender<Command>,
    events: EventBus,
}

impl NongServiceHandle {
    pub fn send(&self, command: Command) -> Result<(), ServiceError> {
        self.commands_tx
            .send(command)
            .map_err(|_| ServiceError::Stopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

/// Owns the whole subsystem and runs its control loop.
///
/// Handles:
/// - startup: manifest scan, cached catalog warm start, entry registration,
///   one-shot legacy migration
/// - commands from handles and completion messages from transfer tasks,
///   multiplexed on one task so no other synchronization exists
/// - the operation surface (`ensure_asset`, `add_local_variant`, selection,
///   deletion, downloads, catalog refresh) for direct same-thread callers
pub struct NongService {
    store: ManifestStore,
    catalogs: CatalogManager,
    downloads: DownloadManager,
    settings: Settings,
    events: EventBus,
    transport: Arc<dyn Transport>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    transfers_tx: mpsc::UnboundedSender<TransferUpdate>,
    transfers_rx: mpsc::UnboundedReceiver<TransferUpdate>,
}

impl NongService {
    pub fn new(dir: DataDir, settings: Settings) -> Self {
        Self::with_transport(dir, settings, Arc::new(HttpTransport::new()))
    }

    pub fn with_transport(
        dir: DataDir,
        settings: Settings,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let events = EventBus::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (transfers_tx, transfers_rx) = mpsc::unbounded_channel();
        let store = ManifestStore::new(dir.clone(), events.clone());
        let catalogs = CatalogManager::new(dir.clone(), events.clone());
        let downloads = DownloadManager::new(
            dir,
            events.clone(),
            Arc::clone(&transport),
            transfers_tx.clone(),
        );
        NongService {
            store,
            catalogs,
            downloads,
            settings,
            events,
            transport,
            commands_tx,
            commands_rx,
            transfers_tx,
            transfers_rx,
        }
    }

    pub fn handle(&self) -> NongServiceHandle {
        NongServiceHandle {
            commands_tx: self.commands_tx.clone(),
            events: self.events.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    pub fn catalogs(&self) -> &CatalogManager {
        &self.catalogs
    }

    pub fn catalog_sources(&self) -> Vec<CatalogSource> {
        self.settings.catalog_sources()
    }

    /// True once if a corrupt manifest was set aside during any startup since
    /// the notice was last taken.
    pub fn take_corruption_notice(&mut self) -> bool {
        self.settings.take_corruption_notice()
    }

    /// Load everything from disk: manifests, cached catalogs, the one-shot
    /// legacy migration, then entry registrations. No network is touched.
    ///
    /// Migration runs before registration so sets it creates pick up cached
    /// catalog entries like any other.
    pub fn startup(&mut self) -> Result<(), ServiceError> {
        self.store.initialize(&mut self.settings)?;
        let cached = self
            .catalogs
            .warm_start(&self.settings.enabled_catalog_sources());
        if !cached.is_empty() {
            debug!("Warm-started {} cached catalogs", cached.len());
        }
        legacy::migrate_if_needed(&mut self.store, &mut self.settings, true)?;
        for set in self.store.sets_mut() {
            self.catalogs.register_into(set);
        }
        Ok(())
    }

    /// Drive the control loop: commands from handles and completions from
    /// transfer tasks, multiplexed on the calling task. Spawn once after
    /// [`startup`]; it runs for the embedder's lifetime.
    ///
    /// [`startup`]: NongService::startup
    pub async fn run(mut self) {
        self.refresh_catalogs();
        loop {
            tokio::select! {
                command = self.commands_rx.recv() => {
                    // Never None: the service keeps a sender for minting
                    // handles.
                    if let Some(command) = command {
                        self.handle_command(command);
                    }
                }
                update = self.transfers_rx.recv() => {
                    // Never None: the service holds a sender itself.
                    if let Some(update) = update {
                        self.handle_transfer(update);
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        let result = match command {
            Command::EnsureAsset { asset_id, seed } => {
                self.ensure_asset(asset_id, seed);
                Ok(())
            }
            Command::AddLocalVariant {
                asset_id,
                name,
                artist,
                start_offset_ms,
                path,
            } => self
                .add_local_variant(asset_id, name, artist, start_offset_ms, path)
                .map(|_| ()),
            Command::SelectVariant {
                asset_id,
                variant_id,
            } => self.select_variant(asset_id, &variant_id),
            Command::DeleteVariant {
                asset_id,
                variant_id,
                delete_audio_file,
            } => self.delete_variant(asset_id, &variant_id, delete_audio_file),
            Command::DeleteVariantAudio {
                asset_id,
                variant_id,
            } => self.delete_variant_audio(asset_id, &variant_id),
            Command::DeleteAllVariants {
                asset_id,
                delete_audio_files,
            } => self.delete_all_variants(asset_id, delete_audio_files),
            Command::DownloadVariant {
                asset_id,
                variant_id,
            } => self.download_variant(asset_id, &variant_id),
            Command::RefreshCatalogs => {
                self.refresh_catalogs();
                Ok(())
            }
            Command::SaveAll => self.save_all(),
        };
        if let Err(e) = result {
            warn!("Command failed: {}", e);
        }
    }

    /// Apply every transfer update that has arrived so far.
    ///
    /// Embedders that call operations directly instead of spawning [`run`]
    /// pump this from their own loop to pick up catalog and download results.
    ///
    /// [`run`]: NongService::run
    pub fn poll_transfers(&mut self) {
        while let Ok(update) = self.transfers_rx.try_recv() {
            self.handle_transfer(update);
        }
    }

    fn handle_transfer(&mut self, update: TransferUpdate) {
        match update {
            TransferUpdate::CatalogFetched { url, result } => match result {
                Ok(payload) => self.apply_catalog(&url, &payload),
                Err(e) => warn!("Catalog fetch from {} failed: {}", url, e),
            },
            TransferUpdate::DownloadProgress {
                variant_id,
                received,
                total,
            } => {
                self.downloads.handle_progress(&variant_id, received, total);
            }
            TransferUpdate::DownloadDone { variant_id, result } => {
                self.downloads
                    .handle_done(&mut self.store, &variant_id, result);
            }
        }
    }

    /// Track an asset, seeding its default on first sight, and register any
    /// catalog entries that apply to it.
    pub fn ensure_asset(&mut self, asset_id: AssetId, seed: DefaultSeed) {
        let set = self.store.ensure(asset_id, seed);
        self.catalogs.register_into(set);
    }

    /// Add an already-built variant to a tracked asset.
    pub fn add_variant(
        &mut self,
        asset_id: AssetId,
        variant: Variant,
    ) -> Result<VariantId, ServiceError> {
        Ok(self.store.add_variant(asset_id, variant)?)
    }

    /// Validate and add a user-provided audio file as a local variant.
    pub fn add_local_variant(
        &mut self,
        asset_id: AssetId,
        name: String,
        artist: String,
        start_offset_ms: i64,
        path: PathBuf,
    ) -> Result<VariantId, ServiceError> {
        validate_audio_path(&path)?;
        let mut info = VariantInfo::new(asset_id, name, artist);
        info.start_offset_ms = start_offset_ms;
        let variant = Variant::Local(LocalVariant::new(info, path));
        Ok(self.store.add_variant(asset_id, variant)?)
    }

    /// Ask the picker for a file and add it. `Ok(None)` means the user
    /// cancelled the dialog.
    pub async fn pick_and_add(
        &mut self,
        picker: &dyn FilePicker,
        asset_id: AssetId,
        name: String,
        artist: String,
        start_offset_ms: i64,
    ) -> Result<Option<VariantId>, ServiceError> {
        let Some(path) = picker.pick_audio_file().await else {
            return Ok(None);
        };
        self.add_local_variant(asset_id, name, artist, start_offset_ms, path)
            .map(Some)
    }

    pub fn select_variant(
        &mut self,
        asset_id: AssetId,
        variant_id: &VariantId,
    ) -> Result<(), ServiceError> {
        Ok(self.store.select_variant(asset_id, variant_id)?)
    }

    pub fn delete_variant(
        &mut self,
        asset_id: AssetId,
        variant_id: &VariantId,
        delete_audio_file: bool,
    ) -> Result<(), ServiceError> {
        Ok(self
            .store
            .delete_variant(asset_id, variant_id, delete_audio_file)?)
    }

    pub fn delete_variant_audio(
        &mut self,
        asset_id: AssetId,
        variant_id: &VariantId,
    ) -> Result<(), ServiceError> {
        Ok(self.store.delete_variant_audio(asset_id, variant_id)?)
    }

    pub fn delete_all_variants(
        &mut self,
        asset_id: AssetId,
        delete_audio_files: bool,
    ) -> Result<(), ServiceError> {
        Ok(self
            .store
            .delete_all_variants(asset_id, delete_audio_files)?)
    }

    /// Swap a variant in place, keeping its id and selection.
    pub fn replace_variant(
        &mut self,
        asset_id: AssetId,
        variant_id: &VariantId,
        variant: Variant,
    ) -> Result<(), ServiceError> {
        Ok(self.store.replace_variant(asset_id, variant_id, variant)?)
    }

    /// Update an asset's default metadata once the host has its song record.
    pub fn refresh_default(
        &mut self,
        asset_id: AssetId,
        seed: &DefaultSeed,
    ) -> Result<bool, ServiceError> {
        Ok(self.store.refresh_default(asset_id, seed)?)
    }

    /// Start a non-blocking download of a hosted variant or a registered
    /// catalog entry. Completion and progress arrive as events.
    pub fn download_variant(
        &mut self,
        asset_id: AssetId,
        variant_id: &VariantId,
    ) -> Result<(), ServiceError> {
        let set = self
            .store
            .get_mut(asset_id)
            .ok_or(ManifestError::UnknownAsset(asset_id))?;
        // A just-installed catalog may not be registered into this set yet.
        self.catalogs.register_into(set);
        self.downloads.start(set, &self.catalogs, variant_id)?;
        Ok(())
    }

    /// Catalog entries for an asset that have no materialized variant yet.
    pub fn downloadable_entries(&self, asset_id: AssetId) -> Vec<CatalogEntryKey> {
        match self.store.get(asset_id) {
            Some(set) => set.unmaterialized_entries().into_iter().cloned().collect(),
            None => self.catalogs.entries_for(asset_id).to_vec(),
        }
    }

    /// Fetch every enabled catalog source in the background. Results come
    /// back through the transfer channel and are installed as they arrive.
    pub fn refresh_catalogs(&mut self) {
        let sources = self.settings.enabled_catalog_sources();
        if sources.is_empty() {
            debug!("No enabled catalog sources to fetch");
            return;
        }
        info!("Fetching {} catalog sources", sources.len());
        for source in sources {
            let transport = Arc::clone(&self.transport);
            let updates = self.transfers_tx.clone();
            tokio::spawn(async move {
                let result = transport.fetch(&source.url, None).await;
                let _ = updates.send(TransferUpdate::CatalogFetched {
                    url: source.url,
                    result,
                });
            });
        }
    }

    /// Replace the configured source list. Catalogs from sources no longer
    /// listed are dropped along with every registration pointing into them.
    pub fn set_catalog_sources(&mut self, sources: Vec<CatalogSource>) {
        for old in self.settings.catalog_sources() {
            if sources.iter().any(|s| s.url == old.url) {
                continue;
            }
            if let Some(catalog_id) = self.catalogs.remove_by_url(&old.url) {
                self.store.unregister_catalog(&catalog_id);
            }
        }
        self.settings.set_catalog_sources(&sources);
    }

    pub fn save_all(&mut self) -> Result<(), ServiceError> {
        Ok(self.store.save(None)?)
    }

    fn apply_catalog(&mut self, url: &str, payload: &[u8]) {
        match self.catalogs.install_fetched(payload, url) {
            Ok(outcome) => {
                if outcome.replaced {
                    // Registrations into the replaced instance would dangle.
                    self.store.unregister_catalog(&outcome.catalog_id);
                }
                for set in self.store.sets_mut() {
                    self.catalogs.register_into(set);
                }
            }
            Err(e) => warn!("Discarding catalog from {}: {}", url, e),
        }
    }
}
