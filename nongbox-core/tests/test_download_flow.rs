//! Integration tests for the download pipeline and the service around it.
//!
//! Tests:
//! - Hosted variant fetch: selection gating, progress and completion events
//! - Guard errors: unknown ids, double starts, refetches, streamed sources
//! - Displayable failure messages for server errors
//! - Catalog entry materialization with automatic selection
//! - Empty payloads failing without leaving variants or files behind
//! - The spawned control loop end to end, commands in and events out

mod support;

use nongbox_core::{
    AssetId, CatalogEntryKey, CatalogSource, Command, DataDir, DefaultSeed, DownloadError,
    DownloadSource, Event, HostedVariant, ManifestError, NongService, ServiceError, Settings,
    StreamedVariant, Variant, VariantId, VariantInfo, VariantSetError,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;

const CATALOG_URL: &str = "https://hub.example/catalog.json";
const ENTRY_URL: &str = "https://hub.example/audio/e1.mp3";

fn touch(tmp: &TempDir, name: &str) -> PathBuf {
    let path = tmp.path().join(name);
    std::fs::write(&path, b"audio").unwrap();
    path
}

/// Started service over a temp directory with a mock transport and no
/// configured catalog sources.
fn setup(tmp: &TempDir) -> (NongService, Arc<support::MockTransport>) {
    let transport = Arc::new(support::MockTransport::new());
    let mut service = NongService::with_transport(
        DataDir::new(tmp.path().join("save")),
        Settings::in_memory(),
        transport.clone(),
    );
    service.set_catalog_sources(vec![]);
    service.startup().unwrap();
    (service, transport)
}

fn hosted(asset_id: AssetId, name: &str, url: &str) -> Variant {
    Variant::Hosted(HostedVariant::new(
        VariantInfo::new(asset_id, name, "Someone"),
        url,
    ))
}

/// Catalog with a hosted and a youtube entry for asset 500, plus one
/// malformed entry that install reports and skips.
fn catalog_payload() -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "manifest": 1,
        "id": "hub",
        "name": "Song File Hub",
        "nongs": {
            "hosted": {
                "e1": {
                    "name": "Chaoz Remix",
                    "artist": "Paragon",
                    "startOffset": 1500,
                    "url": ENTRY_URL,
                    "songs": [500]
                },
                "broken": { "url": "https://hub.example/audio/broken.mp3", "songs": [500] }
            },
            "youtube": {
                "y1": { "name": "Chaoz Cover", "videoId": "abc123", "songs": [500] }
            }
        }
    }))
    .unwrap()
}

/// Configure and fetch the mock catalog so its entries are installed.
async fn install_catalog(service: &mut NongService, transport: &support::MockTransport) {
    transport.set_ok(CATALOG_URL, catalog_payload());
    service.set_catalog_sources(vec![CatalogSource::new(CATALOG_URL)]);
    service.refresh_catalogs();
    support::settle(service).await;
}

/// Drain every event currently buffered on the subscription.
fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

/// Receive events until one matches, failing the test after a timeout.
async fn wait_for(rx: &mut broadcast::Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
    loop {
        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event stream closed");
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn test_hosted_variant_download_then_selection() {
    support::tracing_init();
    let tmp = TempDir::new().unwrap();
    let (mut service, transport) = setup(&tmp);
    let asset = AssetId::new(42);
    service.ensure_asset(
        asset,
        DefaultSeed::new("Song", "Artist", touch(&tmp, "default.mp3")),
    );

    let url = "https://host.example/remix.ogg";
    transport.set_ok(url, b"remix-bytes".to_vec());
    let id = service
        .add_variant(asset, hosted(asset, "Remix", url))
        .unwrap();

    // Selection is gated on the audio being on disk.
    let err = service.select_variant(asset, &id).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Manifest(ManifestError::Set(VariantSetError::NotDownloaded(_)))
    ));

    let mut rx = service.subscribe();
    service.download_variant(asset, &id).unwrap();
    support::settle(&mut service).await;

    let events = drain(&mut rx);
    assert!(
        events.iter().any(|e| matches!(
            e,
            Event::DownloadProgress { variant_id, fraction, .. }
                if variant_id == &id && *fraction >= 1.0
        )),
        "progress should reach 1.0: {events:?}"
    );
    let (source, variant) = events
        .iter()
        .find_map(|e| match e {
            Event::DownloadFinished {
                source, variant, ..
            } => Some((source.clone(), variant.clone())),
            _ => None,
        })
        .expect("download should finish");
    assert_eq!(
        source,
        DownloadSource::Variant {
            variant_id: id.clone()
        }
    );

    let path = variant
        .path()
        .expect("finished variant has audio")
        .to_path_buf();
    assert!(path.starts_with(service.store().dir().nongs_dir()));
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("ogg"));
    assert_eq!(std::fs::read(&path).unwrap(), b"remix-bytes");
    assert!(service.store().dir().asset_manifest_path(asset).exists());

    // Now the variant is selectable, with exactly one notification.
    let mut rx = service.subscribe();
    service.select_variant(asset, &id).unwrap();
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1, "selection emits exactly one event");
    assert!(matches!(events[0], Event::StateChanged { asset_id } if asset_id == asset));
    assert!(service.store().get(asset).unwrap().is_active(&id));
}

#[tokio::test]
async fn test_download_guards() {
    support::tracing_init();
    let tmp = TempDir::new().unwrap();
    let (mut service, transport) = setup(&tmp);
    let asset = AssetId::new(42);
    service.ensure_asset(
        asset,
        DefaultSeed::new("Song", "Artist", touch(&tmp, "default.mp3")),
    );

    let url = "https://host.example/remix.mp3";
    transport.set_ok(url, b"remix-bytes".to_vec());
    let id = service
        .add_variant(asset, hosted(asset, "Remix", url))
        .unwrap();

    // Unknown ids have nothing to download.
    let err = service
        .download_variant(asset, &VariantId::new("missing"))
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Download(DownloadError::NotFound(_))
    ));

    // One transfer per variant at a time.
    service.download_variant(asset, &id).unwrap();
    let err = service.download_variant(asset, &id).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Download(DownloadError::InProgress(_))
    ));
    support::settle(&mut service).await;

    // Downloaded audio is not fetched again.
    let err = service.download_variant(asset, &id).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Download(DownloadError::AlreadyDownloaded(_))
    ));

    // Locals have no remote source.
    let local_id = service
        .add_local_variant(
            asset,
            "Cover".to_string(),
            "Someone".to_string(),
            0,
            touch(&tmp, "cover.mp3"),
        )
        .unwrap();
    let err = service.download_variant(asset, &local_id).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Download(DownloadError::NotFound(_))
    ));

    // Streamed sources are listed but not fetchable.
    let streamed_id = service
        .add_variant(
            asset,
            Variant::Streamed(StreamedVariant::new(
                VariantInfo::new(asset, "Stream", "Someone"),
                "abc123",
            )),
        )
        .unwrap();
    let err = service.download_variant(asset, &streamed_id).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Download(DownloadError::StreamedUnsupported)
    ));
}

#[tokio::test]
async fn test_server_failures_surface_displayable_messages() {
    support::tracing_init();
    let tmp = TempDir::new().unwrap();
    let (mut service, transport) = setup(&tmp);
    let asset = AssetId::new(42);
    service.ensure_asset(
        asset,
        DefaultSeed::new("Song", "Artist", touch(&tmp, "default.mp3")),
    );

    let maintenance = "https://host.example/maintenance.mp3";
    let gone = "https://host.example/gone.mp3";
    transport.set_status(maintenance, 503);
    transport.set_status(gone, 404);
    let a = service
        .add_variant(asset, hosted(asset, "Maintenance", maintenance))
        .unwrap();
    let b = service
        .add_variant(asset, hosted(asset, "Gone", gone))
        .unwrap();

    let mut rx = service.subscribe();
    service.download_variant(asset, &a).unwrap();
    service.download_variant(asset, &b).unwrap();
    support::settle(&mut service).await;

    let events = drain(&mut rx);
    let messages: Vec<(VariantId, String)> = events
        .iter()
        .filter_map(|e| match e {
            Event::DownloadFailed {
                variant_id,
                message,
                ..
            } => Some((variant_id.clone(), message.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(messages.len(), 2, "both downloads should fail: {events:?}");
    let for_id = |id: &VariantId| {
        messages
            .iter()
            .find(|(vid, _)| vid == id)
            .map(|(_, msg)| msg.clone())
            .unwrap()
    };
    assert_eq!(
        for_id(&a),
        "The song host is under maintenance, try again later"
    );
    assert_eq!(for_id(&b), "Download failed with status 404");
    assert!(!events
        .iter()
        .any(|e| matches!(e, Event::DownloadFinished { .. })));

    // Failures clear the in-flight guard so the user can retry.
    service.download_variant(asset, &a).unwrap();
    support::settle(&mut service).await;

    // The variant still has no audio, so it stays unselectable.
    let err = service.select_variant(asset, &a).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Manifest(ManifestError::Set(VariantSetError::NotDownloaded(_)))
    ));
    assert!(std::fs::read_dir(service.store().dir().nongs_dir())
        .unwrap()
        .next()
        .is_none());
}

#[tokio::test]
async fn test_catalog_entry_download_materializes_and_selects() {
    support::tracing_init();
    let tmp = TempDir::new().unwrap();
    let (mut service, transport) = setup(&tmp);
    install_catalog(&mut service, &transport).await;
    assert!(service.catalogs().get("hub").is_some());

    let asset = AssetId::new(500);
    service.ensure_asset(
        asset,
        DefaultSeed::new("Chaoz", "Composer", touch(&tmp, "default.mp3")),
    );
    assert_eq!(service.downloadable_entries(asset).len(), 2);

    let key = CatalogEntryKey::new("hub", "e1");
    let derived = key.variant_id();
    transport.set_ok(ENTRY_URL, b"entry-audio".to_vec());

    let mut rx = service.subscribe();
    service.download_variant(asset, &derived).unwrap();
    support::settle(&mut service).await;

    let (source, variant) = drain(&mut rx)
        .into_iter()
        .find_map(|e| match e {
            Event::DownloadFinished {
                source, variant, ..
            } => Some((source, variant)),
            _ => None,
        })
        .expect("entry download should finish");
    assert_eq!(source, DownloadSource::Catalog { key: key.clone() });
    assert_eq!(variant.id(), &derived);
    assert_eq!(variant.info().name, "Chaoz Remix");
    assert_eq!(variant.info().artist, "Paragon");
    assert_eq!(variant.info().start_offset_ms, 1500);
    assert_eq!(variant.info().catalog_entry, Some(key.clone()));
    let path = variant.path().expect("materialized variant has audio");
    assert_eq!(std::fs::read(path).unwrap(), b"entry-audio");

    let set = service.store().get(asset).unwrap();
    assert_eq!(set.len(), 1);
    // A fresh materialization becomes the active pick.
    assert!(set.is_active(&derived));

    // The materialized entry leaves the download list; the other stays.
    let remaining = service.downloadable_entries(asset);
    assert_eq!(remaining, vec![CatalogEntryKey::new("hub", "y1")]);

    // Downloading the same entry again collapses onto the existing variant.
    let err = service.download_variant(asset, &derived).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Download(DownloadError::AlreadyDownloaded(_))
    ));

    // Streamed entries resolve but cannot be fetched.
    let err = service
        .download_variant(asset, &CatalogEntryKey::new("hub", "y1").variant_id())
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Download(DownloadError::StreamedUnsupported)
    ));

    // A refetched catalog re-registers without duplicating anything.
    service.refresh_catalogs();
    support::settle(&mut service).await;
    let set = service.store().get(asset).unwrap();
    assert_eq!(set.len(), 1);
    assert!(set.is_active(&derived));
    assert_eq!(service.downloadable_entries(asset).len(), 1);
}

#[tokio::test]
async fn test_empty_payload_fails_without_a_variant() {
    support::tracing_init();
    let tmp = TempDir::new().unwrap();
    let (mut service, transport) = setup(&tmp);
    install_catalog(&mut service, &transport).await;

    let asset = AssetId::new(500);
    service.ensure_asset(
        asset,
        DefaultSeed::new("Chaoz", "Composer", touch(&tmp, "default.mp3")),
    );
    let derived = CatalogEntryKey::new("hub", "e1").variant_id();
    transport.set_ok(ENTRY_URL, Vec::new());

    let mut rx = service.subscribe();
    service.download_variant(asset, &derived).unwrap();
    support::settle(&mut service).await;

    let events = drain(&mut rx);
    assert!(
        events.iter().any(|e| matches!(
            e,
            Event::DownloadFailed { message, .. } if message == "Received an empty file"
        )),
        "expected an empty-file failure: {events:?}"
    );
    assert!(!events
        .iter()
        .any(|e| matches!(e, Event::DownloadFinished { .. })));

    // An unknown-length transfer reports 0.0 once; repeats are swallowed.
    let progress: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, Event::DownloadProgress { .. }))
        .collect();
    assert_eq!(progress.len(), 1, "progress events were {events:?}");
    assert!(matches!(
        progress[0],
        Event::DownloadProgress { fraction, .. } if *fraction == 0.0
    ));

    // No variant, no file, and the entry is still offered for retry.
    let set = service.store().get(asset).unwrap();
    assert!(set.is_empty());
    assert!(std::fs::read_dir(service.store().dir().nongs_dir())
        .unwrap()
        .next()
        .is_none());
    assert_eq!(service.downloadable_entries(asset).len(), 2);
}

#[tokio::test]
async fn test_run_loop_downloads_through_commands() {
    support::tracing_init();
    let tmp = TempDir::new().unwrap();
    let transport = Arc::new(support::MockTransport::new());
    transport.set_ok(CATALOG_URL, catalog_payload());
    transport.set_ok(ENTRY_URL, b"entry-audio".to_vec());

    let dir = DataDir::new(tmp.path().join("save"));
    let mut service =
        NongService::with_transport(dir.clone(), Settings::in_memory(), transport);
    service.set_catalog_sources(vec![CatalogSource::new(CATALOG_URL)]);
    service.startup().unwrap();
    let handle = service.handle();
    let mut rx = handle.subscribe();
    tokio::spawn(service.run());

    // The startup fetch reports the catalog's one malformed entry; once that
    // lands the catalog itself is installed.
    wait_for(&mut rx, |e| matches!(e, Event::CatalogEntryError { .. })).await;

    let asset = AssetId::new(500);
    let derived = CatalogEntryKey::new("hub", "e1").variant_id();
    handle
        .send(Command::EnsureAsset {
            asset_id: asset,
            seed: DefaultSeed::new("Chaoz", "Composer", touch(&tmp, "default.mp3")),
        })
        .unwrap();
    handle
        .send(Command::DownloadVariant {
            asset_id: asset,
            variant_id: derived.clone(),
        })
        .unwrap();

    let finished = wait_for(&mut rx, |e| matches!(e, Event::DownloadFinished { .. })).await;
    let Event::DownloadFinished {
        asset_id, source, ..
    } = finished
    else {
        unreachable!();
    };
    assert_eq!(asset_id, asset);
    assert_eq!(
        source,
        DownloadSource::Catalog {
            key: CatalogEntryKey::new("hub", "e1")
        }
    );
    assert!(dir.nong_path(&derived, "mp3").exists());
    assert!(dir.asset_manifest_path(asset).exists());
}
