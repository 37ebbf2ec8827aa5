//! Contracts for the collaborators the core treats as external: the remote
//! photo API, EXIF rewriting, live-photo decoding, library-change events,
//! and settings/identity storage. Production stubs are provided for the
//! pieces genuinely out of scope (the real client is a separate crate);
//! fakes for everything live here too since the whole point of the
//! boundary is to make the core testable without a network.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::config::ExportSettings;
use crate::error::{ExportError, Result};
use crate::fs_gateway::ByteStream;
use crate::model::{Inventory, RemoteCollection, RemoteFile};

#[derive(Debug, Clone)]
pub struct LivePhotoParts {
    pub image_bytes: Vec<u8>,
    pub image_title: String,
    pub video_bytes: Vec<u8>,
    pub video_title: String,
}

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn get_file(&self, file: &RemoteFile) -> Result<ByteStream>;
}

#[async_trait]
pub trait ExifUpdater: Send + Sync {
    /// May be bypassed for non-image types; a pass-through is always a
    /// correct implementation.
    async fn update(&self, file: &RemoteFile, in_stream: ByteStream) -> Result<ByteStream>;
}

#[async_trait]
pub trait LivePhotoDecoder: Send + Sync {
    async fn decode(&self, file: &RemoteFile, blob: Vec<u8>) -> Result<LivePhotoParts>;
}

#[async_trait]
pub trait InventoryProvider: Send + Sync {
    async fn get_all_local_files(&self) -> Result<Vec<RemoteFile>>;
    async fn get_all_local_collections(&self) -> Result<Vec<RemoteCollection>>;

    async fn inventory(&self) -> Result<Inventory> {
        Ok(Inventory {
            files: self.get_all_local_files().await?,
            collections: self.get_all_local_collections().await?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryEvent {
    LocalFilesUpdated,
}

/// Typed observer registration over `LOCAL_FILES_UPDATED`; disabling
/// continuous export means dropping the receiver returned here.
pub trait EventBus: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<LibraryEvent>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<ExportSettings>;
    async fn save(&self, settings: &ExportSettings) -> Result<()>;
}

pub trait CurrentUserStore: Send + Sync {
    fn current_user_id(&self) -> i64;
}

/// Production settings store backed by the JSON file on disk.
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn load(&self) -> Result<ExportSettings> {
        ExportSettings::load_file_only(&self.path)
            .map_err(|e| ExportError::Io(std::io::Error::other(e.to_string())))
    }

    async fn save(&self, settings: &ExportSettings) -> Result<()> {
        settings
            .save(&self.path)
            .map_err(|e| ExportError::Io(std::io::Error::other(e.to_string())))
    }
}

pub struct FixedCurrentUserStore(pub i64);

impl CurrentUserStore for FixedCurrentUserStore {
    fn current_user_id(&self) -> i64 {
        self.0
    }
}

/// Event bus with no real transport wired in; production code that wants
/// continuous export to actually retrigger on library changes supplies its
/// own `EventBus` (e.g. bridging the platform's file-watcher), which is out
/// of scope for this crate.
pub struct NullEventBus {
    sender: broadcast::Sender<LibraryEvent>,
}

impl Default for NullEventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }
}

impl EventBus for NullEventBus {
    fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.sender.subscribe()
    }
}

/// Test-only event bus that exposes `fire()` so scenario tests can simulate
/// `LOCAL_FILES_UPDATED`.
#[derive(Default)]
pub struct FakeEventBus {
    sender_slot: Mutex<Option<broadcast::Sender<LibraryEvent>>>,
}

impl FakeEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            sender_slot: Mutex::new(Some(sender)),
        }
    }

    pub fn fire(&self, event: LibraryEvent) {
        if let Some(sender) = self.sender_slot.lock().unwrap().as_ref() {
            let _ = sender.send(event);
        }
    }
}

impl EventBus for FakeEventBus {
    fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.sender_slot
            .lock()
            .unwrap()
            .as_ref()
            .expect("fake event bus sender")
            .subscribe()
    }
}

/// Test-only inventory provider backed by a mutable snapshot, so scenario
/// tests can mutate "remote" state between scheduler runs.
#[derive(Default)]
pub struct FakeInventoryProvider {
    inventory: Mutex<Inventory>,
}

impl FakeInventoryProvider {
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inventory: Mutex::new(inventory),
        }
    }

    pub fn set(&self, inventory: Inventory) {
        *self.inventory.lock().unwrap() = inventory;
    }
}

#[async_trait]
impl InventoryProvider for FakeInventoryProvider {
    async fn get_all_local_files(&self) -> Result<Vec<RemoteFile>> {
        Ok(self.inventory.lock().unwrap().files.clone())
    }

    async fn get_all_local_collections(&self) -> Result<Vec<RemoteCollection>> {
        Ok(self.inventory.lock().unwrap().collections.clone())
    }
}

/// Test-only downloader serving fixed bytes per file id.
#[derive(Default)]
pub struct FakeDownloader {
    bytes_by_file_id: Mutex<std::collections::HashMap<i64, Vec<u8>>>,
}

impl FakeDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bytes(&self, file_id: i64, bytes: Vec<u8>) {
        self.bytes_by_file_id.lock().unwrap().insert(file_id, bytes);
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn get_file(&self, file: &RemoteFile) -> Result<ByteStream> {
        let bytes = self
            .bytes_by_file_id
            .lock()
            .unwrap()
            .get(&file.id)
            .cloned()
            .unwrap_or_default();
        Ok(Box::pin(futures_util::stream::once(async move { Ok(bytes) })))
    }
}

/// Production stub: no remote client wired in, so there is nothing to
/// download. An application embedding this crate supplies a real
/// `Downloader` backed by the photo API client.
pub struct NullDownloader;

#[async_trait]
impl Downloader for NullDownloader {
    async fn get_file(&self, _file: &RemoteFile) -> Result<ByteStream> {
        Ok(Box::pin(futures_util::stream::empty()))
    }
}

/// Production stub: reports an empty library until a real
/// `InventoryProvider` is wired in, so a freshly embedded engine is inert
/// rather than erroring.
pub struct NullInventoryProvider;

#[async_trait]
impl InventoryProvider for NullInventoryProvider {
    async fn get_all_local_files(&self) -> Result<Vec<RemoteFile>> {
        Ok(Vec::new())
    }

    async fn get_all_local_collections(&self) -> Result<Vec<RemoteCollection>> {
        Ok(Vec::new())
    }
}

/// Production stub: live-photo decoding needs the real codec; this just
/// returns empty parts so wiring a crate without it still type-checks.
pub struct NullLivePhotoDecoder;

#[async_trait]
impl LivePhotoDecoder for NullLivePhotoDecoder {
    async fn decode(&self, file: &RemoteFile, _blob: Vec<u8>) -> Result<LivePhotoParts> {
        Ok(LivePhotoParts {
            image_bytes: Vec::new(),
            image_title: format!("{}.HEIC", file.metadata.title),
            video_bytes: Vec::new(),
            video_title: format!("{}.MOV", file.metadata.title),
        })
    }
}

/// Pass-through EXIF updater: most non-image types bypass rewriting anyway.
pub struct PassthroughExifUpdater;

#[async_trait]
impl ExifUpdater for PassthroughExifUpdater {
    async fn update(&self, _file: &RemoteFile, in_stream: ByteStream) -> Result<ByteStream> {
        Ok(in_stream)
    }
}

/// Test-only live-photo decoder splitting a blob on a `\0` separator into
/// `image || \0 || video` halves.
pub struct FakeLivePhotoDecoder;

#[async_trait]
impl LivePhotoDecoder for FakeLivePhotoDecoder {
    async fn decode(&self, file: &RemoteFile, blob: Vec<u8>) -> Result<LivePhotoParts> {
        let mut parts = blob.splitn(2, |b| *b == 0);
        let image_bytes = parts.next().unwrap_or_default().to_vec();
        let video_bytes = parts.next().unwrap_or_default().to_vec();
        Ok(LivePhotoParts {
            image_bytes,
            image_title: format!("{}.HEIC", file.metadata.title),
            video_bytes,
            video_title: format!("{}.MOV", file.metadata.title),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn fake_downloader_serves_configured_bytes() {
        let downloader = FakeDownloader::new();
        downloader.set_bytes(1, b"hello".to_vec());
        let file = crate::model::RemoteFile {
            id: 1,
            collection_id: 1,
            updation_time: 1,
            owner_id: 1,
            file_type: crate::model::FileType::Image,
            metadata: crate::model::FileMetadataInfo {
                title: "F1".into(),
                creation_time_us: 0,
                modification_time_us: None,
                location: crate::model::GeoLocation::default(),
            },
            public_caption: None,
        };
        let mut stream = downloader.get_file(&file).await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend(chunk.unwrap());
        }
        assert_eq!(collected, b"hello");
    }

    #[tokio::test]
    async fn fake_live_photo_decoder_splits_on_separator() {
        let file = crate::model::RemoteFile {
            id: 1,
            collection_id: 1,
            updation_time: 1,
            owner_id: 1,
            file_type: crate::model::FileType::LivePhoto,
            metadata: crate::model::FileMetadataInfo {
                title: "LP".into(),
                creation_time_us: 0,
                modification_time_us: None,
                location: crate::model::GeoLocation::default(),
            },
            public_caption: None,
        };
        let mut blob = b"imgdata".to_vec();
        blob.push(0);
        blob.extend_from_slice(b"viddata");
        let parts = FakeLivePhotoDecoder.decode(&file, blob).await.unwrap();
        assert_eq!(parts.image_bytes, b"imgdata");
        assert_eq!(parts.video_bytes, b"viddata");
        assert_eq!(parts.image_title, "LP.HEIC");
    }
}
