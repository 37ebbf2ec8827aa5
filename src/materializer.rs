//! Executes a computed [`Plan`] against the filesystem: Rename, then Trash
//! files, then Export files, then Trash emptied collections. Every phase
//! records the journal mutation before the matching filesystem mutation, so
//! a crash mid-item leaves at worst a journal entry with no disk artifact —
//! recoverable on the next run — never an orphan file the journal doesn't
//! know about.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{SecondsFormat, TimeZone, Utc};
use futures_util::StreamExt;
use serde::Serialize;

use crate::error::{ExportError, Result};
use crate::external::{Downloader, ExifUpdater, LivePhotoDecoder};
use crate::fs_gateway::FsGateway;
use crate::journal::{ExportName, Journal};
use crate::model::{collection_id_from_file_uid, RemoteFile};
use crate::name_allocator::NameAllocator;
use crate::planner::{Plan, RenamedCollection};

const TRASH_DIR_NAME: &str = "Trash";
const METADATA_DIR_NAME: &str = "metadata";

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportCounts {
    pub success: u64,
    pub failed: u64,
}

pub struct Materializer {
    fs: Arc<dyn FsGateway>,
    journal: Arc<Journal>,
    downloader: Arc<dyn Downloader>,
    exif: Arc<dyn ExifUpdater>,
    live_decoder: Arc<dyn LivePhotoDecoder>,
}

impl Materializer {
    pub fn new(
        fs: Arc<dyn FsGateway>,
        journal: Arc<Journal>,
        downloader: Arc<dyn Downloader>,
        exif: Arc<dyn ExifUpdater>,
        live_decoder: Arc<dyn LivePhotoDecoder>,
    ) -> Self {
        Self {
            fs,
            journal,
            downloader,
            exif,
            live_decoder,
        }
    }

    async fn ensure_root(&self) -> Result<()> {
        if !self.fs.exists(self.journal.export_root()).await? {
            return Err(ExportError::ExportFolderDoesNotExist(
                self.journal.export_root().to_path_buf(),
            ));
        }
        Ok(())
    }

    fn check_cancelled(cancel: &AtomicBool) -> Result<()> {
        if cancel.load(Ordering::SeqCst) {
            return Err(ExportError::ExportStopped);
        }
        Ok(())
    }

    /// Renames on-disk collection directories whose remote name changed.
    pub async fn rename_collections(
        &self,
        renamed: &[RenamedCollection],
        cancel: &AtomicBool,
    ) -> Result<ExportCounts> {
        let mut counts = ExportCounts::default();
        for r in renamed {
            Self::check_cancelled(cancel)?;
            self.ensure_root().await?;
            match self.rename_one_collection(r).await {
                Ok(()) => counts.success += 1,
                Err(err) if err.is_fatal_to_phase() => return Err(err),
                Err(err) => {
                    crate::logging::error(format!(
                        "collection rename failed id={} err={err}",
                        r.collection_id
                    ));
                    counts.failed += 1;
                }
            }
        }
        Ok(counts)
    }

    async fn rename_one_collection(&self, r: &RenamedCollection) -> Result<()> {
        let root = self.journal.export_root();
        let prior_name = self.journal.get_collection_name(r.collection_id).await;
        let new_dir = NameAllocator::allocate(self.fs.as_ref(), root, &r.new_user_facing_name).await?;

        self.journal
            .set_collection_name(r.collection_id, new_dir.clone())
            .await?;

        let old_path = prior_name.as_ref().map(|n| root.join(n));
        let new_path = root.join(&new_dir);
        if let Some(old_path) = old_path {
            if let Err(err) = self.fs.rename(&old_path, &new_path).await {
                if let Some(prior) = prior_name {
                    let _ = self.journal.set_collection_name(r.collection_id, prior).await;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Moves removed files (and their sidecars) into the `Trash` tree.
    pub async fn trash_files(&self, removed_uids: &[String], cancel: &AtomicBool) -> Result<ExportCounts> {
        let mut counts = ExportCounts::default();
        for uid in removed_uids {
            Self::check_cancelled(cancel)?;
            self.ensure_root().await?;
            match self.trash_one_file(uid).await {
                Ok(()) => counts.success += 1,
                Err(err) if err.is_fatal_to_phase() => return Err(err),
                Err(err) => {
                    crate::logging::error(format!("trash file failed uid={uid} err={err}"));
                    counts.failed += 1;
                }
            }
        }
        Ok(counts)
    }

    async fn trash_one_file(&self, uid: &str) -> Result<()> {
        let Some(export_name) = self.journal.get_file_name(uid).await else {
            return Ok(());
        };
        let Some(collection_id) = collection_id_from_file_uid(uid) else {
            return Ok(());
        };
        let Some(collection_dir) = self.journal.get_collection_name(collection_id).await else {
            return Ok(());
        };

        self.journal.remove_file_name(uid).await?;

        let root = self.journal.export_root();
        let src_dir = root.join(&collection_dir);
        let trash_dir = root.join(TRASH_DIR_NAME).join(&collection_dir);

        let result = self.trash_basenames(&export_name, &src_dir, &trash_dir).await;
        if let Err(err) = result {
            let _ = self.journal.set_file_name(uid.to_string(), export_name).await;
            return Err(err);
        }
        Ok(())
    }

    async fn trash_basenames(&self, export_name: &ExportName, src_dir: &Path, trash_dir: &Path) -> Result<()> {
        for basename in export_name.basenames() {
            let src = src_dir.join(basename);
            let src_sidecar = src_dir.join(METADATA_DIR_NAME).join(format!("{basename}.json"));

            if self.fs.exists(&src).await? {
                let trashed_name = NameAllocator::allocate(self.fs.as_ref(), trash_dir, basename).await?;
                self.fs.move_file(&src, &trash_dir.join(&trashed_name)).await?;
            }
            if self.fs.exists(&src_sidecar).await? {
                let trash_meta_dir = trash_dir.join(METADATA_DIR_NAME);
                let trashed_meta_name =
                    NameAllocator::allocate(self.fs.as_ref(), &trash_meta_dir, &format!("{basename}.json")).await?;
                self.fs
                    .move_file(&src_sidecar, &trash_meta_dir.join(&trashed_meta_name))
                    .await?;
            }
        }
        Ok(())
    }

    /// Downloads and writes every file not yet present in the journal.
    /// `collection_names` is the current user's `collection_id ->
    /// user_facing_name` map, used to name a collection directory the first
    /// time a file lands in it.
    pub async fn export_files(
        &self,
        files: &[RemoteFile],
        collection_names: &HashMap<i64, String>,
        cancel: &AtomicBool,
        on_progress: &(dyn Fn(ExportCounts) + Send + Sync),
    ) -> Result<ExportCounts> {
        let mut counts = ExportCounts::default();
        for file in files {
            Self::check_cancelled(cancel)?;
            self.ensure_root().await?;
            match self.export_one_file(file, collection_names).await {
                Ok(()) => counts.success += 1,
                Err(err) if err.is_fatal_to_phase() => return Err(err),
                Err(err) => {
                    crate::logging::error(format!("export file failed uid={} err={err}", file.uid()));
                    counts.failed += 1;
                }
            }
            on_progress(counts);
        }
        Ok(counts)
    }

    async fn collection_dir_for(&self, file: &RemoteFile, collection_name: &str) -> Result<PathBuf> {
        let root = self.journal.export_root();
        if let Some(existing) = self.journal.get_collection_name(file.collection_id).await {
            return Ok(root.join(existing));
        }
        let dir_name = NameAllocator::allocate(self.fs.as_ref(), root, collection_name).await?;
        self.journal
            .set_collection_name(file.collection_id, dir_name.clone())
            .await?;
        let dir = root.join(&dir_name);
        self.fs.check_exists_and_create_dir(&dir).await?;
        self.fs
            .check_exists_and_create_dir(&dir.join(METADATA_DIR_NAME))
            .await?;
        Ok(dir)
    }

    async fn export_one_file(&self, file: &RemoteFile, collection_names: &HashMap<i64, String>) -> Result<()> {
        let uid = file.uid();
        // Fall back to the file's own title only when the collection isn't
        // in the current user's inventory at all (shouldn't happen for a
        // file the planner selected, but keeps this from panicking).
        let collection_name = collection_names
            .get(&file.collection_id)
            .map(String::as_str)
            .unwrap_or(&file.metadata.title);
        let collection_dir = self.collection_dir_for(file, collection_name).await?;

        if file.is_live_photo() {
            self.export_live_photo(file, &uid, &collection_dir).await
        } else {
            self.export_plain_file(file, &uid, &collection_dir).await
        }
    }

    async fn export_plain_file(&self, file: &RemoteFile, uid: &str, collection_dir: &Path) -> Result<()> {
        let name = NameAllocator::allocate(self.fs.as_ref(), collection_dir, &file.metadata.title).await?;
        self.journal
            .set_file_name(uid.to_string(), ExportName::plain(name.clone()))
            .await?;

        let result = self.write_file_and_sidecar(file, &name, collection_dir).await;
        if let Err(err) = result {
            let _ = self.journal.remove_file_name(uid).await;
            self.cleanup_basename(collection_dir, &name).await;
            return Err(err);
        }
        Ok(())
    }

    async fn write_file_and_sidecar(&self, file: &RemoteFile, basename: &str, collection_dir: &Path) -> Result<()> {
        let sidecar_path = collection_dir.join(METADATA_DIR_NAME).join(format!("{basename}.json"));
        let sidecar_json = render_sidecar(file, basename)?;
        self.fs.save_file_to_disk(&sidecar_path, &sidecar_json).await?;

        let stream = self.downloader.get_file(file).await?;
        let stream = self.exif.update(file, stream).await?;
        self.fs.save_stream_to_disk(&collection_dir.join(basename), stream).await?;
        Ok(())
    }

    async fn export_live_photo(&self, file: &RemoteFile, uid: &str, collection_dir: &Path) -> Result<()> {
        let mut stream = self.downloader.get_file(file).await?;
        let mut blob = Vec::new();
        while let Some(chunk) = stream.next().await {
            blob.extend_from_slice(&chunk?);
        }
        let parts = self.live_decoder.decode(file, blob).await?;

        let image_name = NameAllocator::allocate(self.fs.as_ref(), collection_dir, &parts.image_title).await?;
        let video_name = NameAllocator::allocate(self.fs.as_ref(), collection_dir, &parts.video_title).await?;

        self.journal
            .set_file_name(uid.to_string(), ExportName::live(image_name.clone(), video_name.clone()))
            .await?;

        let result = async {
            let image_sidecar = render_sidecar(file, &image_name)?;
            self.fs
                .save_file_to_disk(&collection_dir.join(METADATA_DIR_NAME).join(format!("{image_name}.json")), &image_sidecar)
                .await?;
            self.fs
                .save_stream_to_disk(&collection_dir.join(&image_name), bytes_stream(parts.image_bytes))
                .await?;

            let video_sidecar = render_sidecar(file, &video_name)?;
            self.fs
                .save_file_to_disk(&collection_dir.join(METADATA_DIR_NAME).join(format!("{video_name}.json")), &video_sidecar)
                .await?;
            self.fs
                .save_stream_to_disk(&collection_dir.join(&video_name), bytes_stream(parts.video_bytes))
                .await?;
            Ok::<(), ExportError>(())
        }
        .await;

        if let Err(err) = result {
            let _ = self.journal.remove_file_name(uid).await;
            self.cleanup_basename(collection_dir, &image_name).await;
            self.cleanup_basename(collection_dir, &video_name).await;
            return Err(err);
        }
        Ok(())
    }

    async fn cleanup_basename(&self, collection_dir: &Path, basename: &str) {
        let _ = self.fs.delete_file(&collection_dir.join(basename)).await;
        let _ = self
            .fs
            .delete_file(&collection_dir.join(METADATA_DIR_NAME).join(format!("{basename}.json")))
            .await;
    }

    /// Removes collection directories the plan marked fully drained.
    pub async fn trash_collections(&self, collection_ids: &[i64], cancel: &AtomicBool) -> Result<ExportCounts> {
        let mut counts = ExportCounts::default();
        for &collection_id in collection_ids {
            Self::check_cancelled(cancel)?;
            self.ensure_root().await?;
            match self.remove_one_collection(collection_id).await {
                Ok(()) => counts.success += 1,
                Err(err) if err.is_fatal_to_phase() => return Err(err),
                Err(err) => {
                    crate::logging::error(format!("collection removal failed id={collection_id} err={err}"));
                    counts.failed += 1;
                }
            }
        }
        Ok(counts)
    }

    async fn remove_one_collection(&self, collection_id: i64) -> Result<()> {
        let remaining = self.journal.file_uids_in_collection(collection_id).await;
        if !remaining.is_empty() {
            return Err(ExportError::CollectionNotEmpty(collection_id));
        }
        let Some(dir_name) = self.journal.get_collection_name(collection_id).await else {
            return Ok(());
        };

        self.journal.remove_collection_name(collection_id).await?;

        let root = self.journal.export_root();
        let dir = root.join(&dir_name);
        let result = async {
            self.fs.delete_folder(&dir.join(METADATA_DIR_NAME)).await?;
            self.fs.delete_folder(&dir).await?;
            Ok::<(), ExportError>(())
        }
        .await;
        if let Err(err) = result {
            let _ = self.journal.set_collection_name(collection_id, dir_name).await;
            return Err(err);
        }
        Ok(())
    }

    /// Runs all four phases in fixed order: renames, then trashed files,
    /// then new exports, then emptied collections.
    pub async fn run_plan(
        &self,
        plan: &Plan,
        cancel: &AtomicBool,
        on_progress: &(dyn Fn(ExportCounts) + Send + Sync),
    ) -> Result<()> {
        self.journal.set_stage(crate::journal::ExportStage::RenamingCollectionFolders).await?;
        self.rename_collections(&plan.renamed_collections, cancel).await?;

        self.journal.set_stage(crate::journal::ExportStage::TrashingDeletedFiles).await?;
        self.trash_files(&plan.removed_file_uids, cancel).await?;

        self.journal.set_stage(crate::journal::ExportStage::ExportingFiles).await?;
        self.export_files(&plan.files_to_export, &plan.collection_names, cancel, on_progress)
            .await?;

        self.journal.set_stage(crate::journal::ExportStage::TrashingDeletedCollections).await?;
        self.trash_collections(&plan.deleted_exported_collections, cancel).await?;

        Ok(())
    }
}

fn bytes_stream(bytes: Vec<u8>) -> crate::fs_gateway::ByteStream {
    Box::pin(futures_util::stream::once(async move { Ok(bytes) }))
}

#[derive(Serialize)]
struct TimestampInfo {
    timestamp: i64,
    formatted: String,
}

#[derive(Serialize)]
struct GeoDataJson {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Serialize)]
struct MetadataSidecar {
    title: String,
    caption: Option<String>,
    #[serde(rename = "creationTime")]
    creation_time: TimestampInfo,
    #[serde(rename = "modificationTime")]
    modification_time: TimestampInfo,
    #[serde(rename = "geoData")]
    geo_data: GeoDataJson,
}

fn timestamp_info(micros: i64) -> TimestampInfo {
    let secs = micros.div_euclid(1_000_000);
    let formatted = Utc
        .timestamp_opt(secs, 0)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default();
    TimestampInfo {
        timestamp: secs,
        formatted,
    }
}

fn render_sidecar(file: &RemoteFile, basename: &str) -> Result<String> {
    let creation_time = timestamp_info(file.metadata.creation_time_us);
    let modification_time = file
        .metadata
        .modification_time_us
        .map(timestamp_info)
        .unwrap_or_else(|| timestamp_info(file.metadata.creation_time_us));

    let sidecar = MetadataSidecar {
        title: basename.to_string(),
        caption: file.public_caption.clone(),
        creation_time,
        modification_time,
        geo_data: GeoDataJson {
            latitude: file.metadata.location.latitude,
            longitude: file.metadata.location.longitude,
        },
    };
    serde_json::to_string_pretty(&sidecar)
        .map_err(|e| ExportError::Io(std::io::Error::other(e.to_string())))
}
