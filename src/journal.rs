//! The on-disk record (`export_status.json`) mapping stable IDs to on-disk
//! names, so reconciliation is possible across restarts. All mutations flow
//! through a single async mutex held across the read-mutate-persist cycle,
//! which gives FIFO ordering without a dedicated actor task: two concurrent
//! callers still observe a linear order of writes, and a failed persist
//! never updates the in-memory copy.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{ExportError, Result};
use crate::fs_gateway::FsGateway;

pub const CURRENT_JOURNAL_VERSION: u32 = 3;
const JOURNAL_FILE_NAME: &str = "export_status.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportStage {
    Init,
    Migration,
    Starting,
    ExportingFiles,
    TrashingDeletedFiles,
    RenamingCollectionFolders,
    TrashingDeletedCollections,
    Finished,
}

impl ExportStage {
    pub fn in_progress(self) -> bool {
        self > ExportStage::Init && self < ExportStage::Finished
    }
}

/// Typed, discriminated export name. The explicit `kind` tag means a plain
/// export name that happens to look like JSON is never misread as a live
/// photo's combined name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExportName {
    Plain { name: String },
    Live { image: String, video: String },
}

impl ExportName {
    pub fn plain(name: impl Into<String>) -> Self {
        ExportName::Plain { name: name.into() }
    }

    pub fn live(image: impl Into<String>, video: impl Into<String>) -> Self {
        ExportName::Live {
            image: image.into(),
            video: video.into(),
        }
    }

    /// Every on-disk basename this entry owns, for collision-freedom checks
    /// and for locating files during trash/removal.
    pub fn basenames(&self) -> Vec<&str> {
        match self {
            ExportName::Plain { name } => vec![name.as_str()],
            ExportName::Live { image, video } => vec![image.as_str(), video.as_str()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalData {
    pub version: u32,
    pub last_attempt_timestamp: Option<i64>,
    pub stage: ExportStage,
    pub file_export_names: HashMap<String, ExportName>,
    pub collection_export_names: HashMap<i64, String>,
}

impl Default for ExportStage {
    fn default() -> Self {
        ExportStage::Init
    }
}

pub struct Journal {
    fs: Arc<dyn FsGateway>,
    export_root: PathBuf,
    state: Mutex<JournalData>,
}

impl Journal {
    pub async fn load(fs: Arc<dyn FsGateway>, export_root: PathBuf) -> Result<Self> {
        if !fs.exists(&export_root).await? {
            return Err(ExportError::ExportFolderDoesNotExist(export_root));
        }
        let path = export_root.join(JOURNAL_FILE_NAME);
        let data = if !fs.exists(&path).await? {
            let empty = JournalData {
                version: CURRENT_JOURNAL_VERSION,
                ..JournalData::default()
            };
            let text = serde_json::to_string_pretty(&empty).expect("serialize empty journal");
            fs.save_file_to_disk(&path, &text)
                .await
                .map_err(|e| ExportError::UpdateExportedRecordFailed(e.to_string()))?;
            empty
        } else {
            match Self::read_and_parse(fs.as_ref(), &path).await {
                Ok(data) => data,
                Err(_first) => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Self::read_and_parse(fs.as_ref(), &path)
                        .await
                        .map_err(|e| ExportError::ExportRecordJsonParsingFailed(e.to_string()))?
                }
            }
        };
        Ok(Self {
            fs,
            export_root,
            state: Mutex::new(data),
        })
    }

    async fn read_and_parse(fs: &dyn FsGateway, path: &Path) -> anyhow::Result<JournalData> {
        let text = fs.read_text_file(path).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn check_root(&self) -> Result<()> {
        if !self.fs.exists(&self.export_root).await? {
            return Err(ExportError::ExportFolderDoesNotExist(self.export_root.clone()));
        }
        Ok(())
    }

    async fn persist(&self, data: &JournalData) -> Result<()> {
        let path = self.export_root.join(JOURNAL_FILE_NAME);
        let text = serde_json::to_string_pretty(data)
            .map_err(|e| ExportError::UpdateExportedRecordFailed(e.to_string()))?;
        self.fs
            .save_file_to_disk(&path, &text)
            .await
            .map_err(|e| ExportError::UpdateExportedRecordFailed(e.to_string()))
    }

    pub async fn snapshot(&self) -> JournalData {
        self.state.lock().await.clone()
    }

    pub async fn get_file_name(&self, uid: &str) -> Option<ExportName> {
        self.state.lock().await.file_export_names.get(uid).cloned()
    }

    pub async fn get_collection_name(&self, collection_id: i64) -> Option<String> {
        self.state
            .lock()
            .await
            .collection_export_names
            .get(&collection_id)
            .cloned()
    }

    pub async fn file_uids_in_collection(&self, collection_id: i64) -> Vec<String> {
        let data = self.state.lock().await;
        data.file_export_names
            .keys()
            .filter(|uid| crate::model::collection_id_from_file_uid(uid) == Some(collection_id))
            .cloned()
            .collect()
    }

    pub async fn set_file_name(&self, uid: String, name: ExportName) -> Result<()> {
        self.check_root().await?;
        let mut data = self.state.lock().await;
        let prior = data.file_export_names.insert(uid.clone(), name);
        if let Err(err) = self.persist(&data).await {
            match prior {
                Some(p) => {
                    data.file_export_names.insert(uid, p);
                }
                None => {
                    data.file_export_names.remove(&uid);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    pub async fn remove_file_name(&self, uid: &str) -> Result<()> {
        self.check_root().await?;
        let mut data = self.state.lock().await;
        let prior = data.file_export_names.remove(uid);
        if let Err(err) = self.persist(&data).await {
            if let Some(p) = prior {
                data.file_export_names.insert(uid.to_string(), p);
            }
            return Err(err);
        }
        Ok(())
    }

    pub async fn set_collection_name(&self, collection_id: i64, name: String) -> Result<()> {
        self.check_root().await?;
        let mut data = self.state.lock().await;
        let prior = data.collection_export_names.insert(collection_id, name);
        if let Err(err) = self.persist(&data).await {
            match prior {
                Some(p) => {
                    data.collection_export_names.insert(collection_id, p);
                }
                None => {
                    data.collection_export_names.remove(&collection_id);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    pub async fn remove_collection_name(&self, collection_id: i64) -> Result<()> {
        self.check_root().await?;
        let mut data = self.state.lock().await;
        let prior = data.collection_export_names.remove(&collection_id);
        if let Err(err) = self.persist(&data).await {
            if let Some(p) = prior {
                data.collection_export_names.insert(collection_id, p);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Stage never decreases within a run; it is only ever reset to `Init`
    /// by [`Journal::load`] creating a fresh record.
    pub async fn set_stage(&self, stage: ExportStage) -> Result<()> {
        self.check_root().await?;
        let mut data = self.state.lock().await;
        let prior = data.stage;
        if stage < prior {
            return Ok(());
        }
        data.stage = stage;
        if let Err(err) = self.persist(&data).await {
            data.stage = prior;
            return Err(err);
        }
        Ok(())
    }

    /// Resets stage to `Init` without the monotonicity guard above — used by
    /// the scheduler's `postExport` when the export root has vanished.
    pub async fn reset_stage_to_init(&self) -> Result<()> {
        self.check_root().await?;
        let mut data = self.state.lock().await;
        let prior = data.stage;
        data.stage = ExportStage::Init;
        if let Err(err) = self.persist(&data).await {
            data.stage = prior;
            return Err(err);
        }
        Ok(())
    }

    pub async fn set_last_attempt(&self, epoch_ms: i64) -> Result<()> {
        self.check_root().await?;
        let mut data = self.state.lock().await;
        let prior = data.last_attempt_timestamp;
        data.last_attempt_timestamp = Some(epoch_ms);
        if let Err(err) = self.persist(&data).await {
            data.last_attempt_timestamp = prior;
            return Err(err);
        }
        Ok(())
    }

    pub fn export_root(&self) -> &Path {
        &self.export_root
    }
}
