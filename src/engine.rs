//! Constructs the engine value the CLI and any embedding application drive:
//! filesystem gateway, journal/scheduler wiring, and the external
//! collaborators, assembled once and owned by the caller. No module-level
//! mutable state lives anywhere in this crate.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::config::ExportSettings;
use crate::external::{CurrentUserStore, Downloader, EventBus, ExifUpdater, InventoryProvider, LivePhotoDecoder};
use crate::fs_gateway::FsGateway;
use crate::journal::ExportStage;
use crate::scheduler::{ExportEvent, Scheduler};

pub struct ExportEngineDeps {
    pub fs: Arc<dyn FsGateway>,
    pub current_user: Arc<dyn CurrentUserStore>,
    pub inventory: Arc<dyn InventoryProvider>,
    pub downloader: Arc<dyn Downloader>,
    pub exif: Arc<dyn ExifUpdater>,
    pub live_decoder: Arc<dyn LivePhotoDecoder>,
    pub event_bus: Option<Arc<dyn EventBus>>,
}

pub struct ExportEngine {
    scheduler: Arc<Scheduler>,
    event_bus: Option<Arc<dyn EventBus>>,
}

impl ExportEngine {
    pub fn new(export_root: PathBuf, deps: ExportEngineDeps) -> Self {
        let scheduler = Scheduler::new(
            deps.fs,
            export_root,
            deps.current_user,
            deps.inventory,
            deps.downloader,
            deps.exif,
            deps.live_decoder,
        );
        Self {
            scheduler,
            event_bus: deps.event_bus,
        }
    }

    pub fn run_once(&self) {
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move { scheduler.schedule().await });
    }

    pub async fn run_once_and_wait(&self) {
        self.scheduler.schedule().await;
        let mut rx = self.scheduler.subscribe();
        while let Ok(event) = rx.recv().await {
            if let ExportEvent::Stage(stage) = event {
                if stage == ExportStage::Finished || stage == ExportStage::Init {
                    break;
                }
            }
        }
    }

    pub async fn stop(&self) {
        self.scheduler.stop().await;
    }

    pub async fn status(&self) -> Result<ExportStage> {
        Ok(self.scheduler.status().await?)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ExportEvent> {
        self.scheduler.subscribe()
    }

    /// Applies the `continuousExport` setting and resumes any in-progress
    /// run left over from a prior process, in the order the scheduler
    /// expects: first continuous-export wiring, then the resume check.
    pub async fn apply_settings_and_resume(&self, settings: &ExportSettings) {
        if settings.continuous_export {
            if let Some(bus) = &self.event_bus {
                self.scheduler.enable_continuous_export(bus.clone()).await;
            }
        }
        self.scheduler.resume_on_startup().await;
    }
}
