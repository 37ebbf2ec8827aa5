//! Single-flight export runs: `Idle` / `Running(cancel, rerun_pending)`.
//! `schedule()` from `Running` just flags a rerun instead of starting a
//! second run; natural completion with a pending rerun re-enters through a
//! spawned task rather than a direct recursive call, so a storm of trigger
//! events never grows the call stack.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{broadcast, Mutex};

use crate::error::{ExportError, Result};
use crate::external::{CurrentUserStore, Downloader, EventBus, ExifUpdater, InventoryProvider, LibraryEvent, LivePhotoDecoder};
use crate::fs_gateway::FsGateway;
use crate::journal::{ExportStage, Journal};
use crate::materializer::{ExportCounts, Materializer};
use crate::migration::MigrationRunner;
use crate::planner::Planner;

#[derive(Debug, Clone)]
pub enum ExportEvent {
    Progress(ExportCounts),
    Stage(ExportStage),
    LastExportTime(i64),
    PendingExports(u64),
}

enum SchedulerState {
    Idle,
    Running {
        cancel: Arc<AtomicBool>,
        rerun_pending: Arc<AtomicBool>,
    },
}

pub struct Scheduler {
    fs: Arc<dyn FsGateway>,
    export_root: PathBuf,
    current_user: Arc<dyn CurrentUserStore>,
    inventory: Arc<dyn InventoryProvider>,
    downloader: Arc<dyn Downloader>,
    exif: Arc<dyn ExifUpdater>,
    live_decoder: Arc<dyn LivePhotoDecoder>,
    events: broadcast::Sender<ExportEvent>,
    state: Mutex<SchedulerState>,
    continuous: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fs: Arc<dyn FsGateway>,
        export_root: PathBuf,
        current_user: Arc<dyn CurrentUserStore>,
        inventory: Arc<dyn InventoryProvider>,
        downloader: Arc<dyn Downloader>,
        exif: Arc<dyn ExifUpdater>,
        live_decoder: Arc<dyn LivePhotoDecoder>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            fs,
            export_root,
            current_user,
            inventory,
            downloader,
            exif,
            live_decoder,
            events,
            state: Mutex::new(SchedulerState::Idle),
            continuous: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExportEvent> {
        self.events.subscribe()
    }

    /// Reads the journal's current stage without starting a run.
    pub async fn status(&self) -> Result<ExportStage> {
        let journal = Journal::load(self.fs.clone(), self.export_root.clone()).await?;
        Ok(journal.snapshot().await.stage)
    }

    pub async fn schedule(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        match &*state {
            SchedulerState::Idle => {
                let cancel = Arc::new(AtomicBool::new(false));
                let rerun_pending = Arc::new(AtomicBool::new(false));
                *state = SchedulerState::Running {
                    cancel: cancel.clone(),
                    rerun_pending: rerun_pending.clone(),
                };
                drop(state);
                let this = self.clone();
                tokio::spawn(async move {
                    this.run_cycle(cancel, rerun_pending).await;
                });
            }
            SchedulerState::Running { rerun_pending, .. } => {
                rerun_pending.store(true, Ordering::SeqCst);
            }
        }
    }

    pub async fn stop(&self) {
        let state = self.state.lock().await;
        if let SchedulerState::Running { cancel, .. } = &*state {
            cancel.store(true, Ordering::SeqCst);
        }
    }

    async fn run_cycle(self: Arc<Self>, cancel: Arc<AtomicBool>, rerun_pending: Arc<AtomicBool>) {
        match self.pre_export().await {
            Ok(journal) => {
                if let Err(err) = self.run_export(&journal, &cancel).await {
                    crate::logging::error(format!("export run failed: {err}"));
                }
                if let Err(err) = self.post_export(&journal).await {
                    crate::logging::error(format!("post-export failed: {err}"));
                }
            }
            Err(err) => {
                crate::logging::error(format!("pre-export failed: {err}"));
            }
        }

        let mut state = self.state.lock().await;
        *state = SchedulerState::Idle;
        drop(state);

        if rerun_pending.swap(false, Ordering::SeqCst) {
            let this = self.clone();
            tokio::spawn(async move {
                this.schedule().await;
            });
        }
    }

    async fn pre_export(&self) -> Result<Arc<Journal>> {
        if !self.fs.exists(&self.export_root).await? {
            return Err(ExportError::ExportFolderDoesNotExist(self.export_root.clone()));
        }
        let journal = Arc::new(Journal::load(self.fs.clone(), self.export_root.clone()).await?);
        journal.set_stage(ExportStage::Migration).await?;
        MigrationRunner::run(journal.clone(), &|msg| crate::logging::info(msg)).await?;
        journal.set_stage(ExportStage::Starting).await?;
        let _ = self.events.send(ExportEvent::Stage(ExportStage::Starting));
        Ok(journal)
    }

    async fn run_export(&self, journal: &Arc<Journal>, cancel: &AtomicBool) -> Result<()> {
        let current_user_id = self.current_user.current_user_id();
        let inventory = self.inventory.inventory().await?;
        let snapshot = journal.snapshot().await;
        let plan = Planner::plan(current_user_id, &inventory, &snapshot);

        let materializer = Materializer::new(
            self.fs.clone(),
            journal.clone(),
            self.downloader.clone(),
            self.exif.clone(),
            self.live_decoder.clone(),
        );

        let events = self.events.clone();
        materializer
            .run_plan(&plan, cancel, &move |counts| {
                let _ = events.send(ExportEvent::Progress(counts));
            })
            .await
    }

    async fn post_export(&self, journal: &Arc<Journal>) -> Result<()> {
        if !self.fs.exists(&self.export_root).await? {
            journal.reset_stage_to_init().await?;
            let _ = self.events.send(ExportEvent::Stage(ExportStage::Init));
            return Ok(());
        }

        journal.set_stage(ExportStage::Finished).await?;
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        journal.set_last_attempt(now_ms).await?;

        let snapshot = journal.snapshot().await;
        let inventory = self.inventory.inventory().await?;
        let pending = Planner::plan(self.current_user.current_user_id(), &inventory, &snapshot)
            .files_to_export
            .len() as u64;

        let _ = self.events.send(ExportEvent::Stage(ExportStage::Finished));
        let _ = self.events.send(ExportEvent::LastExportTime(now_ms));
        let _ = self.events.send(ExportEvent::PendingExports(pending));
        Ok(())
    }

    /// Subscribes to `LocalFilesUpdated` and re-triggers a run on every
    /// event. Idempotent: a second call replaces the first subscription.
    pub async fn enable_continuous_export(self: &Arc<Self>, bus: Arc<dyn EventBus>) {
        let mut slot = self.continuous.lock().await;
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut rx = bus.subscribe();
            while let Ok(event) = rx.recv().await {
                if matches!(event, LibraryEvent::LocalFilesUpdated) {
                    this.schedule().await;
                }
            }
        });
        *slot = Some(handle);
    }

    pub async fn disable_continuous_export(&self) {
        let mut slot = self.continuous.lock().await;
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    /// If the journal's stage is in-progress, schedule a run to finish it.
    pub async fn resume_on_startup(self: &Arc<Self>) {
        if let Ok(stage) = self.status().await {
            if stage.in_progress() {
                self.schedule().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{
        FakeDownloader, FakeEventBus, FakeInventoryProvider, FakeLivePhotoDecoder, FixedCurrentUserStore,
        PassthroughExifUpdater,
    };
    use crate::fs_gateway::FakeFsGateway;
    use crate::model::{FileMetadataInfo, FileType, GeoLocation, Inventory, RemoteCollection, RemoteFile};
    use std::time::Duration;

    fn scheduler_with_inventory(fs: Arc<FakeFsGateway>, inventory: Inventory) -> Arc<Scheduler> {
        Scheduler::new(
            fs,
            PathBuf::from("/root"),
            Arc::new(FixedCurrentUserStore(1)),
            Arc::new(FakeInventoryProvider::new(inventory)),
            Arc::new(FakeDownloader::new()),
            Arc::new(PassthroughExifUpdater),
            Arc::new(FakeLivePhotoDecoder),
        )
    }

    #[tokio::test]
    async fn schedule_runs_to_finished_and_exports_file() {
        let fs = Arc::new(FakeFsGateway::new());
        fs.seed_dir(PathBuf::from("/root").as_path());
        let inv = Inventory {
            files: vec![RemoteFile {
                id: 1,
                collection_id: 100,
                updation_time: 1,
                owner_id: 1,
                file_type: FileType::Image,
                metadata: FileMetadataInfo {
                    title: "F1.jpg".into(),
                    creation_time_us: 1_700_000_000_000_000,
                    modification_time_us: None,
                    location: GeoLocation::default(),
                },
                public_caption: None,
            }],
            collections: vec![RemoteCollection {
                id: 100,
                owner_id: 1,
                user_facing_name: "Vacation".into(),
            }],
        };
        let scheduler = scheduler_with_inventory(fs.clone(), inv);
        let mut rx = scheduler.subscribe();
        scheduler.schedule().await;

        let mut saw_finished = false;
        for _ in 0..50 {
            if let Ok(ExportEvent::Stage(ExportStage::Finished)) = rx.try_recv() {
                saw_finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(saw_finished, "expected a Finished stage event");
        assert!(fs.read_file(std::path::Path::new("/root/Vacation/F1.jpg")).is_some());
    }

    #[tokio::test]
    async fn schedule_while_running_sets_rerun_pending_instead_of_second_run() {
        let fs = Arc::new(FakeFsGateway::new());
        fs.seed_dir(PathBuf::from("/root").as_path());
        let scheduler = scheduler_with_inventory(fs, Inventory::default());
        scheduler.schedule().await;
        scheduler.schedule().await;
        {
            let state = scheduler.state.lock().await;
            assert!(matches!(&*state, SchedulerState::Running { .. }));
        }
        // Let the run (and its coalesced rerun) drain so the scheduler
        // returns to Idle before the test process exits.
        for _ in 0..50 {
            if matches!(&*scheduler.state.lock().await, SchedulerState::Idle) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn continuous_export_event_triggers_a_run() {
        let fs = Arc::new(FakeFsGateway::new());
        fs.seed_dir(PathBuf::from("/root").as_path());
        let scheduler = scheduler_with_inventory(fs, Inventory::default());
        let bus = Arc::new(FakeEventBus::new());
        scheduler.enable_continuous_export(bus.clone()).await;

        let mut rx = scheduler.subscribe();
        bus.fire(crate::external::LibraryEvent::LocalFilesUpdated);

        let mut saw_finished = false;
        for _ in 0..50 {
            if let Ok(ExportEvent::Stage(ExportStage::Finished)) = rx.try_recv() {
                saw_finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(saw_finished, "continuous export event should trigger a run");
        scheduler.disable_continuous_export().await;
    }
}
