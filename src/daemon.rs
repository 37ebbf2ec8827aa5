//! Long-running wrapper around [`ExportEngine`](crate::engine::ExportEngine):
//! resolves settings, builds the engine against production collaborators,
//! resumes any in-progress run, and idles until told to stop — either on the
//! current tokio runtime or in a dedicated background thread, mirroring the
//! teacher crate's split between `run_daemon_with_shutdown` (embeddable) and
//! `start_threaded` (fire-and-forget).

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};

use crate::config::{ExportSettings, SettingsOverrides};
use crate::engine::{ExportEngine, ExportEngineDeps};
use crate::external::{
    FixedCurrentUserStore, NullDownloader, NullEventBus, NullInventoryProvider, NullLivePhotoDecoder,
    PassthroughExifUpdater,
};
use crate::fs_gateway::StdFsGateway;
use crate::workspace::ExportRootLock;

#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    pub settings_path: Option<PathBuf>,
    pub settings_overrides: SettingsOverrides,
    pub log_path: Option<PathBuf>,
    pub current_user_id: i64,
}

pub struct ThreadedDaemonHandle {
    shutdown: std::sync::mpsc::Sender<()>,
    join: Option<thread::JoinHandle<Result<()>>>,
}

impl ThreadedDaemonHandle {
    pub fn stop(mut self) -> Result<()> {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            match join.join() {
                Ok(res) => res,
                Err(_) => anyhow::bail!("export daemon thread panicked"),
            }
        } else {
            Ok(())
        }
    }
}

/// Runs the export daemon on the *current* tokio runtime until `shutdown`
/// is notified.
pub async fn run_daemon_with_shutdown(
    settings: ExportSettings,
    opts: DaemonOptions,
    shutdown: Arc<tokio::sync::Notify>,
) -> Result<()> {
    let log_path = opts
        .log_path
        .clone()
        .unwrap_or_else(crate::config::default_log_file_path);
    crate::logging::init_log_file(&log_path)?;
    crate::logging::info(format!(
        "export daemon start version={} log={}",
        env!("CARGO_PKG_VERSION"),
        log_path.display()
    ));

    let folder = settings
        .folder
        .clone()
        .context("no export folder configured; run with --folder or set it in settings")?;

    let _lock = ExportRootLock::try_lock(&folder)
        .context("another export process is already running against this folder")?;

    let event_bus = Arc::new(NullEventBus::default());
    let engine = ExportEngine::new(
        folder,
        ExportEngineDeps {
            fs: Arc::new(StdFsGateway),
            current_user: Arc::new(FixedCurrentUserStore(opts.current_user_id)),
            inventory: Arc::new(NullInventoryProvider),
            downloader: Arc::new(NullDownloader),
            exif: Arc::new(PassthroughExifUpdater),
            live_decoder: Arc::new(NullLivePhotoDecoder),
            event_bus: Some(event_bus),
        },
    );

    engine.apply_settings_and_resume(&settings).await;

    shutdown.notified().await;
    engine.stop().await;
    Ok(())
}

/// Starts the daemon in a dedicated background thread with its own tokio
/// runtime, for embedding in an application that doesn't want to own this
/// crate's async lifecycle directly.
pub fn start_threaded(settings: ExportSettings, opts: DaemonOptions) -> Result<ThreadedDaemonHandle> {
    let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
    let join = thread::Builder::new()
        .name("ente-export-daemon".to_string())
        .spawn(move || {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .worker_threads(2)
                .build()
                .context("build tokio runtime")?;

            rt.block_on(async move {
                let shutdown = Arc::new(tokio::sync::Notify::new());
                let shutdown_task = shutdown.clone();
                tokio::task::spawn_blocking(move || {
                    let _ = shutdown_rx.recv();
                    shutdown_task.notify_waiters();
                });

                run_daemon_with_shutdown(settings, opts, shutdown).await
            })
        })
        .context("spawn export daemon thread")?;

    Ok(ThreadedDaemonHandle {
        shutdown: shutdown_tx,
        join: Some(join),
    })
}

pub fn start_threaded_from_settings_path(
    settings_path: &std::path::Path,
    overrides: SettingsOverrides,
    opts: DaemonOptions,
) -> Result<ThreadedDaemonHandle> {
    let settings = ExportSettings::load_with_overrides(settings_path, overrides)?;
    start_threaded(settings, opts)
}
