//! Black-box scenario tests (S1-S6) driving the materializer against the
//! in-memory [`FakeFsGateway`] and fake external collaborators.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use ente_export_engine::error::ExportError;
use ente_export_engine::external::{FakeDownloader, FakeLivePhotoDecoder, PassthroughExifUpdater};
use ente_export_engine::fs_gateway::{FakeFailure, FakeFsGateway, FsGateway};
use ente_export_engine::journal::{ExportName, ExportStage, Journal};
use ente_export_engine::materializer::Materializer;
use ente_export_engine::model::{FileMetadataInfo, FileType, GeoLocation, Inventory, RemoteCollection, RemoteFile};
use ente_export_engine::planner::Planner;

const ROOT: &str = "/root/Ente Photos";

fn file(id: i64, collection_id: i64, updation_time: i64, title: &str, live: bool) -> RemoteFile {
    RemoteFile {
        id,
        collection_id,
        updation_time,
        owner_id: 1,
        file_type: if live { FileType::LivePhoto } else { FileType::Image },
        metadata: FileMetadataInfo {
            title: title.to_string(),
            creation_time_us: 1_700_000_000_000_000,
            modification_time_us: None,
            location: GeoLocation::default(),
        },
        public_caption: None,
    }
}

fn collection(id: i64, name: &str) -> RemoteCollection {
    RemoteCollection {
        id,
        owner_id: 1,
        user_facing_name: name.to_string(),
    }
}

async fn new_journal(fs: Arc<FakeFsGateway>) -> Arc<Journal> {
    fs.seed_dir(Path::new(ROOT));
    Arc::new(Journal::load(fs, PathBuf::from(ROOT)).await.unwrap())
}

fn materializer(fs: Arc<FakeFsGateway>, journal: Arc<Journal>) -> Materializer {
    Materializer::new(
        fs,
        journal,
        Arc::new(FakeDownloader::new()),
        Arc::new(PassthroughExifUpdater),
        Arc::new(FakeLivePhotoDecoder),
    )
}

async fn run_once(m: &Materializer, journal: &Arc<Journal>, inventory: &Inventory) {
    let plan = Planner::plan(1, inventory, &journal.snapshot().await);
    let cancel = AtomicBool::new(false);
    m.run_plan(&plan, &cancel, &|_| {}).await.unwrap();
}

#[tokio::test]
async fn s1_fresh_export_materializes_file_and_sidecar() {
    let fs = Arc::new(FakeFsGateway::new());
    let journal = new_journal(fs.clone()).await;
    let m = materializer(fs.clone(), journal.clone());

    let inventory = Inventory {
        files: vec![file(1, 100, 1, "F1.jpg", false)],
        collections: vec![collection(100, "Vacation")],
    };
    run_once(&m, &journal, &inventory).await;

    assert!(fs.read_file(Path::new(&format!("{ROOT}/Vacation/F1.jpg"))).is_some());
    assert!(fs
        .read_file(Path::new(&format!("{ROOT}/Vacation/metadata/F1.jpg.json")))
        .is_some());
    assert_eq!(
        journal.get_file_name("1_100_1").await,
        Some(ExportName::plain("F1.jpg".to_string()))
    );
    assert_eq!(journal.get_collection_name(100).await, Some("Vacation".to_string()));
}

#[tokio::test]
async fn s2_rename_collision_suffixes_new_name() {
    let fs = Arc::new(FakeFsGateway::new());
    let journal = new_journal(fs.clone()).await;
    let m = materializer(fs.clone(), journal.clone());

    // C1 was previously exported as "Vacation"; a "Summer" directory already
    // occupies the name the remote rename wants to move it to.
    journal.set_collection_name(100, "Vacation".to_string()).await.unwrap();
    fs.seed_file(Path::new(&format!("{ROOT}/Vacation/F1.jpg")), b"x");
    fs.seed_dir(Path::new(&format!("{ROOT}/Summer")));

    let inventory = Inventory {
        files: vec![file(1, 100, 1, "F1.jpg", false)],
        collections: vec![collection(100, "Summer")],
    };
    run_once(&m, &journal, &inventory).await;

    assert_eq!(journal.get_collection_name(100).await, Some("Summer(1)".to_string()));
    assert!(fs.read_file(Path::new(&format!("{ROOT}/Summer(1)/F1.jpg"))).is_some());
}

#[tokio::test]
async fn s3_delete_then_reupload_goes_through_trash() {
    let fs = Arc::new(FakeFsGateway::new());
    let journal = new_journal(fs.clone()).await;
    let m = materializer(fs.clone(), journal.clone());

    let mut inventory = Inventory {
        files: vec![file(1, 100, 1, "F1.jpg", false)],
        collections: vec![collection(100, "Vacation")],
    };
    run_once(&m, &journal, &inventory).await;
    assert!(fs.read_file(Path::new(&format!("{ROOT}/Vacation/F1.jpg"))).is_some());

    // F1 removed remotely.
    inventory.files.clear();
    run_once(&m, &journal, &inventory).await;
    assert!(fs.read_file(Path::new(&format!("{ROOT}/Vacation/F1.jpg"))).is_none());
    assert!(fs
        .read_file(Path::new(&format!("{ROOT}/Trash/Vacation/F1.jpg")))
        .is_some());
    assert!(journal.get_file_name("1_100_1").await.is_none());

    // Re-uploaded as a new file (new updation_time -> new uid).
    inventory.files.push(file(2, 100, 1, "F1.jpg", false));
    run_once(&m, &journal, &inventory).await;
    assert!(fs.read_file(Path::new(&format!("{ROOT}/Vacation/F1.jpg"))).is_some());
    assert!(fs
        .read_file(Path::new(&format!("{ROOT}/Trash/Vacation/F1.jpg")))
        .is_some());
    assert_eq!(
        journal.get_file_name("2_100_1").await,
        Some(ExportName::plain("F1.jpg".to_string()))
    );
}

#[tokio::test]
async fn s4_live_photo_video_failure_rolls_back_image_and_journal() {
    let fs = Arc::new(FakeFsGateway::new());
    let journal = new_journal(fs.clone()).await;
    let m = materializer(fs.clone(), journal.clone());

    journal.set_collection_name(100, "Vacation".to_string()).await.unwrap();
    fs.seed_dir(Path::new(&format!("{ROOT}/Vacation")));
    fs.seed_dir(Path::new(&format!("{ROOT}/Vacation/metadata")));
    fs.fail_once(FakeFailure::SaveStream(PathBuf::from(format!(
        "{ROOT}/Vacation/LP.MOV"
    ))));

    let inventory = Inventory {
        files: vec![file(5, 100, 1, "LP", true)],
        collections: vec![collection(100, "Vacation")],
    };
    let cancel = AtomicBool::new(false);
    let plan = Planner::plan(1, &inventory, &journal.snapshot().await);
    let err = m.run_plan(&plan, &cancel, &|_| {}).await.unwrap_err();
    assert!(matches!(err, ExportError::Io(_)));

    assert!(journal.get_file_name("5_100_1").await.is_none());
    assert!(fs.read_file(Path::new(&format!("{ROOT}/Vacation/LP.HEIC"))).is_none());

    // A subsequent run, with the fault cleared, re-attempts and succeeds.
    let plan = Planner::plan(1, &inventory, &journal.snapshot().await);
    m.run_plan(&plan, &cancel, &|_| {}).await.unwrap();
    assert!(fs.read_file(Path::new(&format!("{ROOT}/Vacation/LP.HEIC"))).is_some());
    assert!(fs.read_file(Path::new(&format!("{ROOT}/Vacation/LP.MOV"))).is_some());
}

#[tokio::test]
async fn s5_mid_run_cancellation_preserves_completed_items() {
    let fs = Arc::new(FakeFsGateway::new());
    let journal = new_journal(fs.clone()).await;
    let m = materializer(fs.clone(), journal.clone());

    let inventory = Inventory {
        files: vec![
            file(1, 100, 1, "A.jpg", false),
            file(2, 100, 1, "B.jpg", false),
            file(3, 100, 1, "C.jpg", false),
        ],
        collections: vec![collection(100, "Vacation")],
    };
    let plan = Planner::plan(1, &inventory, &journal.snapshot().await);
    assert_eq!(plan.files_to_export.len(), 3);

    // Cancel after the first file completes, via the progress callback.
    let cancel = AtomicBool::new(false);
    let completed = AtomicUsize::new(0);
    let result = m
        .export_files(&plan.files_to_export, &plan.collection_names, &cancel, &|_| {
            if completed.fetch_add(1, Ordering::SeqCst) == 0 {
                cancel.store(true, Ordering::SeqCst);
            }
        })
        .await;
    assert!(matches!(result, Err(ExportError::ExportStopped)));

    assert!(journal.get_file_name("1_100_1").await.is_some());
    assert!(journal.get_file_name("2_100_1").await.is_none());
    assert!(journal.get_file_name("3_100_1").await.is_none());

    // A subsequent run (no cancellation) exports the rest without re-writing A.
    let cancel = AtomicBool::new(false);
    let remaining_plan = Planner::plan(1, &inventory, &journal.snapshot().await);
    assert_eq!(remaining_plan.files_to_export.len(), 2);
    m.export_files(
        &remaining_plan.files_to_export,
        &remaining_plan.collection_names,
        &cancel,
        &|_| {},
    )
    .await
    .unwrap();
    assert!(journal.get_file_name("2_100_1").await.is_some());
    assert!(journal.get_file_name("3_100_1").await.is_some());
}

#[tokio::test]
async fn s6_root_removed_mid_run_raises_does_not_exist() {
    let fs = Arc::new(FakeFsGateway::new());
    let journal = new_journal(fs.clone()).await;
    let m = materializer(fs.clone(), journal.clone());

    journal.set_collection_name(100, "Vacation".to_string()).await.unwrap();
    journal
        .set_file_name("1_100_1".into(), ExportName::plain("F1.jpg"))
        .await
        .unwrap();
    fs.seed_file(Path::new(&format!("{ROOT}/Vacation/F1.jpg")), b"x");

    // Root vanishes externally before trashing begins.
    fs.delete_folder(Path::new(ROOT)).await.unwrap();

    let cancel = AtomicBool::new(false);
    let err = m
        .trash_files(&["1_100_1".to_string()], &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::ExportFolderDoesNotExist(_)));
    assert_eq!(journal.snapshot().await.stage, ExportStage::Init);
}
