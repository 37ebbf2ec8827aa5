//! Narrow abstraction over platform filesystem + user prompts.
//!
//! No ordering or concurrency guarantees are assumed across calls; callers
//! (the journal, the materializer) serialize when required. Two
//! implementations ship: [`StdFsGateway`] for production, backed by
//! `tokio::fs`, and [`FakeFsGateway`] (test tooling) which records every call
//! and can be told to fail specific operations on specific paths.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use uuid::Uuid;

use crate::error::{ExportError, Result};

pub type ByteStream = std::pin::Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

#[async_trait]
pub trait FsGateway: Send + Sync {
    async fn select_directory(&self) -> Result<PathBuf>;
    async fn exists(&self, path: &Path) -> Result<bool>;
    async fn check_exists_and_create_dir(&self, path: &Path) -> Result<()>;
    async fn rename(&self, old: &Path, new: &Path) -> Result<()>;
    async fn move_file(&self, src: &Path, dst: &Path) -> Result<()>;
    async fn delete_file(&self, path: &Path) -> Result<()>;
    async fn delete_folder(&self, path: &Path) -> Result<()>;
    async fn save_file_to_disk(&self, path: &Path, text: &str) -> Result<()>;
    async fn save_stream_to_disk(&self, path: &Path, stream: ByteStream) -> Result<()>;
    async fn read_text_file(&self, path: &Path) -> Result<String>;
}

/// Production gateway over the real filesystem.
pub struct StdFsGateway;

#[async_trait]
impl FsGateway for StdFsGateway {
    async fn select_directory(&self) -> Result<PathBuf> {
        // The real directory picker is a UI collaborator out of scope for the
        // core; callers inject the chosen path directly in practice.
        Err(ExportError::SelectFolderAborted)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn check_exists_and_create_dir(&self, path: &Path) -> Result<()> {
        match tokio::fs::create_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn rename(&self, old: &Path, new: &Path) -> Result<()> {
        Ok(tokio::fs::rename(old, new).await?)
    }

    async fn move_file(&self, src: &Path, dst: &Path) -> Result<()> {
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(tokio::fs::rename(src, dst).await?)
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_folder(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_file_to_disk(&self, path: &Path, text: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = sibling_tmp_path(path);
        tokio::fs::write(&tmp, text.as_bytes()).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn save_stream_to_disk(&self, path: &Path, mut stream: ByteStream) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = sibling_tmp_path(path);
        let mut file = tokio::fs::File::create(&tmp).await?;
        let mut write_err = None;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    if let Err(err) = file.write_all(&bytes).await {
                        write_err = Some(err.into());
                        break;
                    }
                }
                Err(err) => {
                    write_err = Some(err);
                    break;
                }
            }
        }
        drop(file);
        if let Some(err) = write_err {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err);
        }
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_text_file(&self, path: &Path) -> Result<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("export");
    parent.join(format!(".{name}.tmp-{}", Uuid::new_v4()))
}

/// Which operation, on which path, a [`FakeFsGateway`] should fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FakeFailure {
    Rename(PathBuf),
    MoveFile(PathBuf),
    SaveStream(PathBuf),
    SaveFile(PathBuf),
    CreateDir(PathBuf),
    DeleteFolder(PathBuf),
}

/// In-memory filesystem double used by the integration tests. Directories
/// are implicit (any path under a tracked directory "exists" as a parent);
/// files are tracked by exact path with their bytes.
#[derive(Default)]
pub struct FakeFsGateway {
    inner: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    files: std::collections::HashMap<PathBuf, Vec<u8>>,
    dirs: HashSet<PathBuf>,
    failures: HashSet<FakeFailure>,
    calls: Vec<String>,
}

impl FakeFsGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_once(&self, failure: FakeFailure) {
        self.inner.lock().unwrap().failures.insert(failure);
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn files_under(&self, dir: &Path) -> Vec<PathBuf> {
        self.inner
            .lock()
            .unwrap()
            .files
            .keys()
            .filter(|p| p.starts_with(dir))
            .cloned()
            .collect()
    }

    pub fn read_file(&self, path: &Path) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().files.get(path).cloned()
    }

    pub fn seed_file(&self, path: &Path, bytes: &[u8]) {
        let mut state = self.inner.lock().unwrap();
        state.files.insert(path.to_path_buf(), bytes.to_vec());
        track_ancestors(&mut state.dirs, path);
    }

    pub fn seed_dir(&self, path: &Path) {
        let mut state = self.inner.lock().unwrap();
        state.dirs.insert(path.to_path_buf());
    }
}

fn track_ancestors(dirs: &mut HashSet<PathBuf>, path: &Path) {
    let mut cur = path.parent();
    while let Some(p) = cur {
        dirs.insert(p.to_path_buf());
        cur = p.parent();
    }
}

#[async_trait]
impl FsGateway for FakeFsGateway {
    async fn select_directory(&self) -> Result<PathBuf> {
        Err(ExportError::SelectFolderAborted)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let state = self.inner.lock().unwrap();
        Ok(state.files.contains_key(path) || state.dirs.contains(path))
    }

    async fn check_exists_and_create_dir(&self, path: &Path) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if state.failures.remove(&FakeFailure::CreateDir(path.to_path_buf())) {
            return Err(ExportError::Io(std::io::Error::other("fake create_dir failure")));
        }
        state.dirs.insert(path.to_path_buf());
        track_ancestors(&mut state.dirs, &path.join("_"));
        state.calls.push(format!("mkdir {}", path.display()));
        Ok(())
    }

    async fn rename(&self, old: &Path, new: &Path) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if state.failures.remove(&FakeFailure::Rename(old.to_path_buf())) {
            return Err(ExportError::Io(std::io::Error::other("fake rename failure")));
        }
        if state.dirs.remove(old) {
            state.dirs.insert(new.to_path_buf());
            let prefix = old.to_path_buf();
            let moved: Vec<PathBuf> = state
                .files
                .keys()
                .filter(|p| p.starts_with(&prefix))
                .cloned()
                .collect();
            for p in moved {
                let rel = p.strip_prefix(&prefix).unwrap();
                let bytes = state.files.remove(&p).unwrap();
                state.files.insert(new.join(rel), bytes);
            }
        } else if let Some(bytes) = state.files.remove(old) {
            state.files.insert(new.to_path_buf(), bytes);
        } else {
            return Err(ExportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such path: {}", old.display()),
            )));
        }
        state.calls.push(format!("rename {} -> {}", old.display(), new.display()));
        Ok(())
    }

    async fn move_file(&self, src: &Path, dst: &Path) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if state.failures.remove(&FakeFailure::MoveFile(src.to_path_buf())) {
            return Err(ExportError::Io(std::io::Error::other("fake move_file failure")));
        }
        let bytes = state.files.remove(src).ok_or_else(|| {
            ExportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {}", src.display()),
            ))
        })?;
        track_ancestors(&mut state.dirs, dst);
        state.files.insert(dst.to_path_buf(), bytes);
        state.calls.push(format!("move {} -> {}", src.display(), dst.display()));
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        state.files.remove(path);
        state.calls.push(format!("delete_file {}", path.display()));
        Ok(())
    }

    async fn delete_folder(&self, path: &Path) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if state.failures.remove(&FakeFailure::DeleteFolder(path.to_path_buf())) {
            return Err(ExportError::Io(std::io::Error::other("fake delete_folder failure")));
        }
        state.dirs.remove(path);
        let prefix = path.to_path_buf();
        state.files.retain(|p, _| !p.starts_with(&prefix));
        state.calls.push(format!("delete_folder {}", path.display()));
        Ok(())
    }

    async fn save_file_to_disk(&self, path: &Path, text: &str) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if state.failures.remove(&FakeFailure::SaveFile(path.to_path_buf())) {
            return Err(ExportError::Io(std::io::Error::other("fake save_file failure")));
        }
        track_ancestors(&mut state.dirs, path);
        state.files.insert(path.to_path_buf(), text.as_bytes().to_vec());
        state.calls.push(format!("save_file {}", path.display()));
        Ok(())
    }

    async fn save_stream_to_disk(&self, path: &Path, mut stream: ByteStream) -> Result<()> {
        let should_fail = {
            let mut state = self.inner.lock().unwrap();
            state.failures.remove(&FakeFailure::SaveStream(path.to_path_buf()))
        };
        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        if should_fail {
            return Err(ExportError::Io(std::io::Error::other("fake save_stream failure")));
        }
        let mut state = self.inner.lock().unwrap();
        track_ancestors(&mut state.dirs, path);
        state.files.insert(path.to_path_buf(), buf);
        state.calls.push(format!("save_stream {}", path.display()));
        Ok(())
    }

    async fn read_text_file(&self, path: &Path) -> Result<String> {
        let state = self.inner.lock().unwrap();
        let bytes = state.files.get(path).ok_or_else(|| {
            ExportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {}", path.display()),
            ))
        })?;
        String::from_utf8(bytes.clone())
            .map_err(|_| ExportError::Io(std::io::Error::other("invalid utf-8")))
    }
}
