use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::error::{AppError, AppResult};

pub const DETECTIONS: &str = "detections";
pub const FINDINGS: &str = "findings";
pub const RISKS: &str = "risks";
pub const SCHEDULES: &str = "schedules";
pub const BOMS: &str = "boms";
pub const ORDERS: &str = "orders";
pub const SUBSCRIPTIONS: &str = "subscriptions";

const ENTITIES: [&str; 7] = [
    DETECTIONS,
    FINDINGS,
    RISKS,
    SCHEDULES,
    BOMS,
    ORDERS,
    SUBSCRIPTIONS,
];

/// Reads a whole file off-thread so a stalled filesystem surfaces as a
/// retryable timeout instead of hanging the pipeline.
pub fn read_file_bounded(path: &Path, timeout: Duration) -> AppResult<String> {
    let (tx, rx) = mpsc::channel();
    let path_buf = path.to_path_buf();
    thread::spawn(move || {
        let _ = tx.send(fs::read_to_string(&path_buf));
    });
    match rx.recv_timeout(timeout) {
        Ok(Ok(contents)) => Ok(contents),
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => Err(AppError::not_found(
            format!("{} does not exist", path.display()),
        )),
        Ok(Err(err)) => Err(AppError::config(format!(
            "failed to read {}: {err}",
            path.display()
        ))),
        Err(_) => Err(AppError::timeout(format!(
            "timed out reading {}",
            path.display()
        ))),
    }
}

/// Readers never see a partially written document.
fn write_atomic(path: &Path, tmp: &Path, contents: &[u8]) -> anyhow::Result<()> {
    fs::write(tmp, contents).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

/// File-backed JSON state store, one directory per entity type under the data
/// root. Writes are temp-file + rename, so a rebuild of the same id is an
/// atomic last-write-wins overwrite.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
    io_timeout: Duration,
}

impl Store {
    pub fn open(data_root: &Path, io_timeout: Duration) -> AppResult<Self> {
        let root = data_root.join("state");
        for entity in ENTITIES {
            fs::create_dir_all(root.join(entity)).map_err(|err| {
                AppError::config(format!(
                    "failed to create state dir {}: {err}",
                    root.join(entity).display()
                ))
            })?;
        }
        Ok(Self { root, io_timeout })
    }

    fn doc_path(&self, entity: &str, id: &str) -> PathBuf {
        self.root.join(entity).join(format!("{id}.json"))
    }

    pub fn put<T: Serialize>(&self, entity: &str, id: &str, value: &T) -> AppResult<()> {
        let path = self.doc_path(entity, id);
        let tmp = self.root.join(entity).join(format!(".{id}.json.tmp"));
        let contents = serde_json::to_vec_pretty(value)?;
        write_atomic(&path, &tmp, &contents).map_err(|err| {
            AppError::config(format!("failed to persist {}: {err:#}", path.display()))
        })?;
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, entity: &str, id: &str) -> AppResult<Option<T>> {
        let path = self.doc_path(entity, id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = read_file_bounded(&path, self.io_timeout)?;
        let value = serde_json::from_str(&contents).map_err(|err| {
            AppError::config(format!("corrupt state document {}: {err}", path.display()))
        })?;
        Ok(Some(value))
    }

    pub fn require<T: DeserializeOwned>(&self, entity: &str, id: &str) -> AppResult<T> {
        self.get(entity, id)?
            .ok_or_else(|| AppError::not_found(format!("no {entity} document with id {id}")))
    }

    pub fn remove(&self, entity: &str, id: &str) -> AppResult<()> {
        let path = self.doc_path(entity, id);
        if path.exists() {
            fs::remove_file(&path).map_err(|err| {
                AppError::config(format!("failed to remove {}: {err}", path.display()))
            })?;
        }
        Ok(())
    }

    /// All documents of one entity type, ordered by document id for
    /// deterministic iteration.
    pub fn list<T: DeserializeOwned>(&self, entity: &str) -> AppResult<Vec<T>> {
        let dir = self.root.join(entity);
        let entries = fs::read_dir(&dir).map_err(|err| {
            AppError::config(format!("failed to list {}: {err}", dir.display()))
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter(|path| {
                !path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with('.'))
            })
            .collect();
        paths.sort();

        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            let contents = read_file_bounded(&path, self.io_timeout)?;
            let value = serde_json::from_str(&contents).map_err(|err| {
                AppError::config(format!("corrupt state document {}: {err}", path.display()))
            })?;
            out.push(value);
        }
        Ok(out)
    }
}
