//! Owns the four on-disk directories and the atomic move semantics between
//! them: `inbox`, `processed`, `failed`, `retry_fee`.
//!
//! `retry_fee` belongs to the separate vision/table-detection batch job
//! (`spec.md` §1, not re-specified here); it is owned by this struct purely
//! so admission never collides with that later pass over the same files.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::models::DocumentState;

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome a document finished in, used to pick the destination directory
/// for `FileStore::route`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Succeeded,
    Failed,
}

impl RouteOutcome {
    /// `spec.md` §5 merges the cancellation bucket with failure for simplicity.
    pub fn from_state(state: DocumentState) -> Self {
        match state {
            DocumentState::Succeeded => RouteOutcome::Succeeded,
            _ => RouteOutcome::Failed,
        }
    }
}

/// Owns `inbox/`, `processed/`, `failed/`, `retry_fee/` under a root directory.
pub struct FileStore {
    inbox: PathBuf,
    processed: PathBuf,
    failed: PathBuf,
    retry_fee: PathBuf,
}

impl FileStore {
    /// Resolve and create the four directories under `root` if absent.
    pub fn new(root: &Path) -> Result<Self, FileStoreError> {
        let store = Self {
            inbox: root.join("inbox"),
            processed: root.join("processed"),
            failed: root.join("failed"),
            retry_fee: root.join("retry_fee"),
        };
        for dir in [&store.inbox, &store.processed, &store.failed, &store.retry_fee] {
            fs::create_dir_all(dir)?;
        }
        Ok(store)
    }

    pub fn inbox_dir(&self) -> &Path {
        &self.inbox
    }

    /// Compute the document id for a source filename (its stem), then admit
    /// every source into `inbox/<batch_id>__<document_id>.pdf`, appending
    /// `_<n>` on an in-batch collision. Each file move is atomic: rename
    /// within the volume, or copy-then-remove-source across volumes, with
    /// the original left untouched on any failure.
    pub fn admit(
        &self,
        batch_id: &str,
        src_paths: &[PathBuf],
    ) -> Result<(Vec<String>, Vec<PathBuf>), FileStoreError> {
        let mut document_ids = Vec::with_capacity(src_paths.len());
        let mut admitted_paths = Vec::with_capacity(src_paths.len());
        let mut used_ids: std::collections::HashSet<String> = std::collections::HashSet::new();

        for src in src_paths {
            let stem = src
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("document")
                .to_string();

            let mut document_id = stem.clone();
            let mut suffix = 0;
            while used_ids.contains(&document_id) {
                suffix += 1;
                document_id = format!("{stem}_{suffix}");
            }
            used_ids.insert(document_id.clone());

            let dest = self
                .inbox
                .join(format!("{batch_id}__{document_id}.pdf"));
            move_atomic(src, &dest)?;

            document_ids.push(document_id);
            admitted_paths.push(dest);
        }

        Ok((document_ids, admitted_paths))
    }

    /// List every inbox file admitted under `batch_id`, in filesystem
    /// enumeration order. Idempotent: calling twice with no intervening
    /// admission/route returns the same snapshot.
    pub fn claim(&self, batch_id: &str) -> Result<Vec<PathBuf>, FileStoreError> {
        let prefix = format!("{batch_id}__");
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.inbox)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Move a source file to `processed/` or `failed/` depending on outcome.
    /// Never overwrites an existing destination — appends a monotonic
    /// numeric suffix instead.
    ///
    /// `spec.md` §6's on-disk layout is asymmetric: `processed/<original>.pdf`
    /// drops the `<batch_id>__` prefix `Admit` added, while
    /// `failed/<batch_id>__<document_id>.pdf` keeps it (so `CollectFailed`/
    /// `RetryBatch` can still recover the owning batch from the filename).
    pub fn route(
        &self,
        batch_id: &str,
        source_path: &Path,
        outcome: RouteOutcome,
    ) -> Result<PathBuf, FileStoreError> {
        let file_name = source_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no filename"))?;

        let (dest_dir, dest_name) = match outcome {
            RouteOutcome::Succeeded => {
                let prefix = format!("{batch_id}__");
                let original = file_name.strip_prefix(&prefix).unwrap_or(file_name);
                (&self.processed, original.to_string())
            }
            RouteOutcome::Failed => (&self.failed, file_name.to_string()),
        };

        let dest = unique_destination(dest_dir, Path::new(&dest_name));
        move_atomic(source_path, &dest)?;
        Ok(dest)
    }

    /// Enumerate files in `failed/`, optionally filtered to one batch's prefix.
    pub fn collect_failed(&self, batch_id: Option<&str>) -> Result<Vec<PathBuf>, FileStoreError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.failed)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                batch_id
                    .map(|bid| {
                        let prefix = format!("{bid}__");
                        path.file_name()
                            .and_then(|n| n.to_str())
                            .map(|n| n.starts_with(&prefix))
                            .unwrap_or(false)
                    })
                    .unwrap_or(true)
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Move every failed file under `batch_id` back into `inbox/`, renamed
    /// under `new_batch_id`. Used by `BatchCoordinator::retry_batch`.
    pub fn requeue_failed(
        &self,
        batch_id: &str,
        new_batch_id: &str,
    ) -> Result<Vec<(String, PathBuf)>, FileStoreError> {
        let failed = self.collect_failed(Some(batch_id))?;
        let prefix = format!("{batch_id}__");
        let mut moved = Vec::with_capacity(failed.len());

        for path in failed {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            let document_id = file_name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".pdf"))
                .unwrap_or(file_name)
                .to_string();

            let dest = self
                .inbox
                .join(format!("{new_batch_id}__{document_id}.pdf"));
            move_atomic(&path, &dest)?;
            moved.push((document_id, dest));
        }

        Ok(moved)
    }
}

/// Rename within the volume; fall back to copy-then-remove across volumes.
/// Either the whole move happens or the source is left exactly as it was —
/// a partial move is never observable.
fn move_atomic(src: &Path, dest: &Path) -> Result<(), FileStoreError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dest)?;
            if let Err(e) = fs::remove_file(src) {
                let _ = fs::remove_file(dest);
                return Err(e.into());
            }
            Ok(())
        }
    }
}

/// Append `_<n>` before the extension until `dir/name` doesn't exist.
fn unique_destination(dir: &Path, name: &Path) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = name
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string();
    let ext = name.extension().and_then(|s| s.to_str());

    let mut n = 1;
    loop {
        let candidate_name = match ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = dir.join(candidate_name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
