use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::item::FileHandle;
use super::paths::{PathError, normalize_relative, normalize_remote};

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("path error: {0}")]
    Path(#[from] PathError),
}

#[derive(Debug, Clone)]
pub struct UploadCandidate {
    pub name: String,
    pub size: u64,
    pub file: FileHandle,
    pub relative_path: String,
    pub target_path: String,
}

impl UploadCandidate {
    pub fn new(
        file: FileHandle,
        relative_path: &str,
        target_path: &str,
    ) -> Result<Self, CollectError> {
        let relative_path = normalize_relative(relative_path)?;
        Ok(Self {
            name: file.name().to_string(),
            size: file.size(),
            file,
            relative_path,
            target_path: normalize_remote(target_path),
        })
    }
}

pub async fn collect_candidates(
    inputs: &[PathBuf],
    target_path: &str,
) -> Result<Vec<UploadCandidate>, CollectError> {
    let mut candidates = Vec::new();
    for input in inputs {
        let meta = tokio::fs::metadata(input)
            .await
            .map_err(|source| io_error(input, source))?;
        let root = input.parent().unwrap_or(Path::new(""));
        if meta.is_dir() {
            walk_directory(input, root, target_path, &mut candidates).await?;
        } else {
            candidates.push(candidate_for(input, root, target_path).await?);
        }
    }
    Ok(candidates)
}

async fn walk_directory(
    dir: &Path,
    root: &Path,
    target_path: &str,
    out: &mut Vec<UploadCandidate>,
) -> Result<(), CollectError> {
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .map_err(|source| io_error(&current, source))?;
        let mut children = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_error(&current, source))?
        {
            children.push(entry.path());
        }
        children.sort();
        for child in children {
            let meta = tokio::fs::metadata(&child)
                .await
                .map_err(|source| io_error(&child, source))?;
            if meta.is_dir() {
                pending.push(child);
            } else if meta.is_file() {
                out.push(candidate_for(&child, root, target_path).await?);
            }
        }
    }
    Ok(())
}

async fn candidate_for(
    path: &Path,
    root: &Path,
    target_path: &str,
) -> Result<UploadCandidate, CollectError> {
    let file = FileHandle::open(path)
        .await
        .map_err(|source| io_error(path, source))?;
    let relative = path.strip_prefix(root).unwrap_or(path);
    UploadCandidate::new(file, &relative.to_string_lossy(), target_path)
}

fn io_error(path: &Path, source: io::Error) -> CollectError {
    CollectError::Io {
        path: path.to_path_buf(),
        source,
    }
}
