//! Contract discovery and the render worker pool
//!
//! Directories are walked for contract documents in sorted order. Work items
//! run on scoped std threads; results are collected under a mutex and handed
//! back in input order.

use crate::config::compile_time::batch::MAX_WORKER_THREADS;
use crate::config::compile_time::input::MAX_DOCUMENTS_PER_BATCH;
use crate::logging::codes;
use crate::validation::DocumentFormat;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_threads: usize,
    pub recursive: bool,
    pub max_files: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_threads: num_cpus::get().clamp(1, MAX_WORKER_THREADS),
            recursive: true,
            max_files: MAX_DOCUMENTS_PER_BATCH,
        }
    }
}

impl BatchConfig {
    pub fn with_threads(threads: usize) -> Self {
        Self {
            max_threads: threads.clamp(1, MAX_WORKER_THREADS),
            ..Self::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    #[error("No contract documents found in {path}")]
    NoDocumentsFound { path: PathBuf },

    #[error("Too many contract documents: {count} (max: {max})")]
    TooManyDocuments { count: usize, max: usize },

    #[error("IO error while scanning {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Worker thread panicked while processing item {index}")]
    WorkerPanicked { index: usize },
}

impl BatchError {
    pub fn error_code(&self) -> codes::Code {
        match self {
            BatchError::NotFound { .. } | BatchError::NoDocumentsFound { .. } => {
                codes::input::DOCUMENT_NOT_FOUND
            }
            BatchError::TooManyDocuments { .. } => codes::input::BATCH_LIMIT_EXCEEDED,
            BatchError::Io { .. } => codes::input::IO_ERROR,
            BatchError::WorkerPanicked { .. } => codes::system::WORKER_FAILURE,
        }
    }
}

fn is_contract_file(path: &Path) -> bool {
    path.is_file() && DocumentFormat::from_path(path).is_some()
}

/// Contract documents (`.yml`, `.yaml`, `.json`) under a directory, sorted
pub fn discover_contract_files(dir: &Path, config: &BatchConfig) -> Result<Vec<PathBuf>, BatchError> {
    crate::log_info!("Starting contract discovery",
        "directory" => dir.display(),
        "recursive" => config.recursive);

    if !dir.is_dir() {
        return Err(BatchError::NotFound {
            path: dir.to_path_buf(),
        });
    }

    let walker = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .max_depth(if config.recursive { usize::MAX } else { 1 });

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| BatchError::Io {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        if is_contract_file(entry.path()) {
            files.push(entry.into_path());
        }
        if files.len() > config.max_files {
            return Err(BatchError::TooManyDocuments {
                count: files.len(),
                max: config.max_files,
            });
        }
    }

    if files.is_empty() {
        return Err(BatchError::NoDocumentsFound {
            path: dir.to_path_buf(),
        });
    }
    files.sort();

    crate::log_success!(codes::success::DOCUMENT_LOADED, "Contract discovery completed",
        "files_found" => files.len(),
        "directory" => dir.display());
    Ok(files)
}

/// Expand files and directories into the document list for one batch
pub fn collect_inputs(paths: &[PathBuf], config: &BatchConfig) -> Result<Vec<PathBuf>, BatchError> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(discover_contract_files(path, config)?);
        } else if path.exists() {
            files.push(path.clone());
        } else {
            return Err(BatchError::NotFound { path: path.clone() });
        }
    }
    // The same document named twice, directly or through a directory, loads once
    let mut seen = HashSet::new();
    files.retain(|path| seen.insert(fs::canonicalize(path).unwrap_or_else(|_| path.clone())));
    if files.len() > config.max_files {
        return Err(BatchError::TooManyDocuments {
            count: files.len(),
            max: config.max_files,
        });
    }
    Ok(files)
}

fn chunk_size(items: usize, threads: usize) -> usize {
    items.div_ceil(threads.max(1)).max(1)
}

/// Run `worker` over every item on up to `max_threads` threads
///
/// Results come back in item order regardless of completion order.
pub fn run_parallel<T, R, F>(items: &[T], max_threads: usize, worker: F) -> Result<Vec<R>, BatchError>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> R + Sync,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let threads = max_threads.clamp(1, MAX_WORKER_THREADS).min(items.len());
    let size = chunk_size(items.len(), threads);
    let results: Arc<Mutex<Vec<(usize, R)>>> = Arc::new(Mutex::new(Vec::with_capacity(items.len())));

    crate::log_debug!("Worker pool configuration",
        "items" => items.len(),
        "threads" => threads,
        "chunk_size" => size);

    let worker = &worker;
    let panicked = thread::scope(|scope| {
        let handles: Vec<(usize, thread::ScopedJoinHandle<'_, ()>)> = items
            .chunks(size)
            .enumerate()
            .map(|(chunk_index, chunk)| {
                let offset = chunk_index * size;
                let results = Arc::clone(&results);
                let handle = scope.spawn(move || {
                    for (local, item) in chunk.iter().enumerate() {
                        let index = offset + local;
                        let result = worker(index, item);
                        results
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .push((index, result));
                    }
                });
                (offset, handle)
            })
            .collect();

        let joined: Vec<(usize, bool)> = handles
            .into_iter()
            .map(|(offset, handle)| (offset, handle.join().is_err()))
            .collect();
        joined
            .into_iter()
            .find_map(|(offset, failed)| failed.then_some(offset))
    });

    if let Some(index) = panicked {
        crate::log_error!(codes::system::WORKER_FAILURE, "Worker thread panicked",
            "first_item" => index);
        return Err(BatchError::WorkerPanicked { index });
    }

    let mut collected = match Arc::try_unwrap(results) {
        Ok(mutex) => mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()),
        Err(shared) => std::mem::take(&mut *shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())),
    };
    collected.sort_by_key(|(index, _)| *index);
    Ok(collected.into_iter().map(|(_, result)| result).collect())
}
