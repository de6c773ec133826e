//! Deferred file reaper
//!
//! A single worker thread deletes heap dump files and clears leak directories
//! in submission order. Submitting never blocks and failures are only logged:
//! the database is the source of truth, files on disk are best effort.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use crate::Result;
use crate::leak_directory::LeakDirectoryProvider;

/// Work item executed by the reaper thread
pub enum ReapTask {
    /// Delete one heap dump file
    DeleteFile(PathBuf),
    /// Remove the contents of a leak directory
    ClearDirectory(Arc<dyn LeakDirectoryProvider>),
    /// Acknowledge once every earlier task has run
    Flush(Sender<()>),
}

/// Strictly ordered background queue of file deletions
pub struct FileReaper {
    tx: Option<Sender<ReapTask>>,
    handle: Option<JoinHandle<()>>,
}

impl FileReaper {
    /// Start the reaper thread
    pub fn spawn() -> Result<Self> {
        let (tx, rx) = channel::unbounded::<ReapTask>();

        let handle = thread::Builder::new()
            .name("heapstore-reaper".to_string())
            .spawn(move || reap_loop(rx))?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queue deletion of a heap dump file. A file that is already gone is fine.
    pub fn delete_file(&self, path: impl Into<PathBuf>) {
        self.submit(ReapTask::DeleteFile(path.into()));
    }

    /// Queue a full clear of the provider's leak directory
    pub fn clear_directory(&self, directory: Arc<dyn LeakDirectoryProvider>) {
        self.submit(ReapTask::ClearDirectory(directory));
    }

    /// Block until every task submitted so far has run
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = channel::bounded(1);
        if self.submit(ReapTask::Flush(ack_tx)) && ack_rx.recv().is_err() {
            tracing::warn!("Reaper thread exited before acknowledging flush");
        }
    }

    fn submit(&self, task: ReapTask) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        if tx.send(task).is_err() {
            tracing::warn!("Reaper thread is gone, dropping file task");
            return false;
        }
        true
    }
}

impl Drop for FileReaper {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain the queue and exit.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Reaper thread panicked");
            }
        }
    }
}

fn reap_loop(rx: Receiver<ReapTask>) {
    for task in rx {
        match task {
            ReapTask::DeleteFile(path) => match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!("Deleted heap dump file {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!("Heap dump file {} already gone", path.display());
                }
                Err(e) => tracing::warn!("Could not delete heap dump file {}: {}", path.display(), e),
            },
            ReapTask::ClearDirectory(directory) => {
                let root = directory.leak_directory().display().to_string();
                match directory.clear_leak_directory() {
                    Ok(()) => tracing::debug!("Cleared leak directory {}", root),
                    Err(e) => tracing::warn!("Could not clear leak directory {}: {}", root, e),
                }
            }
            ReapTask::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}
