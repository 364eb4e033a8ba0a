//! Lock files on a shared mount
//!
//! A lock file is a zero-byte marker at
//! `<mount>/portal-<store>-<key>.lck`, with store and key encoded so that
//! distinct pairs never share a file. Presence means some process is
//! running the factory for that key. Exclusive create is the atomicity
//! primitive; every existence check before it is only an optimization.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::{fs, sync::mpsc, time::MissedTickBehavior};
use tracing::{debug, warn};

use crate::{
    error::Result,
    file::{encode_file_stem, encode_stem},
};

/// Fixed prefix of every lock file name
pub const LOCK_FILE_PREFIX: &str = "portal";

/// How a wait on someone else's lock ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRelease {
    /// The holder removed the lock
    Released,
    /// The wait timed out and the abandoned lock was deleted
    TakenOver,
}

/// Lock file guarding the factory for one key
#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn new(mount_path: &Path, store_name: &str, key: &str) -> Self {
        let file_name = format!(
            "{}-{}-{}.lck",
            LOCK_FILE_PREFIX,
            // `-` separates the store from the key
            encode_stem(store_name, b"."),
            encode_file_stem(key)
        );
        Self {
            path: mount_path.join(file_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the lock file currently exists
    pub async fn is_present(&self) -> Result<bool> {
        match fs::metadata(&self.path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Create the lock file exclusively; `false` if it already exists
    pub async fn try_acquire(&self) -> Result<bool> {
        let created = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await;

        match created {
            Ok(_) => {
                debug!(lock_path = %self.path.display(), "Acquired lock file");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the lock file, tolerating only "already gone"
    pub async fn release(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(lock_path = %self.path.display(), "Released lock file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    lock_path = %self.path.display(),
                    "Lock file was already gone when releasing it"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Wait until the lock disappears or `timeout` elapses
    ///
    /// Removal is noticed through filesystem change notifications and
    /// through polling every `poll_interval`, since network filesystems do
    /// not report changes made by other hosts. When the timeout wins, a lock
    /// that is still present is deleted.
    pub async fn wait_for_release(
        &self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<LockRelease> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // Dropping the watcher stops notifications
        let _watcher = match self.watch(tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(
                    lock_path = %self.path.display(),
                    error = %e,
                    "Lock file watch unavailable, falling back to polling"
                );
                None
            }
        };

        // The holder may have finished before the watch was installed
        if !self.is_present().await? {
            return Ok(LockRelease::Released);
        }

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let poll_interval = poll_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + poll_interval,
            poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    if self.is_present().await? {
                        self.release().await?;
                        return Ok(LockRelease::TakenOver);
                    }
                    return Ok(LockRelease::Released);
                }
                Some(()) = rx.recv() => {
                    if !self.is_present().await? {
                        return Ok(LockRelease::Released);
                    }
                }
                _ = ticker.tick() => {
                    if !self.is_present().await? {
                        return Ok(LockRelease::Released);
                    }
                }
            }
        }
    }

    fn watch(&self, tx: mpsc::UnboundedSender<()>) -> Result<RecommendedWatcher> {
        let watched_dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = self.path.file_name().map(|name| name.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let touches_lock = event
                        .paths
                        .iter()
                        .any(|path| path.file_name() == file_name.as_deref());
                    if touches_lock {
                        let _ = tx.send(());
                    }
                }
                Err(e) => {
                    tracing::error!("Lock file watching error: {}", e);
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(&watched_dir, RecursiveMode::NonRecursive)?;

        Ok(watcher)
    }
}
