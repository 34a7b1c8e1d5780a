//! Polling watcher for new camera images.

use bf_types::{config_error, BfResult, FocusConfig};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Size and modification time of a file as of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

/// Reports each new image file in a directory exactly once, oldest first.
///
/// A file is only reported once two consecutive scans see the same size and
/// modification time, so frames the camera is still writing are held back
/// instead of being handed out half-written.
#[derive(Debug)]
pub struct ImageWatcher {
    directory: PathBuf,
    extensions: Vec<String>,
    poll_interval: Duration,
    seen: HashSet<PathBuf>,
    pending: HashMap<PathBuf, FileStamp>,
}

impl ImageWatcher {
    pub fn new(
        directory: impl Into<PathBuf>,
        extensions: &[String],
        poll_interval: Duration,
    ) -> Self {
        Self {
            directory: directory.into(),
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            poll_interval,
            seen: HashSet::new(),
            pending: HashMap::new(),
        }
    }

    pub fn from_config(config: &FocusConfig) -> Self {
        Self::new(
            &config.image_directory,
            &config.image_extensions,
            Duration::from_millis(config.poll_interval_ms),
        )
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Mark every image already in the directory as seen. Returns how many
    /// were skipped.
    pub fn prime(&mut self) -> BfResult<usize> {
        if !self.directory.is_dir() {
            return Err(config_error!(
                "image directory {} does not exist",
                self.directory.display()
            ));
        }
        let existing = self.unseen_images()?;
        let count = existing.len();
        self.seen.extend(existing.into_iter().map(|(_, path, _)| path));
        self.pending.clear();
        Ok(count)
    }

    /// Images that are complete and were not reported yet, ordered by
    /// creation time.
    ///
    /// A file whose size or modification time changed since the previous
    /// scan is still being written and waits for a later scan. So does every
    /// file created after it, which keeps the reported order intact. Empty
    /// files are ignored until they have content.
    pub fn scan(&mut self) -> BfResult<Vec<PathBuf>> {
        let mut candidates = self.unseen_images()?;
        candidates.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        let mut ready = Vec::new();
        let mut pending = HashMap::new();
        let mut blocked = false;

        for (_, path, stamp) in candidates {
            let stable = self.pending.get(&path) == Some(&stamp);
            if stable && !blocked {
                ready.push(path);
            } else {
                if !stable {
                    debug!(path = %path.display(), "image still being written");
                }
                blocked = true;
                pending.insert(path, stamp);
            }
        }

        // Files deleted before they settled drop out here.
        self.pending = pending;
        self.seen.extend(ready.iter().cloned());
        Ok(ready)
    }

    fn unseen_images(&self) -> BfResult<Vec<(SystemTime, PathBuf, FileStamp)>> {
        let mut images = Vec::new();

        for entry in std::fs::read_dir(&self.directory)? {
            let entry = entry?;
            let path = entry.path();
            if self.seen.contains(&path) || !self.is_image(&path) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                // Deleted between listing and stat.
                Err(_) => continue,
            };
            if !metadata.is_file() || metadata.len() == 0 {
                continue;
            }
            let modified = metadata.modified().ok();
            let created = metadata
                .created()
                .ok()
                .or(modified)
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let stamp = FileStamp {
                len: metadata.len(),
                modified,
            };
            images.push((created, path, stamp));
        }

        Ok(images)
    }

    fn is_image(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    /// Poll until `shutdown` flips to true or the receiver goes away.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<PathBuf>,
        mut shutdown: watch::Receiver<bool>,
    ) -> BfResult<()> {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(directory = %self.directory.display(), "waiting for images");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let paths = match self.scan() {
                        Ok(paths) => paths,
                        Err(e) => {
                            warn!(
                                directory = %self.directory.display(),
                                error = %e,
                                "image scan failed"
                            );
                            continue;
                        }
                    };
                    for path in paths {
                        debug!(path = %path.display(), "new image");
                        if tx.send(path).await.is_err() {
                            debug!("image receiver dropped, stopping watcher");
                            return Ok(());
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("image watcher shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }
}
