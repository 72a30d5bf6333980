use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::domain::RiverItem;
use crate::normalizer::text::clean_file_name;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq)]
pub struct FileWriteTask {
    pub key: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PodcastDownloadTask {
    pub url: String,
    pub path: PathBuf,
    pub pub_date: DateTime<Utc>,
}

/// Pending document writes, drained a bounded number per pass.
#[derive(Debug)]
pub struct WriteQueue {
    tasks: VecDeque<FileWriteTask>,
    max_per_pass: usize,
}

impl WriteQueue {
    pub fn new(max_per_pass: usize) -> Self {
        Self {
            tasks: VecDeque::new(),
            max_per_pass: max_per_pass.max(1),
        }
    }

    pub fn push(&mut self, key: impl Into<String>, text: impl Into<String>) {
        self.tasks.push_back(FileWriteTask {
            key: key.into(),
            text: text.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Newest queued text for `key`, if a write is still waiting.
    pub fn pending(&self, key: &str) -> Option<&str> {
        self.tasks
            .iter()
            .rev()
            .find(|t| t.key == key)
            .map(|t| t.text.as_str())
    }

    /// Write at most `max_per_pass` documents. Failures are logged and dropped.
    pub fn drain_pass(&mut self, store: &dyn Store) -> usize {
        let mut written = 0;
        while written < self.max_per_pass {
            let Some(task) = self.tasks.pop_front() else {
                break;
            };
            if let Err(e) = store.save_text(&task.key, &task.text) {
                error!(key = %task.key, error = %e, "Failed to write document");
            }
            written += 1;
        }
        if written > 0 {
            debug!(written, remaining = self.tasks.len(), "Drained write queue");
        }
        written
    }

    pub fn drain_all(&mut self, store: &dyn Store) -> usize {
        let mut written = 0;
        while !self.tasks.is_empty() {
            written += self.drain_pass(store);
        }
        written
    }
}

/// Podcast downloads waiting for a free slot.
#[derive(Debug)]
pub struct DownloadQueue {
    tasks: VecDeque<PodcastDownloadTask>,
    in_flight: usize,
    max_concurrent: usize,
}

impl DownloadQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tasks: VecDeque::new(),
            in_flight: 0,
            max_concurrent,
        }
    }

    pub fn push(&mut self, task: PodcastDownloadTask) {
        self.tasks.push_back(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Take every task that fits under the concurrency cap and count it as started.
    pub fn start_ready(&mut self) -> Vec<PodcastDownloadTask> {
        let mut started = Vec::new();
        while self.in_flight < self.max_concurrent {
            let Some(task) = self.tasks.pop_front() else {
                break;
            };
            self.in_flight += 1;
            started.push(task);
        }
        started
    }

    pub fn complete(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }
}

/// `<podcasts>/<feed title>/<item id>.<ext>`, or `None` for non-audio items.
pub fn podcast_path(
    podcasts_folder: &Path,
    feed_title: &str,
    item: &RiverItem,
    max_file_name_length: usize,
) -> Option<PathBuf> {
    let enclosure = item.enclosure.as_ref().filter(|e| e.is_audio())?;
    let folder = clean_file_name(feed_title, max_file_name_length);
    let file = format!("{}.{}", item.id, enclosure.extension());
    Some(podcasts_folder.join(folder).join(file))
}
