//! The long-running aggregator process.
//!
//! [`Daemon`] owns the [`Aggregator`] and drives it from four timers and a
//! command channel. Fetches, hub renewals, downloads and included-list reads
//! run in spawned tasks that send their results back as [`Command`]s, so the
//! aggregator's state is only ever touched from the daemon task.
//! [`AggregatorHandle`] is how everything else (HTTP handlers, websocket
//! sessions) talks to it.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::aggregator::{Aggregator, Query};
use crate::app::{Result, RiverbedError};
use crate::cloud::HubClient;
use crate::domain::HubDescriptor;
use crate::fetcher::{Downloader, Fetcher};
use crate::listeners::ListenerId;
use crate::queue::PodcastDownloadTask;
use crate::scheduler::TICK_MILLIS;

const COMMAND_BUFFER: usize = 256;
const PID_FILE_NAME: &str = "riverbed.pid";

/// Everything the daemon task can be asked to do.
pub enum Command {
    FetchDone {
        url: String,
        started: DateTime<Utc>,
        result: Result<Vec<u8>>,
    },
    RenewalDone {
        url: String,
        result: Result<String>,
        reply: Option<oneshot::Sender<String>>,
    },
    DownloadDone {
        task: PodcastDownloadTask,
        result: Result<u64>,
    },
    IncludedListFetched {
        listname: String,
        url: String,
        result: Result<Vec<u8>>,
    },
    /// Read a feed now; `done` fires once the read has been applied.
    PollNow {
        url: String,
        done: Option<oneshot::Sender<()>>,
    },
    FeedUpdated {
        url: String,
    },
    Ping {
        url: Option<String>,
        reply: oneshot::Sender<String>,
    },
    RenewNow {
        url: String,
        reply: oneshot::Sender<String>,
    },
    BuildAllRivers {
        reply: oneshot::Sender<Option<usize>>,
    },
    LoadLists {
        reply: oneshot::Sender<()>,
    },
    /// Read every subscribed feed, one after another.
    ReadAllNow {
        reply: oneshot::Sender<usize>,
    },
    RegisterListener {
        reply: oneshot::Sender<(ListenerId, mpsc::UnboundedReceiver<String>)>,
    },
    UnregisterListener {
        id: ListenerId,
    },
    Hit,
    Query {
        query: Query,
        reply: oneshot::Sender<Option<String>>,
    },
    Shutdown,
}

fn not_running() -> RiverbedError {
    RiverbedError::Other("aggregator is not running".to_string())
}

/// Cloneable handle for sending commands to a running daemon.
#[derive(Clone)]
pub struct AggregatorHandle {
    tx: mpsc::Sender<Command>,
}

impl AggregatorHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| not_running())
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| not_running())
    }

    /// Read `url` and wait until the result has been applied.
    pub async fn poll_now(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.request(|done| Command::PollNow {
            url,
            done: Some(done),
        })
        .await
    }

    pub async fn feed_updated(&self, url: &str) -> Result<()> {
        self.send(Command::FeedUpdated {
            url: url.to_string(),
        })
        .await
    }

    pub async fn ping(&self, url: Option<String>) -> Result<String> {
        self.request(|reply| Command::Ping { url, reply }).await
    }

    pub async fn renew_now(&self, url: &str) -> Result<String> {
        let url = url.to_string();
        self.request(|reply| Command::RenewNow { url, reply }).await
    }

    /// Number of rivers built, or `None` when the aggregator is disabled.
    pub async fn build_all_rivers(&self) -> Result<Option<usize>> {
        self.request(|reply| Command::BuildAllRivers { reply }).await
    }

    pub async fn load_lists(&self) -> Result<()> {
        self.request(|reply| Command::LoadLists { reply }).await
    }

    /// Queue a read of every subscribed feed. Returns how many were queued.
    pub async fn read_all_now(&self) -> Result<usize> {
        self.request(|reply| Command::ReadAllNow { reply }).await
    }

    pub async fn register_listener(
        &self,
    ) -> Result<(ListenerId, mpsc::UnboundedReceiver<String>)> {
        self.request(|reply| Command::RegisterListener { reply }).await
    }

    pub async fn unregister_listener(&self, id: ListenerId) -> Result<()> {
        self.send(Command::UnregisterListener { id }).await
    }

    pub async fn record_hit(&self) -> Result<()> {
        self.send(Command::Hit).await
    }

    pub async fn query(&self, query: Query) -> Result<Option<String>> {
        self.request(|reply| Command::Query { query, reply }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }
}

pub struct Daemon {
    aggregator: Aggregator,
    fetcher: Arc<dyn Fetcher>,
    hub_client: Arc<dyn HubClient>,
    downloader: Arc<dyn Downloader>,
    tx: mpsc::Sender<Command>,
    rx: mpsc::Receiver<Command>,
    /// Feeds being fetched, with whoever is waiting for each read.
    in_flight: HashMap<String, Vec<oneshot::Sender<()>>>,
}

impl Daemon {
    pub fn new(
        aggregator: Aggregator,
        fetcher: Arc<dyn Fetcher>,
        hub_client: Arc<dyn HubClient>,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        Self {
            aggregator,
            fetcher,
            hub_client,
            downloader,
            tx,
            rx,
            in_flight: HashMap::new(),
        }
    }

    pub fn handle(&self) -> AggregatorHandle {
        AggregatorHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn pid_file_path(data_folder: &Path) -> PathBuf {
        data_folder.join(PID_FILE_NAME)
    }

    /// Whether a live process owns the PID file.
    pub fn is_running(pid_path: &Path) -> bool {
        fs::read_to_string(pid_path)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .is_some_and(Self::process_exists)
    }

    #[cfg(unix)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid)])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    fn write_pid_file(pid_path: &Path) -> std::io::Result<()> {
        if let Some(parent) = pid_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(pid_path)?;
        writeln!(file, "{}", std::process::id())
    }

    fn remove_pid_file(pid_path: &Path) {
        if let Err(e) = fs::remove_file(pid_path) {
            debug!(path = %pid_path.display(), "Could not remove PID file: {}", e);
        }
    }

    /// Run until SIGINT/SIGTERM or a [`Command::Shutdown`], then flush state.
    pub async fn run(mut self) -> Result<()> {
        let pid_path = Self::pid_file_path(&self.aggregator.config().paths.data_folder);
        if Self::is_running(&pid_path) {
            return Err(RiverbedError::Other(format!(
                "Another riverbed daemon is already running ({})",
                pid_path.display()
            )));
        }
        Self::write_pid_file(&pid_path)
            .map_err(|e| RiverbedError::Other(format!("Failed to write PID file: {}", e)))?;

        self.spawn_signal_handler();
        info!(pid = std::process::id(), "Riverbed daemon started");

        self.event_loop().await;

        Self::remove_pid_file(&pid_path);
        info!("Riverbed daemon stopped");
        Ok(())
    }

    fn spawn_signal_handler(&self) {
        let handle = self.handle();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let (mut sigterm, mut sigint) =
                    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                        (Ok(term), Ok(int)) => (term, int),
                        (Err(e), _) | (_, Err(e)) => {
                            error!("Failed to install signal handlers: {}", e);
                            return;
                        }
                    };
                tokio::select! {
                    _ = sigterm.recv() => {},
                    _ = sigint.recv() => {},
                }
            }

            #[cfg(windows)]
            {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for ctrl-c: {}", e);
                    return;
                }
            }

            info!("Shutdown requested");
            let _ = handle.shutdown().await;
        });
    }

    /// Drive the aggregator until a shutdown command arrives. Dirty state is
    /// flushed before returning.
    pub async fn event_loop(&mut self) {
        let mut tick = interval(Duration::from_millis(TICK_MILLIS));
        let mut second = interval(Duration::from_secs(1));
        let mut five_seconds = interval(Duration::from_secs(5));
        let mut minute = interval(Duration::from_secs(60));
        for timer in [&mut tick, &mut second, &mut five_seconds, &mut minute] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Some(url) = self.aggregator.select_next_feed(Utc::now()) {
                        self.start_fetch(url, None);
                    }
                }
                _ = second.tick() => {
                    for task in self.aggregator.every_second(Utc::now()) {
                        self.start_download(task);
                    }
                }
                _ = five_seconds.tick() => {
                    if let Some((url, hub)) = self.aggregator.every_five_seconds(Utc::now()) {
                        self.start_renewal(url, hub, None);
                    }
                }
                _ = minute.tick() => {
                    for (listname, url) in self.aggregator.every_minute(Utc::now()) {
                        self.start_include_fetch(listname, url);
                    }
                }
                command = self.rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
            }
        }

        self.aggregator.shutdown_flush(Utc::now());
    }

    fn handle_command(&mut self, command: Command) {
        let now = Utc::now();
        match command {
            Command::FetchDone {
                url,
                started,
                result,
            } => {
                self.aggregator.apply_fetch(&url, started, result);
                for done in self.in_flight.remove(&url).unwrap_or_default() {
                    let _ = done.send(());
                }
            }
            Command::RenewalDone { url, result, reply } => {
                let message = self.aggregator.apply_renewal(&url, &result, now);
                if let Some(reply) = reply {
                    let _ = reply.send(message);
                }
            }
            Command::DownloadDone { task, result } => {
                self.aggregator.download_finished();
                match result {
                    Ok(bytes) => info!(url = %task.url, path = %task.path.display(), bytes, "Downloaded podcast"),
                    Err(e) => warn!(url = %task.url, "Podcast download failed: {}", e),
                }
            }
            Command::IncludedListFetched {
                listname,
                url,
                result,
            } => self.aggregator.apply_included_list(&listname, &url, result),
            Command::PollNow { url, done } => self.start_fetch(url, done),
            Command::FeedUpdated { url } => {
                if let Some(url) = self.aggregator.feed_updated(&url, now) {
                    self.start_fetch(url, None);
                }
            }
            Command::Ping { url, reply } => {
                let (message, poll) = self.aggregator.ping(url.as_deref());
                if let Some(url) = poll {
                    self.start_fetch(url, None);
                }
                let _ = reply.send(message);
            }
            Command::RenewNow { url, reply } => match self.aggregator.renew_target(&url, now) {
                Ok(hub) => self.start_renewal(url, hub, Some(reply)),
                Err(message) => {
                    let _ = reply.send(message);
                }
            },
            Command::BuildAllRivers { reply } => {
                let _ = reply.send(self.aggregator.build_all_rivers());
            }
            Command::LoadLists { reply } => {
                for (listname, url) in self.aggregator.load_lists(now) {
                    self.start_include_fetch(listname, url);
                }
                let _ = reply.send(());
            }
            Command::ReadAllNow { reply } => {
                let urls = self.aggregator.subscribed_urls();
                let _ = reply.send(urls.len());
                self.start_read_all(urls);
            }
            Command::RegisterListener { reply } => {
                let _ = reply.send(self.aggregator.register_listener());
            }
            Command::UnregisterListener { id } => self.aggregator.unregister_listener(id),
            Command::Hit => self.aggregator.record_hit(),
            Command::Query { query, reply } => {
                let _ = reply.send(self.aggregator.query(&query, now));
            }
            Command::Shutdown => {}
        }
    }

    /// Fetch `url` in the background unless a fetch is already running; either
    /// way `done` fires when the next read of it has been applied.
    fn start_fetch(&mut self, url: String, done: Option<oneshot::Sender<()>>) {
        if !self.aggregator.feed_enabled(&url) {
            debug!(feed = %url, "Feed is disabled, not reading");
            if let Some(done) = done {
                let _ = done.send(());
            }
            return;
        }
        if let Some(waiters) = self.in_flight.get_mut(&url) {
            waiters.extend(done);
            return;
        }
        self.in_flight.insert(url.clone(), done.into_iter().collect());

        let fetcher = self.fetcher.clone();
        let tx = self.tx.clone();
        let started = Utc::now();
        tokio::spawn(async move {
            let result = fetcher.fetch(&url).await;
            let _ = tx.send(Command::FetchDone { url, started, result }).await;
        });
    }

    fn start_renewal(
        &self,
        url: String,
        hub: HubDescriptor,
        reply: Option<oneshot::Sender<String>>,
    ) {
        let hub_client = self.hub_client.clone();
        let tx = self.tx.clone();
        let port = self.aggregator.config().http.port;
        tokio::spawn(async move {
            let result = hub_client.please_notify(&hub, &url, port).await;
            let _ = tx.send(Command::RenewalDone { url, result, reply }).await;
        });
    }

    fn start_download(&self, task: PodcastDownloadTask) {
        let downloader = self.downloader.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = downloader
                .download(&task.url, &task.path, task.pub_date)
                .await;
            let _ = tx.send(Command::DownloadDone { task, result }).await;
        });
    }

    fn start_include_fetch(&self, listname: String, url: String) {
        let fetcher = self.fetcher.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = fetcher.fetch(&url).await;
            let _ = tx
                .send(Command::IncludedListFetched {
                    listname,
                    url,
                    result,
                })
                .await;
        });
    }

    /// Read `urls` one at a time, each after the previous read was applied.
    fn start_read_all(&self, urls: Vec<String>) {
        let handle = self.handle();
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let count = urls.len();
            for url in urls {
                if handle.poll_now(&url).await.is_err() {
                    return;
                }
            }
            info!(
                feeds = count,
                secs = started.elapsed().as_secs_f64(),
                "Read all feeds"
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{start_daemon as start, FEED, MISSING_FEED};

    #[tokio::test]
    async fn test_poll_now_applies_read_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, fetcher, task) = start(dir.path());
        let (_, mut events) = handle.register_listener().await.unwrap();

        handle.poll_now(FEED).await.unwrap();

        assert!(fetcher.calls() >= 1);
        let record = handle
            .query(Query::OneFeed(FEED.to_string()))
            .await
            .unwrap()
            .unwrap();
        assert!(record.contains("\"title\": \"Example News\""));
        assert!(events.recv().await.unwrap().starts_with("item "));

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_feed_is_never_fetched() {
        use crate::store::Store;

        let dir = tempfile::tempdir().unwrap();
        let store = crate::store::FileStore::new(dir.path().join("data")).unwrap();
        let mut record = crate::domain::FeedRecord::default();
        record.prefs.enabled = false;
        let text = crate::store::to_json(&record).unwrap();
        store.save_text(&crate::store::feed_info_key(FEED), &text).unwrap();

        let (handle, fetcher, task) = start(dir.path());
        tokio_test::assert_ok!(handle.poll_now(FEED).await);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(fetcher.calls_for(FEED), 0);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_renew_now_reports_hub_answer() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _, task) = start(dir.path());

        let message = handle.renew_now("http://unknown.example.com/rss").await.unwrap();
        assert!(message.contains("not following"));

        handle.poll_now(FEED).await.unwrap();
        assert_eq!(handle.renew_now(FEED).await.unwrap(), "It worked.");

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_ping_answers() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _, task) = start(dir.path());

        let message = handle.ping(None).await.unwrap();
        assert!(message.contains("no url param"));
        let message = handle
            .ping(Some("http://unknown.example.com/rss".into()))
            .await
            .unwrap();
        assert!(message.contains("not following"));
        assert_eq!(
            handle.ping(Some(FEED.into())).await.unwrap(),
            "Ping received, will read asap."
        );

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_error_lands_in_feed_stats() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _, task) = start(dir.path());
        tokio_test::assert_ok!(handle.load_lists().await);

        tokio_test::assert_ok!(handle.poll_now(MISSING_FEED).await);
        let feeds = handle.query(Query::FeedStats).await.unwrap().unwrap();
        let feeds: serde_json::Value = serde_json::from_str(&feeds).unwrap();
        let missing = feeds
            .as_array()
            .unwrap()
            .iter()
            .find(|f| f["url"] == MISSING_FEED)
            .unwrap();
        assert!(missing["ctReadErrors"].as_u64().unwrap() >= 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_build_all_rivers_and_shutdown_flush() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _, task) = start(dir.path());
        handle.load_lists().await.unwrap();

        handle.poll_now(FEED).await.unwrap();
        assert_eq!(handle.build_all_rivers().await.unwrap(), Some(1));
        assert!(dir.path().join("rivers").join("news.js").exists());

        handle.record_hit().await.unwrap();
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(dir.path().join("data").join("serverStats.json").exists());
        assert!(dir.path().join("data").join("feedsStats.json").exists());
        assert!(handle.ping(None).await.is_err());
    }

    #[tokio::test]
    async fn test_read_all_now_counts_subscribed_feeds() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _, task) = start(dir.path());
        handle.load_lists().await.unwrap();

        assert_eq!(handle.read_all_now().await.unwrap(), 2);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_pid_file_detects_live_process() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = Daemon::pid_file_path(dir.path());
        assert!(!Daemon::is_running(&pid_path));

        tokio_test::assert_ok!(Daemon::write_pid_file(&pid_path));
        assert!(Daemon::is_running(&pid_path));

        Daemon::remove_pid_file(&pid_path);
        assert!(!pid_path.exists());
    }
}
