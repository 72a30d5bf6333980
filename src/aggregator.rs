//! The aggregator's state and every operation that changes it.
//!
//! One [`Aggregator`] is owned by the daemon task. Network I/O never happens
//! here: the daemon runs fetches, renewals and downloads in spawned tasks and
//! hands their results back to the methods below.

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::Result;
use crate::cloud::{self, RENEWAL_SUCCESS};
use crate::config::Config;
use crate::domain::{FeedRecord, HubDescriptor, ListRecord, LocalStorage, RiverItem, ServerStats};
use crate::history::HistoryEngine;
use crate::hooks::{
    HookEvent, HookRegistry, HostCallbacks, ItemAddedContext, NoHostCallbacks, RiverBuiltContext,
    RiverHook, ScriptFolderHook,
};
use crate::listeners::{ListenerId, Listeners};
use crate::lists::{self, ListEntries, ListFormat};
use crate::normalizer::text::{item_body, max_string_length, strip_markup};
use crate::normalizer::{Normalizer, ParsedItem};
use crate::queue::{podcast_path, DownloadQueue, PodcastDownloadTask, WriteQueue};
use crate::river::{
    render_river, river_file_name, wrap_callback, RenderOptions, RiverCache, RiverData,
    RIVER_IDLE_SECS,
};
use crate::scheduler::Scheduler;
use crate::store::{
    self, Document, Store, FEEDS_IN_LISTS_KEY, FEEDS_STATS_KEY, LOCAL_STORAGE_KEY,
    SERVER_STATS_KEY,
};
use crate::subscriptions::SubscriptionTable;

/// Read-only questions the HTTP layer asks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Stats,
    FeedStats,
    ListNames,
    FeedRiver(String),
    OneRiver(String),
    OneFeed(String),
}

/// A feed's river plus the counters shown next to it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRiverView {
    pub title: String,
    pub link: String,
    pub description: String,
    pub url: String,
    pub items: Vec<RiverItem>,
    pub stats: FeedRiverStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRiverStats {
    pub ct_reads: u64,
    pub ct_items: u64,
    pub ct_read_errors: u64,
    pub ct_consecutive_read_errors: u64,
    pub when_last_new_item: DateTime<Utc>,
    pub when_last_read_error: DateTime<Utc>,
    pub when_last_read: DateTime<Utc>,
    pub most_recent_pub_date: DateTime<Utc>,
    pub cloud: CloudCounters,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudCounters {
    pub ct_cloud_renew: u64,
    pub ct_cloud_renew_errors: u64,
    pub ct_consecutive_cloud_renew_errors: u64,
    pub when_last_cloud_renew: Option<DateTime<Utc>>,
    pub when_last_cloud_renew_error: Option<DateTime<Utc>>,
}

pub struct Aggregator {
    config: Config,
    aggregator_name: String,
    store: Arc<dyn Store>,
    write_queue: WriteQueue,
    downloads: DownloadQueue,
    stats: ServerStats,
    stats_changed: bool,
    subs: SubscriptionTable,
    list_rivers: RiverCache,
    feed_rivers: RiverCache,
    history: HistoryEngine,
    normalizer: Normalizer,
    scheduler: Scheduler,
    listeners: Listeners,
    hooks: HookRegistry,
    host: Box<dyn HostCallbacks>,
    local_storage: LocalStorage,
    last_hour: Option<(i32, u32, u32)>,
}

/// Stored text for `key`, preferring a write that is still queued.
fn load_text(store: &dyn Store, queue: &WriteQueue, key: &str) -> Option<String> {
    if let Some(text) = queue.pending(key) {
        return Some(text.to_string());
    }
    match store.load_text(key) {
        Ok(text) => text,
        Err(e) => {
            error!(key, error = %e, "Failed to read document");
            None
        }
    }
}

fn load_doc<T: Document>(store: &dyn Store, queue: &WriteQueue, key: &str) -> T {
    store::parse_document(key, load_text(store, queue, key).as_deref())
}

fn queue_doc<T: Serialize>(queue: &mut WriteQueue, key: &str, doc: &T) {
    match store::to_json(doc) {
        Ok(text) => queue.push(key, text),
        Err(e) => error!(key, error = %e, "Failed to serialize document"),
    }
}

/// The cached river for `key`, loading it on first use.
fn cached_river<'a>(
    cache: &'a mut RiverCache,
    store: &dyn Store,
    queue: &WriteQueue,
    key: &str,
) -> &'a mut RiverData {
    let data = if cache.contains(key) {
        RiverData::default()
    } else {
        load_doc(store, queue, key)
    };
    cache.insert(key, data, Instant::now())
}

impl Aggregator {
    /// Load server stats, subscriptions and local storage from `store`, and
    /// count a start.
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        let write_queue = WriteQueue::new(config.queues.max_file_writes_per_pass);
        let aggregator_name = Config::aggregator_name();

        let mut stats: ServerStats = load_doc(store.as_ref(), &write_queue, SERVER_STATS_KEY);
        stats.record_start(aggregator_name.clone(), Utc::now());
        let subs: SubscriptionTable = load_doc(store.as_ref(), &write_queue, FEEDS_STATS_KEY);

        let local_storage = match load_text(store.as_ref(), &write_queue, LOCAL_STORAGE_KEY) {
            Some(text) => LocalStorage::from_json(&text).unwrap_or_else(|e| {
                error!(error = %e, "Failed to parse local storage, starting empty");
                LocalStorage::default()
            }),
            None => LocalStorage::default(),
        };

        let mut hooks = HookRegistry::new();
        hooks.register(Box::new(ScriptFolderHook::new(
            config.paths.add_to_river_hooks.clone(),
            HookEvent::ItemAdded,
        )));
        hooks.register(Box::new(ScriptFolderHook::new(
            config.paths.build_river_hooks.clone(),
            HookEvent::RiverBuilt,
        )));

        info!(
            feeds = subs.len(),
            starts = stats.ct_starts,
            "{} starting",
            aggregator_name
        );

        Self {
            history: HistoryEngine::new(
                config.river.add_items_from_new_subs,
                config.river.max_body_length,
            ),
            scheduler: Scheduler::new(config.read_interval_secs()),
            downloads: DownloadQueue::new(config.queues.max_concurrent_downloads),
            config,
            aggregator_name,
            store,
            write_queue,
            stats,
            stats_changed: true,
            subs,
            list_rivers: RiverCache::new(),
            feed_rivers: RiverCache::new(),
            normalizer: Normalizer::new(),
            listeners: Listeners::new(),
            hooks,
            host: Box::new(NoHostCallbacks),
            local_storage,
            last_hour: None,
        }
    }

    pub fn set_host(&mut self, host: Box<dyn HostCallbacks>) {
        self.host = host;
    }

    pub fn register_hook(&mut self, hook: Box<dyn RiverHook>) {
        self.hooks.register(hook);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subs
    }

    pub fn local_storage_mut(&mut self) -> &mut LocalStorage {
        &mut self.local_storage
    }

    pub fn pending_writes(&self) -> usize {
        self.write_queue.len()
    }

    fn console_log(&self, message: &str) {
        info!("{}", message);
        self.host.console_log(message);
    }

    fn notify_listeners(&mut self, event: &str) {
        let delivered = self.listeners.notify(event);
        debug!(delivered, "Notified listeners");
        self.host.notify_listeners(event);
    }

    // Polling

    /// Feed the scheduler wants read now, if any.
    pub fn select_next_feed(&mut self, now: DateTime<Utc>) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        let url = self.scheduler.select_next(&mut self.subs, now)?;
        if !self.feed_enabled(&url) {
            debug!(feed = %url, "Feed is disabled, not reading");
            return None;
        }
        Some(url)
    }

    /// Whether the feed's prefs allow a new read to start.
    pub fn feed_enabled(&self, url: &str) -> bool {
        let record: FeedRecord =
            load_doc(self.store.as_ref(), &self.write_queue, &store::feed_info_key(url));
        record.prefs.enabled
    }

    pub fn subscribe(&mut self, url: &str, listname: &str) {
        if self.subs.subscribe(url, listname) {
            info!(feed = url, list = listname, "New subscription");
        }
    }

    /// Subscribed feeds in table order, for reading everything at once.
    pub fn subscribed_urls(&self) -> Vec<String> {
        self.subs
            .subscribed_urls()
            .into_iter()
            .filter(|url| self.feed_enabled(url))
            .collect()
    }

    /// Apply the outcome of a fetch that started at `started`. Returns the
    /// number of items added to rivers.
    pub fn apply_fetch(
        &mut self,
        url: &str,
        started: DateTime<Utc>,
        body: Result<Vec<u8>>,
    ) -> usize {
        // one record per feed, whatever case the caller used
        let canonical = self
            .subs
            .find(url)
            .map_or_else(|| url.to_string(), |sub| sub.url.clone());
        let url = canonical.as_str();

        let key = store::feed_info_key(url);
        let mut record: FeedRecord = load_doc(self.store.as_ref(), &self.write_queue, &key);
        record.normalize_for(url);

        let now = Utc::now();
        record.stats.ct_info_reads += 1;
        record.stats.when_last_info_read = now;

        self.stats.record_feed_read(url, started);
        self.stats_changed = true;
        let first_read = self.history.begin_read(&mut record, started);
        if let Some(sub) = self.subs.find_mut(url) {
            sub.ct_reads += 1;
            sub.when_last_read = started;
        }

        let (feed, error) = match body {
            Ok(bytes) => match self.normalizer.normalize(&bytes) {
                Ok(feed) => (Some(feed), None),
                Err(e) => (self.normalizer.salvage(&bytes), Some(e)),
            },
            Err(e) => (None, Some(e)),
        };

        let mut ct_added = 0;
        if let Some(feed) = &feed {
            let outcome = match error {
                None => self.history.apply_poll(&mut record, feed, first_read, started),
                Some(_) => self.history.apply_partial(&mut record, feed, first_read, started),
            };
            self.sync_subscription(url, &record, outcome.ct_new, started);

            for item in &outcome.accepted {
                self.add_to_river(url, item, now);
                if self.config.river.write_items_to_files {
                    let item_key = store::feed_item_key(url, record.stats.item_serialnum);
                    record.stats.item_serialnum += 1;
                    queue_doc(&mut self.write_queue, &item_key, *item);
                }
                ct_added += 1;
            }

            info!(
                feed = url,
                new = outcome.ct_new,
                added = ct_added,
                too_old = outcome.ct_too_old,
                pruned = outcome.ct_pruned,
                partial = error.is_some(),
                "Read feed"
            );
        }

        match error {
            None => {
                if let Some(sub) = self.subs.find_mut(url) {
                    sub.ct_consecutive_read_errors = 0;
                }
            }
            Some(e) => {
                let message = e.to_string();
                warn!(feed = url, "Failed to read feed: {}", message);
                self.history.record_error(&mut record, &message, started);
                if let Some(sub) = self.subs.find_mut(url) {
                    sub.ct_read_errors += 1;
                    sub.ct_consecutive_read_errors += 1;
                    sub.when_last_read_error = started;
                    sub.last_read_error = message;
                }
            }
        }

        record.stats.ct_info_writes += 1;
        record.stats.when_last_info_write = now;
        queue_doc(&mut self.write_queue, &key, &record);
        ct_added
    }

    fn sync_subscription(
        &mut self,
        url: &str,
        record: &FeedRecord,
        ct_new: usize,
        started: DateTime<Utc>,
    ) {
        let Some(sub) = self.subs.find_mut(url) else {
            return;
        };
        sub.most_recent_pub_date = record.stats.most_recent_pub_date;
        if ct_new > 0 {
            sub.ct_items += ct_new as u64;
            sub.when_last_new_item = started;
            sub.title = record.feed_info.title.clone();
            sub.htmlurl = record.feed_info.link.clone();
            sub.description = record.feed_info.description.clone();
        }
        if let Some(hub) = &record.feed_info.cloud {
            sub.set_hub(hub.clone());
        }
    }

    fn add_to_river(&mut self, url: &str, parsed: &ParsedItem, now: DateTime<Utc>) {
        let item = RiverItem {
            title: strip_markup(parsed.title.as_deref().unwrap_or("")),
            link: strip_markup(parsed.link.as_deref().unwrap_or("")),
            description: item_body(parsed.description.as_deref(), self.config.river.max_body_length),
            permalink: parsed.permalink.clone().unwrap_or_default(),
            enclosure: parsed.enclosure.clone(),
            outline: parsed.outline.clone(),
            pubdate: parsed.pub_date.unwrap_or(now),
            comments: strip_markup(parsed.comments.as_deref().unwrap_or("")),
            feed_url: url.to_string(),
            when: now,
            aggregator: self.aggregator_name.clone(),
            id: self.stats.next_serialnum(),
            full_description: None,
        };
        self.stats.record_story(&item);
        self.stats_changed = true;

        let (feed_title, lists) = match self.subs.find(url) {
            Some(sub) => (
                sub.display_title().to_string(),
                sub.lists.iter().cloned().collect::<Vec<_>>(),
            ),
            None => (url.to_string(), Vec::new()),
        };
        let story_title = match &parsed.title {
            Some(title) => title.clone(),
            None => max_string_length(
                &strip_markup(parsed.description.as_deref().unwrap_or("")),
                80,
                true,
                true,
            ),
        };
        self.console_log(&format!("{}: {}", feed_title, story_title));

        let max_items = self.config.river.max_items;
        for listname in &lists {
            self.stats.list_changed(listname);
            let key = store::list_river_key(listname);
            cached_river(&mut self.list_rivers, self.store.as_ref(), &self.write_queue, &key)
                .push(item.clone(), max_items, now);
        }

        if self.config.river.save_feed_rivers {
            let key = store::feed_river_key(url);
            let mut copy = item.clone();
            copy.full_description = parsed.description.clone();
            cached_river(&mut self.feed_rivers, self.store.as_ref(), &self.write_queue, &key)
                .push(copy, max_items, now);
        }

        if self.config.queues.download_podcasts {
            self.queue_podcast(&feed_title, &item);
        }

        self.host.item_added(&item);
        self.hooks.item_added(&ItemAddedContext {
            urlfeed: url,
            item_from_parser: parsed,
            item_from_river: &item,
        });

        match serde_json::to_string(&item) {
            Ok(json) => self.notify_listeners(&format!("item {}", json)),
            Err(e) => error!(feed = url, error = %e, "Failed to serialize river item"),
        }
    }

    fn queue_podcast(&mut self, feed_title: &str, item: &RiverItem) {
        let path = podcast_path(
            &self.config.paths.podcasts_folder,
            feed_title,
            item,
            self.config.queues.max_file_name_length,
        );
        if let (Some(path), Some(enclosure)) = (path, &item.enclosure) {
            debug!(url = %enclosure.url, path = %path.display(), "Queued podcast download");
            self.downloads.push(PodcastDownloadTask {
                url: enclosure.url.clone(),
                path,
                pub_date: item.pubdate,
            });
        }
    }

    pub fn download_finished(&mut self) {
        self.downloads.complete();
    }

    /// Items of a list's river, oldest first.
    pub fn list_river_items(&mut self, listname: &str) -> Vec<RiverItem> {
        let key = store::list_river_key(listname);
        cached_river(&mut self.list_rivers, self.store.as_ref(), &self.write_queue, &key)
            .items
            .clone()
    }

    // Rivers

    /// Render one list's river to `<rivers_folder>/<list>.js`. Returns the file name.
    pub fn build_river(&mut self, listname: &str) -> Result<String> {
        let started = Utc::now();
        let key = store::list_river_key(listname);
        let options = RenderOptions {
            skip_duplicate_titles: self.config.river.skip_duplicate_titles,
            aggregator: self.aggregator_name.clone(),
        };

        let river = cached_river(&mut self.list_rivers, self.store.as_ref(), &self.write_queue, &key);
        let ct_builds = river.record_build(started);
        let doc = render_river(listname, river, &self.subs, &options, ct_builds, started);
        let jsontext = wrap_callback(&serde_json::to_string_pretty(&doc)?);

        let fname = river_file_name(listname);
        let path = self.config.paths.rivers_folder.join(&fname);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &jsontext)?;

        self.stats.ct_river_json_saves += 1;
        self.stats.when_last_river_json_save = started;
        self.stats_changed = true;

        self.notify_listeners(&format!("updated {}", listname));
        self.hooks.river_built(&RiverBuiltContext {
            fname: &fname,
            jsontext: &jsontext,
        });
        self.host.river_built(&fname, &jsontext);
        Ok(fname)
    }

    /// Build every list that changed, one at a time in order of first change.
    pub fn build_changed_rivers(&mut self) -> usize {
        let mut built = 0;
        while let Some(listname) = self.stats.next_changed_list() {
            self.stats_changed = true;
            let started = Instant::now();
            match self.build_river(&listname) {
                Ok(fname) => {
                    built += 1;
                    info!(
                        list = %listname,
                        file = %fname,
                        secs = started.elapsed().as_secs_f64(),
                        "Built river"
                    );
                }
                Err(e) => error!(list = %listname, error = %e, "Failed to build river"),
            }
        }
        built
    }

    /// Mark every known list changed and build them all. `None` when the
    /// aggregator is disabled.
    pub fn build_all_rivers(&mut self) -> Option<usize> {
        if !self.config.enabled {
            return None;
        }
        let names = self.stats.list_names.clone();
        for name in &names {
            self.stats.list_changed(name);
        }
        Some(self.build_changed_rivers())
    }

    // Lists

    /// Re-read every list file and rebuild list membership. Returns the
    /// `(list, url)` pairs of included OPML documents to fetch.
    pub fn load_lists(&mut self, now: DateTime<Utc>) -> Vec<(String, String)> {
        self.subs.clear_lists();
        self.stats.ct_list_folder_reads += 1;
        self.stats.when_last_list_folder_read = now;
        self.stats.list_names.clear();
        self.stats_changed = true;

        let files = match lists::list_files(&self.config.paths.lists_folder) {
            Ok(files) => files,
            Err(e) => {
                warn!(folder = %self.config.paths.lists_folder.display(), "Failed to read lists folder: {}", e);
                return Vec::new();
            }
        };

        let mut includes = Vec::new();
        for (listname, path) in files {
            let Some(format) = ListFormat::from_name(&listname) else {
                continue;
            };
            self.stats.list_names.push(listname.clone());

            let entries = match std::fs::read_to_string(&path) {
                Ok(content) => lists::parse_list(format, &content).unwrap_or_else(|e| {
                    warn!(list = %listname, "Failed to parse list: {}", e);
                    ListEntries::default()
                }),
                Err(e) => {
                    warn!(list = %listname, "Failed to read list: {}", e);
                    continue;
                }
            };

            for url in &entries.feeds {
                self.subscribe(url, &listname);
            }

            let key = store::list_info_key(&listname);
            let mut record: ListRecord = load_doc(self.store.as_ref(), &self.write_queue, &key);
            if let Some(title) = entries.title {
                record.list_info.title = title;
            }
            record.record_read(entries.feeds, now);
            queue_doc(&mut self.write_queue, &key, &record);

            includes.extend(entries.includes.into_iter().map(|url| (listname.clone(), url)));
        }

        debug!(lists = self.stats.list_names.len(), feeds = self.subs.len(), "Loaded lists");
        includes
    }

    /// Subscribe `listname` to the feeds of a fetched included OPML document.
    pub fn apply_included_list(&mut self, listname: &str, url: &str, body: Result<Vec<u8>>) {
        match body {
            Ok(body) => {
                let entries = lists::parse_opml(&String::from_utf8_lossy(&body));
                for feed in &entries.feeds {
                    self.subscribe(feed, listname);
                }
                debug!(list = listname, include = url, feeds = entries.feeds.len(), "Read included list");
            }
            Err(e) => warn!(list = listname, include = url, "Failed to read included list: {}", e),
        }
    }

    // Push notifications

    fn count_renewal(&mut self, now: DateTime<Utc>) {
        self.stats.ct_rss_cloud_renews += 1;
        self.stats.when_last_rss_cloud_renew = now;
        self.stats_changed = true;
    }

    /// The next hub subscription due for renewal, already marked as renewed.
    pub fn next_renewal(&mut self, now: DateTime<Utc>) -> Option<(String, HubDescriptor)> {
        if !(self.config.cloud.request_notify && self.config.http.enabled) {
            return None;
        }
        let renewal = cloud::next_renewal(&mut self.subs, now)?;
        info!(feed = %renewal.0, hub = %renewal.1.endpoint(), "Renewing cloud subscription");
        self.count_renewal(now);
        Some(renewal)
    }

    /// Hub to contact for an on-demand renewal, or the message explaining why
    /// there is none.
    pub fn renew_target(
        &mut self,
        url: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<HubDescriptor, String> {
        let Some(feed) = self.subs.find_mut(url) else {
            return Err(format!(
                "Can't renew the subscription because we're not following the feed, \"{}\".",
                url
            ));
        };
        let Some(cloud) = feed.cloud.as_mut() else {
            return Err(format!(
                "Can't renew the subscription because the feed, \"{}\" is not cloud-aware.",
                url
            ));
        };
        cloud::record_renewal_started(cloud, now);
        let hub = cloud.hub.clone();
        self.count_renewal(now);
        Ok(hub)
    }

    /// Record how a renewal went and return the message for whoever asked.
    pub fn apply_renewal(&mut self, url: &str, result: &Result<String>, now: DateTime<Utc>) -> String {
        let message = match self.subs.find_mut(url).and_then(|f| f.cloud.as_mut()) {
            Some(cloud) => cloud::record_renewal_result(cloud, result, now),
            None => match result {
                Ok(_) => RENEWAL_SUCCESS.to_string(),
                Err(e) => e.to_string(),
            },
        };
        match result {
            Ok(_) => info!(feed = url, "Cloud subscription renewed"),
            Err(_) => warn!(feed = url, "Cloud renewal failed: {}", message),
        }
        message
    }

    /// A hub says `url` changed. Returns the subscribed feed's URL when it
    /// should be read now.
    pub fn feed_updated(&mut self, url: &str, now: DateTime<Utc>) -> Option<String> {
        let Some(sub) = self.subs.find(url) else {
            self.console_log(&format!(
                "Cloud update for {}, but we're not subscribed to this feed, so it wasn't read.",
                url
            ));
            return None;
        };
        let canonical = sub.url.clone();
        let subscribed = !sub.lists.is_empty();

        self.stats.ct_rss_cloud_updates += 1;
        self.stats.when_last_rss_cloud_update = now;
        self.stats.url_feed_last_cloud_update = canonical.clone();
        self.stats_changed = true;
        self.console_log(&format!("Cloud update for {}", url));
        subscribed.then_some(canonical)
    }

    /// Answer for `/ping`, plus the subscribed feed's URL when it should be
    /// read now.
    pub fn ping(&self, url: Option<&str>) -> (String, Option<String>) {
        let Some(url) = url else {
            return (
                "Ping received, but no url param was specified, so we couldn't do anything with it. Sorry."
                    .to_string(),
                None,
            );
        };
        match self.subs.find(url) {
            None => (
                "Ping received, but we're not following this feed. Sorry.".to_string(),
                None,
            ),
            Some(sub) => (
                "Ping received, will read asap.".to_string(),
                (!sub.lists.is_empty()).then(|| sub.url.clone()),
            ),
        }
    }

    // Listeners

    pub fn register_listener(&mut self) -> (ListenerId, mpsc::UnboundedReceiver<String>) {
        let (id, rx) = self.listeners.register();
        debug!(listener = id, open = self.listeners.count(), "Listener connected");
        (id, rx)
    }

    pub fn unregister_listener(&mut self, id: ListenerId) {
        self.listeners.unregister(id);
        debug!(listener = id, open = self.listeners.count(), "Listener disconnected");
    }

    pub fn record_hit(&mut self) {
        self.stats.record_hit();
        self.stats_changed = true;
    }

    // Timers

    fn save_changed_state(&mut self, now: DateTime<Utc>) {
        if std::mem::take(&mut self.stats_changed) {
            self.stats.ct_stats_saves += 1;
            self.stats.when_last_stats_save = now;
            queue_doc(&mut self.write_queue, SERVER_STATS_KEY, &self.stats);
            self.host.stats_changed(&self.stats);
        }
        if self.subs.take_changed() {
            self.stats.ct_feed_stats_saves += 1;
            self.stats.when_last_feed_stats_save = now;
            queue_doc(&mut self.write_queue, FEEDS_STATS_KEY, &self.subs);
        }
        if self.subs.take_in_lists_changed() {
            queue_doc(&mut self.write_queue, FEEDS_IN_LISTS_KEY, self.subs.feeds_in_lists());
        }
    }

    fn save_local_storage(&mut self, now: DateTime<Utc>) {
        if let Some(text) = self.local_storage.take_if_changed() {
            self.write_queue.push(LOCAL_STORAGE_KEY, text);
            self.stats.ct_local_storage_writes += 1;
            self.stats.when_last_local_storage_write = now;
            self.stats_changed = true;
        }
    }

    fn save_dirty_rivers(&mut self, now: DateTime<Utc>) {
        let mut writes = self.list_rivers.collect_dirty(now);
        writes.extend(self.feed_rivers.collect_dirty(now));
        for (key, text) in writes {
            self.write_queue.push(key, text);
        }
    }

    /// Queue changed documents, run one write-back pass, and hand out the
    /// podcast downloads that may start now.
    pub fn every_second(&mut self, now: DateTime<Utc>) -> Vec<PodcastDownloadTask> {
        if !self.config.enabled {
            return Vec::new();
        }
        self.save_changed_state(now);
        self.write_queue.drain_pass(self.store.as_ref());
        if self.config.queues.download_podcasts {
            self.downloads.start_ready()
        } else {
            Vec::new()
        }
    }

    /// Save dirty rivers and local storage; returns at most one hub renewal to send.
    pub fn every_five_seconds(&mut self, now: DateTime<Utc>) -> Option<(String, HubDescriptor)> {
        if !self.config.enabled {
            return None;
        }
        let renewal = self.next_renewal(now);
        self.save_local_storage(now);
        self.save_dirty_rivers(now);
        if self.config.river.build_every_five_seconds {
            self.build_changed_rivers();
        }
        renewal
    }

    /// Build changed rivers, reload lists, roll counters and drop idle rivers.
    /// Returns the included lists to fetch.
    pub fn every_minute(&mut self, now: DateTime<Utc>) -> Vec<(String, String)> {
        if !self.config.enabled {
            self.console_summary(now);
            return Vec::new();
        }

        self.build_changed_rivers();
        self.console_summary(now);
        let includes = self.load_lists(now);

        if self.stats.roll_day(now) {
            self.stats_changed = true;
        }
        if self.stats.roll_hour(now, &mut self.last_hour) {
            self.stats_changed = true;
        }

        let max_idle = StdDuration::from_secs(RIVER_IDLE_SECS);
        let evicted = self.list_rivers.evict_idle(Instant::now(), max_idle)
            + self.feed_rivers.evict_idle(Instant::now(), max_idle);
        if evicted > 0 {
            debug!(evicted, "Dropped idle rivers");
        }
        includes
    }

    fn console_summary(&self, now: DateTime<Utc>) {
        let sockets = self.listeners.count();
        let port = if self.config.http.enabled {
            format!(", port: {}", self.config.http.port)
        } else {
            String::new()
        };
        self.console_log(&format!(
            "{}: {}, {} feeds, {} reads, {} stories, {} open {}{}.",
            self.aggregator_name,
            now.with_timezone(&Local).format("%-I:%M:%S %p"),
            self.subs.len(),
            self.stats.ct_feed_reads_this_run,
            self.stats.ct_stories_added_this_run,
            sockets,
            if sockets == 1 { "socket" } else { "sockets" },
            port
        ));
    }

    /// Queue everything that might be dirty and write the whole queue out.
    pub fn shutdown_flush(&mut self, now: DateTime<Utc>) -> usize {
        self.stats_changed = true;
        self.subs.mark_changed();
        self.save_local_storage(now);
        self.save_dirty_rivers(now);
        self.save_changed_state(now);
        let written = self.write_queue.drain_all(self.store.as_ref());
        info!(written, "Flushed state");
        written
    }

    // Queries

    pub fn query(&mut self, query: &Query, now: DateTime<Utc>) -> Option<String> {
        let json = match query {
            Query::Stats => {
                self.stats.refresh_ages(now);
                store::to_json(&self.stats)
            }
            Query::FeedStats => store::to_json(&self.subs),
            Query::ListNames => serde_json::to_string(&self.stats.list_names).map_err(Into::into),
            Query::FeedRiver(url) => match self.feed_river_view(url) {
                Some(view) => store::to_json(&view),
                None => return None,
            },
            Query::OneRiver(fname) => return self.one_river(fname),
            Query::OneFeed(url) => store::to_json(&self.one_feed(url)),
        };
        match json {
            Ok(text) => Some(text),
            Err(e) => {
                error!(error = %e, "Failed to serialize query result");
                None
            }
        }
    }

    pub fn one_feed(&self, url: &str) -> FeedRecord {
        let key = store::feed_info_key(url);
        let mut record: FeedRecord = load_doc(self.store.as_ref(), &self.write_queue, &key);
        record.normalize_for(url);
        record
    }

    pub fn feed_river_view(&mut self, url: &str) -> Option<FeedRiverView> {
        let sub = self.subs.find(url)?;
        let cloud = sub
            .cloud
            .as_ref()
            .map(|c| CloudCounters {
                ct_cloud_renew: c.ct_renewals,
                ct_cloud_renew_errors: c.ct_renewal_errors,
                ct_consecutive_cloud_renew_errors: c.ct_consecutive_renewal_errors,
                when_last_cloud_renew: Some(c.when_last_renewal),
                when_last_cloud_renew_error: Some(c.when_last_renewal_error),
            })
            .unwrap_or_default();
        let mut view = FeedRiverView {
            title: sub.title.clone(),
            link: sub.htmlurl.clone(),
            description: sub.description.clone(),
            url: sub.url.clone(),
            items: Vec::new(),
            stats: FeedRiverStats {
                ct_reads: sub.ct_reads,
                ct_items: sub.ct_items,
                ct_read_errors: sub.ct_read_errors,
                ct_consecutive_read_errors: sub.ct_consecutive_read_errors,
                when_last_new_item: sub.when_last_new_item,
                when_last_read_error: sub.when_last_read_error,
                when_last_read: sub.when_last_read,
                most_recent_pub_date: sub.most_recent_pub_date,
                cloud,
            },
        };

        let key = store::feed_river_key(url);
        view.items = cached_river(&mut self.feed_rivers, self.store.as_ref(), &self.write_queue, &key)
            .items
            .clone();
        Some(view)
    }

    /// A published river file by list or file name.
    pub fn one_river(&self, fname: &str) -> Option<String> {
        if fname.is_empty() || fname.contains('/') || fname.contains('\\') {
            return None;
        }
        let path = self.config.paths.rivers_folder.join(river_file_name(fname));
        match std::fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(path = %path.display(), "River not readable: {}", e);
                None
            }
        }
    }
}
