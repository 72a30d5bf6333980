use chrono::{DateTime, Duration, Utc};

use crate::subscriptions::SubscriptionTable;

/// How often the scheduler looks for a feed to read.
pub const TICK_MILLIS: u64 = 250;

/// Picks the least recently chosen subscribed feed, once it is due.
#[derive(Debug, Clone)]
pub struct Scheduler {
    interval: Duration,
}

impl Scheduler {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval: Duration::seconds(interval_secs as i64),
        }
    }

    /// Choose at most one feed to read now. The chosen feed's timestamp and
    /// counter are updated before any fetch starts.
    pub fn select_next(&self, subs: &mut SubscriptionTable, now: DateTime<Utc>) -> Option<String> {
        let mut least_recent = now;
        let mut chosen: Option<usize> = None;

        for (ix, feed) in subs.feeds().iter().enumerate() {
            if feed.lists.is_empty() {
                continue;
            }
            if feed.when_last_chosen_to_read < least_recent {
                least_recent = feed.when_last_chosen_to_read;
                chosen = Some(ix);
            }
        }

        let ix = chosen?;
        if now - least_recent < self.interval {
            return None;
        }

        let feed = &mut subs.feeds_mut()[ix];
        feed.when_last_chosen_to_read = now;
        feed.ct_times_chosen += 1;
        Some(feed.url.clone())
    }
}
