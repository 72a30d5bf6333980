pub mod feed;
pub mod item;
pub mod list;
pub mod record;
pub mod stats;

use chrono::{DateTime, Utc};

pub use feed::{CloudSubscription, FeedSubscription, HubDescriptor};
pub use item::{Enclosure, RiverItem};
pub use list::ListRecord;
pub use record::{FeedInfo, FeedRecord, FeedStats, HistoryItem};
pub use stats::{LocalStorage, ServerStats};

/// Version stamped on every persisted document at load time.
pub const DOCUMENT_VERSION: u32 = 1;

/// Timestamp meaning "never".
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}
