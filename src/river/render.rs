use std::collections::HashSet;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use super::RiverData;
use crate::domain::{epoch, Enclosure, RiverItem};
use crate::store::list_stem;
use crate::subscriptions::SubscriptionTable;

pub const RIVER_DOCS_URL: &str =
    "http://scripting.com/stories/2010/12/06/innovationRiverOfNewsInJso.html";
pub const RIVER_CALLBACK: &str = "onGetRiverStream";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiverDocument {
    pub updated_feeds: UpdatedFeeds,
    pub metadata: RiverMetadata,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedFeeds {
    pub updated_feed: Vec<UpdatedFeed>,
}

/// A contiguous run of items from one feed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedFeed {
    pub feed_title: String,
    pub feed_url: String,
    pub website_url: String,
    pub feed_description: String,
    pub when_last_update: String,
    pub item: Vec<RenderedItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedItem {
    pub title: String,
    pub link: String,
    pub body: String,
    pub pub_date: String,
    pub perma_link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outline: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enclosure: Option<Vec<Enclosure>>,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiverMetadata {
    pub name: String,
    pub docs: String,
    pub secs: f64,
    pub ct_builds: u64,
    pub ct_duplicates_skipped: u64,
    #[serde(rename = "whenGMT")]
    pub when_gmt: String,
    pub when_local: String,
    pub aggregator: String,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub skip_duplicate_titles: bool,
    pub aggregator: String,
}

/// RFC 1123 date as used throughout the river format.
pub fn http_date(d: DateTime<Utc>) -> String {
    d.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Render a river newest-first, grouping consecutive items of the same feed.
pub fn render_river(
    listname: &str,
    river: &RiverData,
    subs: &SubscriptionTable,
    options: &RenderOptions,
    ct_builds: u64,
    started: DateTime<Utc>,
) -> RiverDocument {
    let mut updated_feeds = UpdatedFeeds::default();
    let mut titles: HashSet<String> = HashSet::new();
    let mut ct_duplicates_skipped = 0u64;
    let mut last_feed_url: Option<&str> = None;

    for story in river.items.iter().rev() {
        let reduced_title = story.title.trim().to_lowercase();
        if options.skip_duplicate_titles && !reduced_title.is_empty() {
            if titles.contains(&reduced_title) {
                ct_duplicates_skipped += 1;
                continue;
            }
            titles.insert(reduced_title);
        }

        if last_feed_url != Some(story.feed_url.as_str()) {
            updated_feeds.updated_feed.push(feed_header(story, subs));
            last_feed_url = Some(story.feed_url.as_str());
        }
        if let Some(group) = updated_feeds.updated_feed.last_mut() {
            group.item.push(render_item(story, started));
        }
    }

    RiverDocument {
        updated_feeds,
        metadata: RiverMetadata {
            name: listname.to_string(),
            docs: RIVER_DOCS_URL.to_string(),
            secs: (Utc::now() - started).num_milliseconds() as f64 / 1000.0,
            ct_builds,
            ct_duplicates_skipped,
            when_gmt: http_date(started),
            when_local: started
                .with_timezone(&Local)
                .format("%-m/%-d/%Y, %-I:%M:%S %p")
                .to_string(),
            aggregator: options.aggregator.clone(),
        },
    }
}

fn feed_header(story: &RiverItem, subs: &SubscriptionTable) -> UpdatedFeed {
    let feed = subs.find(&story.feed_url);
    UpdatedFeed {
        feed_title: feed.map(|f| f.title.clone()).unwrap_or_default(),
        feed_url: story.feed_url.clone(),
        website_url: feed.map(|f| f.htmlurl.clone()).unwrap_or_default(),
        feed_description: feed.map(|f| f.description.clone()).unwrap_or_default(),
        when_last_update: http_date(story.when),
        item: Vec::new(),
    }
}

fn render_item(story: &RiverItem, started: DateTime<Utc>) -> RenderedItem {
    let pub_date = if story.pubdate == epoch() {
        started
    } else {
        story.pubdate
    };
    RenderedItem {
        title: story.title.clone(),
        link: story.link.clone(),
        body: story.description.clone(),
        pub_date: http_date(pub_date),
        perma_link: story.permalink.clone(),
        outline: story.outline.clone(),
        comments: Some(story.comments.clone()).filter(|c| !c.is_empty()),
        enclosure: story
            .enclosure
            .clone()
            .filter(Enclosure::is_publishable)
            .map(|e| vec![e]),
        id: format!("{:07}", story.id),
    }
}

/// `onGetRiverStream (<json>)`.
pub fn wrap_callback(json: &str) -> String {
    format!("{} ({})", RIVER_CALLBACK, json)
}

/// Published file name: the list name with its extension swapped for `.js`.
pub fn river_file_name(listname: &str) -> String {
    format!("{}.js", list_stem(listname))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn story(id: u64, feed: &str, title: &str) -> RiverItem {
        RiverItem {
            id,
            title: title.to_string(),
            feed_url: feed.to_string(),
            when: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            pubdate: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            ..Default::default()
        }
    }

    fn river(items: Vec<RiverItem>) -> RiverData {
        RiverData {
            items,
            ..Default::default()
        }
    }

    fn options(skip: bool) -> RenderOptions {
        RenderOptions {
            skip_duplicate_titles: skip,
            aggregator: "riverbed v0.1.0".into(),
        }
    }

    fn titles(doc: &RiverDocument) -> Vec<Vec<String>> {
        doc.updated_feeds
            .updated_feed
            .iter()
            .map(|f| f.item.iter().map(|i| i.title.clone()).collect())
            .collect()
    }

    #[test]
    fn test_newest_first_with_contiguous_runs() {
        let data = river(vec![
            story(1, "http://a.com/rss", "a1"),
            story(2, "http://b.com/rss", "b1"),
            story(3, "http://a.com/rss", "a2"),
            story(4, "http://a.com/rss", "a3"),
        ]);
        let doc = render_river("l.opml", &data, &SubscriptionTable::default(), &options(true), 1, Utc::now());

        assert_eq!(
            titles(&doc),
            vec![vec!["a3", "a2"], vec!["b1"], vec!["a1"]]
        );
        assert_eq!(doc.updated_feeds.updated_feed[1].feed_url, "http://b.com/rss");
    }

    #[test]
    fn test_duplicate_titles_keep_newest() {
        let data = river(vec![
            story(1, "http://a.com/rss", "Breaking News"),
            story(2, "http://b.com/rss", "  breaking news "),
            story(3, "http://b.com/rss", ""),
            story(4, "http://b.com/rss", ""),
        ]);
        let doc = render_river("l.opml", &data, &SubscriptionTable::default(), &options(true), 1, Utc::now());

        let all: Vec<String> = titles(&doc).concat();
        assert_eq!(all, vec!["", "", "  breaking news "]);
        assert_eq!(doc.metadata.ct_duplicates_skipped, 1);
        assert_eq!(doc.updated_feeds.updated_feed[0].item[2].id, "0000002");
    }

    #[test]
    fn test_duplicate_skipping_can_be_disabled() {
        let data = river(vec![
            story(1, "http://a.com/rss", "Same"),
            story(2, "http://a.com/rss", "Same"),
        ]);
        let doc = render_river("l.opml", &data, &SubscriptionTable::default(), &options(false), 1, Utc::now());
        assert_eq!(titles(&doc), vec![vec!["Same", "Same"]]);
    }

    #[test]
    fn test_item_projection() {
        let mut s = story(42, "http://a.com/rss", "T");
        s.pubdate = epoch();
        s.comments = "http://a.com/c".into();
        s.enclosure = Some(Enclosure {
            url: "http://a.com/x.mp3".into(),
            mime_type: Some("audio/mpeg".into()),
            length: Some("10".into()),
        });
        let mut bad = story(43, "http://a.com/rss", "U");
        bad.enclosure = Some(Enclosure {
            url: "http://a.com/x.jpg".into(),
            mime_type: Some("image".into()),
            length: Some("10".into()),
        });
        let started = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();

        let doc = render_river("l.opml", &river(vec![s, bad]), &SubscriptionTable::default(), &options(true), 7, started);
        let json = serde_json::to_value(&doc).unwrap();
        let items = &json["updatedFeeds"]["updatedFeed"][0]["item"];

        assert!(items[0].get("enclosure").is_none());
        assert!(items[0].get("comments").is_none());
        assert_eq!(items[1]["id"], "0000042");
        assert_eq!(items[1]["pubDate"], "Sat, 03 Feb 2024 04:05:06 GMT");
        assert_eq!(items[1]["comments"], "http://a.com/c");
        assert_eq!(items[1]["enclosure"][0]["type"], "audio/mpeg");
        assert_eq!(json["metadata"]["ctBuilds"], 7);
        assert_eq!(json["metadata"]["whenGMT"], "Sat, 03 Feb 2024 04:05:06 GMT");
        assert_eq!(json["metadata"]["docs"], RIVER_DOCS_URL);
    }

    #[test]
    fn test_feed_header_uses_subscription() {
        let mut subs = SubscriptionTable::default();
        subs.subscribe("http://a.com/rss", "l.opml");
        if let Some(feed) = subs.find_mut("http://a.com/rss") {
            feed.title = "Site A".into();
            feed.htmlurl = "http://a.com/".into();
        }
        let doc = render_river("l.opml", &river(vec![story(1, "http://a.com/rss", "x")]), &subs, &options(true), 1, Utc::now());
        let header = &doc.updated_feeds.updated_feed[0];
        assert_eq!(header.feed_title, "Site A");
        assert_eq!(header.website_url, "http://a.com/");
        assert_eq!(header.when_last_update, "Mon, 01 Jan 2024 00:00:00 GMT");
    }

    #[test]
    fn test_wrapping_and_file_name() {
        assert_eq!(wrap_callback("{}"), "onGetRiverStream ({})");
        assert_eq!(river_file_name("news.opml"), "news.js");
    }
}
