pub mod text;

use chrono::{DateTime, Utc};
use feed_rs::parser;
use html_escape::decode_html_entities;
use rss::extension::Extension;
use rss::Channel;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::app::{Result, RiverbedError};
use crate::domain::{Enclosure, HubDescriptor};

/// Channel-level metadata carried by every parsed feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedMeta {
    pub title: String,
    pub link: String,
    pub description: String,
    pub cloud: Option<HubDescriptor>,
}

/// One item as the parser saw it, before any river projection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedItem {
    pub guid: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    /// The date as written in the feed, used for guid derivation.
    pub raw_pub_date: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
    pub permalink: Option<String>,
    pub enclosure: Option<Enclosure>,
    pub outline: Option<Value>,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub meta: FeedMeta,
    pub items: Vec<ParsedItem>,
}

#[derive(Clone)]
pub struct Normalizer;

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Parse a fetched body. RSS 2.0 goes through the `rss` crate so cloud,
    /// guid and extension elements survive; RSS-in-JSON is read directly;
    /// everything else (Atom, JSON Feed, RSS 1.0) goes through feed-rs.
    pub fn normalize(&self, body: &[u8]) -> Result<ParsedFeed> {
        let text = String::from_utf8_lossy(body);
        let head = text.trim_start();

        if head.starts_with('{') {
            if let Ok(doc) = serde_json::from_str::<JsonRssDocument>(head) {
                return Ok(from_json_rss(doc.rss.channel));
            }
        } else if text.contains("<rss") {
            match Channel::read_from(body) {
                Ok(channel) => return Ok(from_rss_channel(&channel)),
                // cut short; the fallback parser would accept the fragment
                Err(rss::Error::Eof) => {
                    return Err(RiverbedError::FeedParse(rss::Error::Eof.to_string()))
                }
                Err(_) => {}
            }
        }

        let feed = parser::parse(body).map_err(|e| RiverbedError::FeedParse(e.to_string()))?;
        Ok(from_feed_rs(feed))
    }

    /// The items that were complete before a body broke off, read by closing
    /// the document after the last whole item. `None` when there are none.
    pub fn salvage(&self, body: &[u8]) -> Option<ParsedFeed> {
        let text = String::from_utf8_lossy(body);
        [("</item>", "</channel></rss>"), ("</entry>", "</feed>")]
            .iter()
            .find_map(|(close, tail)| {
                let end = text.rfind(close)? + close.len();
                let repaired = format!("{}{}", &text[..end], tail);
                self.normalize(repaired.as_bytes())
                    .ok()
                    .filter(|feed| !feed.items.is_empty())
            })
    }
}

/// Parse a date in either RFC 2822 or RFC 3339 form.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn from_rss_channel(channel: &Channel) -> ParsedFeed {
    let meta = FeedMeta {
        title: channel.title().to_string(),
        link: channel.link().to_string(),
        description: channel.description().to_string(),
        cloud: channel.cloud().and_then(|c| {
            if c.domain().is_empty() {
                return None;
            }
            Some(HubDescriptor {
                domain: c.domain().to_string(),
                port: c.port().trim().parse().unwrap_or(80),
                path: c.path().to_string(),
                register_procedure: c.register_procedure().to_string(),
                protocol: c.protocol().to_string(),
            })
        }),
    };

    let items = channel
        .items()
        .iter()
        .map(|item| {
            let guid = item.guid();
            ParsedItem {
                guid: guid.map(|g| g.value().to_string()),
                title: item.title().map(String::from),
                link: item.link().map(String::from),
                description: item
                    .description()
                    .or_else(|| item.content())
                    .map(String::from),
                raw_pub_date: item.pub_date().map(String::from),
                pub_date: item.pub_date().and_then(parse_date),
                permalink: guid
                    .filter(|g| g.is_permalink())
                    .map(|g| g.value().to_string()),
                enclosure: item.enclosure().map(|e| Enclosure {
                    url: e.url().to_string(),
                    mime_type: non_empty(e.mime_type()),
                    length: non_empty(e.length()),
                }),
                outline: item
                    .extensions()
                    .get("source")
                    .and_then(|ext| ext.get("outline"))
                    .and_then(|outlines| outlines.first())
                    .map(convert_outline),
                comments: item.comments().map(String::from),
            }
        })
        .collect();

    ParsedFeed { meta, items }
}

/// `source:outline` element to `{<attributes>, subs: [...]}`.
fn convert_outline(ext: &Extension) -> Value {
    let mut outline = Map::new();
    for (name, value) in ext.attrs() {
        outline.insert(name.clone(), Value::String(value.clone()));
    }
    let subs: Vec<Value> = ext
        .children()
        .iter()
        .filter(|(name, _)| name.as_str() == "outline" || name.as_str() == "source:outline")
        .flat_map(|(_, children)| children.iter().map(convert_outline))
        .collect();
    if !subs.is_empty() {
        outline.insert("subs".to_string(), Value::Array(subs));
    }
    Value::Object(outline)
}

#[derive(Deserialize)]
struct JsonRssDocument {
    rss: JsonRss,
}

#[derive(Deserialize)]
struct JsonRss {
    channel: JsonChannel,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct JsonChannel {
    title: String,
    link: String,
    description: String,
    cloud: Option<JsonCloud>,
    item: Vec<JsonItem>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct JsonCloud {
    domain: String,
    port: Value,
    path: String,
    register_procedure: String,
    protocol: String,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct JsonItem {
    guid: Option<Value>,
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    pub_date: Option<String>,
    permalink: Option<String>,
    enclosure: Option<Enclosure>,
    comments: Option<String>,
    #[serde(rename = "source:outline")]
    outline: Option<Value>,
}

/// Scalar JSON value as text; objects look for a `#value` member.
fn json_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("#value").and_then(json_scalar),
        _ => None,
    }
}

fn from_json_rss(channel: JsonChannel) -> ParsedFeed {
    let cloud = channel.cloud.and_then(|c| {
        if c.domain.is_empty() {
            return None;
        }
        let port = json_scalar(&c.port)
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(80);
        Some(HubDescriptor {
            domain: c.domain,
            port,
            path: c.path,
            register_procedure: c.register_procedure,
            protocol: c.protocol,
        })
    });

    let meta = FeedMeta {
        title: channel.title,
        link: channel.link,
        description: channel.description,
        cloud,
    };

    let items = channel
        .item
        .into_iter()
        .map(|item| ParsedItem {
            guid: item.guid.as_ref().and_then(json_scalar),
            title: item.title,
            link: item.link,
            description: item.description,
            pub_date: item.pub_date.as_deref().and_then(parse_date),
            raw_pub_date: item.pub_date,
            permalink: item.permalink,
            enclosure: item.enclosure,
            outline: item.outline,
            comments: item.comments,
        })
        .collect();

    ParsedFeed { meta, items }
}

fn from_feed_rs(feed: feed_rs::model::Feed) -> ParsedFeed {
    let meta = FeedMeta {
        title: feed
            .title
            .map(|t| decode_html_entities(&t.content).to_string())
            .unwrap_or_default(),
        link: feed
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_default(),
        description: feed
            .description
            .map(|d| decode_html_entities(&d.content).to_string())
            .unwrap_or_default(),
        cloud: None,
    };

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let published = entry.published.or(entry.updated);
            let link = entry.links.first().map(|l| l.href.clone());
            let enclosure = entry
                .media
                .iter()
                .flat_map(|m| m.content.iter())
                .find_map(|c| {
                    let url = c.url.as_ref()?.to_string();
                    Some(Enclosure {
                        url,
                        mime_type: c.content_type.as_ref().map(|m| m.to_string()),
                        length: c.size.map(|s| s.to_string()),
                    })
                });
            ParsedItem {
                guid: non_empty(&entry.id),
                title: entry.title.map(|t| decode_html_entities(&t.content).to_string()),
                description: entry
                    .summary
                    .map(|s| s.content)
                    .or_else(|| entry.content.and_then(|c| c.body)),
                raw_pub_date: published.map(|d| d.to_rfc2822()),
                pub_date: published,
                permalink: link.clone(),
                link,
                enclosure,
                outline: None,
                comments: None,
            }
        })
        .collect();

    ParsedFeed { meta, items }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <link>https://example.com/</link>
    <description>A test feed</description>
    <cloud domain="rpc.example.com" port="5337" path="/pleaseNotify" registerProcedure="" protocol="http-post"/>
    <item>
      <title>Test Item 1</title>
      <link>https://example.com/item1</link>
      <guid>https://example.com/item1</guid>
      <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
      <description>This is &lt;b&gt;item 1&lt;/b&gt;</description>
      <enclosure url="https://example.com/ep1.mp3" length="1234" type="audio/mpeg"/>
      <comments>https://example.com/item1#comments</comments>
    </item>
    <item>
      <title>Test Item 2</title>
      <link>https://example.com/item2</link>
      <description>This is item 2</description>
    </item>
  </channel>
</rss>"#;

    const ATOM_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Test Feed</title>
  <subtitle>An Atom test feed</subtitle>
  <id>urn:example:feed</id>
  <updated>2024-01-01T00:00:00Z</updated>
  <entry>
    <title>Atom Entry 1</title>
    <link href="https://example.com/atom1"/>
    <id>atom-entry-1</id>
    <updated>2024-01-01T00:00:00Z</updated>
    <summary>This is Atom entry 1</summary>
  </entry>
</feed>"#;

    const JSON_SAMPLE: &str = r#"{
  "rss": {
    "channel": {
      "title": "Json Feed",
      "link": "http://example.com/",
      "description": "RSS in JSON",
      "cloud": {"domain": "rpc.example.com", "port": 5337, "path": "/pleaseNotify", "registerProcedure": "", "protocol": "http-post"},
      "item": [
        {
          "title": "Outlined",
          "link": "http://example.com/1",
          "guid": "g-1",
          "pubDate": "Tue, 02 Jan 2024 10:00:00 GMT",
          "source:outline": {"text": "top", "subs": [{"text": "child"}]}
        }
      ]
    }
  }
}"#;

    #[test]
    fn test_parse_rss() {
        let feed = Normalizer::new().normalize(RSS_SAMPLE.as_bytes()).unwrap();

        assert_eq!(feed.meta.title, "Test Feed");
        assert_eq!(feed.meta.description, "A test feed");
        assert_eq!(feed.items.len(), 2);

        let first = &feed.items[0];
        assert_eq!(first.title.as_deref(), Some("Test Item 1"));
        assert_eq!(first.guid.as_deref(), Some("https://example.com/item1"));
        assert_eq!(first.raw_pub_date.as_deref(), Some("Mon, 01 Jan 2024 00:00:00 GMT"));
        assert_eq!(
            first.pub_date.unwrap().format("%Y-%m-%d").to_string(),
            "2024-01-01"
        );
        assert_eq!(first.comments.as_deref(), Some("https://example.com/item1#comments"));
        let enclosure = first.enclosure.as_ref().unwrap();
        assert!(enclosure.is_publishable());
        assert!(enclosure.is_audio());

        assert!(feed.items[1].guid.is_none());
        assert!(feed.items[1].pub_date.is_none());
    }

    #[test]
    fn test_parse_rss_cloud() {
        let feed = Normalizer::new().normalize(RSS_SAMPLE.as_bytes()).unwrap();
        let cloud = feed.meta.cloud.unwrap();
        assert_eq!(cloud.domain, "rpc.example.com");
        assert_eq!(cloud.port, 5337);
        assert_eq!(cloud.endpoint(), "http://rpc.example.com:5337/pleaseNotify");
    }

    #[test]
    fn test_parse_atom() {
        let feed = Normalizer::new().normalize(ATOM_SAMPLE.as_bytes()).unwrap();

        assert_eq!(feed.meta.title, "Atom Test Feed");
        assert!(feed.meta.cloud.is_none());
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].title.as_deref(), Some("Atom Entry 1"));
        assert_eq!(feed.items[0].link.as_deref(), Some("https://example.com/atom1"));
        assert_eq!(feed.items[0].guid.as_deref(), Some("atom-entry-1"));
    }

    #[test]
    fn test_parse_json_rss() {
        let feed = Normalizer::new().normalize(JSON_SAMPLE.as_bytes()).unwrap();

        assert_eq!(feed.meta.title, "Json Feed");
        assert_eq!(feed.meta.cloud.as_ref().unwrap().port, 5337);
        let item = &feed.items[0];
        assert_eq!(item.guid.as_deref(), Some("g-1"));
        assert_eq!(item.outline.as_ref().unwrap()["subs"][0]["text"], "child");
        assert!(item.pub_date.is_some());
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let err = Normalizer::new().normalize(b"definitely not a feed").unwrap_err();
        assert!(matches!(err, RiverbedError::FeedParse(_)));
    }

    #[test]
    fn test_truncated_rss_salvages_whole_items() {
        let normalizer = Normalizer::new();
        let cut = RSS_SAMPLE.find("<title>Test Item 2").unwrap() + "<title>Test".len();
        let body = &RSS_SAMPLE.as_bytes()[..cut];

        assert!(normalizer.normalize(body).is_err());
        let feed = normalizer.salvage(body).unwrap();
        assert_eq!(feed.meta.title, "Test Feed");
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].title.as_deref(), Some("Test Item 1"));

        assert!(normalizer.salvage(b"definitely not a feed").is_none());
    }

    #[test]
    fn test_parse_date_formats() {
        assert!(parse_date("Mon, 01 Jan 2024 00:00:00 GMT").is_some());
        assert!(parse_date("2024-01-01T00:00:00Z").is_some());
        assert!(parse_date("yesterday").is_none());
    }
}
