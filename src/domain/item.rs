use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::epoch;

/// Media attached to an item, as declared by the feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Enclosure {
    pub url: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<String>,
}

impl Enclosure {
    /// Rivers only carry enclosures with a full `type/subtype` and a length.
    pub fn is_publishable(&self) -> bool {
        match (&self.mime_type, &self.length) {
            (Some(mime), Some(_)) => mime.split('/').count() >= 2,
            _ => false,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|m| m.starts_with("audio/"))
    }

    /// File extension of the enclosure URL, ignoring any query string.
    pub fn extension(&self) -> &str {
        let fname = self.url.rsplit('/').next().unwrap_or("");
        let fname = fname.split('?').next().unwrap_or("");
        fname.rsplit('.').next().unwrap_or("")
    }
}

/// An item as it sits in a river. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RiverItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub permalink: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enclosure: Option<Enclosure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outline: Option<serde_json::Value>,
    pub pubdate: DateTime<Utc>,
    pub comments: String,
    pub feed_url: String,
    pub when: DateTime<Utc>,
    pub aggregator: String,
    pub id: u64,
    /// Unstripped description, only kept on the feed river copy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_description: Option<String>,
}

impl Default for RiverItem {
    fn default() -> Self {
        Self {
            title: String::new(),
            link: String::new(),
            description: String::new(),
            permalink: String::new(),
            enclosure: None,
            outline: None,
            pubdate: epoch(),
            comments: String::new(),
            feed_url: String::new(),
            when: epoch(),
            aggregator: String::new(),
            id: 0,
            full_description: None,
        }
    }
}

impl RiverItem {
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            "(Untitled)"
        } else {
            &self.title
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enclosure(mime: Option<&str>, length: Option<&str>) -> Enclosure {
        Enclosure {
            url: "http://example.com/media/show.mp3?x=1".into(),
            mime_type: mime.map(String::from),
            length: length.map(String::from),
        }
    }

    #[test]
    fn test_enclosure_needs_type_and_length() {
        assert!(enclosure(Some("audio/mpeg"), Some("1234")).is_publishable());
        assert!(!enclosure(Some("audio/mpeg"), None).is_publishable());
        assert!(!enclosure(None, Some("1234")).is_publishable());
        assert!(!enclosure(Some("image"), Some("1234")).is_publishable());
    }

    #[test]
    fn test_enclosure_audio_and_extension() {
        let e = enclosure(Some("audio/mpeg"), Some("1"));
        assert!(e.is_audio());
        assert_eq!(e.extension(), "mp3");
        assert!(!enclosure(Some("video/mp4"), Some("1")).is_audio());
    }

    #[test]
    fn test_river_item_serializes_camel_case() {
        let item = RiverItem {
            title: "Hello".into(),
            feed_url: "http://example.com/rss.xml".into(),
            id: 12,
            ..Default::default()
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["feedUrl"], "http://example.com/rss.xml");
        assert!(json.get("enclosure").is_none());
        assert!(json.get("fullDescription").is_none());
    }

    #[test]
    fn test_display_title_without_title() {
        let item = RiverItem::default();
        assert_eq!(item.display_title(), "(Untitled)");
    }
}
