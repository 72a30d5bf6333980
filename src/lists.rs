//! Subscription list files: `.opml`, `.txt` and `.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::app::{Result, RiverbedError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFormat {
    Opml,
    Txt,
    Json,
}

impl ListFormat {
    /// Format implied by the file name's extension, if it is a list file at all.
    pub fn from_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "opml" => Some(Self::Opml),
            "txt" => Some(Self::Txt),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// What one list file subscribes to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListEntries {
    pub title: Option<String>,
    pub feeds: Vec<String>,
    /// OPML documents to fetch whose feeds also belong to this list.
    pub includes: Vec<String>,
}

pub fn parse_list(format: ListFormat, content: &str) -> Result<ListEntries> {
    match format {
        ListFormat::Opml => Ok(parse_opml(content)),
        ListFormat::Txt => Ok(parse_txt(content)),
        ListFormat::Json => parse_json(content),
    }
}

fn outline_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<outline\b([^>]*)>").expect("valid outline regex"))
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][\w:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid attribute regex")
    })
}

fn title_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<head\b.*?<title>(.*?)</title>").expect("valid title regex"))
}

/// Attributes of one element, names lowercased and values entity-decoded.
fn attributes(tag: &str) -> HashMap<String, String> {
    attr_regex()
        .captures_iter(tag)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps.get(2).or_else(|| caps.get(3))?.as_str();
            Some((name, html_escape::decode_html_entities(value).to_string()))
        })
        .collect()
}

/// Outlines with an `xmlUrl` are feeds; `type="include"` outlines name
/// another OPML document by `url`.
pub fn parse_opml(content: &str) -> ListEntries {
    let mut entries = ListEntries {
        title: title_regex()
            .captures(content)
            .and_then(|caps| caps.get(1))
            .map(|m| html_escape::decode_html_entities(m.as_str().trim()).to_string())
            .filter(|t| !t.is_empty()),
        ..Default::default()
    };

    for caps in outline_regex().captures_iter(content) {
        let attrs = attributes(&caps[1]);
        if let Some(url) = attrs.get("xmlurl").filter(|u| !u.trim().is_empty()) {
            entries.feeds.push(url.trim().to_string());
        } else if attrs.get("type").is_some_and(|t| t.eq_ignore_ascii_case("include")) {
            if let Some(url) = attrs.get("url").filter(|u| !u.trim().is_empty()) {
                entries.includes.push(url.trim().to_string());
            }
        }
    }
    entries
}

/// One URL per line. Tabs are dropped and spaces only count inside a URL.
pub fn parse_txt(content: &str) -> ListEntries {
    let mut entries = ListEntries::default();
    let mut url = String::new();

    fn flush(url: &mut String, feeds: &mut Vec<String>) {
        let trimmed = url.trim_end();
        if !trimmed.is_empty() {
            feeds.push(trimmed.to_string());
        }
        url.clear();
    }

    for ch in content.chars() {
        match ch {
            '\n' | '\r' => flush(&mut url, &mut entries.feeds),
            '\t' => {}
            ' ' if url.is_empty() => {}
            _ => url.push(ch),
        }
    }
    flush(&mut url, &mut entries.feeds);
    entries
}

/// A JSON array of feed URL strings.
pub fn parse_json(content: &str) -> Result<ListEntries> {
    let feeds: Vec<String> = serde_json::from_str(content)?;
    Ok(ListEntries {
        feeds: feeds
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect(),
        ..Default::default()
    })
}

/// List files in `folder` by name, skipping anything that is not a list.
/// A missing folder holds no lists.
pub fn list_files(folder: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RiverbedError::Io(e)),
    };

    let mut lists = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || ListFormat::from_name(&name).is_none() {
            continue;
        }
        lists.push((name, entry.path()));
    }
    lists.sort();
    Ok(lists)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPML: &str = r#"<?xml version="1.0"?>
<opml version="2.0">
  <head><title>My &amp; Feeds</title></head>
  <body>
    <outline text="Tech">
      <outline text="One" type="rss" xmlUrl="http://one.example.com/rss.xml"/>
      <outline text="Two" type="rss"
        xmlurl='http://two.example.com/feed?a=1&amp;b=2' />
    </outline>
    <outline type="include" url="http://lists.example.com/more.opml"/>
    <outline text="Just a note"/>
  </body>
</opml>"#;

    #[test]
    fn test_format_from_name() {
        assert_eq!(ListFormat::from_name("news.OPML"), Some(ListFormat::Opml));
        assert_eq!(ListFormat::from_name("a.b.txt"), Some(ListFormat::Txt));
        assert_eq!(ListFormat::from_name("feeds.json"), Some(ListFormat::Json));
        assert_eq!(ListFormat::from_name("readme.md"), None);
        assert_eq!(ListFormat::from_name("noext"), None);
    }

    #[test]
    fn test_parse_opml() {
        let entries = parse_opml(OPML);

        assert_eq!(entries.title.as_deref(), Some("My & Feeds"));
        assert_eq!(
            entries.feeds,
            vec![
                "http://one.example.com/rss.xml",
                "http://two.example.com/feed?a=1&b=2"
            ]
        );
        assert_eq!(entries.includes, vec!["http://lists.example.com/more.opml"]);
    }

    #[test]
    fn test_parse_txt_spacing_rules() {
        let content = "  http://a.com/rss\r\n\thttp://b.com/\tfeed\n\n\nhttp://c.com/my feed  \nhttp://d.com/rss";
        let entries = parse_txt(content);

        assert_eq!(
            entries.feeds,
            vec![
                "http://a.com/rss",
                "http://b.com/feed",
                "http://c.com/my feed",
                "http://d.com/rss"
            ]
        );
    }

    #[test]
    fn test_parse_json() {
        let entries = parse_json(r#"["http://a.com/rss", " ", "http://b.com/rss"]"#).unwrap();
        assert_eq!(entries.feeds, vec!["http://a.com/rss", "http://b.com/rss"]);
        assert!(parse_json("{}").is_err());
    }

    #[test]
    fn test_list_files_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.txt", "a.opml", "notes.md", ".hidden.json", "c.json"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.opml")).unwrap();

        let names: Vec<String> = list_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["a.opml", "b.txt", "c.json"]);
    }

    #[test]
    fn test_missing_folder_has_no_lists() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_files(&dir.path().join("nope")).unwrap().is_empty());
    }
}
