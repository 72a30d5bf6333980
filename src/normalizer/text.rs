use std::sync::OnceLock;

use html_escape::decode_html_entities;
use regex::Regex;

fn markup_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("markup pattern is valid"))
}

/// Remove tags and decode entities.
pub fn strip_markup(s: &str) -> String {
    let stripped = markup_pattern().replace_all(s, "");
    decode_html_entities(&stripped).to_string()
}

/// Cut `s` to at most `max` characters. With `whole_word` the cut backs up to
/// the last space; with `ellipsis` "..." is appended to a cut string.
pub fn max_string_length(s: &str, max: usize, whole_word: bool, ellipsis: bool) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut cut: String = s.chars().take(max).collect();
    if whole_word {
        if let Some(ix) = cut.rfind(char::is_whitespace) {
            if ix > 0 {
                cut.truncate(ix);
            }
        }
    }
    let mut cut = cut.trim_end().to_string();
    if ellipsis {
        cut.push_str("...");
    }
    cut
}

/// River body text: markup stripped, whitespace trimmed, length capped.
pub fn item_body(description: Option<&str>, max_body_length: usize) -> String {
    let s = strip_markup(description.unwrap_or(""));
    let s = s.trim();
    max_string_length(s, max_body_length, true, true)
        .trim()
        .to_string()
}

/// File-system safe name, capped at `max` characters.
pub fn clean_file_name(s: &str, max: usize) -> String {
    let safe: String = s
        .chars()
        .map(|c| match c {
            '/' | '?' | ':' | '<' | '>' | '"' | '\\' | '|' | '*' => '_',
            c => c,
        })
        .collect();
    max_string_length(&safe, max, false, false)
}
