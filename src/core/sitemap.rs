use regex::Regex;

use crate::error::{Error, Result};

const URLSET_OPEN: &str = "<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">";
const URLSET_CLOSE: &str = "</urlset>";

// Entry defaults for appended URLs.
const DEFAULT_CHANGEFREQ: &str = "weekly";
const DEFAULT_PRIORITY: &str = "0.8";

/// Build a fresh document containing one entry per URL, in order. With no
/// URLs this is the empty document shell.
pub fn build_document(locs: &[String], date: &str) -> String {
    let mut entries = String::new();
    for url in locs {
        entries.push_str(&format_entry(url, date));
    }
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}\n{}{}\n",
        URLSET_OPEN, entries, URLSET_CLOSE
    )
}

/// Merge `locs` into an existing sitemap document.
///
/// Existing entries are preserved byte-for-byte in their original order; a
/// new entry is appended before the closing tag for each URL that has no
/// existing entry (exact match on the `<loc>` text). Output is deterministic:
/// the same existing content, URL set, and date always produce identical
/// bytes, so re-running a merge never accumulates duplicates.
pub fn merge(existing: Option<&str>, locs: &[String], date: &str, origin: &str) -> Result<String> {
    let Some(existing) = existing else {
        return Ok(build_document(locs, date));
    };

    if !existing.contains("<urlset") {
        return Err(Error::sitemap_parse(origin, "Missing <urlset> element"));
    }
    let close_at = existing.rfind(URLSET_CLOSE).ok_or_else(|| {
        Error::sitemap_parse(origin, "Missing </urlset> close tag")
    })?;

    let existing_locs = extract_locs(existing);

    let mut appended = String::new();
    for url in locs {
        let escaped = escape_text(url);
        if existing_locs.iter().any(|l| l == url || *l == escaped) {
            continue;
        }
        appended.push_str(&format_entry(url, date));
    }

    if appended.is_empty() {
        return Ok(existing.to_string());
    }

    let mut merged = String::with_capacity(existing.len() + appended.len());
    merged.push_str(&existing[..close_at]);
    merged.push_str(&appended);
    merged.push_str(&existing[close_at..]);
    Ok(merged)
}

fn format_entry(url: &str, date: &str) -> String {
    format!(
        "  <url>\n    <loc>{}</loc>\n    <lastmod>{}</lastmod>\n    <changefreq>{}</changefreq>\n    <priority>{}</priority>\n  </url>\n",
        escape_text(url),
        date,
        DEFAULT_CHANGEFREQ,
        DEFAULT_PRIORITY
    )
}

/// Extract the text of every `<loc>` element, trimmed, in document order.
fn extract_locs(content: &str) -> Vec<String> {
    let re = Regex::new(r"<loc>\s*([^<]*?)\s*</loc>").expect("static pattern compiles");
    re.captures_iter(content)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATE: &str = "2024-05-01";

    fn locs(urls: &[&str]) -> Vec<String> {
        urls.iter().map(|u| u.to_string()).collect()
    }

    #[test]
    fn absent_file_builds_fresh_document() {
        let result = merge(
            None,
            &locs(&["https://example.com/", "https://example.com/blog/"]),
            DATE,
            "sitemap.xml",
        )
        .unwrap();
        assert!(result.starts_with("<?xml"));
        assert_eq!(result.matches("<url>").count(), 2);
        assert!(result.contains("<loc>https://example.com/blog/</loc>"));
        assert!(result.contains("<lastmod>2024-05-01</lastmod>"));
        assert!(result.ends_with("</urlset>\n"));
    }

    #[test]
    fn existing_entry_is_left_untouched_and_new_one_appended() {
        let existing = build_document(&locs(&["https://example.com/u1"]), "2023-01-01");
        let result = merge(
            Some(&existing),
            &locs(&["https://example.com/u1", "https://example.com/u2"]),
            DATE,
            "sitemap.xml",
        )
        .unwrap();

        assert_eq!(result.matches("https://example.com/u1").count(), 1);
        // u1 keeps its original lastmod; only u2 gets the new date.
        assert!(result.contains("<lastmod>2023-01-01</lastmod>"));
        assert_eq!(result.matches("<lastmod>2024-05-01</lastmod>").count(), 1);
        assert!(result.contains("https://example.com/u2"));
    }

    #[test]
    fn merge_is_idempotent() {
        let existing = build_document(&locs(&["https://example.com/a"]), "2023-01-01");
        let urls = locs(&["https://example.com/a", "https://example.com/b"]);

        let once = merge(Some(&existing), &urls, DATE, "sitemap.xml").unwrap();
        let twice = merge(Some(&once), &urls, DATE, "sitemap.xml").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn new_entries_follow_loc_order() {
        let result = merge(
            None,
            &locs(&["https://b.example.com", "https://a.example.com"]),
            DATE,
            "sitemap.xml",
        )
        .unwrap();
        let b_at = result.find("https://b.example.com").unwrap();
        let a_at = result.find("https://a.example.com").unwrap();
        assert!(b_at < a_at);
    }

    #[test]
    fn no_new_entries_returns_existing_bytes() {
        let existing = build_document(&locs(&["https://example.com/a"]), "2023-01-01");
        let result = merge(
            Some(&existing),
            &locs(&["https://example.com/a"]),
            DATE,
            "sitemap.xml",
        )
        .unwrap();
        assert_eq!(result, existing);
    }

    #[test]
    fn malformed_document_is_parse_error() {
        let err = merge(
            Some("<html>not a sitemap</html>"),
            &locs(&["https://example.com"]),
            DATE,
            "sitemap.xml",
        )
        .unwrap_err();
        assert_eq!(err.code.as_str(), "sitemap.parse_error");

        let err = merge(
            Some("<urlset xmlns=\"x\"><url></url>"),
            &locs(&["https://example.com"]),
            DATE,
            "sitemap.xml",
        )
        .unwrap_err();
        assert_eq!(err.code.as_str(), "sitemap.parse_error");
    }

    #[test]
    fn ampersand_urls_escape_and_stay_deduplicated() {
        let urls = locs(&["https://example.com/?a=1&b=2"]);
        let once = merge(None, &urls, DATE, "sitemap.xml").unwrap();
        assert!(once.contains("https://example.com/?a=1&amp;b=2"));

        let twice = merge(Some(&once), &urls, DATE, "sitemap.xml").unwrap();
        assert_eq!(once, twice);
    }
}
