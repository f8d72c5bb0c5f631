//! HTML → title, cleaned text, and outbound links.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::dedup::normalize_url;

/// Containers tried in order when gathering page text.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    ".content",
    "#content",
    ".post-content",
    ".entry-content",
    "p",
];

/// Blocks shorter than this are navigation noise.
const MIN_BLOCK_CHARS: usize = 50;

/// Stop trying further selectors once this much text is gathered.
const ENOUGH_CHARS: usize = 500;

/// Hard cap on stored page text.
pub const MAX_CONTENT_CHARS: usize = 5000;

static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static H1: LazyLock<Selector> = LazyLock::new(|| selector("h1"));
static LINKS: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static BLOCKS: LazyLock<Vec<Selector>> =
    LazyLock::new(|| CONTENT_SELECTORS.iter().map(|s| selector(s)).collect());

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid CSS")
}

/// The useful parts of one HTML document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPage {
    pub title: Option<String>,
    pub content: String,
    pub links: Vec<String>,
}

/// Parse an HTML body fetched from `base_url`.
pub fn parse_page(body: &str, base_url: &Url, max_links: usize) -> ParsedPage {
    let doc = Html::parse_document(body);
    ParsedPage {
        title: extract_title(&doc),
        content: extract_content(&doc),
        links: extract_links(&doc, base_url, max_links),
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn extract_title(doc: &Html) -> Option<String> {
    [&*TITLE, &*H1]
        .into_iter()
        .filter_map(|sel| doc.select(sel).next())
        .map(element_text)
        .find(|t| !t.is_empty())
}

/// Gather text blocks from the usual content containers.
fn extract_content(doc: &Html) -> String {
    let mut content = String::new();

    for sel in BLOCKS.iter() {
        for el in doc.select(sel) {
            let text = element_text(el);
            if text.chars().count() > MIN_BLOCK_CHARS {
                content.push_str(&text);
                content.push_str("\n\n");
            }
        }
        if content.len() > ENOUGH_CHARS {
            break;
        }
    }

    truncate_chars(content.trim_end(), MAX_CONTENT_CHARS).to_string()
}

/// Resolve `a[href]` targets against the page URL.
fn extract_links(doc: &Html, base_url: &Url, max_links: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for el in doc.select(&LINKS) {
        if links.len() >= max_links {
            break;
        }
        let Some(href) = el.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
        {
            continue;
        }
        let Some(resolved) = base_url.join(href).ok().as_ref().and_then(normalize_url) else {
            continue;
        };
        if seen.insert(resolved.clone()) {
            links.push(resolved);
        }
    }

    links
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://docs.example.com/page1").unwrap()
    }

    #[test]
    fn title_prefers_title_tag() {
        let html = "<html><head><title> Space  News </title></head><body><h1>Headline</h1></body></html>";
        let page = parse_page(html, &base(), 10);
        assert_eq!(page.title.as_deref(), Some("Space News"));

        let html = "<html><body><h1>Only Heading</h1></body></html>";
        let page = parse_page(html, &base(), 10);
        assert_eq!(page.title.as_deref(), Some("Only Heading"));
    }

    #[test]
    fn short_blocks_are_skipped() {
        let long = "SpaceX was founded by Elon Musk in 2002 and is based in Hawthorne, California.";
        let html = format!("<html><body><p>Menu</p><p>{long}</p></body></html>");
        let page = parse_page(&html, &base(), 10);
        assert_eq!(page.content, long);
    }

    #[test]
    fn content_is_capped() {
        let para = "word ".repeat(400);
        let html = format!(
            "<html><body>{}</body></html>",
            (0..10).map(|_| format!("<article>{para}</article>")).collect::<String>()
        );
        let page = parse_page(&html, &base(), 10);
        assert_eq!(page.content.chars().count(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn links_resolved_and_filtered() {
        let html = r##"<html><body>
            <a href="/page2">Page 2</a>
            <a href="https://external.com">External</a>
            <a href="#section">Anchor</a>
            <a href="mailto:x@example.com">Mail</a>
            <a href="relative/path#frag">Relative</a>
            <a href="/page2">Again</a>
        </body></html>"##;
        let page = parse_page(html, &base(), 10);

        assert_eq!(
            page.links,
            vec![
                "https://docs.example.com/page2".to_string(),
                "https://external.com/".to_string(),
                "https://docs.example.com/relative/path".to_string(),
            ]
        );
    }

    #[test]
    fn links_capped() {
        let html: String = (0..20)
            .map(|i| format!("<a href=\"/p{i}\">p</a>"))
            .collect();
        let page = parse_page(&html, &base(), 5);
        assert_eq!(page.links.len(), 5);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
