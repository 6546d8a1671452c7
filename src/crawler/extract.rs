//! Structured content extraction
//!
//! Pulls a fixed schema out of a rendered HTML document:
//! - Title and final URL
//! - Meta tags (`name` or `property` → `content`)
//! - Visible body text, whitespace collapsed
//! - Links, images and tables

use chrono::Utc;
use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Content extracted from one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredContent {
    pub title: String,
    pub url: String,
    /// RFC 3339 extraction time
    pub timestamp: String,
    pub meta_tags: BTreeMap<String, String>,
    pub text_content: String,
    pub links: Vec<LinkInfo>,
    pub images: Vec<ImageInfo>,
    /// One entry per `<table>`, each a list of rows of cell text
    pub tables: Vec<Vec<Vec<String>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkInfo {
    pub text: String,
    pub href: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub src: String,
    pub alt: String,
    pub width: u32,
    pub height: u32,
}

/// Elements whose text never counts as visible
const HIDDEN_TAGS: [&str; 5] = ["script", "style", "noscript", "template", "head"];

/// Extracts the structured schema from an HTML document
///
/// # Arguments
///
/// * `html` - The page body
/// * `page_url` - Final URL of the page, used to resolve relative links
///
/// # Example
///
/// ```
/// use sumi_relay::crawler::extract_structured;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/a">A</a></body></html>"#;
/// let content = extract_structured(html, "https://example.com/");
/// assert_eq!(content.title, "Test");
/// assert_eq!(content.links[0].href, "https://example.com/a");
/// ```
pub fn extract_structured(html: &str, page_url: &str) -> StructuredContent {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok();

    StructuredContent {
        title: extract_title(&document),
        url: page_url.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        meta_tags: extract_meta_tags(&document),
        text_content: extract_visible_text(&document),
        links: extract_links(&document, base.as_ref()),
        images: extract_images(&document, base.as_ref()),
        tables: extract_tables(&document),
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn element_text(element: &ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn resolve(href: &str, base: Option<&Url>) -> String {
    match base.and_then(|b| b.join(href).ok()) {
        Some(url) => url.to_string(),
        None => href.to_string(),
    }
}

fn extract_title(document: &Html) -> String {
    selector("title")
        .and_then(|sel| document.select(&sel).next().map(|el| element_text(&el)))
        .unwrap_or_default()
}

fn extract_meta_tags(document: &Html) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    let Some(sel) = selector("meta") else {
        return tags;
    };

    for element in document.select(&sel) {
        let attrs = element.value();
        let name = attrs.attr("name").or_else(|| attrs.attr("property"));
        if let (Some(name), Some(content)) = (name, attrs.attr("content")) {
            if !name.is_empty() && !content.is_empty() {
                tags.insert(name.to_string(), content.to_string());
            }
        }
    }

    tags
}

fn extract_visible_text(document: &Html) -> String {
    let Some(body) = selector("body").and_then(|sel| document.select(&sel).next()) else {
        return String::new();
    };

    let mut parts = Vec::new();
    collect_visible_text(body, &mut parts);
    collapse_whitespace(&parts.join(" "))
}

fn collect_visible_text(element: ElementRef<'_>, parts: &mut Vec<String>) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
            }
            Node::Element(el) => {
                if HIDDEN_TAGS.contains(&el.name()) || el.attr("hidden").is_some() {
                    continue;
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_visible_text(child_el, parts);
                }
            }
            _ => {}
        }
    }
}

fn extract_links(document: &Html, base: Option<&Url>) -> Vec<LinkInfo> {
    let Some(sel) = selector("a[href]") else {
        return Vec::new();
    };

    document
        .select(&sel)
        .filter_map(|el| {
            let href = el.value().attr("href")?;
            Some(LinkInfo {
                text: element_text(&el),
                href: resolve(href, base),
                title: el.value().attr("title").unwrap_or_default().to_string(),
            })
        })
        .collect()
}

fn extract_images(document: &Html, base: Option<&Url>) -> Vec<ImageInfo> {
    let Some(sel) = selector("img") else {
        return Vec::new();
    };

    let dimension = |value: Option<&str>| -> u32 {
        value
            .map(|v| v.trim().trim_end_matches("px"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    };

    document
        .select(&sel)
        .map(|el| {
            let attrs = el.value();
            ImageInfo {
                src: attrs.attr("src").map(|s| resolve(s, base)).unwrap_or_default(),
                alt: attrs.attr("alt").unwrap_or_default().to_string(),
                width: dimension(attrs.attr("width")),
                height: dimension(attrs.attr("height")),
            }
        })
        .collect()
}

fn extract_tables(document: &Html) -> Vec<Vec<Vec<String>>> {
    let (Some(table_sel), Some(row_sel), Some(cell_sel)) =
        (selector("table"), selector("tr"), selector("td, th"))
    else {
        return Vec::new();
    };

    document
        .select(&table_sel)
        .map(|table| {
            table
                .select(&row_sel)
                .map(|row| row.select(&cell_sel).map(|cell| element_text(&cell)).collect())
                .collect()
        })
        .collect()
}
