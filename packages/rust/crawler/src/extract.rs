//! HTML content extraction.
//!
//! Strips page chrome (scripts, styles, navigation, headers, footers),
//! prefers a semantic content root when one exists, and normalizes the
//! remaining visible text into a single whitespace-collapsed blob.

use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

/// Elements whose subtrees carry no indexable page text.
const SKIPPED_ELEMENTS: [&str; 6] = ["script", "style", "nav", "footer", "header", "noscript"];

/// Content roots tried in order before falling back to `<body>`.
const CONTENT_ROOTS: [&str; 4] = ["main", "article", "div.content", "body"];

/// The cleaned output of parsing one HTML page.
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    /// Text of the `<title>` element, empty when absent.
    pub title: String,
    /// Normalized visible text.
    pub text: String,
    /// Same-host absolute links, fragments stripped.
    pub links: Vec<String>,
}

/// Parse an HTML document and pull out its title, clean text, and links.
///
/// Synchronous on purpose: `scraper::Html` is not `Send`, so callers parse
/// between awaits rather than holding a document across them.
pub fn extract_page(html: &str, base_url: &Url) -> ExtractedPage {
    let doc = Html::parse_document(html);

    ExtractedPage {
        title: extract_title(&doc),
        text: extract_text(&doc),
        links: extract_links(&doc, base_url),
    }
}

fn extract_title(doc: &Html) -> String {
    let sel = Selector::parse("title").expect("static selector");
    doc.select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

/// Visible text of the preferred content root, whitespace-normalized.
fn extract_text(doc: &Html) -> String {
    let root = content_root(doc);

    let mut raw = String::new();
    collect_text(root, &mut raw);

    normalize_whitespace(&raw)
}

/// The first matching semantic content container, falling back to the
/// document root for fragments without a `<body>`.
fn content_root(doc: &Html) -> ElementRef<'_> {
    for css in CONTENT_ROOTS {
        let sel = Selector::parse(css).expect("static selector");
        if let Some(el) = doc.select(&sel).next() {
            return el;
        }
    }
    doc.root_element()
}

/// Walk the subtree under `root`, appending text nodes and skipping
/// chrome elements entirely.
fn collect_text(root: ElementRef<'_>, out: &mut String) {
    let mut stack = vec![*root];

    while let Some(node) = stack.pop() {
        match node.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push('\n');
            }
            Node::Element(el) => {
                if SKIPPED_ELEMENTS.contains(&el.name()) {
                    continue;
                }
                // Reverse so children pop in document order.
                for child in node.children().rev() {
                    stack.push(child);
                }
            }
            _ => {}
        }
    }
}

/// Trim every line, drop empties, and collapse runs of whitespace.
fn normalize_whitespace(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract same-host links, resolved absolute against `base_url` with
/// fragments stripped. Anchors, `javascript:`, and `mailto:` are skipped.
fn extract_links(doc: &Html, base_url: &Url) -> Vec<String> {
    let sel = Selector::parse("a[href]").expect("static selector");
    let base_host = base_url.host_str().unwrap_or("");
    let mut links = Vec::new();

    for el in doc.select(&sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        if href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:")
        {
            continue;
        }

        if let Ok(mut resolved) = base_url.join(href) {
            resolved.set_fragment(None);
            if resolved.host_str().unwrap_or("") == base_host {
                links.push(resolved.to_string());
            }
        }
    }

    links
}
