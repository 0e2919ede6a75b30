//! Concurrent, domain-scoped BFS crawler.
//!
//! The crawler starts from a seed URL and walks same-domain links in
//! batches, bounded by a page budget, a concurrency semaphore, and an
//! inter-batch throttle.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use url::Url;

use sitekb_shared::{CrawlConfig, PageRecord, Result, SiteKbError};

use crate::extract::extract_page;

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("sitekb/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// CrawlSummary
// ---------------------------------------------------------------------------

/// Summary of a completed crawl operation.
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    /// Number of pages successfully fetched and extracted.
    pub pages_fetched: usize,
    /// Number of URLs skipped (non-HTML, non-200, empty content).
    pub pages_skipped: usize,
    /// Errors encountered (URL, error message).
    pub errors: Vec<(String, String)>,
    /// Total duration of the crawl.
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Concurrent web crawler scoped to the seed URL's domain.
pub struct Crawler {
    config: CrawlConfig,
    client: Client,
}

impl Crawler {
    /// Create a new crawler with the given configuration.
    pub fn new(config: CrawlConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SiteKbError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Crawl starting from `seed`, returning a summary and the fetched pages.
    ///
    /// Traversal is breadth-first in batches: up to `concurrency` URLs are
    /// fetched in parallel, the batch is fully merged (pages appended, new
    /// links enqueued), then the crawler sleeps `throttle_ms` before the
    /// next batch. A URL is enqueued only if it was never seen and the
    /// page budget still has room for it. Per-URL failures are recorded
    /// and never abort the crawl.
    #[instrument(skip_all, fields(seed = %seed))]
    pub async fn crawl(&self, seed: &Url) -> Result<(CrawlSummary, Vec<PageRecord>)> {
        let start_time = std::time::Instant::now();

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));

        // `visited` covers fetched and in-flight URLs; `queued` mirrors the
        // frontier for O(1) membership checks.
        let mut visited: HashSet<String> = HashSet::new();
        let mut queued: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<Url> = VecDeque::new();

        let seed_key = normalize_url(seed);
        queued.insert(seed_key);
        frontier.push_back(seed.clone());

        let mut pages: Vec<PageRecord> = Vec::new();
        let mut errors: Vec<(String, String)> = Vec::new();
        let mut pages_skipped: usize = 0;

        info!(
            max_pages = self.config.max_pages,
            concurrency = self.config.concurrency,
            throttle_ms = self.config.throttle_ms,
            "starting crawl"
        );

        // The budget counts emitted pages; skipped and failed URLs do not
        // consume it. `visited` is purely for dedup.
        while !frontier.is_empty() && pages.len() < self.config.max_pages {
            let drain_count = frontier
                .len()
                .min(self.config.concurrency)
                .min(self.config.max_pages - pages.len());
            let batch: Vec<Url> = frontier.drain(..drain_count).collect();

            let mut handles = Vec::new();

            for url in batch {
                let key = normalize_url(&url);
                queued.remove(&key);
                if !visited.insert(key) {
                    continue;
                }

                let client = self.client.clone();
                let sem = semaphore.clone();
                let retries = self.config.fetch_retries;
                let retry_delay = Duration::from_millis(self.config.retry_delay_ms);

                let task_url = url.clone();
                let handle = tokio::spawn(async move {
                    let _permit = sem.acquire().await.map_err(|e| {
                        SiteKbError::Network(format!("semaphore closed: {e}"))
                    })?;
                    fetch_page(&client, &task_url, retries, retry_delay).await
                });
                handles.push((url, handle));
            }

            for (url, handle) in handles {
                match handle.await {
                    Ok(Ok(Some(page))) => {
                        for link in &page.links {
                            let Ok(link_url) = Url::parse(link) else {
                                continue;
                            };
                            let key = normalize_url(&link_url);
                            if visited.contains(&key) || queued.contains(&key) {
                                continue;
                            }
                            // Budget covers pages emitted plus waiting URLs.
                            if pages.len() + frontier.len() >= self.config.max_pages {
                                continue;
                            }
                            queued.insert(key);
                            frontier.push_back(link_url);
                        }
                        pages.push(page);
                    }
                    Ok(Ok(None)) => {
                        debug!(%url, "skipped page");
                        pages_skipped += 1;
                    }
                    Ok(Err(e)) => {
                        warn!(%url, error = %e, "fetch failed");
                        errors.push((url.to_string(), e.to_string()));
                        pages_skipped += 1;
                    }
                    Err(e) => {
                        warn!(%url, error = %e, "fetch task panicked");
                        errors.push((url.to_string(), e.to_string()));
                        pages_skipped += 1;
                    }
                }
            }

            if !frontier.is_empty() && self.config.throttle_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.throttle_ms)).await;
            }
        }

        let summary = CrawlSummary {
            pages_fetched: pages.len(),
            pages_skipped,
            errors,
            duration: start_time.elapsed(),
        };

        info!(
            pages_fetched = summary.pages_fetched,
            pages_skipped = summary.pages_skipped,
            errors = summary.errors.len(),
            duration_ms = summary.duration.as_millis(),
            "crawl completed"
        );

        Ok((summary, pages))
    }
}

// ---------------------------------------------------------------------------
// Page fetching
// ---------------------------------------------------------------------------

/// Fetch one URL with bounded retries.
///
/// Transport errors and 5xx responses are retried with a fixed delay;
/// other non-200 responses, non-HTML content types, and pages with no
/// extractable text resolve to `Ok(None)` immediately. `Err` is returned
/// only once all attempts are exhausted.
async fn fetch_page(
    client: &Client,
    url: &Url,
    retries: u32,
    retry_delay: Duration,
) -> Result<Option<PageRecord>> {
    let attempts = retries.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match fetch_once(client, url).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) => {
                warn!(%url, attempt, error = %e, "fetch attempt failed");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| SiteKbError::Network(format!("{url}: fetch failed"))))
}

/// A single fetch attempt. `Err` means retryable, `Ok(None)` means skip.
async fn fetch_once(client: &Client, url: &Url) -> Result<Option<PageRecord>> {
    debug!(%url, "fetching page");

    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| SiteKbError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if status.is_server_error() {
        return Err(SiteKbError::Network(format!("{url}: HTTP {status}")));
    }
    if !status.is_success() {
        debug!(%url, %status, "non-success response, skipping");
        return Ok(None);
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !content_type.contains("text/html") {
        debug!(%url, content_type, "non-HTML content, skipping");
        return Ok(None);
    }

    let body = response
        .text()
        .await
        .map_err(|e| SiteKbError::Network(format!("{url}: body read failed: {e}")))?;

    // Parsing stays synchronous: the document must not be held across an
    // await inside a spawned task.
    let extracted = extract_page(&body, url);
    if extracted.text.is_empty() {
        debug!(%url, "no extractable text, skipping");
        return Ok(None);
    }

    let content_hash = compute_hash(&extracted.text);

    Ok(Some(PageRecord {
        url: url.to_string(),
        title: extracted.title,
        content_length: extracted.text.chars().count(),
        content: extracted.text,
        crawled_at: Utc::now(),
        content_hash,
        links: extracted.links,
    }))
}

/// Normalize a URL for deduplication (strip fragment, trailing slash).
fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    // Remove trailing slash for consistency (except root path)
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}

/// Compute SHA-256 hash of content.
fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod crawler_tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(max_pages: usize) -> CrawlConfig {
        CrawlConfig {
            max_pages,
            concurrency: 2,
            throttle_ms: 0,
            timeout_secs: 5,
            fetch_retries: 1,
            retry_delay_ms: 0,
        }
    }

    fn html_response(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html")
    }

    #[test]
    fn test_normalize_url() {
        let url = Url::parse("https://docs.example.com/guide/intro#section-1").unwrap();
        let normalized = normalize_url(&url);
        assert!(!normalized.contains('#'));
        assert!(normalized.starts_with("https://docs.example.com/guide/intro"));

        let with_slash = Url::parse("https://docs.example.com/guide/").unwrap();
        assert_eq!(normalize_url(&with_slash), "https://docs.example.com/guide");
    }

    #[test]
    fn test_compute_hash() {
        let hash = compute_hash("hello world");
        assert_eq!(hash.len(), 64); // SHA-256 = 64 hex chars
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn crawl_stays_on_seed_domain() {
        let server = MockServer::start().await;

        let home = format!(
            r#"<html><head><title>Home</title></head><body><main>
                <p>Welcome to the site.</p>
                <a href="/products">Products</a>
                <a href="/about">About</a>
                <a href="/contact">Contact</a>
                <a href="https://external-one.example.org/">External 1</a>
                <a href="https://external-two.example.org/">External 2</a>
            </main></body></html>"#
        );
        let leaf = |name: &str| {
            format!(
                r#"<html><head><title>{name}</title></head><body><main><p>{name} content.</p></main></body></html>"#
            )
        };

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html_response(&home))
            .mount(&server)
            .await;
        for p in ["/products", "/about", "/contact"] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(html_response(&leaf(p)))
                .mount(&server)
                .await;
        }

        let crawler = Crawler::new(test_config(10)).unwrap();
        let seed = Url::parse(&server.uri()).unwrap();
        let (summary, pages) = crawler.crawl(&seed).await.unwrap();

        // Seed plus three same-domain links; external hosts never fetched.
        assert_eq!(summary.pages_fetched, 4);
        assert_eq!(pages.len(), 4);
        assert!(summary.errors.is_empty());
        assert!(pages.iter().all(|p| p.url.starts_with(&server.uri())));
    }

    #[tokio::test]
    async fn crawl_honors_page_budget() {
        let server = MockServer::start().await;

        // Every page links onward, so only the budget stops the crawl.
        for i in 0..10 {
            let body = format!(
                r#"<html><body><main><p>Page {i}.</p><a href="/p{}">next</a></main></body></html>"#,
                i + 1
            );
            let route = if i == 0 {
                "/".to_string()
            } else {
                format!("/p{i}")
            };
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(html_response(&body))
                .mount(&server)
                .await;
        }

        let crawler = Crawler::new(test_config(3)).unwrap();
        let seed = Url::parse(&server.uri()).unwrap();
        let (summary, pages) = crawler.crawl(&seed).await.unwrap();

        assert_eq!(summary.pages_fetched, 3);
        assert_eq!(pages.len(), 3);
    }

    #[tokio::test]
    async fn crawl_deduplicates_cyclic_links() {
        let server = MockServer::start().await;

        let a = r#"<html><body><main><p>A.</p><a href="/b">b</a><a href="/">self</a></main></body></html>"#;
        let b = r#"<html><body><main><p>B.</p><a href="/">a</a><a href="/b#frag">self</a></main></body></html>"#;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html_response(a))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(html_response(b))
            .expect(1)
            .mount(&server)
            .await;

        let crawler = Crawler::new(test_config(10)).unwrap();
        let seed = Url::parse(&server.uri()).unwrap();
        let (summary, _pages) = crawler.crawl(&seed).await.unwrap();

        assert_eq!(summary.pages_fetched, 2);
    }

    #[tokio::test]
    async fn crawl_skips_non_html_and_failed_pages() {
        let server = MockServer::start().await;

        let home = r#"<html><body><main>
            <p>Home.</p>
            <a href="/data.json">data</a>
            <a href="/missing">missing</a>
            <a href="/ok">ok</a>
        </main></body></html>"#;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html_response(home))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data.json"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(html_response(
                "<html><body><main><p>Ok.</p></main></body></html>",
            ))
            .mount(&server)
            .await;

        let crawler = Crawler::new(test_config(10)).unwrap();
        let seed = Url::parse(&server.uri()).unwrap();
        let (summary, pages) = crawler.crawl(&seed).await.unwrap();

        // The crawl keeps going past skipped URLs.
        assert_eq!(summary.pages_fetched, 2);
        assert_eq!(summary.pages_skipped, 2);
        assert!(summary.errors.is_empty());
        assert!(pages.iter().any(|p| p.url.ends_with("/ok")));
    }

    #[tokio::test]
    async fn transient_server_errors_are_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html_response(
                "<html><head><title>Up</title></head><body><main><p>Recovered.</p></main></body></html>",
            ))
            .mount(&server)
            .await;

        let mut config = test_config(5);
        config.fetch_retries = 3;
        let crawler = Crawler::new(config).unwrap();
        let seed = Url::parse(&server.uri()).unwrap();
        let (summary, pages) = crawler.crawl(&seed).await.unwrap();

        assert_eq!(summary.pages_fetched, 1);
        assert_eq!(pages[0].title, "Up");
    }

    #[tokio::test]
    async fn persistent_failure_is_recorded_not_fatal() {
        let server = MockServer::start().await;

        let home = r#"<html><body><main>
            <p>Home.</p><a href="/broken">broken</a><a href="/fine">fine</a>
        </main></body></html>"#;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html_response(home))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fine"))
            .respond_with(html_response(
                "<html><body><main><p>Fine.</p></main></body></html>",
            ))
            .mount(&server)
            .await;

        let mut config = test_config(10);
        config.fetch_retries = 2;
        let crawler = Crawler::new(config).unwrap();
        let seed = Url::parse(&server.uri()).unwrap();
        let (summary, pages) = crawler.crawl(&seed).await.unwrap();

        assert_eq!(summary.pages_fetched, 2);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].0.ends_with("/broken"));
        assert!(summary.errors[0].1.contains("500"));
        assert!(pages.iter().any(|p| p.url.ends_with("/fine")));
    }

    #[tokio::test]
    async fn skipped_urls_do_not_consume_the_budget() {
        let server = MockServer::start().await;

        // Two non-HTML links plus an HTML chain; with a budget of 4 the
        // crawl must still emit all four HTML pages.
        let home = r#"<html><body><main>
            <p>Home.</p>
            <a href="/a.json">a</a>
            <a href="/b.json">b</a>
            <a href="/h1">h1</a>
        </main></body></html>"#;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html_response(home))
            .mount(&server)
            .await;
        for p in ["/a.json", "/b.json"] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
                .mount(&server)
                .await;
        }
        for (route, next) in [("/h1", Some("/h2")), ("/h2", Some("/h3")), ("/h3", None)] {
            let link = next
                .map(|n| format!(r#"<a href="{n}">next</a>"#))
                .unwrap_or_default();
            let body =
                format!(r#"<html><body><main><p>Page {route}.</p>{link}</main></body></html>"#);
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(html_response(&body))
                .mount(&server)
                .await;
        }

        let crawler = Crawler::new(test_config(4)).unwrap();
        let seed = Url::parse(&server.uri()).unwrap();
        let (summary, pages) = crawler.crawl(&seed).await.unwrap();

        assert_eq!(summary.pages_fetched, 4);
        assert_eq!(summary.pages_skipped, 2);
        for route in ["/h1", "/h2", "/h3"] {
            assert!(pages.iter().any(|p| p.url.ends_with(route)));
        }
    }

    #[tokio::test]
    async fn page_records_carry_hash_and_metadata() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html_response(
                "<html><head><title>Meta</title></head><body><main><p>Some page text.</p></main></body></html>",
            ))
            .mount(&server)
            .await;

        let crawler = Crawler::new(test_config(1)).unwrap();
        let seed = Url::parse(&server.uri()).unwrap();
        let (_, pages) = crawler.crawl(&seed).await.unwrap();

        let page = &pages[0];
        assert_eq!(page.title, "Meta");
        assert_eq!(page.content, "Some page text.");
        assert_eq!(page.content_length, page.content.chars().count());
        assert_eq!(page.content_hash, compute_hash(&page.content));
    }
}
