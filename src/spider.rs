use crate::classify::{classify, FetchFailure, StatusError};
use crate::config::ScraperConfig;
use crate::error::Result;
use crate::model::Book;
use chrono::Utc;
use reqwest::Client;
use robotstxt::DefaultMatcher;
use select::document::Document;
use select::node::Node;
use select::predicate::{Class, Name, Predicate};
use url::Url;

/// Books and pagination found on one catalog page.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub books: Vec<Book>,
    pub next: Option<String>,
}

/// robots.txt rules fetched once per run.
#[derive(Debug, Clone)]
pub struct Robots {
    body: String,
    user_agent: String,
}

impl Robots {
    pub fn new(body: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            user_agent: user_agent.into(),
        }
    }

    pub fn allows(&self, url: &str) -> bool {
        if self.body.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.body, &self.user_agent, url)
    }
}

pub struct BookSpider {
    client: Client,
    user_agent: String,
}

impl BookSpider {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(config.parallelism)
            .build()?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
        })
    }

    /// Fetches and parses one catalog page. Transport failures and
    /// non-success statuses come back classified.
    pub async fn scrape(&self, url: &str) -> std::result::Result<Page, FetchFailure> {
        log::debug!("Visiting: {}", url);

        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify(Some(Box::new(e)), None))?;

        let status = res.status();
        if !status.is_success() {
            let code = status.as_u16();
            log::debug!("non-200 response status={} url={}", code, url);
            return Err(classify(Some(Box::new(StatusError(code))), Some(code)));
        }

        let page_url = res.url().clone();
        let html = res
            .text()
            .await
            .map_err(|e| classify(Some(Box::new(e)), None))?;
        log::debug!("HTML length: {} bytes", html.len());

        Ok(parse_page(&page_url, &html))
    }

    /// Loads `/robots.txt` relative to `base`. Any failure means no rules.
    pub async fn fetch_robots(&self, base: &Url) -> Robots {
        let body = match base.join("/robots.txt") {
            Ok(robots_url) => match self.client.get(robots_url).send().await {
                Ok(res) if res.status().is_success() => res.text().await.unwrap_or_default(),
                Ok(res) => {
                    log::debug!("robots.txt returned {}, allowing all", res.status());
                    String::new()
                }
                Err(e) => {
                    log::warn!("robots.txt fetch failed, allowing all: {}", e);
                    String::new()
                }
            },
            Err(_) => String::new(),
        };
        Robots::new(body, self.user_agent.clone())
    }
}

/// Extracts every `article.product_pod` and the `li.next a` link.
pub fn parse_page(page_url: &Url, html: &str) -> Page {
    let doc = Document::from(html);

    let books = doc
        .find(Name("article").and(Class("product_pod")))
        .filter_map(|pod| extract_book(page_url, &pod))
        .collect();

    let next = doc
        .find(Name("li").and(Class("next")).descendant(Name("a")))
        .next()
        .and_then(|a| a.attr("href"))
        .and_then(|href| absolute(page_url, href));

    Page { books, next }
}

fn extract_book(page_url: &Url, pod: &Node) -> Option<Book> {
    let link = pod.find(Name("h3").descendant(Name("a"))).next()?;
    let title = link.attr("title").map(str::trim).unwrap_or_default();
    if title.is_empty() {
        return None;
    }
    let url = absolute(page_url, link.attr("href")?)?;

    let price = child_text(pod, Name("p").and(Class("price_color")));

    let rating_text = pod
        .find(Name("p").and(Class("star-rating")))
        .next()
        .and_then(|p| p.attr("class"))
        .and_then(|classes| classes.split_whitespace().nth(1))
        .unwrap_or_default()
        .to_string();

    let mut availability = child_text(
        pod,
        Name("p").and(Class("instock")).and(Class("availability")),
    );
    if availability.is_empty() {
        availability = child_text(pod, Name("p").and(Class("availability")));
    }

    let image_url = pod
        .find(Name("img"))
        .next()
        .and_then(|img| img.attr("src"))
        .and_then(|src| absolute(page_url, src))
        .unwrap_or_default();

    Some(Book {
        title: title.to_string(),
        price,
        rating_text,
        rating_numeric: 0,
        availability,
        image_url,
        url,
        scraped_at: Utc::now(),
    })
}

fn child_text<P: Predicate>(node: &Node, predicate: P) -> String {
    node.find(predicate)
        .next()
        .map(|n| n.text().trim().to_string())
        .unwrap_or_default()
}

fn absolute(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    base.join(href).ok().map(String::from)
}
