// Turns search hits and URLs into plain-text context for the model.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use tracing::{debug, info, instrument, warn};

use crate::constants::{
    self, HREF_PATTERN, HTML_TAG_PATTERN, SCRIPT_STYLE_PATTERN, URL_PATTERN, WHITESPACE_PATTERN,
};
use crate::error::{Result, WebwiseError};
use crate::search::SearchResult;

/// Text pulled from one web page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub link: String,
    pub text: String,
}

#[derive(Clone, Debug)]
pub struct PageFetcher {
    http: Client,
    budget: usize,
}

impl PageFetcher {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(constants::PAGE_FETCH_TIMEOUT_SECS))
            .user_agent(concat!("webwise/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            budget: constants::PAGE_TEXT_BUDGET,
        })
    }

    /// Fetches one page and reduces it to at most `budget` characters of text.
    #[instrument(skip(self))]
    pub async fn fetch(&self, link: &str) -> Result<PageText> {
        let (body, is_html) = self.fetch_body(link).await?;
        Ok(self.page(link, &body, is_html))
    }

    async fn fetch_body(&self, link: &str) -> Result<(String, bool)> {
        let response = self.http.get(link).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(WebwiseError::Api {
                service: "web page",
                status: status.as_u16(),
                body: format!("fetching {} failed", link),
            });
        }

        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("html"))
            .unwrap_or(true);
        Ok((response.text().await?, is_html))
    }

    fn page(&self, link: &str, body: &str, is_html: bool) -> PageText {
        let text = if is_html {
            html_to_text(body)
        } else {
            collapse_whitespace(body)
        };
        debug!(chars = text.len(), "Fetched page text");

        PageText {
            link: link.to_string(),
            text: truncate_chars(&text, self.budget),
        }
    }

    /// Fetches every search hit; a page that cannot be fetched falls back to its snippet.
    pub async fn gather(&self, results: &[SearchResult]) -> Vec<PageText> {
        let mut pages = Vec::with_capacity(results.len());
        for result in results {
            match self.fetch(&result.link).await {
                Ok(page) if !page.text.is_empty() => pages.push(page),
                Ok(_) => pages.push(snippet_page(result)),
                Err(e) => {
                    warn!(link = %result.link, error = %e, "Could not fetch search result, using snippet");
                    pages.push(snippet_page(result));
                }
            }
        }
        pages
    }

    /// Fetches each link in turn; pages that fail or carry no text are skipped.
    pub async fn gather_links(&self, links: &[String]) -> Vec<PageText> {
        let mut pages = Vec::with_capacity(links.len());
        for link in links {
            match self.fetch(link).await {
                Ok(page) if !page.text.is_empty() => pages.push(page),
                Ok(_) => debug!(link = %link, "Skipping empty page"),
                Err(e) => warn!(link = %link, error = %e, "Skipping page"),
            }
        }
        pages
    }

    /// Reads a documentation site breadth-first, starting at `start` and
    /// following only links that stay under its directory.
    ///
    /// The start page must load; later pages that fail are skipped.
    #[instrument(skip(self))]
    pub async fn crawl_docs(&self, start: &str) -> Result<Vec<PageText>> {
        let start = parse_url(start)?;
        let prefix = start.join("./").unwrap_or_else(|_| start.clone()).to_string();

        let mut seen = HashSet::from([start.to_string()]);
        let mut queue = VecDeque::from([start.clone()]);
        let mut pages = Vec::new();

        while let Some(url) = queue.pop_front() {
            if pages.len() >= constants::DOCS_SITE_PAGE_LIMIT {
                break;
            }
            let (body, is_html) = match self.fetch_body(url.as_str()).await {
                Ok(fetched) => fetched,
                Err(e) if url == start => return Err(e),
                Err(e) => {
                    warn!(link = %url, error = %e, "Skipping docs page");
                    continue;
                }
            };
            if is_html {
                for link in page_links(&url, &body) {
                    if link.as_str().starts_with(&prefix) && seen.insert(link.to_string()) {
                        queue.push_back(link);
                    }
                }
            }
            let page = self.page(url.as_str(), &body, is_html);
            if !page.text.is_empty() {
                pages.push(page);
            }
        }

        info!(pages = pages.len(), "Read docs website");
        Ok(pages)
    }

    /// Reads the pages listed in a sitemap, up to the sitemap page limit.
    #[instrument(skip(self))]
    pub async fn sitemap(&self, link: &str) -> Result<Vec<PageText>> {
        let (body, _) = self.fetch_body(parse_url(link)?.as_str()).await?;
        let mut locations = sitemap_locations(&body)?;
        info!(listed = locations.len(), "Read sitemap");
        locations.truncate(constants::SITEMAP_PAGE_LIMIT);
        Ok(self.gather_links(&locations).await)
    }
}

fn parse_url(link: &str) -> Result<Url> {
    Url::parse(link).map_err(|e| WebwiseError::InvalidInput(format!("{} is not a valid URL: {}", link, e)))
}

/// Absolute `href` targets of an HTML page, without fragments.
fn page_links(base: &Url, html: &str) -> Vec<Url> {
    HREF_PATTERN
        .captures_iter(html)
        .filter_map(|caps| base.join(caps[1].trim()).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .map(|mut url| {
            url.set_fragment(None);
            url
        })
        .collect()
}

/// Text of every `<loc>` element in a sitemap document.
fn sitemap_locations(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut locations = Vec::new();
    let mut in_loc = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"loc" => in_loc = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"loc" => in_loc = false,
            Ok(Event::Text(t)) if in_loc => {
                let loc = t.unescape().map_err(|e| WebwiseError::extraction("sitemap", e))?;
                let loc = loc.trim();
                if !loc.is_empty() {
                    locations.push(loc.to_string());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(WebwiseError::extraction("sitemap", e)),
            _ => {}
        }
    }
    Ok(locations)
}

fn snippet_page(result: &SearchResult) -> PageText {
    PageText {
        link: result.link.clone(),
        text: result.snippet.clone(),
    }
}

/// Renders pages as a numbered source list for a system message.
pub fn build_context(pages: &[PageText]) -> String {
    pages
        .iter()
        .enumerate()
        .map(|(i, page)| format!("[{}] {}\n{}", i + 1, page.link, page.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn extract_first_url(prompt: &str) -> Option<&str> {
    URL_PATTERN
        .find(prompt)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':']))
}

pub fn html_to_text(html: &str) -> String {
    let without_scripts = SCRIPT_STYLE_PATTERN.replace_all(html, " ");
    let without_tags = HTML_TAG_PATTERN.replace_all(&without_scripts, " ");
    collapse_whitespace(&decode_entities(&without_tags))
}

fn decode_entities(text: &str) -> String {
    // &amp; last so "&amp;lt;" stays "&lt;"
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_PATTERN.replace_all(text, " ").trim().to_string()
}

pub(crate) fn truncate_chars(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
