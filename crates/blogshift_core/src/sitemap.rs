use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result, bail};
use quick_xml::NsReader;
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use reqwest::blocking::Client;

use crate::http::{HttpClientConfig, build_client};

pub const SITEMAP_NAMESPACE: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

/// Substrings marking listing and utility pages rather than articles.
const NON_ARTICLE_FRAGMENTS: &[&str] = &["404.html", "index.html", "/categories/", "/tags/"];

/// `https://host/a/b` splits into 5 parts; anything shorter is a top-level page.
const MIN_ARTICLE_URL_PARTS: usize = 5;

/// Post identifier to the legacy URL it was published under.
pub type LegacyUrlIndex = BTreeMap<String, String>;

pub trait SitemapSource {
    fn fetch_sitemap(&self, url: &str) -> Result<String>;
}

pub struct HttpSitemapSource {
    client: Client,
}

impl HttpSitemapSource {
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
        })
    }
}

impl SitemapSource for HttpSitemapSource {
    fn fetch_sitemap(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/xml, text/xml;q=0.9, */*;q=0.1")
            .send()
            .with_context(|| format!("failed to fetch {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {} while fetching {}", status.as_u16(), url);
        }
        response.text().context("failed to read sitemap body")
    }
}

/// Collect the text of every `<url><loc>` pair bound to the sitemaps.org namespace.
pub fn parse_sitemap_locations(xml: &str) -> Result<Vec<String>> {
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut locations = Vec::new();
    let mut in_url = false;
    let mut in_loc = false;
    let mut current = String::new();
    loop {
        match reader
            .read_resolved_event()
            .context("failed to parse sitemap XML")?
        {
            (namespace, Event::Start(element)) if is_sitemap_namespace(&namespace) => {
                match element.local_name().as_ref() {
                    b"url" => in_url = true,
                    b"loc" if in_url => {
                        in_loc = true;
                        current.clear();
                    }
                    _ => {}
                }
            }
            (namespace, Event::End(element)) if is_sitemap_namespace(&namespace) => {
                match element.local_name().as_ref() {
                    b"loc" if in_loc => {
                        in_loc = false;
                        let location = current.trim();
                        if !location.is_empty() {
                            locations.push(location.to_string());
                        }
                    }
                    b"url" => in_url = false,
                    _ => {}
                }
            }
            (_, Event::Text(text)) if in_loc => {
                let unescaped = text
                    .unescape()
                    .context("invalid character data in sitemap <loc>")?;
                current.push_str(&unescaped);
            }
            (_, Event::CData(data)) if in_loc => {
                current.push_str(&String::from_utf8_lossy(&data.into_inner()));
            }
            (_, Event::Eof) => break,
            _ => {}
        }
    }
    Ok(locations)
}

pub fn is_article_url(url: &str) -> bool {
    NON_ARTICLE_FRAGMENTS
        .iter()
        .all(|fragment| !url.contains(fragment))
        && url.split('/').count() >= MIN_ARTICLE_URL_PARTS
}

/// Keep article URLs only, deduplicated and in sorted order.
pub fn filter_article_urls<I>(urls: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = String>,
{
    urls.into_iter().filter(|url| is_article_url(url)).collect()
}

/// The final path segment of a URL, ignoring one trailing slash run.
pub fn post_id_from_url(url: &str) -> Option<&str> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

/// Key URLs by post identifier. URLs arrive sorted, so when two URLs map to
/// the same identifier (`…/a` and `…/a/`) the first in sort order wins.
pub fn build_legacy_index(urls: &BTreeSet<String>) -> LegacyUrlIndex {
    let mut index = LegacyUrlIndex::new();
    for url in urls {
        if let Some(post_id) = post_id_from_url(url) {
            index
                .entry(post_id.to_string())
                .or_insert_with(|| url.clone());
        }
    }
    index
}

fn is_sitemap_namespace(namespace: &ResolveResult<'_>) -> bool {
    matches!(
        namespace,
        ResolveResult::Bound(Namespace(uri)) if *uri == SITEMAP_NAMESPACE.as_bytes()
    )
}
