use std::io;
use std::sync::LazyLock;
use std::time::Duration;

use camino::Utf8Path;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::Url;

use crate::domain::Accession;
use crate::error::GeoflatError;
use crate::layout::write_atomic_with;

/// Visible text of the anchor that points at the full-archive download.
pub const DOWNLOAD_LINK_MARKER: &str = "(http)";

const ACCESSION_PLACEHOLDER: &str = "{acc}";

static ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>").expect("anchor regex"));
static HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).expect("href regex")
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex"));

pub trait GeoClient: Send + Sync {
    fn fetch_page(&self, url: &Url) -> Result<String, GeoflatError>;
    /// Downloads `url` into `destination`, returning the number of bytes written.
    fn download(&self, url: &Url, destination: &Utf8Path) -> Result<u64, GeoflatError>;
}

#[derive(Clone)]
pub struct GeoHttpClient {
    client: Client,
}

impl GeoHttpClient {
    pub fn new() -> Result<Self, GeoflatError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("geoflat/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GeoflatError::Transport(err.to_string()))?,
        );
        // Archives can be large, so only the connect phase is bounded.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .redirect(Policy::limited(10))
            .build()
            .map_err(|err| GeoflatError::Transport(err.to_string()))?;
        Ok(Self { client })
    }

    fn get(&self, url: &Url) -> Result<reqwest::blocking::Response, GeoflatError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|err| GeoflatError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(GeoflatError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

impl GeoClient for GeoHttpClient {
    fn fetch_page(&self, url: &Url) -> Result<String, GeoflatError> {
        self.get(url)?
            .text()
            .map_err(|err| GeoflatError::Transport(err.to_string()))
    }

    fn download(&self, url: &Url, destination: &Utf8Path) -> Result<u64, GeoflatError> {
        let mut response = self.get(url)?;
        write_atomic_with(destination, |file| {
            io::copy(&mut response, file).map_err(|err| {
                GeoflatError::Transport(format!("download {url} into {destination}: {err}"))
            })
        })
    }
}

/// Builds the accession landing page URL from a base URL.
///
/// A base containing `{acc}` is treated as a template; any other base gets an
/// `acc=<accession>` query pair appended.
pub fn landing_page_url(base: &str, accession: &Accession) -> Result<Url, GeoflatError> {
    if base.contains(ACCESSION_PLACEHOLDER) {
        let filled = base.replace(ACCESSION_PLACEHOLDER, accession.as_str());
        return Url::parse(&filled)
            .map_err(|err| GeoflatError::InvalidUrl(format!("{filled}: {err}")));
    }
    let mut url =
        Url::parse(base).map_err(|err| GeoflatError::InvalidUrl(format!("{base}: {err}")))?;
    url.query_pairs_mut().append_pair("acc", accession.as_str());
    Ok(url)
}

/// Finds the first anchor whose visible text is exactly [`DOWNLOAD_LINK_MARKER`]
/// and resolves its `href` against the landing page URL.
pub fn extract_download_link(html: &str, page_url: &Url) -> Result<Url, GeoflatError> {
    let href = ANCHOR_RE
        .captures_iter(html)
        .find_map(|anchor| {
            let text = decode_entities(&TAG_RE.replace_all(&anchor[2], ""));
            if text != DOWNLOAD_LINK_MARKER {
                return None;
            }
            HREF_RE.captures(&anchor[1]).and_then(|attr| {
                attr.get(1)
                    .or_else(|| attr.get(2))
                    .or_else(|| attr.get(3))
                    .map(|value| decode_entities(value.as_str()))
            })
        })
        .ok_or_else(|| {
            GeoflatError::Resolution(format!(
                "expected download link not found: no {DOWNLOAD_LINK_MARKER} anchor on {page_url}"
            ))
        })?;

    let href = href.trim();
    page_url
        .join(href)
        .map_err(|err| GeoflatError::InvalidUrl(format!("{href}: {err}")))
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}
