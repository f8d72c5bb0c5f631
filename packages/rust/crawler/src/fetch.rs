//! Single-page fetcher: HTTP GET, private-host guard, and parse into a
//! [`PageRecord`].

use std::net::IpAddr;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use intelgraph_shared::{CrawlConfig, IntelError, PageRecord, Result};

use crate::content::parse_page;

/// Fetches pages with a shared HTTP client.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    max_links: usize,
    allow_private_hosts: bool,
}

impl Fetcher {
    /// Build a fetcher whose requests time out after `timeout`.
    pub fn new(user_agent: &str, timeout: Duration, max_links: usize) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| IntelError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_links,
            allow_private_hosts: false,
        })
    }

    pub fn from_config(config: &CrawlConfig) -> Result<Self> {
        Ok(Self::new(&config.user_agent, config.fetch_timeout, config.max_links_per_page)?
            .allow_private_hosts(config.allow_private_hosts))
    }

    /// Permit loopback/private targets (local mock servers).
    pub fn allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    /// Fetch and parse one URL. Never fails: problems land in
    /// [`PageRecord::error`].
    pub async fn fetch(&self, url: &Url, depth: u32, user_agent: Option<&str>) -> PageRecord {
        match self.try_fetch(url, depth, user_agent).await {
            Ok(record) => record,
            Err((status, e)) => {
                debug!(%url, error = %e, "fetch failed");
                PageRecord::failed(url.as_str(), depth, status, e.to_string())
            }
        }
    }

    async fn try_fetch(
        &self,
        url: &Url,
        depth: u32,
        user_agent: Option<&str>,
    ) -> std::result::Result<PageRecord, (Option<u16>, IntelError)> {
        if !self.allow_private_hosts && is_private_target(url) {
            return Err((
                None,
                IntelError::validation(format!("{url}: private or non-http target refused")),
            ));
        }

        debug!(%url, depth, "fetching page");

        let mut request = self.client.get(url.as_str());
        if let Some(ua) = user_agent {
            request = request.header(USER_AGENT, ua);
        }
        let response = request
            .send()
            .await
            .map_err(|e| (None, IntelError::Network(format!("{url}: {e}"))))?;

        let status = response.status();
        let status_code = Some(status.as_u16());
        if !status.is_success() {
            return Err((status_code, IntelError::Network(format!("{url}: HTTP {status}"))));
        }

        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_none_or(|ct| ct.contains("html") || ct.starts_with("text/"));
        if !is_html {
            return Err((status_code, IntelError::parse(format!("{url}: not an HTML document"))));
        }

        let body = response.text().await.map_err(|e| {
            (
                status_code,
                IntelError::Network(format!("{url}: body read failed: {e}")),
            )
        })?;

        let parsed = parse_page(&body, url, self.max_links);

        Ok(PageRecord {
            url: url.to_string(),
            depth,
            status_code,
            title: parsed.title,
            content: parsed.content,
            links: parsed.links,
            content_hash: Some(compute_hash(&body)),
            fetched_at: Utc::now(),
            error: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Private-host guard
// ---------------------------------------------------------------------------

/// Check if a URL targets a loopback, private, or non-http resource.
pub fn is_private_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

/// Compute SHA-256 hash of content.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
