//! URL manipulation utilities.
//!
//! Helpers for grouping source URLs by host, normalizing URLs into stable
//! cache identities, and mapping URLs onto provider directory names.

use anyhow::{Result, anyhow};
use url::Url;

const HTTPS_PREFIX: &str = "https://";
const HTTP_PREFIX: &str = "http://";
const WWW_PREFIX: &str = "www.";

/// Derive the network location of a URL, even when it has no scheme.
///
/// Relative URLs (starting with `/`) take the domain of `base`, which must
/// itself be absolute. Scheme-less URLs use everything before the first `/`.
pub fn derive_domain(url: &str, base: Option<&str>) -> Result<String> {
    if let Ok(parsed) = Url::parse(url)
        && let Some(host) = parsed.host_str()
    {
        return Ok(match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        });
    }

    let first = url.chars().next().ok_or_else(|| anyhow!("Invalid URL: {url:?}"))?;

    if first == '/' {
        let base = base
            .filter(|b| !b.is_empty())
            .ok_or_else(|| anyhow!("Base is required for relative URL: {url}"))?;
        if base.starts_with('/') {
            return Err(anyhow!("Base may not be relative: {base}"));
        }
        return derive_domain(base, None);
    }

    match url.find('/') {
        Some(index) if index > 0 => Ok(url[..index].to_string()),
        _ => Ok(url.to_string()),
    }
}

/// Normalize URL for consistent identity across different representations.
///
/// Handles:
/// - Lowercase scheme and host
/// - Remove default ports (80, 443)
/// - Remove trailing slash from path (unless root)
/// - Remove fragment
pub fn normalize_url(url: &str) -> String {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return url.to_string(),
    };

    let mut normalized = String::with_capacity(url.len());

    normalized.push_str(parsed.scheme());
    normalized.push_str("://");

    if let Some(host) = parsed.host_str() {
        normalized.push_str(host);
    }

    // Url::port() already omits the scheme's default port
    if let Some(port) = parsed.port() {
        normalized.push(':');
        normalized.push_str(&port.to_string());
    }

    let path = parsed.path();
    if path.len() > 1 && path.ends_with('/') {
        normalized.push_str(&path[..path.len() - 1]);
    } else if path.is_empty() {
        normalized.push('/');
    } else {
        normalized.push_str(path);
    }

    if let Some(query) = parsed.query() {
        normalized.push('?');
        normalized.push_str(query);
    }

    normalized
}

/// Resolve a possibly relative URL against the page it was found on.
pub fn resolve_url(url: &str, base: &str) -> String {
    match Url::parse(url) {
        Ok(_) => url.to_string(),
        Err(_) => Url::parse(base)
            .and_then(|b| b.join(url))
            .map(|joined| joined.to_string())
            .unwrap_or_else(|_| url.to_string()),
    }
}

/// Clip a URL down to host and path: no scheme, no leading `www.`,
/// no query string and no trailing slash.
#[must_use]
pub fn clip_url(url: &str) -> &str {
    let mut start = if url.starts_with(HTTPS_PREFIX) {
        HTTPS_PREFIX.len()
    } else if url.starts_with(HTTP_PREFIX) {
        HTTP_PREFIX.len()
    } else {
        0
    };
    if url[start..].starts_with(WWW_PREFIX) {
        start += WWW_PREFIX.len();
    }

    let mut end = url.find('?').unwrap_or(url.len());
    if end > start && url[..end].ends_with('/') {
        end -= 1;
    }
    if end < start {
        return "";
    }
    &url[start..end]
}

/// Provider directory components for a URL, from the host down.
///
/// The host has its dots replaced by underscores, so
/// `https://www.academic.oup.com/journals/x` yields
/// `["academic_oup_com", "journals", "x"]`.
#[must_use]
pub fn directory_components(url: &str) -> Vec<String> {
    let clipped = clip_url(url);
    let mut parts = clipped.split('/');
    let host = parts.next().unwrap_or_default().replace('.', "_");
    std::iter::once(host)
        .chain(parts.filter(|p| !p.is_empty()).map(str::to_string))
        .collect()
}
