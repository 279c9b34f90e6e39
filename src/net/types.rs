//! HTTP-shaped request and response descriptors.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// Resolve a possibly-relative URL against the registration origin.
///
/// Absolute URLs (e.g. CDN assets) pass through unchanged.
pub fn resolve_url(origin: &Url, raw: &str) -> Result<Url> {
  origin
    .join(raw.trim())
    .map_err(|e| eyre!("Invalid URL '{}' (origin {}): {}", raw, origin, e))
}

/// Key under which a response for `url` is stored.
///
/// Fragments never reach the server, so they are not part of the key.
pub fn cache_key(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.into()
}

/// An outbound request as seen at the interception boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self { method, url }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET
  }

  pub fn cache_key(&self) -> String {
    cache_key(&self.url)
  }
}

/// A complete response: status line, headers and the buffered body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  /// Final URL the response was served from
  pub url: String,
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  /// Build a response with no headers.
  pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
    let status_text = reqwest::StatusCode::from_u16(status)
      .ok()
      .and_then(|s| s.canonical_reason())
      .unwrap_or_default()
      .to_string();

    Self {
      url: url.into(),
      status,
      status_text,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// True for 2xx statuses.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}
