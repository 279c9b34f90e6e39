use color_eyre::{eyre::eyre, Result};
use reqwest::header::HeaderMap;
use std::future::Future;
use std::time::Duration;

use super::types::{Request, Response};

/// Something that can perform a live network request.
///
/// Only transport-level failures are errors: an HTTP error status is
/// still a successful fetch and comes back as a `Response`.
pub trait Network: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// reqwest-backed network access.
/// Clone is cheap - the inner client shares its connection pool.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  /// Create a client. With `timeout` unset, requests may wait indefinitely.
  pub fn new(timeout: Option<Duration>) -> Result<Self> {
    let mut builder =
      reqwest::Client::builder().user_agent(concat!("offcache/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("{} {} failed: {}", request.method, request.url, e))?;

    let status = response.status();
    let url = response.url().to_string();
    let headers = header_pairs(response.headers());

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      url,
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
    })
  }
}

/// Flatten a header map in wire order. Values that are not valid UTF-8
/// are kept with the bad bytes replaced.
fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
  headers
    .iter()
    .map(|(name, value)| {
      (
        name.as_str().to_string(),
        String::from_utf8_lossy(value.as_bytes()).into_owned(),
      )
    })
    .collect()
}
