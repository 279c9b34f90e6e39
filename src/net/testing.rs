//! Scripted in-process network for tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::client::Network;
use super::types::{Request, Response};

/// Serves canned responses by URL and records every request it sees.
///
/// Unknown URLs fail like an unreachable host; `set_offline(true)` makes
/// every request fail.
#[derive(Default)]
pub struct ScriptedNetwork {
  routes: Mutex<HashMap<String, Response>>,
  offline: AtomicBool,
  calls: Mutex<Vec<Request>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn offline() -> Self {
    let network = Self::default();
    network.set_offline(true);
    network
  }

  /// Serve `body` with status 200 at `url`.
  pub fn route(self, url: &str, body: &str) -> Self {
    self.route_response(url, Response::new(url, 200, body))
  }

  pub fn route_response(self, url: &str, response: Response) -> Self {
    self.routes.lock().unwrap().insert(url.to_string(), response);
    self
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.lock().unwrap().push(request.clone());

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("{} {} failed: network unreachable", request.method, request.url));
    }

    self
      .routes
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned()
      .ok_or_else(|| eyre!("{} {} failed: connection refused", request.method, request.url))
  }
}
