//! Request interception policy: cache first, then network, then shell.

use color_eyre::Result;
use tracing::{debug, warn};

use super::Agent;
use crate::cache::{CacheStorage, Served};
use crate::net::{Network, Request};

impl<S: CacheStorage, N: Network> Agent<S, N> {
  /// Whether this request is the agent's to answer. Only GET is.
  pub fn intercepts(&self, request: &Request) -> bool {
    request.is_get()
  }

  /// Resolve an intercepted GET request.
  ///
  /// 1. Any cached entry for the URL, in any cache generation, wins outright
  /// 2. Otherwise the network answers; its response is not written back
  /// 3. If the network fails, the cached shell stands in
  /// 4. With no shell either, the network error is returned
  ///
  /// Never writes to the cache store.
  pub async fn respond(&self, request: &Request) -> Result<Served> {
    let key = request.cache_key();

    if let Some(cached) = self.storage.match_any(&key)? {
      debug!(
        url = %key,
        cache = %cached.cache_name,
        cached_at = %cached.cached_at,
        "Serving from cache"
      );
      return Ok(Served::from_cache(cached));
    }

    let err = match self.network.fetch(request).await {
      Ok(response) => {
        debug!(url = %key, status = response.status, "Serving from network");
        return Ok(Served::from_network(response));
      }
      Err(e) => e,
    };

    match self.storage.match_any(&self.shell_key) {
      Ok(Some(shell)) => {
        warn!(url = %key, error = %err, "Network failed, serving cached shell");
        Ok(Served::shell_fallback(shell))
      }
      Ok(None) => Err(err),
      Err(lookup) => {
        warn!(url = %key, error = %lookup, "Shell lookup failed");
        Err(err)
      }
    }
  }
}
