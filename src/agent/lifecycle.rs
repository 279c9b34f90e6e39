//! Install and activate: populate the current cache, prune the rest.

use color_eyre::{eyre::eyre, eyre::WrapErr, Result};
use futures::future::{join_all, try_join_all};
use tracing::{debug, info, warn};

use super::Agent;
use crate::cache::{CacheEntry, CacheStorage};
use crate::net::{Network, Request};

/// What activation did to the stale cache set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
  /// Stale identifiers removed
  pub deleted: Vec<String>,
  /// Stale identifiers whose deletion failed (left in place)
  pub failed: Vec<String>,
}

impl<S: CacheStorage, N: Network> Agent<S, N> {
  /// Fetch every asset and store them under the current identifier.
  ///
  /// All or nothing: if any fetch fails or returns a non-2xx status,
  /// nothing is written and the cache is not created.
  pub async fn install(&self) -> Result<usize> {
    info!(cache = %self.cache_name, assets = self.assets.len(), "Installing");

    let fetches = self.assets.iter().map(|url| {
      let request = Request::get(url.clone());
      async move {
        let response = self.network.fetch(&request).await?;
        if !response.ok() {
          return Err(eyre!(
            "{} responded {} {}",
            request.url,
            response.status,
            response.status_text
          ));
        }
        debug!(url = %request.url, bytes = response.body.len(), "Fetched asset");

        Ok(CacheEntry {
          key: request.cache_key(),
          response,
        })
      }
    });

    let entries = try_join_all(fetches)
      .await
      .wrap_err_with(|| format!("Failed to precache {}", self.cache_name))?;

    self.storage.put_all(&self.cache_name, &entries)?;

    info!(cache = %self.cache_name, entries = entries.len(), "Installed");
    Ok(entries.len())
  }

  /// Delete every cache other than the current one.
  ///
  /// Deletions run concurrently and are best-effort: a failed delete is
  /// logged and reported, never retried, and does not fail activation.
  pub async fn activate(&self) -> Result<ActivateReport> {
    let stale: Vec<String> = self
      .storage
      .keys()?
      .into_iter()
      .filter(|name| name != &self.cache_name)
      .collect();

    let deletions = stale.iter().map(|name| async move {
      (name.clone(), self.storage.delete(name))
    });

    let mut report = ActivateReport::default();
    for (name, outcome) in join_all(deletions).await {
      match outcome {
        Ok(true) => {
          debug!(cache = %name, "Deleted stale cache");
          report.deleted.push(name);
        }
        // Already gone; nothing left to prune
        Ok(false) => {}
        Err(e) => {
          warn!(cache = %name, error = %e, "Failed to delete stale cache");
          report.failed.push(name);
        }
      }
    }

    info!(
      cache = %self.cache_name,
      deleted = report.deleted.len(),
      failed = report.failed.len(),
      "Activated"
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::super::fixtures::*;
  use crate::cache::{CacheEntry, CacheStorage, CachedResponse, EntrySummary, SqliteStorage};
  use crate::net::testing::ScriptedNetwork;
  use crate::net::Response;
  use color_eyre::{eyre::eyre, Result};
  use std::sync::Arc;

  const ASSETS: &[&str] = &["/", "/static/manifest.json", "https://cdn.example.com/cal.css"];

  fn online() -> ScriptedNetwork {
    ScriptedNetwork::new()
      .route(&absolute("/"), "<html>shell</html>")
      .route(&absolute("/static/manifest.json"), "{}")
      .route("https://cdn.example.com/cal.css", "body{}")
  }

  #[tokio::test]
  async fn test_install_stores_every_asset() {
    let agent = agent(ASSETS, online());

    assert_eq!(agent.install().await.unwrap(), 3);

    for asset in agent.assets() {
      let hit = agent
        .storage()
        .match_in("shell-cache-v1", asset.as_str())
        .unwrap();
      assert!(hit.is_some(), "missing {}", asset);
    }
    let shell = agent.storage().match_any(agent.shell_key()).unwrap().unwrap();
    assert_eq!(shell.response.text(), "<html>shell</html>");
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing_on_unreachable_asset() {
    let network = ScriptedNetwork::new()
      .route(&absolute("/"), "<html>shell</html>")
      .route(&absolute("/static/manifest.json"), "{}");
    let agent = agent(ASSETS, network);

    let err = agent.install().await.unwrap_err();
    assert!(format!("{:#}", err).contains("cdn.example.com"));

    assert!(!agent.storage().has("shell-cache-v1").unwrap());
    assert!(agent.storage().keys().unwrap().is_empty());
    assert!(agent.storage().match_any(&absolute("/")).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let network = online().route_response(
      &absolute("/static/manifest.json"),
      Response::new(absolute("/static/manifest.json"), 404, "not found"),
    );
    let agent = agent(ASSETS, network);

    assert!(agent.install().await.is_err());
    assert!(agent.storage().keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_activate_prunes_stale_caches() {
    let agent = agent(ASSETS, online());
    agent.storage().put_all("shell-cache-v0", &[]).unwrap();
    agent.storage().put_all("unrelated", &[]).unwrap();
    agent.install().await.unwrap();

    let report = agent.activate().await.unwrap();

    assert_eq!(report.deleted.len(), 2);
    assert!(report.failed.is_empty());
    assert_eq!(agent.storage().keys().unwrap(), vec!["shell-cache-v1"]);
  }

  #[tokio::test]
  async fn test_activate_without_stale_caches_is_a_no_op() {
    let agent = agent(ASSETS, online());
    agent.install().await.unwrap();

    let report = agent.activate().await.unwrap();
    assert_eq!(report, Default::default());
    assert_eq!(agent.storage().keys().unwrap(), vec!["shell-cache-v1"]);
  }

  /// Wraps a store and refuses to delete one named cache.
  struct StubbornStorage {
    inner: SqliteStorage,
    undeletable: &'static str,
  }

  impl CacheStorage for StubbornStorage {
    fn has(&self, cache: &str) -> Result<bool> {
      self.inner.has(cache)
    }
    fn keys(&self) -> Result<Vec<String>> {
      self.inner.keys()
    }
    fn put_all(&self, cache: &str, entries: &[CacheEntry]) -> Result<()> {
      self.inner.put_all(cache, entries)
    }
    fn match_in(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>> {
      self.inner.match_in(cache, key)
    }
    fn match_any(&self, key: &str) -> Result<Option<CachedResponse>> {
      self.inner.match_any(key)
    }
    fn delete(&self, cache: &str) -> Result<bool> {
      if cache == self.undeletable {
        return Err(eyre!("database is locked"));
      }
      self.inner.delete(cache)
    }
    fn entries(&self, cache: &str) -> Result<Vec<EntrySummary>> {
      self.inner.entries(cache)
    }
  }

  #[tokio::test]
  async fn test_activate_ignores_failed_deletions() {
    let storage = StubbornStorage {
      inner: SqliteStorage::open_in_memory().unwrap(),
      undeletable: "v-locked",
    };
    storage.put_all("v-locked", &[]).unwrap();
    storage.put_all("v-old", &[]).unwrap();

    let assets: Vec<String> = vec!["/".into()];
    let agent = crate::agent::Agent::new(
      "shell-cache-v1",
      url::Url::parse(ORIGIN).unwrap(),
      &assets,
      "/",
      Arc::new(storage),
      Arc::new(ScriptedNetwork::new().route(&absolute("/"), "shell")),
    )
    .unwrap();
    agent.install().await.unwrap();

    let report = agent.activate().await.unwrap();

    assert_eq!(report.deleted, vec!["v-old".to_string()]);
    assert_eq!(report.failed, vec!["v-locked".to_string()]);
    assert_eq!(
      agent.storage().keys().unwrap(),
      vec!["v-locked".to_string(), "shell-cache-v1".to_string()]
    );
  }
}
