//! The offline cache agent.
//!
//! One `Agent` exists per registration. It is built once from the
//! configuration and handed by reference to every event handler:
//! - `install` precaches the asset list under the current identifier
//! - `activate` prunes every other cache generation
//! - `respond` serves GET requests cache-first with a shell fallback
//!
//! Handlers are wired to event kinds through the `Handlers` table in
//! `event`; the host drives them (see `crate::host`).

mod event;
mod interceptor;
mod lifecycle;

pub use event::{
  handle_activate, handle_fetch, handle_install, EventKind, ExtendableEvent, FetchEvent,
  Handlers,
};
pub use lifecycle::ActivateReport;

use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

use crate::cache::CacheStorage;
use crate::config::Config;
use crate::net::{cache_key, resolve_url, Network};

/// Requests the agent makes of its host outside of any single event.
#[derive(Debug, Default)]
pub struct ScopeSignals {
  skip_waiting: AtomicBool,
  claim_clients: AtomicBool,
}

impl ScopeSignals {
  /// Ask to activate as soon as install finishes.
  pub fn skip_waiting(&self) {
    self.skip_waiting.store(true, Ordering::SeqCst);
  }

  /// Ask to take control of already-open clients.
  pub fn claim(&self) {
    self.claim_clients.store(true, Ordering::SeqCst);
  }

  pub fn waiting_skipped(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  pub fn clients_claimed(&self) -> bool {
    self.claim_clients.load(Ordering::SeqCst)
  }
}

/// Agent state: the current cache identifier and what it must contain.
pub struct Agent<S, N> {
  cache_name: String,
  origin: Url,
  assets: Vec<Url>,
  shell_key: String,
  storage: Arc<S>,
  network: Arc<N>,
  scope: ScopeSignals,
}

impl<S: CacheStorage, N: Network> Agent<S, N> {
  /// Build an agent. Relative assets and the shell resolve against `origin`.
  pub fn new(
    cache_name: impl Into<String>,
    origin: Url,
    assets: &[String],
    shell: &str,
    storage: Arc<S>,
    network: Arc<N>,
  ) -> Result<Self> {
    let assets = assets
      .iter()
      .map(|raw| resolve_url(&origin, raw))
      .collect::<Result<Vec<_>>>()?;
    let shell_key = cache_key(&resolve_url(&origin, shell)?);

    Ok(Self {
      cache_name: cache_name.into(),
      origin,
      assets,
      shell_key,
      storage,
      network,
      scope: ScopeSignals::default(),
    })
  }

  pub fn from_config(config: &Config, storage: Arc<S>, network: Arc<N>) -> Result<Self> {
    Self::new(
      config.cache.name.clone(),
      config.origin.clone(),
      &config.cache.assets,
      &config.cache.shell,
      storage,
      network,
    )
  }

  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  pub fn assets(&self) -> &[Url] {
    &self.assets
  }

  pub fn shell_key(&self) -> &str {
    &self.shell_key
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn network(&self) -> &N {
    &self.network
  }

  pub fn scope(&self) -> &ScopeSignals {
    &self.scope
  }

  /// Resolve a request URL against the origin.
  pub fn resolve(&self, raw: &str) -> Result<Url> {
    resolve_url(&self.origin, raw)
  }
}
