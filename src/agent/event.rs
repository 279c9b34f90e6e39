//! Events the host delivers to the agent, and the table that routes them.
//!
//! Handlers are plain functions. They run synchronously and hand any
//! asynchronous work back to the host through the event itself:
//! `ExtendableEvent::wait_until` for lifecycle work, and
//! `FetchEvent::respond_with` for a response. The host must `settle()`
//! an extendable event before treating it as handled.

use color_eyre::{eyre::eyre, Result};
use futures::future::{join_all, BoxFuture};
use std::future::Future;

use super::Agent;
use crate::cache::{CacheStorage, Served};
use crate::net::{Network, Request};

/// Event kinds a handler can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Install,
  Activate,
  Fetch,
}

impl std::fmt::Display for EventKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      EventKind::Install => write!(f, "install"),
      EventKind::Activate => write!(f, "activate"),
      EventKind::Fetch => write!(f, "fetch"),
    }
  }
}

/// Completion token for a lifecycle event.
///
/// The event is not finished until every future passed to `wait_until`
/// has finished, and it fails if any of them failed.
pub struct ExtendableEvent<'a> {
  kind: EventKind,
  extensions: Vec<BoxFuture<'a, Result<()>>>,
}

impl<'a> ExtendableEvent<'a> {
  pub fn new(kind: EventKind) -> Self {
    Self {
      kind,
      extensions: Vec::new(),
    }
  }

  pub fn kind(&self) -> EventKind {
    self.kind
  }

  /// Keep the event open until `work` completes.
  pub fn wait_until<F>(&mut self, work: F)
  where
    F: Future<Output = Result<()>> + Send + 'a,
  {
    self.extensions.push(Box::pin(work));
  }

  pub fn is_extended(&self) -> bool {
    !self.extensions.is_empty()
  }

  /// Drive every extension to completion; the first failure wins.
  pub async fn settle(self) -> Result<()> {
    let kind = self.kind;
    join_all(self.extensions)
      .await
      .into_iter()
      .collect::<Result<Vec<()>>>()
      .map(|_| ())
      .map_err(|e| e.wrap_err(format!("{} event failed", kind)))
  }
}

/// An intercepted request, optionally answered by the handler.
pub struct FetchEvent<'a> {
  request: Request,
  response: Option<BoxFuture<'a, Result<Served>>>,
}

impl<'a> FetchEvent<'a> {
  pub fn new(request: Request) -> Self {
    Self {
      request,
      response: None,
    }
  }

  pub fn request(&self) -> &Request {
    &self.request
  }

  /// Take over the response. May be called at most once.
  pub fn respond_with<F>(&mut self, response: F) -> Result<()>
  where
    F: Future<Output = Result<Served>> + Send + 'a,
  {
    if self.response.is_some() {
      return Err(eyre!("respond_with called twice for {}", self.request.url));
    }
    self.response = Some(Box::pin(response));
    Ok(())
  }

  /// The handler's response, or `None` if the request was left alone.
  pub fn into_response(self) -> Option<BoxFuture<'a, Result<Served>>> {
    self.response
  }
}

pub type LifecycleHandler<S, N> = for<'a> fn(&'a Agent<S, N>, &mut ExtendableEvent<'a>) -> Result<()>;
pub type FetchHandler<S, N> = for<'a> fn(&'a Agent<S, N>, &mut FetchEvent<'a>) -> Result<()>;

/// Dispatch table: at most one handler per event kind.
pub struct Handlers<S, N> {
  install: Option<LifecycleHandler<S, N>>,
  activate: Option<LifecycleHandler<S, N>>,
  fetch: Option<FetchHandler<S, N>>,
}

impl<S, N> Default for Handlers<S, N> {
  fn default() -> Self {
    Self {
      install: None,
      activate: None,
      fetch: None,
    }
  }
}

impl<S: CacheStorage, N: Network> Handlers<S, N> {
  /// The offline shell agent: precache, prune, serve cache-first.
  pub fn offline_shell() -> Self {
    Self::default()
      .on_install(handle_install)
      .on_activate(handle_activate)
      .on_fetch(handle_fetch)
  }

  pub fn on_install(mut self, handler: LifecycleHandler<S, N>) -> Self {
    self.install = Some(handler);
    self
  }

  pub fn on_activate(mut self, handler: LifecycleHandler<S, N>) -> Self {
    self.activate = Some(handler);
    self
  }

  pub fn on_fetch(mut self, handler: FetchHandler<S, N>) -> Self {
    self.fetch = Some(handler);
    self
  }

  /// Handler for a lifecycle event kind. `Fetch` has none here.
  pub fn lifecycle(&self, kind: EventKind) -> Option<LifecycleHandler<S, N>> {
    match kind {
      EventKind::Install => self.install,
      EventKind::Activate => self.activate,
      EventKind::Fetch => None,
    }
  }

  pub fn fetch(&self) -> Option<FetchHandler<S, N>> {
    self.fetch
  }

  pub fn handles(&self, kind: EventKind) -> bool {
    match kind {
      EventKind::Fetch => self.fetch.is_some(),
      _ => self.lifecycle(kind).is_some(),
    }
  }
}

/// Precache the asset list, then ask to skip the waiting phase.
pub fn handle_install<'a, S: CacheStorage, N: Network>(
  agent: &'a Agent<S, N>,
  event: &mut ExtendableEvent<'a>,
) -> Result<()> {
  event.wait_until(async move { agent.install().await.map(|_| ()) });
  agent.scope().skip_waiting();
  Ok(())
}

/// Prune stale caches, then claim open clients.
pub fn handle_activate<'a, S: CacheStorage, N: Network>(
  agent: &'a Agent<S, N>,
  event: &mut ExtendableEvent<'a>,
) -> Result<()> {
  event.wait_until(async move { agent.activate().await.map(|_| ()) });
  agent.scope().claim();
  Ok(())
}

/// Answer GET requests; leave everything else to the network.
pub fn handle_fetch<'a, S: CacheStorage, N: Network>(
  agent: &'a Agent<S, N>,
  event: &mut FetchEvent<'a>,
) -> Result<()> {
  if !agent.intercepts(event.request()) {
    return Ok(());
  }

  let request = event.request().clone();
  event.respond_with(async move { agent.respond(&request).await })
}
