//! Host side of a registration: runs the agent's lifecycle and routes
//! requests to it once it controls clients.

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, error, info, warn};

use crate::agent::{Agent, EventKind, ExtendableEvent, FetchEvent, Handlers};
use crate::cache::{CacheStorage, Served};
use crate::net::{Network, Request};

/// Lifecycle state of the registered agent version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
  /// Registered, no events delivered yet
  Parsed,
  Installing,
  /// Installed but waiting for the previous version to let go
  Installed,
  Activating,
  Activated,
  /// Install failed; this version will never run
  Redundant,
}

pub struct Registration<S, N> {
  agent: Agent<S, N>,
  handlers: Handlers<S, N>,
  state: AgentState,
  controlling: bool,
}

impl<S: CacheStorage, N: Network> Registration<S, N> {
  pub fn new(agent: Agent<S, N>, handlers: Handlers<S, N>) -> Self {
    Self {
      agent,
      handlers,
      state: AgentState::Parsed,
      controlling: false,
    }
  }

  pub fn agent(&self) -> &Agent<S, N> {
    &self.agent
  }

  pub fn state(&self) -> AgentState {
    self.state
  }

  /// Whether fetches are currently routed through the agent.
  pub fn controls_clients(&self) -> bool {
    self.state == AgentState::Activated && self.controlling
  }

  /// Bring this version up.
  ///
  /// A version whose cache already exists was installed by an earlier run.
  /// It skips install but still receives the activate event, so a run that
  /// stopped before pruning finishes the job. Otherwise it is installed,
  /// then activated at once if it asked to skip waiting.
  pub async fn start(&mut self) -> Result<AgentState> {
    if self.state == AgentState::Parsed && self.agent.storage().has(self.agent.cache_name())? {
      info!(cache = %self.agent.cache_name(), "Resuming installed version");
      self.state = AgentState::Installed;
      self.activate().await?;
      return Ok(self.state);
    }

    self.install().await?;

    if self.agent.scope().waiting_skipped() {
      self.activate().await?;
    } else {
      info!(cache = %self.agent.cache_name(), "Installed, waiting to activate");
    }

    Ok(self.state)
  }

  /// Deliver the install event. Failure makes this version redundant.
  pub async fn install(&mut self) -> Result<()> {
    if self.state != AgentState::Parsed {
      return Err(eyre!("Cannot install from state {:?}", self.state));
    }

    self.state = AgentState::Installing;
    match self.dispatch_lifecycle(EventKind::Install).await {
      Ok(()) => {
        self.state = AgentState::Installed;
        Ok(())
      }
      Err(e) => {
        error!(cache = %self.agent.cache_name(), error = %e, "Install failed");
        self.state = AgentState::Redundant;
        Err(e)
      }
    }
  }

  /// Deliver the activate event. Its failure is logged, not fatal.
  pub async fn activate(&mut self) -> Result<()> {
    if self.state != AgentState::Installed {
      return Err(eyre!("Cannot activate from state {:?}", self.state));
    }

    self.state = AgentState::Activating;
    if let Err(e) = self.dispatch_lifecycle(EventKind::Activate).await {
      warn!(cache = %self.agent.cache_name(), error = %e, "Activate handler failed");
    }

    self.state = AgentState::Activated;
    self.controlling = self.agent.scope().clients_claimed();
    Ok(())
  }

  async fn dispatch_lifecycle(&self, kind: EventKind) -> Result<()> {
    let Some(handler) = self.handlers.lifecycle(kind) else {
      debug!(event = %kind, "No handler registered");
      return Ok(());
    };

    let mut event = ExtendableEvent::new(kind);
    handler(&self.agent, &mut event)?;
    debug!(event = %event.kind(), extended = event.is_extended(), "Settling event");
    event.settle().await
  }

  /// Route one outbound request.
  ///
  /// Requests go to the agent's fetch handler while it controls clients;
  /// anything it does not answer goes to the network untouched.
  pub async fn handle_fetch(&self, request: Request) -> Result<Served> {
    if !self.controls_clients() {
      return self.pass_through(&request).await;
    }
    let Some(handler) = self.handlers.fetch() else {
      return self.pass_through(&request).await;
    };

    let mut event = FetchEvent::new(request.clone());
    if let Err(e) = handler(&self.agent, &mut event) {
      warn!(url = %request.url, error = %e, "Fetch handler failed");
    }

    match event.into_response() {
      Some(response) => response.await,
      None => self.pass_through(&request).await,
    }
  }

  async fn pass_through(&self, request: &Request) -> Result<Served> {
    debug!(method = %request.method, url = %request.url, "Passing through to network");
    let response = self.agent.network().fetch(request).await?;
    Ok(Served::from_network(response))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::agent::fixtures::*;
  use crate::cache::{CacheEntry, ResponseSource, SqliteStorage};
  use crate::net::testing::ScriptedNetwork;
  use crate::net::Response;
  use reqwest::Method;
  use url::Url;

  type TestRegistration = Registration<SqliteStorage, ScriptedNetwork>;

  const ASSETS: &[&str] = &["/", "/static/manifest.json"];

  fn online() -> ScriptedNetwork {
    ScriptedNetwork::new()
      .route(&absolute("/"), "<html>shell</html>")
      .route(&absolute("/static/manifest.json"), "{}")
      .route(&absolute("/api/data"), "live")
      .route(&absolute("/process"), "processed")
  }

  fn registration(network: ScriptedNetwork) -> TestRegistration {
    Registration::new(agent(ASSETS, network), Handlers::offline_shell())
  }

  fn request(method: Method, path: &str) -> Request {
    Request::new(method, Url::parse(&absolute(path)).unwrap())
  }

  #[tokio::test]
  async fn test_start_installs_and_activates() {
    let mut reg = registration(online());
    reg.agent().storage().put_all("k-crm-v0", &[]).unwrap();

    assert_eq!(reg.start().await.unwrap(), AgentState::Activated);
    assert!(reg.controls_clients());
    assert_eq!(reg.agent().storage().keys().unwrap(), vec!["shell-cache-v1"]);
  }

  #[tokio::test]
  async fn test_failed_install_is_redundant_and_keeps_old_version() {
    let network = ScriptedNetwork::new().route(&absolute("/"), "<html>shell</html>");
    let mut reg = registration(network);
    reg.agent().storage().put_all("k-crm-v0", &[]).unwrap();

    assert!(reg.start().await.is_err());
    assert_eq!(reg.state(), AgentState::Redundant);
    assert!(!reg.controls_clients());
    assert_eq!(reg.agent().storage().keys().unwrap(), vec!["k-crm-v0"]);
  }

  #[tokio::test]
  async fn test_waits_without_skip_waiting() {
    // Installs without asking to skip waiting
    fn install_only<'a>(
      agent: &'a Agent<SqliteStorage, ScriptedNetwork>,
      event: &mut ExtendableEvent<'a>,
    ) -> Result<()> {
      event.wait_until(async move { agent.install().await.map(|_| ()) });
      Ok(())
    }

    let mut reg = Registration::new(
      agent(ASSETS, online()),
      Handlers::default().on_install(install_only),
    );

    assert_eq!(reg.start().await.unwrap(), AgentState::Installed);
    assert!(!reg.controls_clients());

    reg.activate().await.unwrap();
    assert_eq!(reg.state(), AgentState::Activated);
    // Never claimed, so open clients stay uncontrolled
    assert!(!reg.controls_clients());
  }

  #[tokio::test]
  async fn test_resume_skips_install() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .put_all(
        "shell-cache-v1",
        &[CacheEntry {
          key: absolute("/"),
          response: Response::new(absolute("/"), 200, "S"),
        }],
      )
      .unwrap();
    let mut reg = Registration::new(
      agent_with_storage(ASSETS, ScriptedNetwork::offline(), storage),
      Handlers::offline_shell(),
    );

    assert_eq!(reg.start().await.unwrap(), AgentState::Activated);
    assert!(reg.controls_clients());
    assert_eq!(reg.agent().network().call_count(), 0);

    let served = reg.handle_fetch(request(Method::GET, "/unknown")).await.unwrap();
    assert_eq!(served.source, ResponseSource::ShellFallback);
    assert_eq!(served.response.text(), "S");
  }

  #[tokio::test]
  async fn test_resume_prunes_stale_generation() {
    let entry = |body: &str| CacheEntry {
      key: absolute("/"),
      response: Response::new(absolute("/"), 200, body),
    };
    // Left behind by a run that stopped between install and activate
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put_all("k-crm-v0", &[entry("OLD")]).unwrap();
    storage.put_all("shell-cache-v1", &[entry("NEW")]).unwrap();
    let mut reg = Registration::new(
      agent_with_storage(ASSETS, ScriptedNetwork::offline(), storage),
      Handlers::offline_shell(),
    );

    assert_eq!(reg.start().await.unwrap(), AgentState::Activated);
    assert_eq!(reg.agent().storage().keys().unwrap(), vec!["shell-cache-v1"]);

    let served = reg.handle_fetch(request(Method::GET, "/")).await.unwrap();
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.text(), "NEW");
  }

  #[tokio::test]
  async fn test_post_always_reaches_network() {
    let mut reg = registration(online());
    reg.start().await.unwrap();
    // Even a cached URL is not served from cache for POST
    reg
      .agent()
      .storage()
      .put_all(
        "shell-cache-v1",
        &[CacheEntry {
          key: absolute("/process"),
          response: Response::new(absolute("/process"), 200, "cached"),
        }],
      )
      .unwrap();
    let before = reg.agent().network().call_count();

    let served = reg.handle_fetch(request(Method::POST, "/process")).await.unwrap();

    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.text(), "processed");
    let calls = reg.agent().network().calls();
    assert_eq!(calls.len(), before + 1);
    assert_eq!(calls.last().unwrap().method, Method::POST);
  }

  #[tokio::test]
  async fn test_get_is_cache_first_after_activation() {
    let mut reg = registration(online());
    reg.start().await.unwrap();
    reg.agent().network().set_offline(true);

    let served = reg.handle_fetch(request(Method::GET, "/static/manifest.json")).await.unwrap();
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.text(), "{}");
  }

  #[tokio::test]
  async fn test_uncontrolled_requests_bypass_agent() {
    let reg = registration(online());

    let served = reg.handle_fetch(request(Method::GET, "/api/data")).await.unwrap();
    assert_eq!(served.source, ResponseSource::Network);

    reg.agent().network().set_offline(true);
    assert!(reg.handle_fetch(request(Method::GET, "/api/data")).await.is_err());
  }

  #[tokio::test]
  async fn test_lifecycle_order_is_enforced() {
    let mut reg = registration(online());
    assert!(reg.activate().await.is_err());

    reg.install().await.unwrap();
    assert!(reg.install().await.is_err());
  }
}
