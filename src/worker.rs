//! The agent: lifecycle hooks wired to the cache, the network and the host.
//!
//! Each hook is an async method; the host awaits it to know the phase is
//! done, then awaits [`Agent::settle`] before tearing the agent down so
//! background write-backs can finish.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use crate::background::Background;
use crate::cache::{
  preload, reconcile, refresh, AssetManifest, CacheStorage, FetchStrategy, Served, StoreNames,
};
use crate::config::Config;
use crate::error::{AgentError, AgentResult};
use crate::http::Request;
use crate::network::Network;
use crate::notify::{format_push, route_click, ClickOutcome, Clients, Notification, Notifier};

/// Where the agent is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Constructed, nothing run yet
  Parsed,
  Installing,
  /// Core assets stored; eligible to activate right away
  Installed,
  Activating,
  /// Old generations reclaimed; intercepting requests
  Activated,
  /// Installation failed
  Redundant,
}

/// Named lifecycle hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
  Install,
  Activate,
  Fetch,
  Push,
  NotificationClick,
  Sync,
}

impl fmt::Display for Hook {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Install => "install",
      Self::Activate => "activate",
      Self::Fetch => "fetch",
      Self::Push => "push",
      Self::NotificationClick => "notificationclick",
      Self::Sync => "sync",
    };
    f.write_str(name)
  }
}

/// An external event delivered by the host.
#[derive(Debug, Clone)]
pub enum Event {
  Install,
  Activate,
  Fetch(Request),
  /// Push message with its raw payload, if any
  Push(Option<Vec<u8>>),
  NotificationClick {
    notification: Notification,
    action: Option<String>,
  },
  Sync {
    tag: String,
  },
}

impl Event {
  pub fn hook(&self) -> Hook {
    match self {
      Self::Install => Hook::Install,
      Self::Activate => Hook::Activate,
      Self::Fetch(_) => Hook::Fetch,
      Self::Push(_) => Hook::Push,
      Self::NotificationClick { .. } => Hook::NotificationClick,
      Self::Sync { .. } => Hook::Sync,
    }
  }
}

/// What a hook produced.
#[derive(Debug, Clone)]
pub enum Outcome {
  Installed { cached: usize },
  Activated { deleted: Vec<String> },
  Response(Served),
  Notified(Option<Notification>),
  Clicked(Option<ClickOutcome>),
  Synced { refreshed: usize },
  /// The event did not concern this agent
  Ignored,
}

pub struct Agent<S: CacheStorage, N: Network> {
  config: Config,
  storage: Arc<S>,
  network: Arc<N>,
  names: StoreNames,
  manifest: AssetManifest,
  strategy: FetchStrategy<S, N>,
  notifier: Arc<dyn Notifier>,
  clients: Arc<dyn Clients>,
  background: Arc<Background>,
  state: Mutex<WorkerState>,
}

impl<S, N> Agent<S, N>
where
  S: CacheStorage + 'static,
  N: Network + 'static,
{
  pub fn new(
    config: Config,
    storage: Arc<S>,
    network: Arc<N>,
    notifier: Arc<dyn Notifier>,
    clients: Arc<dyn Clients>,
  ) -> AgentResult<Self> {
    let background = Arc::new(Background::new());
    let strategy = FetchStrategy::new(
      &config,
      Arc::clone(&storage),
      Arc::clone(&network),
      Arc::clone(&background),
    )?;

    Ok(Self {
      names: StoreNames::from_config(&config),
      manifest: AssetManifest::from_config(&config)?,
      config,
      storage,
      network,
      strategy,
      notifier,
      clients,
      background,
      state: Mutex::new(WorkerState::Parsed),
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn names(&self) -> &StoreNames {
    &self.names
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  fn state_guard(&self) -> MutexGuard<'_, WorkerState> {
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn state(&self) -> WorkerState {
    *self.state_guard()
  }

  fn set_state(&self, state: WorkerState) {
    debug!("Worker state: {:?}", state);
    *self.state_guard() = state;
  }

  /// Deliver one event to its hook.
  pub async fn dispatch(&self, event: Event) -> AgentResult<Outcome> {
    debug!("Dispatching {} event", event.hook());

    match event {
      Event::Install => Ok(Outcome::Installed {
        cached: self.install().await?,
      }),
      Event::Activate => Ok(Outcome::Activated {
        deleted: self.activate().await?,
      }),
      Event::Fetch(request) => Ok(Outcome::Response(self.fetch(request).await)),
      Event::Push(payload) => Ok(Outcome::Notified(self.push(payload.as_deref()).await)),
      Event::NotificationClick {
        notification,
        action,
      } => Ok(Outcome::Clicked(
        self
          .notification_click(&notification, action.as_deref())
          .await,
      )),
      Event::Sync { tag } => Ok(match self.sync(&tag).await {
        Some(refreshed) => Outcome::Synced { refreshed },
        None => Outcome::Ignored,
      }),
    }
  }

  /// Preload the manifest into the static store.
  ///
  /// On success the agent skips waiting and may activate immediately; on
  /// failure it becomes redundant and the host may retry with a new agent.
  pub async fn install(&self) -> AgentResult<usize> {
    info!("Installing generation {}", self.config.generation);
    self.set_state(WorkerState::Installing);

    match preload(
      &*self.storage,
      &*self.network,
      self.names.static_store(),
      &self.manifest,
    )
    .await
    {
      Ok(cached) => {
        self.set_state(WorkerState::Installed);
        Ok(cached)
      }
      Err(e) => {
        error!("Cache installation failed: {}", e);
        self.set_state(WorkerState::Redundant);
        Err(e)
      }
    }
  }

  /// Delete stores of other generations and take control of clients.
  ///
  /// Only an installed (or resumed) agent may activate; anything else is
  /// refused before a single store is touched.
  pub async fn activate(&self) -> AgentResult<Vec<String>> {
    match self.state() {
      WorkerState::Installed | WorkerState::Activated => {}
      WorkerState::Redundant => return Err(AgentError::Redundant),
      _ => return Err(AgentError::NotInstalled(self.config.generation.clone())),
    }

    info!("Activating generation {}", self.config.generation);
    self.set_state(WorkerState::Activating);

    let deleted = reconcile(&*self.storage, &self.names)?;

    if let Err(e) = self.clients.claim().await {
      warn!("Failed to claim clients: {}", e);
    }

    self.set_state(WorkerState::Activated);
    info!("Activated, {} old stores deleted", deleted.len());
    Ok(deleted)
  }

  /// Pick up where a previous process left off.
  ///
  /// If the current generation's static store already exists the agent is
  /// considered installed and activated. Returns whether it resumed.
  pub fn resume(&self) -> AgentResult<bool> {
    if self.storage.has(self.names.static_store())? {
      self.set_state(WorkerState::Activated);
      return Ok(true);
    }
    Ok(false)
  }

  /// Answer a request. Before activation nothing is intercepted.
  pub async fn fetch(&self, request: Request) -> Served {
    if self.state() != WorkerState::Activated {
      debug!("Not controlling clients yet, passing through {}", request.url);
      return self.strategy.passthrough(&request).await;
    }
    self.strategy.handle(request).await
  }

  /// Format and display a push message. Returns what was shown.
  pub async fn push(&self, payload: Option<&[u8]>) -> Option<Notification> {
    let notification = format_push(&self.config.notifications, &self.config.origin, payload)?;

    if let Err(e) = self.notifier.display(&notification).await {
      warn!("Failed to display notification: {}", e);
      return None;
    }
    Some(notification)
  }

  pub async fn notification_click(
    &self,
    notification: &Notification,
    action: Option<&str>,
  ) -> Option<ClickOutcome> {
    match route_click(&*self.clients, notification, action).await {
      Ok(outcome) => Some(outcome),
      Err(e) => {
        warn!("Failed to handle notification click: {}", e);
        None
      }
    }
  }

  /// Best-effort refresh of the core assets for the configured sync tag.
  pub async fn sync(&self, tag: &str) -> Option<usize> {
    if tag != self.config.sync_tag {
      debug!("Ignoring sync tag {}", tag);
      return None;
    }

    info!("Background sync triggered");
    let refreshed = refresh(
      &*self.storage,
      &*self.network,
      self.names.static_store(),
      &self.manifest,
    )
    .await;
    Some(refreshed)
  }

  /// Wait for every background task started by earlier hooks.
  pub async fn settle(&self) {
    self.background.settle().await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ResponseSource, SqliteStorage};
  use crate::http::{Destination, RequestKey};
  use crate::testing::{ok, response, url, FakeClients, FakeNetwork, RecordingNotifier, ORIGIN};
  use reqwest::Method;
  use url::Url;

  struct Harness {
    agent: Agent<SqliteStorage, FakeNetwork>,
    network: Arc<FakeNetwork>,
    notifier: Arc<RecordingNotifier>,
    clients: Arc<FakeClients>,
  }

  fn config() -> Config {
    let mut config = Config::new(Url::parse(ORIGIN).unwrap());
    config.generation = "v3".to_string();
    config.assets = vec![
      "/".to_string(),
      "/index.html".to_string(),
      "/images/logo.png".to_string(),
      "/offline".to_string(),
    ];
    config.external = vec!["https://cdn.test/all.min.css".to_string()];
    config
  }

  fn harness_with(storage: SqliteStorage) -> Harness {
    let network = Arc::new(FakeNetwork::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let clients = Arc::new(FakeClients::with_windows(&[("w1", "https://app.test/")]));
    let agent = Agent::new(
      config(),
      Arc::new(storage),
      network.clone(),
      notifier.clone(),
      clients.clone(),
    )
    .unwrap();

    Harness {
      agent,
      network,
      notifier,
      clients,
    }
  }

  fn harness() -> Harness {
    harness_with(SqliteStorage::open_in_memory().unwrap())
  }

  fn serve_manifest(network: &FakeNetwork) {
    network.serve(&url("/"), response(200, "text/html", "<html>root</html>"));
    network.serve(&url("/index.html"), response(200, "text/html", "<html>index</html>"));
    network.serve(&url("/images/logo.png"), response(200, "image/png", "\u{89}PNG"));
    network.serve(&url("/offline"), response(200, "text/html", "<html>offline</html>"));
    network.serve(
      &Url::parse("https://cdn.test/all.min.css").unwrap(),
      response(200, "text/css", ".fa{}"),
    );
  }

  async fn activated() -> Harness {
    let h = harness();
    serve_manifest(&h.network);
    h.agent.dispatch(Event::Install).await.unwrap();
    h.agent.dispatch(Event::Activate).await.unwrap();
    h
  }

  #[tokio::test]
  async fn test_install_then_activate() {
    let h = harness();
    serve_manifest(&h.network);
    assert_eq!(h.agent.state(), WorkerState::Parsed);

    let outcome = h.agent.dispatch(Event::Install).await.unwrap();
    assert!(matches!(outcome, Outcome::Installed { cached: 5 }));
    assert_eq!(h.agent.state(), WorkerState::Installed);

    let outcome = h.agent.dispatch(Event::Activate).await.unwrap();
    assert!(matches!(outcome, Outcome::Activated { ref deleted } if deleted.is_empty()));
    assert_eq!(h.agent.state(), WorkerState::Activated);
    assert!(h.clients.claimed());
  }

  #[tokio::test]
  async fn test_failed_install_makes_worker_redundant() {
    let h = harness();
    serve_manifest(&h.network);
    h.network.serve(&url("/images/logo.png"), response(404, "text/plain", "nope"));

    let err = h.agent.dispatch(Event::Install).await.unwrap_err();
    assert!(matches!(err, AgentError::Installation { .. }));
    assert_eq!(h.agent.state(), WorkerState::Redundant);
    assert!(h
      .agent
      .storage()
      .keys(h.agent.names().static_store())
      .unwrap()
      .is_empty());

    assert!(matches!(
      h.agent.dispatch(Event::Activate).await,
      Err(AgentError::Redundant)
    ));
    assert!(!h.agent.storage().has(h.agent.names().static_store()).unwrap());
    assert!(!h.agent.resume().unwrap());
  }

  #[tokio::test]
  async fn test_activate_reclaims_old_generations() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    for generation in ["v1", "v2"] {
      let old = StoreNames::new("app", generation);
      storage
        .put(old.static_store(), &RequestKey::for_url(&url("/")), &ok("old"))
        .unwrap();
    }
    let h = harness_with(storage);
    serve_manifest(&h.network);

    h.agent.install().await.unwrap();
    let deleted = h.agent.activate().await.unwrap();
    assert_eq!(deleted, vec!["app-static-v1", "app-static-v2"]);
    assert_eq!(h.agent.storage().names().unwrap(), vec!["app-static-v3"]);

    // Running again changes nothing
    assert!(h.agent.activate().await.unwrap().is_empty());
    assert_eq!(h.agent.storage().names().unwrap(), vec!["app-static-v3"]);
  }

  #[tokio::test]
  async fn test_activate_before_install_keeps_old_generations() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let old = StoreNames::new("app", "v1");
    storage
      .put(old.static_store(), &RequestKey::for_url(&url("/")), &ok("old"))
      .unwrap();
    let h = harness_with(storage);

    let err = h.agent.dispatch(Event::Activate).await.unwrap_err();
    assert!(matches!(err, AgentError::NotInstalled(ref g) if g == "v3"));
    assert_eq!(h.agent.state(), WorkerState::Parsed);
    assert_eq!(h.agent.storage().names().unwrap(), vec!["app-static-v1"]);
    assert!(!h.clients.claimed());
  }

  #[tokio::test]
  async fn test_activate_after_resume() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open("app-static-v2").unwrap();
    storage.open("app-static-v3").unwrap();
    let h = harness_with(storage);

    assert!(h.agent.resume().unwrap());
    let deleted = h.agent.activate().await.unwrap();
    assert_eq!(deleted, vec!["app-static-v2"]);
    assert_eq!(h.agent.state(), WorkerState::Activated);
  }

  #[tokio::test]
  async fn test_preloaded_asset_served_identically_offline() {
    let h = activated().await;
    h.network.go_offline();

    let Outcome::Response(served) = h
      .agent
      .dispatch(Event::Fetch(Request::get(url("/images/logo.png"))))
      .await
      .unwrap()
    else {
      panic!("expected a response");
    };
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, "\u{89}PNG".as_bytes());
    assert_eq!(served.response.content_type(), Some("image/png"));
  }

  #[tokio::test]
  async fn test_offline_document_served_for_unknown_page() {
    let h = activated().await;
    h.network.go_offline();

    let served = h
      .agent
      .fetch(Request::get(url("/cards/42")).with_destination(Destination::Document))
      .await;
    assert_eq!(served.source, ResponseSource::Fallback);
    assert_eq!(served.response.body, b"<html>offline</html>");
  }

  #[tokio::test]
  async fn test_fetch_before_activation_passes_through() {
    let h = harness();
    serve_manifest(&h.network);
    h.agent.install().await.unwrap();

    let served = h.agent.fetch(Request::get(url("/index.html"))).await;
    h.agent.settle().await;

    assert_eq!(served.source, ResponseSource::Passthrough);
    // Install fetched 5 entries, the passthrough one more
    assert_eq!(h.network.call_count(), 6);
    assert!(h
      .agent
      .storage()
      .keys(h.agent.names().dynamic_store())
      .unwrap()
      .is_empty());
  }

  #[tokio::test]
  async fn test_non_get_never_touches_store_when_active() {
    let h = activated().await;
    let before = h.agent.storage().names().unwrap();

    let served = h
      .agent
      .fetch(Request::new(Method::DELETE, url("/api/cards/1")))
      .await;
    h.agent.settle().await;

    assert_eq!(served.source, ResponseSource::Passthrough);
    assert_eq!(h.agent.storage().names().unwrap(), before);
  }

  #[tokio::test]
  async fn test_resume_with_existing_static_store() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open("app-static-v3").unwrap();
    let h = harness_with(storage);

    assert!(h.agent.resume().unwrap());
    assert_eq!(h.agent.state(), WorkerState::Activated);
  }

  #[tokio::test]
  async fn test_resume_without_store() {
    let h = harness();
    assert!(!h.agent.resume().unwrap());
    assert_eq!(h.agent.state(), WorkerState::Parsed);
  }

  #[tokio::test]
  async fn test_push_displays_notification() {
    let h = harness();
    let payload = br#"{"title":"Hi","url":"/cards"}"#.to_vec();

    let outcome = h.agent.dispatch(Event::Push(Some(payload))).await.unwrap();
    let Outcome::Notified(Some(shown)) = outcome else {
      panic!("expected a notification");
    };
    assert_eq!(shown.title, "Hi");
    assert_eq!(h.notifier.shown(), vec![shown]);

    let outcome = h.agent.dispatch(Event::Push(None)).await.unwrap();
    assert!(matches!(outcome, Outcome::Notified(None)));
    assert_eq!(h.notifier.shown().len(), 1);
  }

  #[tokio::test]
  async fn test_notification_click_focuses_existing_window() {
    let h = harness();
    let notification = h.agent.push(Some(b"{}".as_slice())).await.unwrap();

    let outcome = h
      .agent
      .dispatch(Event::NotificationClick {
        notification,
        action: None,
      })
      .await
      .unwrap();
    assert!(matches!(
      outcome,
      Outcome::Clicked(Some(ClickOutcome::Focused(ref id))) if id == "w1"
    ));
  }

  #[tokio::test]
  async fn test_sync_refreshes_only_for_configured_tag() {
    let h = activated().await;
    h.network.serve(&url("/index.html"), response(200, "text/html", "<html>v2</html>"));

    let outcome = h
      .agent
      .dispatch(Event::Sync {
        tag: "other".to_string(),
      })
      .await
      .unwrap();
    assert!(matches!(outcome, Outcome::Ignored));

    let outcome = h
      .agent
      .dispatch(Event::Sync {
        tag: "background-sync".to_string(),
      })
      .await
      .unwrap();
    assert!(matches!(outcome, Outcome::Synced { refreshed: 5 }));

    let served = h.agent.fetch(Request::get(url("/index.html"))).await;
    assert_eq!(served.response.body, b"<html>v2</html>");
  }
}
