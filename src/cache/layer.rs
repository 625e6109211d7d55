//! Fetch interception: picks a policy per request and runs it against the
//! cache store and the network.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::background::Background;
use crate::config::Config;
use crate::degrade::OfflinePolicy;
use crate::error::{AgentError, AgentResult};
use crate::http::{Request, RequestKey, Response, ResponseKind};
use crate::network::Network;

use super::lifecycle::StoreNames;
use super::storage::{CacheStorage, CachedResponse};
use super::traits::Served;

/// How a request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not intercepted: forwarded untouched, no cache interaction
  Passthrough,
  /// Store first, network on miss
  CacheFirst,
  /// Network first, store on transport failure
  NetworkFirst,
}

/// Request classification predicate.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
  /// URL substrings selecting network-first
  api_patterns: Vec<String>,
  /// URL prefixes that are never intercepted
  bypass: Vec<String>,
}

impl Classifier {
  pub fn new(api_patterns: Vec<String>, bypass: Vec<String>) -> Self {
    Self {
      api_patterns,
      bypass,
    }
  }

  pub fn from_config(config: &Config) -> Self {
    Self::new(config.api_patterns.clone(), config.bypass.clone())
  }

  pub fn route(&self, request: &Request) -> Route {
    if !request.is_cacheable() || !matches!(request.url.scheme(), "http" | "https") {
      return Route::Passthrough;
    }

    let url = request.url.as_str();
    if self.bypass.iter().any(|prefix| url.starts_with(prefix.as_str())) {
      return Route::Passthrough;
    }

    if self.api_patterns.iter().any(|p| url.contains(p.as_str())) {
      Route::NetworkFirst
    } else {
      Route::CacheFirst
    }
  }
}

/// Whether a network response may be written back to the store.
///
/// Success status (never partial content) from the same origin or a
/// CORS-enabled cross origin. Opaque, error and synthetic responses are
/// never stored.
pub fn is_write_back_eligible(response: &Response) -> bool {
  response.is_ok()
    && response.status != 206
    && matches!(response.kind, ResponseKind::Basic | ResponseKind::Cors)
}

/// The per-request decision engine.
///
/// Holds no state of its own beyond shared handles; every call to
/// [`FetchStrategy::handle`] is independent.
pub struct FetchStrategy<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  names: StoreNames,
  classifier: Classifier,
  policy: OfflinePolicy,
  background: Arc<Background>,
}

impl<S, N> FetchStrategy<S, N>
where
  S: CacheStorage + 'static,
  N: Network + 'static,
{
  pub fn new(
    config: &Config,
    storage: Arc<S>,
    network: Arc<N>,
    background: Arc<Background>,
  ) -> AgentResult<Self> {
    let offline_document =
      config
        .origin
        .join(&config.offline_document)
        .map_err(|e| AgentError::InvalidAsset {
          url: config.offline_document.clone(),
          reason: e.to_string(),
        })?;

    Ok(Self {
      storage,
      network,
      names: StoreNames::from_config(config),
      classifier: Classifier::from_config(config),
      policy: OfflinePolicy::new(&offline_document),
      background,
    })
  }

  pub fn route(&self, request: &Request) -> Route {
    self.classifier.route(request)
  }

  /// Produce exactly one response for `request`.
  ///
  /// Request-time failures never escape: transport errors end in a cached
  /// copy or a substitute, and write-back errors are logged.
  pub async fn handle(&self, request: Request) -> Served {
    match self.route(&request) {
      Route::Passthrough => self.passthrough(&request).await,
      Route::CacheFirst => self.cache_first(&request).await,
      Route::NetworkFirst => self.network_first(&request).await,
    }
  }

  /// Forward to the network without touching the store.
  pub async fn passthrough(&self, request: &Request) -> Served {
    match self.network.fetch(request).await {
      Ok(response) => Served::passthrough(response),
      Err(e) => Served::passthrough(Response::error(e.to_string())),
    }
  }

  async fn cache_first(&self, request: &Request) -> Served {
    let key = RequestKey::for_request(request);

    if let Some(cached) = self.lookup(&key) {
      debug!("Serving from cache: {}", request.url);
      return Served::from_cache(cached.response, cached.cached_at);
    }

    debug!("Fetching from network: {}", request.url);
    match self.network.fetch(request).await {
      Ok(response) => {
        self.write_back(key, &response);
        Served::from_network(response)
      }
      Err(e) => {
        debug!("Network failed for {}: {}", request.url, e);
        self
          .policy
          .degrade(&*self.storage, &self.names.current(), request, &e)
      }
    }
  }

  async fn network_first(&self, request: &Request) -> Served {
    let key = RequestKey::for_request(request);

    match self.network.fetch(request).await {
      // Error statuses are answers, not failures
      Ok(response) => {
        self.write_back(key, &response);
        Served::from_network(response)
      }
      Err(e) => {
        debug!("Network failed for {}: {}, trying cache", request.url, e);
        match self.lookup(&key) {
          Some(cached) => Served::offline(cached.response, cached.cached_at),
          None => self.policy.unavailable(),
        }
      }
    }
  }

  /// Look up `key` in the current stores; storage errors count as a miss.
  fn lookup(&self, key: &RequestKey) -> Option<CachedResponse> {
    match self.storage.lookup_any(&self.names.current(), key) {
      Ok(hit) => hit,
      Err(e) => {
        warn!("Cache lookup for {} failed: {}", key.url(), e);
        None
      }
    }
  }

  /// Store an eligible response in the background without delaying the caller.
  fn write_back(&self, key: RequestKey, response: &Response) {
    if !is_write_back_eligible(response) {
      debug!(
        "Not caching {} (status {}, {:?})",
        key.url(),
        response.status,
        response.kind
      );
      return;
    }

    let storage = Arc::clone(&self.storage);
    let store = self.names.dynamic_store().to_string();
    let response = response.clone();

    self.background.spawn(async move {
      if let Err(e) = storage.put(&store, &key, &response) {
        warn!("Write-back of {} failed: {}", key.url(), e);
      }
    });
  }
}
