//! Store generations: naming, preloading core assets, and reclaiming old stores.

use futures::future::try_join_all;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::error::{AgentError, AgentResult};
use crate::http::{Request, RequestKey};
use crate::network::Network;

use super::storage::CacheStorage;

/// Names of the purpose-specific stores of the current generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNames {
  static_store: String,
  dynamic_store: String,
}

impl StoreNames {
  /// `{prefix}-static-{generation}` and `{prefix}-dynamic-{generation}`.
  pub fn new(prefix: &str, generation: &str) -> Self {
    Self {
      static_store: format!("{}-static-{}", prefix, generation),
      dynamic_store: format!("{}-dynamic-{}", prefix, generation),
    }
  }

  pub fn from_config(config: &Config) -> Self {
    let generated = Self::new(&config.stores.prefix, &config.generation);
    Self {
      static_store: config
        .stores
        .static_name
        .clone()
        .unwrap_or(generated.static_store),
      dynamic_store: config
        .stores
        .dynamic_name
        .clone()
        .unwrap_or(generated.dynamic_store),
    }
  }

  /// Store holding preloaded core assets.
  pub fn static_store(&self) -> &str {
    &self.static_store
  }

  /// Store receiving write-backs.
  pub fn dynamic_store(&self) -> &str {
    &self.dynamic_store
  }

  /// Every current store, in lookup order.
  pub fn current(&self) -> Vec<String> {
    vec![self.static_store.clone(), self.dynamic_store.clone()]
  }

  /// Exact-name match; a name merely containing the generation is not current.
  pub fn is_current(&self, name: &str) -> bool {
    name == self.static_store || name == self.dynamic_store
  }
}

/// Ordered list of URLs that must be stored after installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
  entries: Vec<Url>,
}

impl AssetManifest {
  pub fn new(entries: Vec<Url>) -> Self {
    Self { entries }
  }

  /// Core assets resolved against the origin, followed by external resources.
  pub fn from_config(config: &Config) -> AgentResult<Self> {
    let mut entries = Vec::with_capacity(config.assets.len() + config.external.len());

    for asset in &config.assets {
      let url = config
        .origin
        .join(asset)
        .map_err(|e| AgentError::InvalidAsset {
          url: asset.clone(),
          reason: e.to_string(),
        })?;
      entries.push(url);
    }

    for external in &config.external {
      let url = Url::parse(external).map_err(|e| AgentError::InvalidAsset {
        url: external.clone(),
        reason: e.to_string(),
      })?;
      entries.push(url);
    }

    Ok(Self { entries })
  }

  pub fn urls(&self) -> &[Url] {
    &self.entries
  }
}

/// Fetch every manifest entry and store them all in `store`.
///
/// All-or-nothing: if any entry fails to fetch or comes back with a
/// non-success status, the store is not even created and installation fails.
pub async fn preload<S, N>(
  storage: &S,
  network: &N,
  store: &str,
  manifest: &AssetManifest,
) -> AgentResult<usize>
where
  S: CacheStorage + ?Sized,
  N: Network + ?Sized,
{
  let fetches = manifest.urls().iter().map(|url| async move {
    let response = network
      .fetch(&Request::get(url.clone()))
      .await
      .map_err(|e| AgentError::Installation {
        url: url.to_string(),
        reason: e.to_string(),
      })?;

    if !response.is_ok() {
      return Err(AgentError::Installation {
        url: url.to_string(),
        reason: format!("unexpected status {}", response.status),
      });
    }

    Ok((RequestKey::for_url(url), response))
  });

  let entries = try_join_all(fetches).await?;
  storage
    .put_all(store, &entries)
    .map_err(|e| AgentError::Installation {
      url: store.to_string(),
      reason: e.to_string(),
    })?;

  info!("Cached {} core assets in {}", entries.len(), store);
  Ok(entries.len())
}

/// Re-fetch every manifest entry into `store`, skipping failures.
///
/// Returns how many entries were refreshed.
pub async fn refresh<S, N>(storage: &S, network: &N, store: &str, manifest: &AssetManifest) -> usize
where
  S: CacheStorage + ?Sized,
  N: Network + ?Sized,
{
  let mut refreshed = 0;

  for url in manifest.urls() {
    match network.fetch(&Request::get(url.clone())).await {
      Ok(response) if response.is_ok() => {
        match storage.put(store, &RequestKey::for_url(url), &response) {
          Ok(()) => refreshed += 1,
          Err(e) => warn!("Failed to refresh {}: {}", url, e),
        }
      }
      Ok(response) => debug!("Skipping refresh of {}: status {}", url, response.status),
      Err(e) => debug!("Skipping refresh of {}: {}", url, e),
    }
  }

  refreshed
}

/// Delete every store that is not part of the current generation.
///
/// Returns the names that were deleted; a second run deletes nothing.
pub fn reconcile<S>(storage: &S, names: &StoreNames) -> AgentResult<Vec<String>>
where
  S: CacheStorage + ?Sized,
{
  let mut deleted = Vec::new();

  for name in storage.names()? {
    if names.is_current(&name) {
      continue;
    }

    info!("Deleting old cache: {}", name);
    if storage.delete(&name)? {
      deleted.push(name);
    }
  }

  Ok(deleted)
}
