//! Core types describing where a served response came from.

use chrono::{DateTime, Utc};

use crate::http::Response;

/// Result of handling one request, including metadata about the source.
#[derive(Debug, Clone)]
pub struct Served {
  /// The response handed back to the requester
  pub response: Response,
  /// Where the response came from
  pub source: ResponseSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  /// Create a result from a fresh network response.
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  /// Create a result from a cache hit.
  pub fn from_cache(response: Response, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Create a result for a cached response served because the network failed.
  pub fn offline(response: Response, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: ResponseSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Create a result for a substitute produced by the degradation policy.
  pub fn fallback(response: Response, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      response,
      source: ResponseSource::Fallback,
      cached_at,
    }
  }

  /// Create a result for a request that was not intercepted.
  pub fn passthrough(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Passthrough,
      cached_at: None,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh response from network
  Network,
  /// Cache hit, network not consulted
  Cache,
  /// Offline mode - network failed, serving cached response
  Offline,
  /// Neither cache nor network could answer; substitute response
  Fallback,
  /// Request was not intercepted and went straight to the network
  Passthrough,
}

impl std::fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "offline",
      Self::Fallback => "fallback",
      Self::Passthrough => "passthrough",
    };
    f.write_str(name)
  }
}
