//! Error taxonomy for lifecycle hooks and the network collaborator.

use thiserror::Error;

/// Failures a lifecycle hook reports back to its host.
#[derive(Debug, Error)]
pub enum AgentError {
  /// A core asset could not be fetched or stored; the worker is not ready.
  #[error("installation failed at {url}: {reason}")]
  Installation { url: String, reason: String },

  #[error("invalid asset url {url}: {reason}")]
  InvalidAsset { url: String, reason: String },

  /// A previous installation failed; this generation will never activate.
  #[error("worker is redundant after a failed installation")]
  Redundant,

  /// Activation was requested before the current generation was installed.
  #[error("generation {0} is not installed")]
  NotInstalled(String),

  #[error("cache storage error: {0}")]
  Storage(color_eyre::Report),
}

impl From<color_eyre::Report> for AgentError {
  fn from(report: color_eyre::Report) -> Self {
    Self::Storage(report)
  }
}

/// A request never produced a response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
  #[error("network unreachable: {0}")]
  Unreachable(String),

  #[error("request timed out")]
  TimedOut,

  #[error("request aborted: {0}")]
  Aborted(String),
}

/// Result type alias for lifecycle operations
pub type AgentResult<T> = Result<T, AgentError>;
