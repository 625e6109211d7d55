//! Substitute responses for requests neither the cache nor the network could answer.

use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheStorage, Served};
use crate::error::TransportError;
use crate::http::{Destination, Request, RequestKey, Response};

/// Fixed placeholder served for images while offline.
pub const PLACEHOLDER_IMAGE: &str = concat!(
  r##"<svg width="100" height="100" xmlns="http://www.w3.org/2000/svg">"##,
  r##"<rect width="100" height="100" fill="#0a0a1a"/>"##,
  r##"<text x="50" y="50" font-family="Arial" font-size="10" fill="white" text-anchor="middle">offline</text>"##,
  "</svg>"
);

pub const PLACEHOLDER_IMAGE_TYPE: &str = "image/svg+xml";

/// Decides what to serve when every other source has failed.
#[derive(Debug, Clone)]
pub struct OfflinePolicy {
  offline_document: RequestKey,
}

impl OfflinePolicy {
  pub fn new(offline_document: &Url) -> Self {
    Self {
      offline_document: RequestKey::for_url(offline_document),
    }
  }

  /// Substitute for a request that failed with `failure`.
  ///
  /// | destination | substitute |
  /// |---|---|
  /// | document | stored offline document, else a network error |
  /// | image | placeholder SVG |
  /// | other | 408 with a reason string |
  pub fn degrade<S>(
    &self,
    storage: &S,
    stores: &[String],
    request: &Request,
    failure: &TransportError,
  ) -> Served
  where
    S: CacheStorage + ?Sized,
  {
    match request.effective_destination() {
      Destination::Document => match storage.lookup_any(stores, &self.offline_document) {
        Ok(Some(cached)) => {
          debug!("Serving offline document for {}", request.url);
          Served::fallback(cached.response, Some(cached.cached_at))
        }
        Ok(None) => {
          debug!("No offline document stored, failing {}", request.url);
          Served::fallback(Response::error(failure.to_string()), None)
        }
        Err(e) => {
          warn!("Offline document lookup failed: {}", e);
          Served::fallback(Response::error(failure.to_string()), None)
        }
      },
      Destination::Image => Served::fallback(
        Response::synthetic(200, "OK", PLACEHOLDER_IMAGE_TYPE, PLACEHOLDER_IMAGE),
        None,
      ),
      Destination::Other => Served::fallback(
        Response::synthetic(408, "Network disconnected", "text/plain", "Network error"),
        None,
      ),
    }
  }

  /// Answer for a network-first request with no network and no cached copy.
  pub fn unavailable(&self) -> Served {
    Served::fallback(
      Response::synthetic(
        503,
        "Service unavailable",
        "text/plain",
        "Offline - API unavailable",
      ),
      None,
    )
  }
}
