//! Request and response value types shared by the strategy, the store and the network.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
  pub fn new() -> Self {
    Self::default()
  }

  /// First value for `name`, compared case-insensitively.
  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .0
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Replace every value for `name` with `value`.
  pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
    self.0.push((name, value.into()));
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
  }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self(
      iter
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect(),
    )
  }
}

/// What the requesting client intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  Document,
  Image,
  Other,
}

/// An outgoing request as seen by the interception hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Headers,
  /// Destination reported by the host, if it knows one
  pub destination: Option<Destination>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Headers::new(),
      destination: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.set(name, value);
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = Some(destination);
    self
  }

  /// Only GET requests take part in caching.
  pub fn is_cacheable(&self) -> bool {
    self.method == Method::GET
  }

  /// Destination used to pick a substitute response.
  ///
  /// An explicit destination wins; otherwise the `Accept` header decides and
  /// anything undeterminable is `Other`.
  pub fn effective_destination(&self) -> Destination {
    if let Some(destination) = self.destination {
      return destination;
    }

    match self.headers.get("accept") {
      Some(accept) if accept.contains("text/html") => Destination::Document,
      Some(accept) if accept.contains("image") => Destination::Image,
      _ => Destination::Other,
    }
  }
}

/// Response type, mirroring how much of a response the requester may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
  /// Same-origin response
  Basic,
  /// Cross-origin response that opted in with CORS headers
  Cors,
  /// Cross-origin response without CORS headers
  Opaque,
  /// Transport failure surfaced as a response
  Error,
  /// Generated locally, never fetched or stored
  Synthetic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Headers,
  #[serde(skip)]
  pub body: Vec<u8>,
  pub kind: ResponseKind,
}

impl Response {
  /// A network-error response: status 0, no body.
  pub fn error(reason: impl Into<String>) -> Self {
    Self {
      status: 0,
      status_text: reason.into(),
      headers: Headers::new(),
      body: Vec::new(),
      kind: ResponseKind::Error,
    }
  }

  pub fn synthetic(
    status: u16,
    status_text: &str,
    content_type: &str,
    body: impl Into<Vec<u8>>,
  ) -> Self {
    let mut headers = Headers::new();
    headers.set("content-type", content_type);
    Self {
      status,
      status_text: status_text.to_string(),
      headers,
      body: body.into(),
      kind: ResponseKind::Synthetic,
    }
  }

  /// Status in the 200-299 range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn content_type(&self) -> Option<&str> {
    self.headers.get("content-type")
  }
}

/// Normalized identity of a cacheable request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  hash: String,
  url: String,
}

impl RequestKey {
  pub fn for_request(request: &Request) -> Self {
    Self::build(request.method.as_str(), &request.url)
  }

  /// Key a plain GET of `url` would produce.
  pub fn for_url(url: &Url) -> Self {
    Self::build(Method::GET.as_str(), url)
  }

  fn build(method: &str, url: &Url) -> Self {
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    let input = format!("{} {}", method.to_ascii_uppercase(), normalized);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());

    Self {
      hash: hex::encode(hasher.finalize()),
      url: normalized.to_string(),
    }
  }

  pub fn hash(&self) -> &str {
    &self.hash
  }

  pub fn url(&self) -> &str {
    &self.url
  }
}
