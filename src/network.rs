//! Network collaborator: anything that can turn a request into a response.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::config::Config;
use crate::error::TransportError;
use crate::http::{Headers, Request, Response, ResponseKind};

/// Fetch-capable transport.
///
/// A returned `Ok` may carry any status code; `Err` means no response
/// arrived at all.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, TransportError>;
}

/// reqwest-backed network client
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Url,
}

impl HttpNetwork {
  pub fn new(config: &Config) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(config.timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: config.origin.clone(),
    })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, TransportError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in request.headers.iter() {
      builder = builder.header(name, value);
    }

    let resp = builder.send().await.map_err(transport_error)?;

    let status = resp.status();
    let final_url = resp.url().clone();
    let headers: Headers = resp
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = resp.bytes().await.map_err(transport_error)?;
    let kind = response_kind(&self.origin, &final_url, &headers);

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
      kind,
    })
  }
}

fn transport_error(e: reqwest::Error) -> TransportError {
  if e.is_timeout() {
    TransportError::TimedOut
  } else if e.is_connect() {
    TransportError::Unreachable(e.to_string())
  } else {
    TransportError::Aborted(e.to_string())
  }
}

/// Classify a response by where it came from relative to the application origin.
pub fn response_kind(origin: &Url, url: &Url, headers: &Headers) -> ResponseKind {
  if url.origin() == origin.origin() {
    ResponseKind::Basic
  } else if headers.get("access-control-allow-origin").is_some() {
    ResponseKind::Cors
  } else {
    ResponseKind::Opaque
  }
}
