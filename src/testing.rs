//! Test doubles shared by the module tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::cache::{CacheStorage, CachedResponse, SqliteStorage};
use crate::error::TransportError;
use crate::http::{Request, RequestKey, Response, ResponseKind};
use crate::network::Network;
use crate::notify::{ClientWindow, Clients, Notification, Notifier};

pub const ORIGIN: &str = "https://app.test";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// A same-origin response with the given status and body.
pub fn response(status: u16, content_type: &str, body: &str) -> Response {
  let mut resp = Response::synthetic(status, "", content_type, body);
  resp.kind = ResponseKind::Basic;
  resp
}

pub fn ok(body: &str) -> Response {
  response(200, "text/plain", body)
}

/// Scripted network that records every request it sees.
///
/// Unknown URLs answer 404; `go_offline` makes every fetch fail.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Result<Response, TransportError>>>,
  calls: Mutex<Vec<Request>>,
  offline: AtomicBool,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn serve(&self, url: &Url, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Ok(response));
  }

  pub fn fail(&self, url: &Url, error: TransportError) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Err(error));
  }

  pub fn go_offline(&self) {
    self.offline.store(true, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, TransportError> {
    self.calls.lock().unwrap().push(request.clone());

    if self.offline.load(Ordering::SeqCst) {
      return Err(TransportError::Unreachable("offline".to_string()));
    }

    self
      .routes
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned()
      .unwrap_or_else(|| Ok(response(404, "text/plain", "not found")))
  }
}

/// Storage whose writes always fail; reads go to an in-memory store.
pub struct ReadOnlyStorage {
  pub inner: SqliteStorage,
}

impl ReadOnlyStorage {
  pub fn new() -> Self {
    Self {
      inner: SqliteStorage::open_in_memory().unwrap(),
    }
  }
}

impl CacheStorage for ReadOnlyStorage {
  fn open(&self, store: &str) -> Result<()> {
    self.inner.open(store)
  }

  fn has(&self, store: &str) -> Result<bool> {
    self.inner.has(store)
  }

  fn names(&self) -> Result<Vec<String>> {
    self.inner.names()
  }

  fn delete(&self, store: &str) -> Result<bool> {
    self.inner.delete(store)
  }

  fn lookup(&self, store: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    self.inner.lookup(store, key)
  }

  fn put(&self, _store: &str, _key: &RequestKey, _response: &Response) -> Result<()> {
    Err(eyre!("disk full"))
  }

  fn put_all(&self, _store: &str, _entries: &[(RequestKey, Response)]) -> Result<()> {
    Err(eyre!("disk full"))
  }

  fn keys(&self, store: &str) -> Result<Vec<String>> {
    self.inner.keys(store)
  }
}

/// Notifier that remembers what it was asked to show.
#[derive(Default)]
pub struct RecordingNotifier {
  shown: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
  pub fn shown(&self) -> Vec<Notification> {
    self.shown.lock().unwrap().clone()
  }
}

#[async_trait]
impl Notifier for RecordingNotifier {
  async fn display(&self, notification: &Notification) -> Result<()> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }
}

/// Client registry with a fixed set of windows.
#[derive(Default)]
pub struct FakeClients {
  windows: Vec<ClientWindow>,
  focused: Mutex<Vec<String>>,
  opened: Mutex<Vec<String>>,
  claimed: AtomicBool,
}

impl FakeClients {
  pub fn with_windows(windows: &[(&str, &str)]) -> Self {
    Self {
      windows: windows
        .iter()
        .map(|(id, url)| ClientWindow {
          id: id.to_string(),
          url: url.to_string(),
        })
        .collect(),
      ..Self::default()
    }
  }

  pub fn focused(&self) -> Vec<String> {
    self.focused.lock().unwrap().clone()
  }

  pub fn opened(&self) -> Vec<String> {
    self.opened.lock().unwrap().clone()
  }

  pub fn claimed(&self) -> bool {
    self.claimed.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Clients for FakeClients {
  async fn windows(&self) -> Result<Vec<ClientWindow>> {
    Ok(self.windows.clone())
  }

  async fn focus(&self, id: &str) -> Result<()> {
    self.focused.lock().unwrap().push(id.to_string());
    Ok(())
  }

  async fn open_window(&self, url: &str) -> Result<()> {
    self.opened.lock().unwrap().push(url.to_string());
    Ok(())
  }

  async fn claim(&self) -> Result<()> {
    self.claimed.store(true, Ordering::SeqCst);
    Ok(())
  }
}
