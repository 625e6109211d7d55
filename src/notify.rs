//! Push notifications: payload formatting, display and click routing.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::config::{NotificationAction, NotificationConfig};

/// A notification ready to be displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub badge: Option<String>,
  pub vibrate: Vec<u32>,
  pub actions: Vec<NotificationAction>,
  /// Absolute URL a click navigates to
  pub url: String,
}

/// JSON body of an inbound push message. Every field is optional.
#[derive(Debug, Default, Deserialize)]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  url: Option<String>,
}

/// Build the notification for a push message.
///
/// No payload means nothing to show. A payload that is not a JSON object
/// is shown as the body text.
pub fn format_push(
  config: &NotificationConfig,
  origin: &Url,
  payload: Option<&[u8]>,
) -> Option<Notification> {
  let payload = payload.filter(|p| !p.is_empty())?;

  let parsed = serde_json::from_slice::<PushPayload>(payload).unwrap_or_else(|_| PushPayload {
    body: Some(String::from_utf8_lossy(payload).into_owned()),
    ..PushPayload::default()
  });

  let target = parsed.url.as_deref().unwrap_or("/");
  let url = origin
    .join(target)
    .map(String::from)
    .unwrap_or_else(|_| target.to_string());

  Some(Notification {
    title: parsed.title.unwrap_or_else(|| config.title.clone()),
    body: parsed.body.unwrap_or_else(|| config.body.clone()),
    icon: config.icon.clone(),
    badge: config.badge.clone(),
    vibrate: config.vibrate.clone(),
    actions: config.actions.clone(),
    url,
  })
}

/// Notification collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn display(&self, notification: &Notification) -> Result<()>;
}

/// A window controlled by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindow {
  pub id: String,
  pub url: String,
}

/// The windows the agent serves.
#[async_trait]
pub trait Clients: Send + Sync {
  async fn windows(&self) -> Result<Vec<ClientWindow>>;

  async fn focus(&self, id: &str) -> Result<()>;

  async fn open_window(&self, url: &str) -> Result<()>;

  /// Take control of every client immediately instead of on next navigation.
  async fn claim(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  /// The clicked action does not navigate
  Dismissed,
  /// An existing window was already at the target
  Focused(String),
  /// A new window was opened at the target
  Opened(String),
}

/// Handle a click on `notification`, optionally on one of its actions.
pub async fn route_click<C>(
  clients: &C,
  notification: &Notification,
  action: Option<&str>,
) -> Result<ClickOutcome>
where
  C: Clients + ?Sized,
{
  if let Some(action) = action {
    let opens = notification
      .actions
      .iter()
      .find(|a| a.action == action)
      .map(|a| a.open)
      .unwrap_or(true);
    if !opens {
      return Ok(ClickOutcome::Dismissed);
    }
  }

  let windows = clients.windows().await?;
  if let Some(window) = windows.iter().find(|w| w.url == notification.url) {
    clients.focus(&window.id).await?;
    return Ok(ClickOutcome::Focused(window.id.clone()));
  }

  clients.open_window(&notification.url).await?;
  Ok(ClickOutcome::Opened(notification.url.clone()))
}

/// Writes each notification as a JSON line on stdout.
pub struct PrintNotifier;

#[async_trait]
impl Notifier for PrintNotifier {
  async fn display(&self, notification: &Notification) -> Result<()> {
    let line = serde_json::to_string(notification)
      .map_err(|e| eyre!("Failed to serialize notification: {}", e))?;
    println!("{}", line);
    Ok(())
  }
}

/// Client registry for hosts without windows; navigation is only logged.
pub struct HeadlessClients;

#[async_trait]
impl Clients for HeadlessClients {
  async fn windows(&self) -> Result<Vec<ClientWindow>> {
    Ok(Vec::new())
  }

  async fn focus(&self, id: &str) -> Result<()> {
    Err(eyre!("No client window {}", id))
  }

  async fn open_window(&self, url: &str) -> Result<()> {
    info!("Open window: {}", url);
    Ok(())
  }

  async fn claim(&self) -> Result<()> {
    Ok(())
  }
}
