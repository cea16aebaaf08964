//! Push delivery and notification interaction.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::config::NotificationDefaults;

/// Host surface for user-visible notifications and open dashboard windows
pub trait Clients: Send + Sync {
  fn show_notification(&self, notification: &Notification) -> Result<()>;

  fn close_notification(&self, tag: &str) -> Result<()>;

  /// Open windows controlled by this worker
  fn windows(&self) -> Result<Vec<WindowClient>>;

  fn focus(&self, id: &str) -> Result<()>;

  fn open_window(&self, url: &Url) -> Result<()>;

  /// Take control of already open windows after activation
  fn claim(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowClient {
  pub id: String,
  pub url: String,
  pub focusable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

/// A notification ready to display
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
  pub require_interaction: bool,
  pub actions: Vec<NotificationAction>,
  pub data: Value,
}

/// Push message as sent by the server; every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  icon: Option<String>,
  badge: Option<String>,
  tag: Option<String>,
  require_interaction: Option<bool>,
  actions: Option<Vec<NotificationAction>>,
  data: Option<Value>,
}

impl Notification {
  /// Merge a push payload over the defaults. An unreadable payload shows
  /// the defaults.
  pub fn from_push(data: Option<&[u8]>, defaults: &NotificationDefaults) -> Self {
    let payload = match data {
      Some(bytes) if !bytes.is_empty() => {
        serde_json::from_slice::<PushPayload>(bytes).unwrap_or_else(|e| {
          warn!(error = %e, "Failed to parse push data");
          PushPayload::default()
        })
      }
      _ => PushPayload::default(),
    };

    Self {
      title: payload.title.unwrap_or_else(|| defaults.title.clone()),
      body: payload.body.unwrap_or_else(|| defaults.body.clone()),
      icon: payload.icon.unwrap_or_else(|| defaults.icon.clone()),
      badge: payload.badge.unwrap_or_else(|| defaults.badge.clone()),
      tag: payload.tag.unwrap_or_else(|| defaults.tag.clone()),
      require_interaction: payload.require_interaction.unwrap_or(false),
      actions: payload.actions.unwrap_or_default(),
      data: payload
        .data
        .unwrap_or_else(|| Value::Object(Default::default())),
    }
  }
}

/// What a notification click did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickOutcome {
  Focused { id: String },
  Opened { url: String },
}

/// Close the clicked notification, then focus an open dashboard window or
/// open a new one.
pub fn handle_click<C: Clients>(
  clients: &C,
  tag: Option<&str>,
  dashboard_url: &Url,
) -> Result<ClickOutcome> {
  if let Some(tag) = tag {
    clients.close_notification(tag)?;
  }

  let dashboard_path = dashboard_url.path();
  let existing = clients
    .windows()?
    .into_iter()
    .find(|w| w.focusable && w.url.contains(dashboard_path));

  match existing {
    Some(window) => {
      info!(id = %window.id, "Focusing dashboard window");
      clients.focus(&window.id)?;
      Ok(ClickOutcome::Focused { id: window.id })
    }
    None => {
      info!(url = %dashboard_url, "Opening dashboard window");
      clients.open_window(dashboard_url)?;
      Ok(ClickOutcome::Opened {
        url: dashboard_url.to_string(),
      })
    }
  }
}
