use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheKey, CacheStorage, Served};
use crate::commands::{Action, Command};
use crate::config::Config;
use crate::db::Database;
use crate::http::HttpClient;
use crate::queue::Category;
use crate::worker::{Clients, EventOutcome, Notification, ServiceWorker, WindowClient};

/// Host clients for a terminal: notifications are logged, there are no
/// dashboard windows to focus.
#[derive(Debug, Default)]
pub struct ConsoleClients;

impl Clients for ConsoleClients {
  fn show_notification(&self, notification: &Notification) -> Result<()> {
    info!(title = %notification.title, body = %notification.body, tag = %notification.tag, "Notification");
    Ok(())
  }

  fn close_notification(&self, tag: &str) -> Result<()> {
    debug!(tag = %tag, "Closing notification");
    Ok(())
  }

  fn windows(&self) -> Result<Vec<WindowClient>> {
    Ok(Vec::new())
  }

  fn focus(&self, id: &str) -> Result<()> {
    debug!(id = %id, "Focus window");
    Ok(())
  }

  fn open_window(&self, url: &Url) -> Result<()> {
    info!(url = %url, "Open window");
    Ok(())
  }

  fn claim(&self) -> Result<()> {
    debug!("Claimed clients");
    Ok(())
  }
}

/// Main application state
pub struct App {
  config: Config,
  worker: ServiceWorker<HttpClient, ConsoleClients>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let db = Arc::new(Database::open(&config.database_path()?)?);
    let network = HttpClient::new(&config)?;
    let worker = ServiceWorker::new(&config, db, network, ConsoleClients)?;

    Ok(Self { config, worker })
  }

  /// Run one command and return its result as JSON
  pub async fn run(&self, command: Command) -> Result<Value> {
    match command.into_action(&self.config)? {
      Action::Dispatch(event) => {
        let outcome = self.worker.dispatch(event).await?;
        render_outcome(&outcome)
      }
      Action::ListPending(categories) => self.pending(&categories),
      Action::Status => self.status().await,
    }
  }

  fn pending(&self, categories: &[Category]) -> Result<Value> {
    let mut pending = BTreeMap::new();
    for category in categories {
      pending.insert(category.as_str(), self.worker.queue().pending(*category)?);
    }
    to_json(&pending)
  }

  async fn status(&self) -> Result<Value> {
    let lifecycle = self.worker.lifecycle();
    let storage = self.worker.storage();

    let mut versions = BTreeMap::new();
    for name in storage.list_versions()? {
      let (mut api, mut requests) = (0, 0);
      for key in storage.entry_keys(&name)? {
        match CacheKey::parse(&key) {
          Some(CacheKey::Api { .. }) => api += 1,
          Some(CacheKey::Request { .. }) => requests += 1,
          None => debug!(key = %key, "Unrecognized cache key"),
        }
      }
      versions.insert(name, json!({ "api": api, "requests": requests }));
    }

    let mut pending = BTreeMap::new();
    for category in Category::ALL {
      pending.insert(category.as_str(), self.worker.queue().len(category)?);
    }

    let mut registrations = BTreeMap::new();
    for category in Category::ALL {
      if let Some(registration) = self.worker.sync().registry().get(category)? {
        registrations.insert(category.as_str(), registration);
      }
    }

    Ok(json!({
      "version": lifecycle.version(),
      "state": lifecycle.state().await,
      "active_version": lifecycle.active_version()?,
      "serving_version": self.worker.serving_version(),
      "caches": versions,
      "pending": pending,
      "sync": registrations,
    }))
  }
}

fn render_outcome(outcome: &EventOutcome) -> Result<Value> {
  Ok(match outcome {
    EventOutcome::Installed {
      install,
      activation,
    } => json!({ "installed": to_json(install)?, "activation": to_json(activation)? }),
    EventOutcome::Activated(report) => json!({ "activated": to_json(report)? }),
    EventOutcome::Response(served) => render_served(served),
    EventOutcome::NotIntercepted(request) => json!({ "not_intercepted": request.url.as_str() }),
    EventOutcome::Synced(reports) => json!({ "synced": to_json(reports)? }),
    EventOutcome::NotificationShown(notification) => {
      json!({ "notification": to_json(notification)? })
    }
    EventOutcome::Clicked(click) => json!({ "clicked": to_json(click)? }),
    EventOutcome::Reply(reply) => to_json(reply)?,
    EventOutcome::Ignored { reason } => json!({ "ignored": reason }),
  })
}

fn render_served(served: &Served) -> Value {
  let response = &served.response;
  let body = match response.json_body() {
    Ok(value) => value,
    Err(_) => Value::String(String::from_utf8_lossy(&response.body).into_owned()),
  };

  json!({
    "source": served.source,
    "offline": served.is_offline(),
    "status": response.status,
    "status_text": response.status_text,
    "headers": response.headers,
    "cached_at": served.cached_at,
    "body": body,
  })
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<Value> {
  serde_json::to_value(value).map_err(|e| eyre!("Failed to serialize output: {}", e))
}
