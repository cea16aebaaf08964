//! The offline worker: one owned object per deployment, fed one event at a
//! time by the host.
//!
//! ```ignore
//! let worker = ServiceWorker::new(&config, db, HttpClient::new(&config)?, clients)?;
//! let outcome = worker.dispatch(WorkerEvent::Fetch(request)).await?;
//! ```
//!
//! The future returned by [`ServiceWorker::dispatch`] must be driven to
//! completion before the host shuts down; every storage write it performs
//! is a single transaction, so abandoning it midway is safe to retry.

mod classify;
mod events;
mod lifecycle;
mod notify;

pub use classify::{RequestClassifier, Route};
pub use events::{ControlMessage, EventOutcome, MessageReply, WorkerEvent};
pub use lifecycle::{ActivationReport, InstallReport, Lifecycle, WorkerState};
pub use notify::{handle_click, ClickOutcome, Clients, Notification, NotificationAction, WindowClient};

use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheStorage, SqliteStorage};
use crate::config::{Config, NotificationDefaults};
use crate::db::Database;
use crate::http::{Network, Request};
use crate::queue::{ActionPayload, ActionQueue, Category};
use crate::sync::{RetryPolicy, SyncCoordinator, SyncRegistry};

pub struct ServiceWorker<N: Network, C: Clients> {
  classifier: RequestClassifier,
  cache: CacheLayer<SqliteStorage, N>,
  storage: Arc<SqliteStorage>,
  lifecycle: Lifecycle<SqliteStorage, N>,
  queue: Arc<ActionQueue>,
  sync: SyncCoordinator<N>,
  clients: C,
  dashboard_url: Url,
  notification_defaults: NotificationDefaults,
  /// Activate as soon as install completes
  skip_waiting: AtomicBool,
}

impl<N: Network, C: Clients> ServiceWorker<N, C> {
  pub fn new(config: &Config, db: Arc<Database>, network: N, clients: C) -> Result<Self> {
    let origin = config.origin_url()?;
    let network = Arc::new(network);
    let storage = Arc::new(SqliteStorage::new(Arc::clone(&db)));
    let queue = Arc::new(ActionQueue::new(Arc::clone(&db)));

    let precache = config
      .precache
      .iter()
      .map(|target| config.resolve(target))
      .collect::<Result<Vec<_>>>()?;

    let lifecycle = Lifecycle::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      Arc::clone(&db),
      config.cache_version.clone(),
      precache,
    )?;
    // Runtime caching stays on the active version until this one activates
    let cache = CacheLayer::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      lifecycle.current_version(),
      &config.resolve(&config.offline_url)?,
    );
    let sync = SyncCoordinator::new(
      Arc::clone(&queue),
      SyncRegistry::new(db),
      network,
      origin.clone(),
      RetryPolicy::from(&config.sync),
    );

    Ok(Self {
      classifier: RequestClassifier::new(origin, config.api_prefix.clone()),
      cache,
      storage,
      lifecycle,
      queue,
      sync,
      clients,
      dashboard_url: config.resolve(&config.dashboard_url)?,
      notification_defaults: config.notifications.clone(),
      skip_waiting: AtomicBool::new(config.skip_waiting),
    })
  }

  pub fn queue(&self) -> &ActionQueue {
    &self.queue
  }

  pub fn storage(&self) -> &SqliteStorage {
    &self.storage
  }

  pub fn lifecycle(&self) -> &Lifecycle<SqliteStorage, N> {
    &self.lifecycle
  }

  pub fn sync(&self) -> &SyncCoordinator<N> {
    &self.sync
  }

  /// Cache version runtime responses are read from and written to
  pub fn serving_version(&self) -> String {
    self.cache.version()
  }

  /// Handle one event. The host must await the returned future.
  pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
    match event {
      WorkerEvent::Install => self.on_install().await,
      WorkerEvent::Activate => Ok(EventOutcome::Activated(self.on_activate().await?)),
      WorkerEvent::Fetch(request) => Ok(self.on_fetch(request).await),
      WorkerEvent::Sync { tag } => match Category::from_sync_tag(&tag) {
        Some(category) => Ok(EventOutcome::Synced(vec![self.sync.run(category).await?])),
        None => {
          warn!(tag = %tag, "Unknown sync tag");
          Ok(EventOutcome::Ignored {
            reason: format!("unknown sync tag '{}'", tag),
          })
        }
      },
      WorkerEvent::Online => Ok(EventOutcome::Synced(self.sync.run_all().await?)),
      WorkerEvent::Push { data } => {
        let notification = Notification::from_push(data.as_deref(), &self.notification_defaults);
        info!(title = %notification.title, "Push notification received");
        self.clients.show_notification(&notification)?;
        Ok(EventOutcome::NotificationShown(notification))
      }
      WorkerEvent::NotificationClick { tag } => Ok(EventOutcome::Clicked(handle_click(
        &self.clients,
        tag.as_deref(),
        &self.dashboard_url,
      )?)),
      WorkerEvent::Message(message) => Ok(EventOutcome::Reply(self.on_message(message).await?)),
    }
  }

  async fn on_install(&self) -> Result<EventOutcome> {
    let install = self.lifecycle.install().await?;

    let activation = if self.skip_waiting.load(Ordering::SeqCst) && !install.already_active {
      Some(self.on_activate().await?)
    } else {
      None
    };

    Ok(EventOutcome::Installed {
      install,
      activation,
    })
  }

  async fn on_activate(&self) -> Result<ActivationReport> {
    let report = self.lifecycle.activate().await?;
    self.clients.claim()?;
    Ok(report)
  }

  async fn on_fetch(&self, request: Request) -> EventOutcome {
    let route = self.classifier.classify(&request);
    debug!(url = %request.url, ?route, "Intercepted request");

    let served = match route {
      Route::Passthrough => return EventOutcome::NotIntercepted(request),
      Route::Api => self.cache.fetch_api(&request).await,
      Route::Document => self.cache.fetch_document(&request).await,
      Route::Static => self.cache.fetch_static(&request).await,
    };

    EventOutcome::Response(served)
  }

  async fn on_message(&self, message: ControlMessage) -> Result<MessageReply> {
    match message {
      ControlMessage::SkipWaiting => {
        self.skip_waiting.store(true, Ordering::SeqCst);
        if self.lifecycle.state().await == WorkerState::Installed {
          self.on_activate().await?;
        }
        Ok(MessageReply::Ack { ok: true })
      }
      ControlMessage::QueueAction { category, action } => {
        let id = self.queue.enqueue(ActionPayload::new(category, action))?;
        self.sync.register(category)?;
        Ok(MessageReply::Queued { id, category })
      }
      ControlMessage::GetCacheStatus => {
        let version = self.lifecycle.version().to_string();
        let cached = self.storage.list_versions()?.contains(&version);
        Ok(MessageReply::CacheStatus { cached, version })
      }
    }
  }
}
