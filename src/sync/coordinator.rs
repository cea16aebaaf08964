use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use url::Url;

use super::registration::{SyncRegistry, SyncState};
use super::retry::RetryPolicy;
use crate::http::{Network, Request};
use crate::queue::{ActionId, ActionQueue, Category, PendingAction, UndecodableAction};

/// Per-category drain state. Absent from the map means idle.
#[derive(Debug, Clone, Copy)]
struct Draining {
  /// Another trigger arrived while draining
  rerun: bool,
}

/// How a sync trigger was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
  /// The queue was drained
  Drained,
  /// A drain of this category was already running; it will pick the work up
  Coalesced,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
  pub category: Category,
  pub outcome: SyncOutcome,
  pub delivered: Vec<ActionId>,
  pub failed: Vec<ActionId>,
  /// Actions skipped because their backoff has not elapsed
  pub deferred: usize,
  /// Stored rows that could not be decoded; kept and skipped
  pub undecodable: Vec<ActionId>,
  pub passes: u32,
  /// Registration state after the drain; None when it completed
  #[serde(skip_serializing_if = "Option::is_none")]
  pub registration: Option<SyncState>,
}

impl SyncReport {
  fn new(category: Category, outcome: SyncOutcome) -> Self {
    Self {
      category,
      outcome,
      delivered: Vec::new(),
      failed: Vec::new(),
      deferred: 0,
      undecodable: Vec::new(),
      passes: 0,
      registration: None,
    }
  }

  /// Nothing is left in the queue for this category
  pub fn is_clean(&self) -> bool {
    self.failed.is_empty() && self.deferred == 0 && self.undecodable.is_empty()
  }
}

/// Drains the pending action queue when a sync trigger fires.
///
/// Each category is either idle or draining. A trigger for a category that
/// is already draining is coalesced into the running drain, which then does
/// one more pass. A failed delivery never blocks later actions.
pub struct SyncCoordinator<N: Network> {
  queue: Arc<ActionQueue>,
  registry: SyncRegistry,
  network: Arc<N>,
  origin: Url,
  policy: RetryPolicy,
  draining: Mutex<HashMap<Category, Draining>>,
}

impl<N: Network> SyncCoordinator<N> {
  pub fn new(
    queue: Arc<ActionQueue>,
    registry: SyncRegistry,
    network: Arc<N>,
    origin: Url,
    policy: RetryPolicy,
  ) -> Self {
    Self {
      queue,
      registry,
      network,
      origin,
      policy,
      draining: Mutex::new(HashMap::new()),
    }
  }

  pub fn registry(&self) -> &SyncRegistry {
    &self.registry
  }

  /// Register a deferred sync for the category (idempotent)
  pub fn register(&self, category: Category) -> Result<bool> {
    self.registry.register(category)
  }

  /// Connectivity restored: drain every category with a live registration
  /// or anything left in its queue. Categories whose registration gave up
  /// wait for an explicit trigger.
  pub async fn run_all(&self) -> Result<Vec<SyncReport>> {
    let mut reports = Vec::new();
    for category in Category::ALL {
      let registration = self.registry.get(category)?;
      if let Some(registration) = registration.as_ref().filter(|r| r.state == SyncState::Failed) {
        info!(tag = registration.tag(), "Skipping failed sync registration");
        continue;
      }
      if registration.is_some() || self.queue.len(category)? > 0 {
        reports.push(self.run(category).await?);
      }
    }
    Ok(reports)
  }

  /// Idle -> Draining -> Idle for one category
  pub async fn run(&self, category: Category) -> Result<SyncReport> {
    let Some(_guard) = self.begin(category)? else {
      info!(category = %category, "Sync already running, coalesced");
      return Ok(SyncReport::new(category, SyncOutcome::Coalesced));
    };

    self.registry.mark_firing(category)?;
    let mut report = SyncReport::new(category, SyncOutcome::Drained);

    if let Err(e) = self.drain_passes(category, &mut report).await {
      if let Err(release) = self.registry.release(category) {
        warn!(category = %category, error = %release, "Failed to release sync registration");
      }
      return Err(e);
    }

    report.registration = if report.is_clean() {
      self.registry.complete(category)?;
      None
    } else if report.failed.is_empty() {
      // Only deferred or undecodable actions: no delivery was attempted
      Some(self.registry.release(category)?)
    } else {
      Some(
        self
          .registry
          .record_failed_cycle(category, self.policy.max_retries)?,
      )
    };

    info!(
      category = %category,
      delivered = report.delivered.len(),
      failed = report.failed.len(),
      deferred = report.deferred,
      "Sync finished"
    );
    Ok(report)
  }

  async fn drain_passes(&self, category: Category, report: &mut SyncReport) -> Result<()> {
    loop {
      self.drain_once(category, report).await?;
      if !self.take_rerun(category)? {
        return Ok(());
      }
    }
  }

  async fn drain_once(&self, category: Category, report: &mut SyncReport) -> Result<()> {
    report.passes += 1;
    let now = Utc::now();

    for action in self.queue.drain(category)? {
      let action = match action {
        Ok(action) => action,
        Err(e) => match e.downcast_ref::<UndecodableAction>() {
          Some(bad) => {
            warn!(category = %category, id = %bad.id, reason = %bad.reason, "Skipping undecodable action");
            if !report.undecodable.contains(&bad.id) {
              report.undecodable.push(bad.id);
            }
            continue;
          }
          None => return Err(e),
        },
      };

      if !action.is_due(now) {
        report.deferred += 1;
        continue;
      }

      match self.deliver(&action).await {
        Ok(()) => {
          self.queue.remove(category, action.id)?;
          info!(category = %category, id = %action.id, "Synced action");
          report.delivered.push(action.id);
        }
        Err(e) => {
          let next = now + self.policy.delay_for(action.attempts + 1);
          warn!(category = %category, id = %action.id, error = %e, "Failed to sync action");
          self.queue.record_failure(action.id, &e.to_string(), next)?;
          report.failed.push(action.id);
        }
      }
    }

    Ok(())
  }

  /// POST the action to its category endpoint; Ok only on a 2xx
  async fn deliver(&self, action: &PendingAction) -> Result<()> {
    let url = self
      .origin
      .join(action.category().endpoint())
      .map_err(|e| eyre!("Invalid endpoint URL: {}", e))?;
    let request = Request::post_json(url, action.payload.data())?;

    let response = self.network.fetch(&request).await?;
    if response.is_ok() {
      Ok(())
    } else {
      Err(eyre!("HTTP {}", response.status))
    }
  }

  fn begin(&self, category: Category) -> Result<Option<DrainGuard<'_>>> {
    let mut draining = self
      .draining
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if let Some(state) = draining.get_mut(&category) {
      state.rerun = true;
      return Ok(None);
    }

    draining.insert(category, Draining { rerun: false });
    Ok(Some(DrainGuard {
      draining: &self.draining,
      category,
    }))
  }

  fn take_rerun(&self, category: Category) -> Result<bool> {
    let mut draining = self
      .draining
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(match draining.get_mut(&category) {
      Some(state) => std::mem::replace(&mut state.rerun, false),
      None => false,
    })
  }
}

/// Returns the category to idle when the drain ends, including when the
/// drain future is dropped midway.
struct DrainGuard<'a> {
  draining: &'a Mutex<HashMap<Category, Draining>>,
  category: Category,
}

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    if let Ok(mut draining) = self.draining.lock() {
      draining.remove(&self.category);
    }
  }
}
