//! Install-time pre-population and activation-time eviction.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use url::Url;

use crate::cache::{CacheKey, CacheStorage, CurrentVersion};
use crate::db::Database;
use crate::http::{Method, Network, Request, Response};

const INSTALLED_VERSION: &str = "installed_version";
const ACTIVE_VERSION: &str = "active_version";

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
  /// Nothing installed for the current version
  Parsed,
  Installing,
  /// Installed, waiting to activate
  Installed,
  Activating,
  /// Active and serving from the current version
  Activated,
  /// Install failed; the version was discarded
  Redundant,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
  pub version: String,
  /// Number of pre-cached resources
  pub cached: usize,
  /// The version was already active; nothing was fetched
  pub already_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
  pub version: String,
  /// Stale versions deleted
  pub evicted: Vec<String>,
}

/// Owns cache versioning for one worker version.
///
/// Install and activate are serialized: an activation waits for a running
/// install, and only an installed version can be activated.
pub struct Lifecycle<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  db: Arc<Database>,
  version: String,
  precache: Vec<Url>,
  state: Mutex<WorkerState>,
  /// The active version, or this one while nothing is active
  current: CurrentVersion,
}

impl<S: CacheStorage, N: Network> Lifecycle<S, N> {
  pub fn new(
    storage: Arc<S>,
    network: Arc<N>,
    db: Arc<Database>,
    version: impl Into<String>,
    precache: Vec<Url>,
  ) -> Result<Self> {
    let version = version.into();
    let active = db.get_meta(ACTIVE_VERSION)?;

    // Pick up where a previous process left off
    let state = if active.as_deref() == Some(version.as_str()) {
      WorkerState::Activated
    } else if db.get_meta(INSTALLED_VERSION)?.as_deref() == Some(version.as_str()) {
      WorkerState::Installed
    } else {
      WorkerState::Parsed
    };

    Ok(Self {
      storage,
      network,
      db,
      precache,
      state: Mutex::new(state),
      current: CurrentVersion::new(active.unwrap_or_else(|| version.clone())),
      version,
    })
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub async fn state(&self) -> WorkerState {
    *self.state.lock().await
  }

  /// Handle to the version runtime caching uses
  pub fn current_version(&self) -> CurrentVersion {
    self.current.clone()
  }

  pub fn active_version(&self) -> Result<Option<String>> {
    self.db.get_meta(ACTIVE_VERSION)
  }

  /// Fetch and store every pre-cache resource, all or nothing.
  ///
  /// On failure the version is deleted, the worker becomes redundant and
  /// the error is returned.
  pub async fn install(&self) -> Result<InstallReport> {
    let mut state = self.state.lock().await;

    if *state == WorkerState::Activated {
      info!(version = %self.version, "Version already active, skipping install");
      return Ok(InstallReport {
        version: self.version.clone(),
        cached: 0,
        already_active: true,
      });
    }

    info!(version = %self.version, resources = self.precache.len(), "Installing");
    *state = WorkerState::Installing;

    match self.populate().await {
      Ok(cached) => {
        self.db.set_meta(INSTALLED_VERSION, &self.version)?;
        *state = WorkerState::Installed;
        info!(version = %self.version, cached, "Installation complete");
        Ok(InstallReport {
          version: self.version.clone(),
          cached,
          already_active: false,
        })
      }
      Err(e) => {
        error!(version = %self.version, error = %e, "Installation failed");
        *state = WorkerState::Redundant;
        self.storage.delete_version(&self.version)?;
        self.db.delete_meta(INSTALLED_VERSION)?;
        Err(eyre!("Install of {} failed: {}", self.version, e))
      }
    }
  }

  async fn populate(&self) -> Result<usize> {
    let fetches = self.precache.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let response = self.network.fetch(&request).await?;
      if !response.is_ok() {
        return Err(eyre!("{} returned HTTP {}", url, response.status));
      }
      Ok::<(CacheKey, Response), color_eyre::Report>((CacheKey::for_url(Method::Get, url), response))
    });

    let entries = join_all(fetches)
      .await
      .into_iter()
      .collect::<Result<Vec<_>>>()?;
    let cached = entries.len();

    self.storage.open_version(&self.version)?.put_all(entries)?;
    Ok(cached)
  }

  /// Delete every version except the current one and mark it active
  pub async fn activate(&self) -> Result<ActivationReport> {
    let mut state = self.state.lock().await;

    match *state {
      WorkerState::Installed | WorkerState::Activated => {}
      other => {
        return Err(eyre!(
          "Cannot activate {} from state {:?}",
          self.version,
          other
        ))
      }
    }

    let previous = *state;
    *state = WorkerState::Activating;

    match self.evict_stale() {
      Ok(evicted) => {
        self.db.set_meta(ACTIVE_VERSION, &self.version)?;
        self.current.set(self.version.clone());
        *state = WorkerState::Activated;
        info!(version = %self.version, evicted = evicted.len(), "Activated");
        Ok(ActivationReport {
          version: self.version.clone(),
          evicted,
        })
      }
      Err(e) => {
        *state = previous;
        Err(e)
      }
    }
  }

  fn evict_stale(&self) -> Result<Vec<String>> {
    let mut evicted = Vec::new();
    for name in self.storage.list_versions()? {
      if name != self.version {
        info!(cache = %name, "Deleting old cache");
        self.storage.delete_version(&name)?;
        evicted.push(name);
      }
    }
    Ok(evicted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::testing::ScriptedNetwork;

  const ORIGIN: &str = "http://localhost:8000";

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  struct Fixture {
    db: Arc<Database>,
    storage: Arc<SqliteStorage>,
    network: Arc<ScriptedNetwork>,
  }

  impl Fixture {
    fn new() -> Self {
      let db = Arc::new(Database::open_in_memory().unwrap());
      Self {
        storage: Arc::new(SqliteStorage::new(Arc::clone(&db))),
        db,
        network: Arc::new(ScriptedNetwork::new()),
      }
    }

    fn lifecycle(&self, version: &str, precache: &[&str]) -> Lifecycle<SqliteStorage, ScriptedNetwork> {
      Lifecycle::new(
        Arc::clone(&self.storage),
        Arc::clone(&self.network),
        Arc::clone(&self.db),
        version,
        precache.iter().map(|p| url(p)).collect(),
      )
      .unwrap()
    }
  }

  #[tokio::test]
  async fn test_install_then_activate_evicts_old_versions() {
    let f = Fixture::new();
    f.network.respond(url("/dashboard/").as_str(), Response::new(200, "OK", "<html>"));
    f.network
      .respond(url("/dashboard/offline/").as_str(), Response::new(200, "OK", "offline"));

    let old_key = CacheKey::for_url(Method::Get, &url("/static/old.js"));
    f.storage
      .open_version("v0")
      .unwrap()
      .put(&old_key, Response::new(200, "OK", "old"))
      .unwrap();

    let lifecycle = f.lifecycle("v1", &["/dashboard/", "/dashboard/offline/"]);
    assert_eq!(lifecycle.state().await, WorkerState::Parsed);

    let report = lifecycle.install().await.unwrap();
    assert_eq!(report.cached, 2);
    assert_eq!(lifecycle.state().await, WorkerState::Installed);

    let report = lifecycle.activate().await.unwrap();
    assert_eq!(report.evicted, vec!["v0".to_string()]);
    assert_eq!(lifecycle.state().await, WorkerState::Activated);
    assert_eq!(lifecycle.active_version().unwrap().as_deref(), Some("v1"));

    assert!(f.storage.get_entry("v0", &old_key).unwrap().is_none());
    assert_eq!(f.storage.entry_keys("v1").unwrap().len(), 2);
    let offline = f
      .storage
      .get_entry("v1", &CacheKey::for_url(Method::Get, &url("/dashboard/offline/")))
      .unwrap()
      .unwrap();
    assert_eq!(offline.response.body, b"offline");
  }

  #[tokio::test]
  async fn test_failed_install_discards_version() {
    let f = Fixture::new();
    f.network.respond(url("/dashboard/").as_str(), Response::new(200, "OK", "<html>"));
    f.network
      .respond(url("/dashboard/settings/").as_str(), Response::new(404, "Not Found", ""));

    let lifecycle = f.lifecycle("v2", &["/dashboard/", "/dashboard/settings/"]);
    assert!(lifecycle.install().await.is_err());
    assert_eq!(lifecycle.state().await, WorkerState::Redundant);
    assert!(!f.storage.list_versions().unwrap().contains("v2"));

    assert!(lifecycle.activate().await.is_err());
  }

  #[tokio::test]
  async fn test_activate_requires_install() {
    let f = Fixture::new();
    let lifecycle = f.lifecycle("v1", &[]);
    assert!(lifecycle.activate().await.is_err());
    assert_eq!(lifecycle.state().await, WorkerState::Parsed);
  }

  #[tokio::test]
  async fn test_state_survives_restart() {
    let f = Fixture::new();
    f.network.respond(url("/dashboard/").as_str(), Response::new(200, "OK", "<html>"));

    {
      let lifecycle = f.lifecycle("v1", &["/dashboard/"]);
      lifecycle.install().await.unwrap();
      assert_eq!(
        f.lifecycle("v1", &["/dashboard/"]).state().await,
        WorkerState::Installed
      );
      lifecycle.activate().await.unwrap();
    }

    let restarted = f.lifecycle("v1", &["/dashboard/"]);
    assert_eq!(restarted.state().await, WorkerState::Activated);
    let report = restarted.install().await.unwrap();
    assert!(report.already_active);

    let next = f.lifecycle("v2", &["/dashboard/"]);
    assert_eq!(next.state().await, WorkerState::Parsed);
  }
}
