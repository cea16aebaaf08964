//! Core types describing where a served response came from.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};

use crate::http::Response;

/// A response handed back to the page, with metadata about its origin.
#[derive(Debug, Clone)]
pub struct Served {
  /// The response itself
  pub response: Response,
  /// Where the response came from
  pub source: ResponseSource,
  /// When the snapshot was stored (if served from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  /// Fresh response from the network
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  /// Previously stored snapshot, served because the network failed
  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Cache,
      cached_at: Some(cached.stored_at),
    }
  }

  /// Placeholder payload generated locally
  pub fn synthesized(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Synthesized,
      cached_at: None,
    }
  }

  /// Synthetic 503
  pub fn unavailable(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Unavailable,
      cached_at: None,
    }
  }

  pub fn is_offline(&self) -> bool {
    self.source != ResponseSource::Network
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
  /// Network fetch succeeded
  Network,
  /// Network failed, stored snapshot served
  Cache,
  /// Network failed, nothing cached, fallback data or placeholder served
  Synthesized,
  /// Nothing could be served; synthetic 503
  Unavailable,
}

/// A snapshot read back from the cache store
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub stored_at: DateTime<Utc>,
}

/// Name of the cache version that runtime reads and writes go to. Shared
/// between the lifecycle, which moves it on activation, and the cache layer.
#[derive(Debug, Clone)]
pub struct CurrentVersion(Arc<RwLock<String>>);

impl CurrentVersion {
  pub fn new(name: impl Into<String>) -> Self {
    Self(Arc::new(RwLock::new(name.into())))
  }

  pub fn get(&self) -> String {
    self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
  }

  pub fn set(&self, name: impl Into<String>) {
    *self.0.write().unwrap_or_else(|e| e.into_inner()) = name.into();
  }
}
