//! Network-first handling strategies with cache and synthesized fallbacks.

use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::key::CacheKey;
use super::storage::CacheStorage;
use super::traits::{CachedResponse, CurrentVersion, Served};
use crate::fallback;
use crate::http::{Destination, Method, Network, Request, Response};

/// Header set on locally synthesized API responses
pub const OFFLINE_HEADER: &str = "SW-Offline";

/// Cache layer that sits between the page and the network.
///
/// Each strategy tries the network first. A network error or a non-ok
/// status falls back to the stored snapshot, then to synthesized data, so
/// the caller always gets a well-formed response.
pub struct CacheLayer<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  /// Version that reads and writes go to; follows activation
  version: CurrentVersion,
  /// Key of the pre-cached offline page
  offline_key: CacheKey,
}

impl<S: CacheStorage, N: Network> CacheLayer<S, N> {
  pub fn new(storage: Arc<S>, network: Arc<N>, version: CurrentVersion, offline_url: &Url) -> Self {
    Self {
      storage,
      network,
      version,
      offline_key: CacheKey::for_url(Method::Get, offline_url),
    }
  }

  /// Version currently read from and written to
  pub fn version(&self) -> String {
    self.version.get()
  }

  /// API strategy.
  ///
  /// 1. Fetch from network; on 2xx/3xx store under `api-<path>` and return
  /// 2. On failure, serve the stored snapshot for the path
  /// 3. Otherwise synthesize the endpoint's offline payload (status 200)
  pub async fn fetch_api(&self, request: &Request) -> Served {
    let key = CacheKey::api(&request.url);

    if let Some(response) = self.try_network(request).await {
      if request.method == Method::Get {
        self.store(&key, response.clone());
      }
      return Served::from_network(response);
    }

    if let Some(cached) = self.lookup(&key) {
      info!(key = %key, "Serving API response from cache");
      return Served::from_cache(cached);
    }

    let payload = fallback::offline_data(request.url.path());
    match Response::json(&payload) {
      Ok(response) => {
        info!(path = request.url.path(), "Serving synthesized offline data");
        Served::synthesized(response.with_header(OFFLINE_HEADER, "true"))
      }
      Err(e) => {
        warn!(error = %e, "Failed to encode offline data");
        Served::unavailable(Response::service_unavailable("Offline"))
      }
    }
  }

  /// Document strategy.
  ///
  /// Network first; on failure the pre-cached offline page, else a 503.
  pub async fn fetch_document(&self, request: &Request) -> Served {
    if let Some(response) = self.try_network(request).await {
      return Served::from_network(response);
    }

    info!(url = %request.url, "Document request failed, serving offline page");
    match self.lookup(&self.offline_key) {
      Some(cached) => Served::from_cache(cached),
      None => Served::unavailable(Response::service_unavailable("Offline")),
    }
  }

  /// Static asset strategy.
  ///
  /// Network first, storing successes under the exact request identity.
  /// On failure the stored copy; missing images become an empty
  /// placeholder, everything else a 503.
  pub async fn fetch_static(&self, request: &Request) -> Served {
    let key = CacheKey::request(request);

    if let Some(response) = self.try_network(request).await {
      if request.method == Method::Get {
        self.store(&key, response.clone());
      }
      return Served::from_network(response);
    }

    if let Some(cached) = self.lookup(&key) {
      return Served::from_cache(cached);
    }

    if request.destination == Destination::Image {
      return Served::synthesized(Response::placeholder_image());
    }

    Served::unavailable(Response::service_unavailable(
      "Resource not available offline",
    ))
  }

  /// Network attempt; `None` on error or non-ok status
  async fn try_network(&self, request: &Request) -> Option<Response> {
    match self.network.fetch(request).await {
      Ok(response) if response.is_success_or_redirect() => Some(response),
      Ok(response) => {
        debug!(url = %request.url, status = response.status, "Network returned error status");
        None
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Network request failed");
        None
      }
    }
  }

  /// Store a snapshot; failures are logged and the response is still served
  fn store(&self, key: &CacheKey, response: Response) {
    let result = self
      .storage
      .open_version(&self.version.get())
      .and_then(|cache| cache.put(key, response));

    if let Err(e) = result {
      warn!(key = %key, error = %e, "Failed to cache response, continuing without it");
    }
  }

  /// Read a snapshot; storage errors count as a miss
  fn lookup(&self, key: &CacheKey) -> Option<CachedResponse> {
    match self.storage.get_entry(&self.version.get(), key) {
      Ok(cached) => cached,
      Err(e) => {
        warn!(key = %key, error = %e, "Failed to read cache");
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStorage;
  use crate::cache::traits::ResponseSource;
  use crate::db::Database;
  use crate::testing::ScriptedNetwork;
  use serde_json::json;

  const ORIGIN: &str = "http://localhost:8000";

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  fn layer(network: Arc<ScriptedNetwork>) -> (CacheLayer<SqliteStorage, ScriptedNetwork>, Arc<SqliteStorage>) {
    let storage = Arc::new(SqliteStorage::new(Arc::new(
      Database::open_in_memory().unwrap(),
    )));
    let layer = CacheLayer::new(
      Arc::clone(&storage),
      network,
      CurrentVersion::new("v1"),
      &url("/dashboard/offline/"),
    );
    (layer, storage)
  }

  #[tokio::test]
  async fn test_api_failure_after_success_serves_cached_body() {
    let network = Arc::new(ScriptedNetwork::new());
    let (layer, _) = layer(Arc::clone(&network));
    let body = br#"{"level":42,"charging":true}"#.to_vec();

    network.respond(
      url("/api/battery-status/?poll=1").as_str(),
      Response::new(200, "OK", body.clone()).with_header("Content-Type", "application/json"),
    );
    let first = layer
      .fetch_api(&Request::get(url("/api/battery-status/?poll=1")))
      .await;
    assert_eq!(first.source, ResponseSource::Network);

    network.fail(url("/api/battery-status/?poll=2").as_str());
    let second = layer
      .fetch_api(&Request::get(url("/api/battery-status/?poll=2")))
      .await;
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response.body, body);
  }

  #[tokio::test]
  async fn test_api_failure_without_cache_synthesizes() {
    let network = Arc::new(ScriptedNetwork::new());
    let (layer, _) = layer(Arc::clone(&network));

    let served = layer
      .fetch_api(&Request::get(url("/api/battery-status/")))
      .await;

    assert_eq!(served.source, ResponseSource::Synthesized);
    assert_eq!(served.response.status, 200);
    assert_eq!(served.response.header(OFFLINE_HEADER), Some("true"));
    assert_eq!(
      served.response.json_body().unwrap(),
      json!({
        "level": 85,
        "charging": false,
        "offline": true,
        "message": "Battery status unavailable offline"
      })
    );
  }

  #[tokio::test]
  async fn test_api_error_status_is_a_failure() {
    let network = Arc::new(ScriptedNetwork::new());
    let (layer, storage) = layer(Arc::clone(&network));
    network.respond(
      url("/api/system-health/").as_str(),
      Response::new(500, "Internal Server Error", "boom"),
    );

    let served = layer
      .fetch_api(&Request::get(url("/api/system-health/")))
      .await;

    assert_eq!(served.source, ResponseSource::Synthesized);
    assert_eq!(served.response.json_body().unwrap()["offline"], json!(true));
    assert!(storage.entry_keys("v1").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_document_falls_back_to_offline_page_then_503() {
    let network = Arc::new(ScriptedNetwork::new());
    let (layer, storage) = layer(Arc::clone(&network));
    let request = Request::get(url("/dashboard/control/")).with_destination(Destination::Document);

    let served = layer.fetch_document(&request).await;
    assert_eq!(served.source, ResponseSource::Unavailable);
    assert_eq!(served.response.status, 503);

    storage
      .open_version("v1")
      .unwrap()
      .put(
        &CacheKey::for_url(Method::Get, &url("/dashboard/offline/")),
        Response::new(200, "OK", "<h1>Offline</h1>"),
      )
      .unwrap();

    let served = layer.fetch_document(&request).await;
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"<h1>Offline</h1>");
  }

  #[tokio::test]
  async fn test_document_success_is_not_cached() {
    let network = Arc::new(ScriptedNetwork::new());
    let (layer, storage) = layer(Arc::clone(&network));
    network.respond(url("/dashboard/").as_str(), Response::new(200, "OK", "<html>"));

    let served = layer
      .fetch_document(&Request::get(url("/dashboard/")).with_destination(Destination::Document))
      .await;

    assert_eq!(served.source, ResponseSource::Network);
    assert!(storage.entry_keys("v1").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_static_cached_by_exact_identity() {
    let network = Arc::new(ScriptedNetwork::new());
    let (layer, _) = layer(Arc::clone(&network));
    let script = url("/static/dashboard/js/notifications.js?v=2");

    network.respond(script.as_str(), Response::new(200, "OK", "console.log(1)"));
    layer.fetch_static(&Request::get(script.clone())).await;

    network.fail(script.as_str());
    let served = layer.fetch_static(&Request::get(script)).await;
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"console.log(1)");

    let other = url("/static/dashboard/js/notifications.js?v=3");
    let served = layer.fetch_static(&Request::get(other)).await;
    assert_eq!(served.response.status, 503);
  }

  #[tokio::test]
  async fn test_missing_image_gets_placeholder() {
    let network = Arc::new(ScriptedNetwork::new());
    let (layer, _) = layer(Arc::clone(&network));

    let served = layer
      .fetch_static(
        &Request::get(url("/static/dashboard/images/hand.png")).with_destination(Destination::Image),
      )
      .await;

    assert_eq!(served.response.status, 200);
    assert!(served.response.content_type().unwrap().starts_with("image/"));
    assert!(served.response.body.is_empty());
  }

  #[tokio::test]
  async fn test_reads_and_writes_follow_current_version() {
    let network = Arc::new(ScriptedNetwork::new());
    let storage = Arc::new(SqliteStorage::new(Arc::new(
      Database::open_in_memory().unwrap(),
    )));
    let current = CurrentVersion::new("v1");
    let layer = CacheLayer::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      current.clone(),
      &url("/dashboard/offline/"),
    );
    let target = url("/api/sensor-data/");

    network.respond(target.as_str(), Response::new(200, "OK", "{\"grip_force\":3}"));
    layer.fetch_api(&Request::get(target.clone())).await;
    assert_eq!(storage.entry_keys("v1").unwrap(), vec!["api-/api/sensor-data/"]);

    current.set("v2");
    assert_eq!(layer.version(), "v2");
    network.fail(target.as_str());
    let served = layer.fetch_api(&Request::get(target)).await;
    assert_eq!(served.source, ResponseSource::Synthesized);
  }
}
