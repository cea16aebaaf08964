use url::Url;

use crate::http::Request;

/// Handling strategy for an intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Path under the API prefix
  Api,
  /// Navigation / HTML
  Document,
  /// Scripts, styles, images and everything else
  Static,
  /// Cross-origin: not intercepted
  Passthrough,
}

pub struct RequestClassifier {
  origin: Url,
  api_prefix: String,
}

impl RequestClassifier {
  pub fn new(origin: Url, api_prefix: impl Into<String>) -> Self {
    Self {
      origin,
      api_prefix: api_prefix.into(),
    }
  }

  pub fn classify(&self, request: &Request) -> Route {
    if request.url.origin() != self.origin.origin() {
      return Route::Passthrough;
    }

    if request.url.path().starts_with(&self.api_prefix) {
      Route::Api
    } else if request.is_navigation() {
      Route::Document
    } else {
      Route::Static
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::Destination;

  fn classifier() -> RequestClassifier {
    RequestClassifier::new(Url::parse("http://localhost:8000").unwrap(), "/api/")
  }

  fn request(url: &str, destination: Destination) -> Request {
    Request::get(Url::parse(url).unwrap()).with_destination(destination)
  }

  #[test]
  fn test_routes() {
    let c = classifier();
    assert_eq!(
      c.classify(&request("http://localhost:8000/api/sensor-data/?t=5", Destination::Other)),
      Route::Api
    );
    assert_eq!(
      c.classify(&request("http://localhost:8000/dashboard/", Destination::Document)),
      Route::Document
    );
    assert_eq!(
      c.classify(&request("http://localhost:8000/static/app.css", Destination::Style)),
      Route::Static
    );
    assert_eq!(
      c.classify(&request("http://localhost:8000/static/logo.png", Destination::Image)),
      Route::Static
    );
  }

  #[test]
  fn test_api_wins_over_navigation() {
    assert_eq!(
      classifier().classify(&request("http://localhost:8000/api/device-status/", Destination::Document)),
      Route::Api
    );
  }

  #[test]
  fn test_cross_origin_is_not_intercepted() {
    let c = classifier();
    assert_eq!(
      c.classify(&request("https://cdn.jsdelivr.net/npm/chart.js", Destination::Script)),
      Route::Passthrough
    );
    assert_eq!(
      c.classify(&request("http://localhost:9000/api/sensor-data/", Destination::Other)),
      Route::Passthrough
    );
    assert_eq!(
      c.classify(&request("https://localhost:8000/api/sensor-data/", Destination::Other)),
      Route::Passthrough
    );
  }

  #[test]
  fn test_prefix_must_match_path_start() {
    assert_eq!(
      classifier().classify(&request("http://localhost:8000/docs/api/intro", Destination::Other)),
      Route::Static
    );
  }
}
