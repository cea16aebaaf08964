//! Cache key derivation.

use std::fmt;
use url::Url;

use crate::http::{Method, Request};

/// Identity under which a response snapshot is stored.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
  /// API responses, normalized to the path (query string dropped)
  Api { path: String },
  /// Documents and static assets, keyed by exact request identity
  Request { method: Method, url: String },
}

impl CacheKey {
  /// Normalized key for an API URL: `api-<path>`
  pub fn api(url: &Url) -> Self {
    Self::Api {
      path: url.path().to_string(),
    }
  }

  /// Exact identity of a request (method + URL without fragment)
  pub fn request(request: &Request) -> Self {
    Self::for_url(request.method, &request.url)
  }

  pub fn for_url(method: Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self::Request {
      method,
      url: url.to_string(),
    }
  }

  /// Parse the stored string form back into a key
  pub fn parse(stored: &str) -> Option<Self> {
    if let Some(path) = stored.strip_prefix("api-") {
      return Some(Self::Api {
        path: path.to_string(),
      });
    }

    let (method, url) = stored.split_once(' ')?;
    Some(Self::Request {
      method: method.parse().ok()?,
      url: url.to_string(),
    })
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Api { path } => write!(f, "api-{}", path),
      Self::Request { method, url } => write!(f, "{} {}", method, url),
    }
  }
}
