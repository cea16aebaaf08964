use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// HTTP method of an intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      other => Err(eyre!("Unsupported HTTP method: {}", other)),
    }
  }
}

/// What the page intends to do with the response (mirrors the fetch destination)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  /// Top-level navigation
  Document,
  Image,
  Script,
  Style,
  Font,
  /// fetch()/XHR and anything else without a specific destination
  #[default]
  Other,
}

impl FromStr for Destination {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_lowercase().as_str() {
      "document" => Ok(Destination::Document),
      "image" => Ok(Destination::Image),
      "script" => Ok(Destination::Script),
      "style" => Ok(Destination::Style),
      "font" => Ok(Destination::Font),
      "" | "other" => Ok(Destination::Other),
      other => Err(eyre!("Unknown request destination: {}", other)),
    }
  }
}

/// An intercepted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub destination: Destination,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
      headers: Vec::new(),
      destination: Destination::Other,
      body: None,
    }
  }

  /// POST with a JSON body, used for delivering queued actions
  pub fn post_json(url: Url, body: &serde_json::Value) -> Result<Self> {
    let body =
      serde_json::to_vec(body).map_err(|e| eyre!("Failed to serialize request body: {}", e))?;
    Ok(Self {
      method: Method::Post,
      url,
      headers: vec![("Content-Type".to_string(), "application/json".to_string())],
      destination: Destination::Other,
      body: Some(body),
    })
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  /// A navigation is either an explicit document fetch or a GET asking for HTML
  pub fn is_navigation(&self) -> bool {
    self.destination == Destination::Document
      || (self.method == Method::Get
        && self
          .header("accept")
          .is_some_and(|accept| accept.contains("text/html")))
  }
}

/// A response snapshot: status line, headers and the full body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, status_text: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: status_text.into(),
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// JSON response with status 200
  pub fn json<T: Serialize>(value: &T) -> Result<Self> {
    let body =
      serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize response body: {}", e))?;
    Ok(Self::new(200, "OK", body).with_header("Content-Type", "application/json"))
  }

  /// Synthetic 503 handed to the page when nothing else can be served
  pub fn service_unavailable(body: &str) -> Self {
    Self::new(503, "Service Unavailable", body.as_bytes().to_vec())
      .with_header("Content-Type", "text/plain")
  }

  /// Empty image so broken-network pages still lay out
  pub fn placeholder_image() -> Self {
    Self::new(200, "OK", Vec::new()).with_header("Content-Type", "image/svg+xml")
  }

  /// 2xx
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// 2xx or 3xx
  pub fn is_success_or_redirect(&self) -> bool {
    (200..400).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }

  pub fn json_body(&self) -> Result<serde_json::Value> {
    serde_json::from_slice(&self.body).map_err(|e| eyre!("Response body is not JSON: {}", e))
  }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(k, _)| k.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}
