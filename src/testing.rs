//! In-process fakes for the network and the host clients.

use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use url::Url;

use crate::http::{Network, Request, Response};
use crate::worker::{Clients, Notification, WindowClient};

#[derive(Clone)]
enum Outcome {
  Respond(Response),
  Fail,
}

/// Network that answers from a per-URL script. Unscripted URLs fail as if
/// offline. One-shot outcomes are consumed before the standing one.
#[derive(Default)]
pub struct ScriptedNetwork {
  standing: Mutex<HashMap<String, Outcome>>,
  once: Mutex<HashMap<String, VecDeque<Outcome>>>,
  requests: Mutex<Vec<Request>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: Response) {
    self
      .standing
      .lock()
      .unwrap()
      .insert(url.to_string(), Outcome::Respond(response));
  }

  pub fn fail(&self, url: &str) {
    self
      .standing
      .lock()
      .unwrap()
      .insert(url.to_string(), Outcome::Fail);
  }

  pub fn fail_once(&self, url: &str) {
    self
      .once
      .lock()
      .unwrap()
      .entry(url.to_string())
      .or_default()
      .push_back(Outcome::Fail);
  }

  /// Every request seen so far, in order
  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }

  fn outcome_for(&self, url: &str) -> Outcome {
    if let Some(outcome) = self
      .once
      .lock()
      .unwrap()
      .get_mut(url)
      .and_then(|queue| queue.pop_front())
    {
      return outcome;
    }

    self
      .standing
      .lock()
      .unwrap()
      .get(url)
      .cloned()
      .unwrap_or(Outcome::Fail)
  }
}

impl Network for ScriptedNetwork {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send {
    self.requests.lock().unwrap().push(request.clone());
    let url = request.url.to_string();
    let outcome = self.outcome_for(&url);

    async move {
      // Give concurrently polled handlers a chance to interleave
      tokio::task::yield_now().await;
      match outcome {
        Outcome::Respond(response) => Ok(response),
        Outcome::Fail => Err(eyre!("Network unreachable: {}", url)),
      }
    }
  }
}

/// Host clients fake that records every call
#[derive(Default)]
pub struct RecordingClients {
  pub windows: Mutex<Vec<WindowClient>>,
  pub shown: Mutex<Vec<Notification>>,
  pub closed: Mutex<Vec<String>>,
  pub focused: Mutex<Vec<String>>,
  pub opened: Mutex<Vec<Url>>,
  pub claims: Mutex<u32>,
}

impl RecordingClients {
  pub fn with_windows(windows: Vec<WindowClient>) -> Self {
    Self {
      windows: Mutex::new(windows),
      ..Self::default()
    }
  }
}

impl Clients for RecordingClients {
  fn show_notification(&self, notification: &Notification) -> Result<()> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }

  fn close_notification(&self, tag: &str) -> Result<()> {
    self.closed.lock().unwrap().push(tag.to_string());
    Ok(())
  }

  fn windows(&self) -> Result<Vec<WindowClient>> {
    Ok(self.windows.lock().unwrap().clone())
  }

  fn focus(&self, id: &str) -> Result<()> {
    self.focused.lock().unwrap().push(id.to_string());
    Ok(())
  }

  fn open_window(&self, url: &Url) -> Result<()> {
    self.opened.lock().unwrap().push(url.clone());
    Ok(())
  }

  fn claim(&self) -> Result<()> {
    *self.claims.lock().unwrap() += 1;
    Ok(())
  }
}
