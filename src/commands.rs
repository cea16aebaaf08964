//! Command-line subcommands and their translation into worker events.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;

use crate::config::Config;
use crate::http::{Destination, Method, Request};
use crate::queue::Category;
use crate::worker::{ControlMessage, WorkerEvent};

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
  /// Pre-cache the current version (activates it too unless skip_waiting is off)
  Install,
  /// Activate the installed version and evict stale caches
  Activate,
  /// Ask a waiting version to activate now
  SkipWaiting,
  /// Route a request through the offline layer
  #[command(visible_alias = "f")]
  Fetch {
    /// Path relative to the origin, or an absolute URL
    target: String,
    /// document, image, script, style, font or other
    #[arg(short, long, default_value = "other")]
    destination: String,
    #[arg(short, long, default_value = "GET")]
    method: String,
    /// JSON request body
    #[arg(short, long)]
    body: Option<String>,
  },
  /// Queue an action for background delivery
  #[command(visible_alias = "q")]
  Queue {
    /// device-control, notification-logs or analytics-data
    category: String,
    /// Action payload as JSON
    action: String,
  },
  /// Deliver queued actions (all categories unless one is given)
  #[command(visible_alias = "s")]
  Sync {
    #[arg(short, long)]
    category: Option<String>,
  },
  /// List queued actions
  #[command(visible_alias = "p")]
  Pending {
    #[arg(short, long)]
    category: Option<String>,
  },
  /// Show cache version and lifecycle state
  Status,
  /// Simulate an inbound push message
  Push {
    /// Push payload as JSON
    data: Option<String>,
  },
  /// Simulate a notification click
  Click {
    #[arg(short, long)]
    tag: Option<String>,
  },
}

/// What running a command amounts to
#[derive(Debug, Clone)]
pub enum Action {
  /// Deliver one event to the worker
  Dispatch(WorkerEvent),
  /// Read the queue without touching the network
  ListPending(Vec<Category>),
  Status,
}

impl Command {
  pub fn into_action(self, config: &Config) -> Result<Action> {
    let event = match self {
      Command::Install => WorkerEvent::Install,
      Command::Activate => WorkerEvent::Activate,
      Command::SkipWaiting => WorkerEvent::Message(ControlMessage::SkipWaiting),
      Command::Fetch {
        target,
        destination,
        method,
        body,
      } => {
        let method: Method = method.parse()?;
        let body = match body {
          Some(json) => Some(parse_json(&json)?.to_string().into_bytes()),
          None => None,
        };
        let mut headers = Vec::new();
        if body.is_some() {
          headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }

        WorkerEvent::Fetch(Request {
          method,
          url: config.resolve(&target)?,
          headers,
          destination: destination.parse::<Destination>()?,
          body,
        })
      }
      Command::Queue { category, action } => WorkerEvent::Message(ControlMessage::QueueAction {
        category: category.parse()?,
        action: parse_json(&action)?,
      }),
      Command::Sync { category: None } => WorkerEvent::Online,
      Command::Sync {
        category: Some(category),
      } => WorkerEvent::Sync {
        tag: category.parse::<Category>()?.sync_tag().to_string(),
      },
      Command::Pending { category } => {
        let categories = match category {
          Some(category) => vec![category.parse()?],
          None => Category::ALL.to_vec(),
        };
        return Ok(Action::ListPending(categories));
      }
      Command::Status => return Ok(Action::Status),
      Command::Push { data } => WorkerEvent::Push {
        data: data.map(String::into_bytes),
      },
      Command::Click { tag } => WorkerEvent::NotificationClick { tag },
    };

    Ok(Action::Dispatch(event))
  }
}

fn parse_json(input: &str) -> Result<Value> {
  serde_json::from_str(input).map_err(|e| eyre!("Invalid JSON '{}': {}", input, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;
  use serde_json::json;

  #[derive(Parser, Debug)]
  struct Cli {
    #[command(subcommand)]
    command: Command,
  }

  fn action(args: &[&str]) -> Result<Action> {
    let cli = Cli::try_parse_from(std::iter::once("offline-sw").chain(args.iter().copied()))
      .map_err(|e| eyre!("{}", e))?;
    cli.command.into_action(&Config::default())
  }

  fn event(args: &[&str]) -> WorkerEvent {
    match action(args).unwrap() {
      Action::Dispatch(event) => event,
      other => panic!("expected an event, got {:?}", other),
    }
  }

  #[test]
  fn test_fetch_resolves_against_origin() {
    match event(&["fetch", "/api/sensor-data/?t=1", "--destination", "document"]) {
      WorkerEvent::Fetch(request) => {
        assert_eq!(request.url.as_str(), "http://localhost:8000/api/sensor-data/?t=1");
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.destination, Destination::Document);
        assert!(request.body.is_none());
      }
      other => panic!("unexpected event {:?}", other),
    }
  }

  #[test]
  fn test_fetch_with_body() {
    match event(&["f", "/api/device-control/", "-m", "post", "-b", "{\"cmd\":\"open\"}"]) {
      WorkerEvent::Fetch(request) => {
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.body.as_deref(), Some(&b"{\"cmd\":\"open\"}"[..]));
      }
      other => panic!("unexpected event {:?}", other),
    }
  }

  #[test]
  fn test_queue_builds_control_message() {
    match event(&["queue", "device-control", "{\"grip\": 40}"]) {
      WorkerEvent::Message(ControlMessage::QueueAction { category, action }) => {
        assert_eq!(category, Category::DeviceControl);
        assert_eq!(action, json!({"grip": 40}));
      }
      other => panic!("unexpected event {:?}", other),
    }
  }

  #[test]
  fn test_sync_with_and_without_category() {
    assert!(matches!(event(&["sync"]), WorkerEvent::Online));
    match event(&["s", "--category", "analytics-data"]) {
      WorkerEvent::Sync { tag } => assert_eq!(tag, "analytics-data-sync"),
      other => panic!("unexpected event {:?}", other),
    }
  }

  #[test]
  fn test_pending_lists_categories() {
    match action(&["pending"]).unwrap() {
      Action::ListPending(categories) => assert_eq!(categories, Category::ALL.to_vec()),
      other => panic!("unexpected action {:?}", other),
    }
    match action(&["p", "-c", "notification-logs"]).unwrap() {
      Action::ListPending(categories) => assert_eq!(categories, vec![Category::NotificationLogs]),
      other => panic!("unexpected action {:?}", other),
    }
  }

  #[test]
  fn test_invalid_input_is_rejected() {
    assert!(action(&["queue", "firmware", "{}"]).is_err());
    assert!(action(&["queue", "device-control", "not json"]).is_err());
    assert!(action(&["fetch", "/x", "--method", "TRACE"]).is_err());
    assert!(action(&["fetch", "/x", "--destination", "video"]).is_err());
  }

  #[test]
  fn test_push_and_click() {
    match event(&["push", "{\"title\":\"hi\"}"]) {
      WorkerEvent::Push { data } => assert_eq!(data.as_deref(), Some(&b"{\"title\":\"hi\"}"[..])),
      other => panic!("unexpected event {:?}", other),
    }
    match event(&["click", "--tag", "bionic-hand-notification"]) {
      WorkerEvent::NotificationClick { tag } => {
        assert_eq!(tag.as_deref(), Some("bionic-hand-notification"))
      }
      other => panic!("unexpected event {:?}", other),
    }
  }
}
