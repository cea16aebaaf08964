use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::lifecycle::{ActivationReport, InstallReport};
use super::notify::{ClickOutcome, Notification};
use crate::cache::Served;
use crate::http::Request;
use crate::queue::{ActionId, Category};
use crate::sync::SyncReport;

/// Every event the host can deliver to the worker
#[derive(Debug, Clone)]
pub enum WorkerEvent {
  /// A new version was deployed
  Install,
  /// Take over from the previous version
  Activate,
  /// An intercepted request
  Fetch(Request),
  /// A deferred-execution trigger fired for the tag
  Sync { tag: String },
  /// Connectivity restored: run every registered sync
  Online,
  /// Inbound push message (raw JSON bytes, if any)
  Push { data: Option<Vec<u8>> },
  /// The user clicked a notification
  NotificationClick { tag: Option<String> },
  /// Message from a dashboard page
  Message(ControlMessage),
}

/// Outcome of handling one event
#[must_use]
#[derive(Debug, Clone)]
pub enum EventOutcome {
  Installed {
    install: InstallReport,
    /// Present when the install activated immediately (skip waiting)
    activation: Option<ActivationReport>,
  },
  Activated(ActivationReport),
  /// Response for an intercepted request
  Response(Served),
  /// Cross-origin; the host performs the request itself
  NotIntercepted(Request),
  Synced(Vec<SyncReport>),
  NotificationShown(Notification),
  Clicked(ClickOutcome),
  Reply(MessageReply),
  /// The event had nothing to act on
  Ignored { reason: String },
}

/// Messages posted by dashboard pages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Activate a waiting version now
  SkipWaiting,
  /// Queue an action for background delivery
  QueueAction { category: Category, action: Value },
  /// Ask for the current cache version
  GetCacheStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageReply {
  CacheStatus { cached: bool, version: String },
  Queued { id: ActionId, category: Category },
  Ack { ok: bool },
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_decode_control_messages() {
    let skip: ControlMessage = serde_json::from_value(json!({"type": "SKIP_WAITING"})).unwrap();
    assert_eq!(skip, ControlMessage::SkipWaiting);

    let queue: ControlMessage = serde_json::from_value(json!({
      "type": "QUEUE_ACTION",
      "category": "device-control",
      "action": {"cmd": "open"}
    }))
    .unwrap();
    assert_eq!(
      queue,
      ControlMessage::QueueAction {
        category: Category::DeviceControl,
        action: json!({"cmd": "open"})
      }
    );

    let status: ControlMessage =
      serde_json::from_value(json!({"type": "GET_CACHE_STATUS"})).unwrap();
    assert_eq!(status, ControlMessage::GetCacheStatus);
  }

  #[test]
  fn test_unknown_category_or_type_is_rejected() {
    assert!(serde_json::from_value::<ControlMessage>(json!({
      "type": "QUEUE_ACTION",
      "category": "firmware",
      "action": {}
    }))
    .is_err());
    assert!(serde_json::from_value::<ControlMessage>(json!({"type": "REBOOT"})).is_err());
  }

  #[test]
  fn test_cache_status_reply_shape() {
    let reply = MessageReply::CacheStatus {
      cached: true,
      version: "bionic-hand-dashboard-v1.0.0".to_string(),
    };
    assert_eq!(
      serde_json::to_value(reply).unwrap(),
      json!({"cached": true, "version": "bionic-hand-dashboard-v1.0.0"})
    );
  }
}
