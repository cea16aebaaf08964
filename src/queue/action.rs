use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Kind of action awaiting delivery. Each maps to exactly one endpoint and
/// one sync tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
  DeviceControl,
  NotificationLogs,
  AnalyticsData,
}

impl Category {
  pub const ALL: [Category; 3] = [
    Category::DeviceControl,
    Category::NotificationLogs,
    Category::AnalyticsData,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Category::DeviceControl => "device-control",
      Category::NotificationLogs => "notification-logs",
      Category::AnalyticsData => "analytics-data",
    }
  }

  /// Server endpoint that accepts this category (POST, JSON body)
  pub fn endpoint(&self) -> &'static str {
    match self {
      Category::DeviceControl => "/api/device-control/",
      Category::NotificationLogs => "/api/notifications/log/",
      Category::AnalyticsData => "/api/analytics/sync/",
    }
  }

  /// Name of the deferred-execution registration
  pub fn sync_tag(&self) -> &'static str {
    match self {
      Category::DeviceControl => "device-control-sync",
      Category::NotificationLogs => "notification-log-sync",
      Category::AnalyticsData => "analytics-data-sync",
    }
  }

  pub fn from_sync_tag(tag: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|c| c.sync_tag() == tag)
  }
}

impl fmt::Display for Category {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Category {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|c| c.as_str() == s)
      .ok_or_else(|| {
        eyre!(
          "Unknown action category '{}' (expected device-control, notification-logs or analytics-data)",
          s
        )
      })
  }
}

/// Action data tagged with its category, so a stored action can only ever
/// be delivered to its own endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", content = "payload", rename_all = "kebab-case")]
pub enum ActionPayload {
  DeviceControl(Value),
  NotificationLogs(Value),
  AnalyticsData(Value),
}

impl ActionPayload {
  pub fn new(category: Category, data: Value) -> Self {
    match category {
      Category::DeviceControl => Self::DeviceControl(data),
      Category::NotificationLogs => Self::NotificationLogs(data),
      Category::AnalyticsData => Self::AnalyticsData(data),
    }
  }

  pub fn category(&self) -> Category {
    match self {
      Self::DeviceControl(_) => Category::DeviceControl,
      Self::NotificationLogs(_) => Category::NotificationLogs,
      Self::AnalyticsData(_) => Category::AnalyticsData,
    }
  }

  /// Body posted to the category endpoint
  pub fn data(&self) -> &Value {
    match self {
      Self::DeviceControl(data) | Self::NotificationLogs(data) | Self::AnalyticsData(data) => data,
    }
  }
}

/// Time-derived, strictly increasing action id (milliseconds since epoch,
/// bumped on collision). Serialized as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl FromStr for ActionId {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    s.parse()
      .map(ActionId)
      .map_err(|e| eyre!("Invalid action id '{}': {}", s, e))
  }
}

impl Serialize for ActionId {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for ActionId {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}

/// An action owned by the queue until its delivery is confirmed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingAction {
  pub id: ActionId,
  #[serde(flatten)]
  pub payload: ActionPayload,
  pub timestamp: DateTime<Utc>,
  /// Failed delivery attempts so far
  pub attempts: u32,
  /// Earliest time the next attempt is due (None: immediately)
  pub next_attempt_at: Option<DateTime<Utc>>,
  pub last_error: Option<String>,
}

impl PendingAction {
  pub fn category(&self) -> Category {
    self.payload.category()
  }

  pub fn is_due(&self, now: DateTime<Utc>) -> bool {
    self.next_attempt_at.map_or(true, |at| at <= now)
  }
}
