//! Placeholder payloads for API endpoints that could not be reached and
//! were never cached.
//!
//! Every payload carries `offline: true` so the dashboard can tell
//! synthesized values from real device readings. Output depends only on
//! the path.

use serde::Serialize;

/// Known dashboard API endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
  SensorData,
  DeviceStatus,
  BatteryStatus,
  SystemHealth,
}

impl Endpoint {
  pub const ALL: [Endpoint; 4] = [
    Endpoint::SensorData,
    Endpoint::DeviceStatus,
    Endpoint::BatteryStatus,
    Endpoint::SystemHealth,
  ];

  pub fn path(&self) -> &'static str {
    match self {
      Endpoint::SensorData => "/api/sensor-data/",
      Endpoint::DeviceStatus => "/api/device-status/",
      Endpoint::BatteryStatus => "/api/battery-status/",
      Endpoint::SystemHealth => "/api/system-health/",
    }
  }

  pub fn from_path(path: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|e| e.path() == path)
  }
}

/// Offline placeholder body, one variant per endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FallbackPayload {
  SensorData {
    grip_force: u32,
    emg_signal: u32,
    temperature: f64,
    battery_level: u8,
    flex_sensor: [u32; 5],
    device_state: DeviceState,
    /// No reading exists while offline
    timestamp: Option<String>,
    offline: bool,
    message: &'static str,
  },
  DeviceStatus {
    status: &'static str,
    last_seen: Option<String>,
    offline: bool,
    message: &'static str,
  },
  BatteryStatus {
    level: u8,
    charging: bool,
    offline: bool,
    message: &'static str,
  },
  SystemHealth {
    overall_status: &'static str,
    offline: bool,
    message: &'static str,
  },
  Unknown {
    error: &'static str,
    offline: bool,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
  pub is_running: bool,
  pub emergency_stop: bool,
  pub connection_status: &'static str,
}

/// Placeholder payload for an API path
pub fn offline_data(path: &str) -> FallbackPayload {
  match Endpoint::from_path(path) {
    Some(Endpoint::SensorData) => FallbackPayload::SensorData {
      grip_force: 0,
      emg_signal: 0,
      temperature: 22.5,
      battery_level: 85,
      flex_sensor: [0; 5],
      device_state: DeviceState {
        is_running: false,
        emergency_stop: false,
        connection_status: "offline",
      },
      timestamp: None,
      offline: true,
      message: "Device data unavailable - using cached values",
    },
    Some(Endpoint::DeviceStatus) => FallbackPayload::DeviceStatus {
      status: "offline",
      last_seen: None,
      offline: true,
      message: "Device status unavailable offline",
    },
    Some(Endpoint::BatteryStatus) => FallbackPayload::BatteryStatus {
      level: 85,
      charging: false,
      offline: true,
      message: "Battery status unavailable offline",
    },
    Some(Endpoint::SystemHealth) => FallbackPayload::SystemHealth {
      overall_status: "offline",
      offline: true,
      message: "System health check unavailable offline",
    },
    None => FallbackPayload::Unknown {
      error: "API endpoint not available offline",
      offline: true,
    },
  }
}
