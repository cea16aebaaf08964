//! Persistent deferred-execution registrations, one per category.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::parse_datetime;
use crate::db::Database;
use crate::queue::Category;

/// Sync registration state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
  /// Waiting for the trigger (connectivity or explicit)
  Pending,
  /// A drain is in progress
  Firing,
  /// Gave up after too many failed cycles; re-armed by the next registration
  Failed,
}

impl SyncState {
  fn as_str(&self) -> &'static str {
    match self {
      SyncState::Pending => "pending",
      SyncState::Firing => "firing",
      SyncState::Failed => "failed",
    }
  }

  fn parse(s: &str) -> Result<Self> {
    match s {
      "pending" => Ok(SyncState::Pending),
      "firing" => Ok(SyncState::Firing),
      "failed" => Ok(SyncState::Failed),
      other => Err(eyre!("Unknown sync state '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRegistration {
  pub category: Category,
  pub state: SyncState,
  /// Consecutive drain cycles that left failures behind
  pub failed_cycles: u32,
  pub registered_at: DateTime<Utc>,
  pub last_fired_at: Option<DateTime<Utc>>,
}

impl SyncRegistration {
  pub fn tag(&self) -> &'static str {
    self.category.sync_tag()
  }
}

pub struct SyncRegistry {
  db: Arc<Database>,
}

impl SyncRegistry {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Register a sync for the category. Registering while one is already
  /// pending or firing changes nothing; a failed registration is re-armed.
  /// Returns true if a new registration was created.
  pub fn register(&self, category: Category) -> Result<bool> {
    let conn = self.db.conn()?;
    let inserted = conn
      .execute(
        "INSERT OR IGNORE INTO sync_registrations (tag, state) VALUES (?, 'pending')",
        params![category.sync_tag()],
      )
      .map_err(|e| eyre!("Failed to register sync {}: {}", category.sync_tag(), e))?;

    if inserted == 0 {
      conn
        .execute(
          "UPDATE sync_registrations SET state = 'pending', failed_cycles = 0
           WHERE tag = ? AND state = 'failed'",
          params![category.sync_tag()],
        )
        .map_err(|e| eyre!("Failed to re-arm sync {}: {}", category.sync_tag(), e))?;
    }

    debug!(tag = category.sync_tag(), new = inserted > 0, "Sync registered");
    Ok(inserted > 0)
  }

  pub fn get(&self, category: Category) -> Result<Option<SyncRegistration>> {
    let conn = self.db.conn()?;
    let row: Option<(String, u32, String, Option<String>)> = conn
      .query_row(
        "SELECT state, failed_cycles, registered_at, last_fired_at
         FROM sync_registrations WHERE tag = ?",
        params![category.sync_tag()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read sync {}: {}", category.sync_tag(), e))?;

    let Some((state, failed_cycles, registered_at, last_fired_at)) = row else {
      return Ok(None);
    };

    Ok(Some(SyncRegistration {
      category,
      state: SyncState::parse(&state)?,
      failed_cycles,
      registered_at: parse_datetime(&registered_at)?,
      last_fired_at: last_fired_at.as_deref().map(parse_datetime).transpose()?,
    }))
  }

  pub fn mark_firing(&self, category: Category) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "UPDATE sync_registrations SET state = 'firing', last_fired_at = datetime('now')
         WHERE tag = ?",
        params![category.sync_tag()],
      )
      .map_err(|e| eyre!("Failed to update sync {}: {}", category.sync_tag(), e))?;
    Ok(())
  }

  /// Everything delivered: the registration is done
  pub fn complete(&self, category: Category) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "DELETE FROM sync_registrations WHERE tag = ?",
        params![category.sync_tag()],
      )
      .map_err(|e| eyre!("Failed to complete sync {}: {}", category.sync_tag(), e))?;
    Ok(())
  }

  /// A cycle ended without a failed delivery but with work left over:
  /// back to pending, failed cycles unchanged.
  pub fn release(&self, category: Category) -> Result<SyncState> {
    self
      .db
      .conn()?
      .execute(
        "INSERT INTO sync_registrations (tag, state) VALUES (?, 'pending')
         ON CONFLICT(tag) DO UPDATE SET state = 'pending'",
        params![category.sync_tag()],
      )
      .map_err(|e| eyre!("Failed to release sync {}: {}", category.sync_tag(), e))?;
    Ok(SyncState::Pending)
  }

  /// A cycle left failures behind. Re-arms the registration, or marks it
  /// failed once `max_retries` consecutive cycles have failed.
  pub fn record_failed_cycle(&self, category: Category, max_retries: u32) -> Result<SyncState> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO sync_registrations (tag, state) VALUES (?, 'pending')",
        params![category.sync_tag()],
      )
      .map_err(|e| eyre!("Failed to register sync {}: {}", category.sync_tag(), e))?;

    let failed_cycles: u32 = conn
      .query_row(
        "UPDATE sync_registrations SET failed_cycles = failed_cycles + 1
         WHERE tag = ? RETURNING failed_cycles",
        params![category.sync_tag()],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to update sync {}: {}", category.sync_tag(), e))?;

    let state = if failed_cycles >= max_retries {
      warn!(
        tag = category.sync_tag(),
        failed_cycles, "Sync retries exhausted, waiting for next trigger"
      );
      SyncState::Failed
    } else {
      SyncState::Pending
    };

    conn
      .execute(
        "UPDATE sync_registrations SET state = ? WHERE tag = ?",
        params![state.as_str(), category.sync_tag()],
      )
      .map_err(|e| eyre!("Failed to update sync {}: {}", category.sync_tag(), e))?;

    Ok(state)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn registry() -> SyncRegistry {
    SyncRegistry::new(Arc::new(Database::open_in_memory().unwrap()))
  }

  #[test]
  fn test_register_is_idempotent() {
    let registry = registry();
    assert!(registry.register(Category::DeviceControl).unwrap());
    assert!(!registry.register(Category::DeviceControl).unwrap());

    let registration = registry.get(Category::DeviceControl).unwrap().unwrap();
    assert_eq!(registration.state, SyncState::Pending);
    assert_eq!(registration.tag(), "device-control-sync");
  }

  #[test]
  fn test_failed_cycles_exhaust_then_rearm() {
    let registry = registry();
    registry.register(Category::AnalyticsData).unwrap();

    assert_eq!(
      registry.record_failed_cycle(Category::AnalyticsData, 2).unwrap(),
      SyncState::Pending
    );
    assert_eq!(
      registry.record_failed_cycle(Category::AnalyticsData, 2).unwrap(),
      SyncState::Failed
    );
    assert_eq!(
      registry.get(Category::AnalyticsData).unwrap().unwrap().state,
      SyncState::Failed
    );

    registry.register(Category::AnalyticsData).unwrap();
    let registration = registry.get(Category::AnalyticsData).unwrap().unwrap();
    assert_eq!(registration.state, SyncState::Pending);
    assert_eq!(registration.failed_cycles, 0);
  }

  #[test]
  fn test_complete_removes_registration() {
    let registry = registry();
    registry.register(Category::NotificationLogs).unwrap();
    registry.mark_firing(Category::NotificationLogs).unwrap();

    let firing = registry.get(Category::NotificationLogs).unwrap().unwrap();
    assert_eq!(firing.state, SyncState::Firing);
    assert!(firing.last_fired_at.is_some());

    registry.complete(Category::NotificationLogs).unwrap();
    assert!(registry.get(Category::NotificationLogs).unwrap().is_none());
  }

  #[test]
  fn test_release_keeps_failed_cycles() {
    let registry = registry();
    registry.register(Category::DeviceControl).unwrap();
    registry.record_failed_cycle(Category::DeviceControl, 5).unwrap();
    registry.mark_firing(Category::DeviceControl).unwrap();

    assert_eq!(registry.release(Category::DeviceControl).unwrap(), SyncState::Pending);
    let registration = registry.get(Category::DeviceControl).unwrap().unwrap();
    assert_eq!(registration.state, SyncState::Pending);
    assert_eq!(registration.failed_cycles, 1);

    // Creates the registration when none exists
    registry.release(Category::AnalyticsData).unwrap();
    assert!(registry.get(Category::AnalyticsData).unwrap().is_some());
  }
}
