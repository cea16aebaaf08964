//! Durable, per-category log of actions awaiting delivery.
//!
//! Actions are appended in order and stay in the log until [`ActionQueue::remove`]
//! is called after a confirmed delivery. There is no expiry.

mod action;

pub use action::{ActionId, ActionPayload, Category, PendingAction};

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension, Row};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::Database;

/// SQLite-backed pending action queue
pub struct ActionQueue {
  db: Arc<Database>,
}

impl ActionQueue {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Append an action and return its id. Does not wait for delivery.
  pub fn enqueue(&self, payload: ActionPayload) -> Result<ActionId> {
    self.enqueue_at(payload, Utc::now())
  }

  /// Append with an explicit clock reading; the id is `now` in milliseconds,
  /// bumped past the newest existing id so ids never repeat.
  pub fn enqueue_at(&self, payload: ActionPayload, now: DateTime<Utc>) -> Result<ActionId> {
    let category = payload.category();
    let encoded =
      serde_json::to_vec(&payload).map_err(|e| eyre!("Failed to serialize action: {}", e))?;

    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let newest: Option<i64> = tx
      .query_row("SELECT MAX(id) FROM pending_actions", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to read newest action id: {}", e))?;

    let millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    let id = match newest {
      Some(newest) if newest as u64 >= millis => newest as u64 + 1,
      _ => millis,
    };

    tx.execute(
      "INSERT INTO pending_actions (id, category, payload, enqueued_at) VALUES (?, ?, ?, ?)",
      params![id as i64, category.as_str(), encoded, now.to_rfc3339()],
    )
    .map_err(|e| eyre!("Failed to store pending action: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    info!(category = %category, id, "Action queued for sync");
    Ok(ActionId(id))
  }

  /// Pending actions of a category, oldest first.
  ///
  /// Lazy: rows are read one at a time, so entries may be removed while
  /// iterating. Finite: actions appended after the call are not yielded.
  pub fn drain(&self, category: Category) -> Result<Drain<'_>> {
    let upper: Option<i64> = self
      .db
      .conn()?
      .query_row(
        "SELECT MAX(seq) FROM pending_actions WHERE category = ?",
        params![category.as_str()],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to read pending actions: {}", e))?;

    Ok(Drain {
      queue: self,
      category,
      cursor: 0,
      upper: upper.unwrap_or(0),
    })
  }

  /// Collect every pending action of a category. Rows that cannot be
  /// decoded are logged and left out.
  pub fn pending(&self, category: Category) -> Result<Vec<PendingAction>> {
    let mut actions = Vec::new();
    for action in self.drain(category)? {
      match action {
        Ok(action) => actions.push(action),
        Err(e) => match e.downcast_ref::<UndecodableAction>() {
          Some(bad) => warn!(category = %category, id = %bad.id, "Skipping undecodable action"),
          None => return Err(e),
        },
      }
    }
    Ok(actions)
  }

  pub fn len(&self, category: Category) -> Result<usize> {
    let count: i64 = self
      .db
      .conn()?
      .query_row(
        "SELECT COUNT(*) FROM pending_actions WHERE category = ?",
        params![category.as_str()],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count pending actions: {}", e))?;
    Ok(count as usize)
  }

  /// Delete a delivered action. Removing an absent id is a no-op;
  /// returns whether anything was removed.
  pub fn remove(&self, category: Category, id: ActionId) -> Result<bool> {
    let removed = self
      .db
      .conn()?
      .execute(
        "DELETE FROM pending_actions WHERE category = ? AND id = ?",
        params![category.as_str(), id.0 as i64],
      )
      .map_err(|e| eyre!("Failed to remove action {}: {}", id, e))?;

    debug!(category = %category, id = %id, removed, "Removed pending action");
    Ok(removed > 0)
  }

  /// Record a failed delivery attempt and when to try again
  pub fn record_failure(
    &self,
    id: ActionId,
    error: &str,
    next_attempt_at: DateTime<Utc>,
  ) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "UPDATE pending_actions
         SET attempts = attempts + 1, last_error = ?, next_attempt_at = ?
         WHERE id = ?",
        params![error, next_attempt_at.to_rfc3339(), id.0 as i64],
      )
      .map_err(|e| eyre!("Failed to record delivery failure for {}: {}", id, e))?;
    Ok(())
  }

  fn next_after(
    &self,
    category: Category,
    cursor: i64,
    upper: i64,
  ) -> Result<Option<(i64, Result<PendingAction, UndecodableAction>)>> {
    let conn = self.db.conn()?;
    let row = conn
      .query_row(
        "SELECT seq, id, category, payload, enqueued_at, attempts, next_attempt_at, last_error
         FROM pending_actions
         WHERE category = ? AND seq > ? AND seq <= ?
         ORDER BY seq LIMIT 1",
        params![category.as_str(), cursor, upper],
        read_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to read pending action: {}", e))?;

    Ok(row.map(|raw| (raw.seq, raw.decode(category))))
  }
}

/// Iterator returned by [`ActionQueue::drain`]
pub struct Drain<'a> {
  queue: &'a ActionQueue,
  category: Category,
  cursor: i64,
  upper: i64,
}

impl Iterator for Drain<'_> {
  type Item = Result<PendingAction>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.cursor >= self.upper {
      return None;
    }

    match self.queue.next_after(self.category, self.cursor, self.upper) {
      Ok(Some((seq, decoded))) => {
        // A bad row is reported once and stepped over
        self.cursor = seq;
        Some(decoded.map_err(color_eyre::Report::new))
      }
      Ok(None) => {
        self.cursor = self.upper;
        None
      }
      Err(e) => {
        // Storage failure: stop here
        self.cursor = self.upper;
        Some(Err(e))
      }
    }
  }
}

/// A stored row whose payload no longer decodes. The row is kept; later
/// rows are still yielded.
#[derive(Debug)]
pub struct UndecodableAction {
  pub id: ActionId,
  pub reason: String,
}

impl fmt::Display for UndecodableAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Action {} cannot be decoded: {}", self.id, self.reason)
  }
}

impl std::error::Error for UndecodableAction {}

struct RawAction {
  seq: i64,
  id: i64,
  category: String,
  payload: Vec<u8>,
  enqueued_at: String,
  attempts: u32,
  next_attempt_at: Option<String>,
  last_error: Option<String>,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawAction> {
  Ok(RawAction {
    seq: row.get(0)?,
    id: row.get(1)?,
    category: row.get(2)?,
    payload: row.get(3)?,
    enqueued_at: row.get(4)?,
    attempts: row.get(5)?,
    next_attempt_at: row.get(6)?,
    last_error: row.get(7)?,
  })
}

impl RawAction {
  fn decode(self, expected: Category) -> Result<PendingAction, UndecodableAction> {
    let id = ActionId(self.id as u64);
    let undecodable = |reason: String| UndecodableAction { id, reason };

    let payload: ActionPayload =
      serde_json::from_slice(&self.payload).map_err(|e| undecodable(e.to_string()))?;

    if payload.category() != expected || self.category != expected.as_str() {
      return Err(undecodable(format!(
        "stored under {} but tagged {}",
        self.category,
        payload.category()
      )));
    }

    Ok(PendingAction {
      id,
      payload,
      timestamp: parse_rfc3339(&self.enqueued_at).map_err(|e| undecodable(e.to_string()))?,
      attempts: self.attempts,
      next_attempt_at: self
        .next_attempt_at
        .as_deref()
        .map(parse_rfc3339)
        .transpose()
        .map_err(|e| undecodable(e.to_string()))?,
      last_error: self.last_error,
    })
  }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
