//! Durable submission and aggregate stores.
//!
//! `SubmissionStore` is the persistence seam of the ingestion service. The
//! sqlite implementation applies each accepted submission in one immediate
//! transaction, so per-owner aggregate updates are serialized and a failure
//! commits nothing. The in-memory implementation backs tests and demos.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, TransactionBehavior};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::leaderboard::level_for_total;
use crate::{now_ms, DepositPoint, GeoPoint, OwnerIdentity, SubmissionRecord, UserAggregate};

/// An accepted submission, validated and ready to persist.
#[derive(Clone, Debug)]
pub struct NewSubmission {
    pub compost: u32,
    pub recycle: u32,
    pub trash: u32,
    pub location: Option<GeoPoint>,
    pub media_ref: Option<String>,
    pub created_at: u64,
}

pub trait SubmissionStore: Send {
    /// Persist one submission and fold its deltas into the owner's
    /// aggregate, atomically: either the record, the aggregate update, and
    /// the location-history append all land, or none do.
    fn record_submission(
        &mut self,
        owner: &OwnerIdentity,
        submission: &NewSubmission,
    ) -> Result<SubmissionRecord>;

    /// All aggregates in creation order (first-created first).
    fn user_aggregates(&mut self) -> Result<Vec<UserAggregate>>;

    fn aggregate_for(&mut self, owner_id: &str) -> Result<Option<UserAggregate>>;
}

// -------------------- Sqlite --------------------

pub struct SqliteSubmissionStore {
    conn: Connection,
}

impl SqliteSubmissionStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS submissions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              owner_id TEXT NOT NULL,
              compost INTEGER NOT NULL,
              recycle INTEGER NOT NULL,
              trash INTEGER NOT NULL,
              created_at INTEGER NOT NULL,
              latitude REAL,
              longitude REAL,
              media_ref TEXT
            );

            CREATE TABLE IF NOT EXISTS user_aggregates (
              owner_id TEXT PRIMARY KEY,
              display_name TEXT NOT NULL,
              avatar TEXT,
              compost INTEGER NOT NULL DEFAULT 0,
              recycle INTEGER NOT NULL DEFAULT 0,
              trash INTEGER NOT NULL DEFAULT 0,
              total_items INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS location_history (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              owner_id TEXT NOT NULL,
              latitude REAL NOT NULL,
              longitude REAL NOT NULL,
              recorded_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_submissions_owner ON submissions(owner_id);
            CREATE INDEX IF NOT EXISTS idx_history_owner ON location_history(owner_id);
            "#,
        )?;
        Ok(())
    }

    fn history_by_owner(&self) -> Result<HashMap<String, Vec<DepositPoint>>> {
        let mut stmt = self.conn.prepare(
            "SELECT owner_id, latitude, longitude, recorded_at FROM location_history ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut history: HashMap<String, Vec<DepositPoint>> = HashMap::new();
        while let Some(row) = rows.next()? {
            let owner_id: String = row.get(0)?;
            let point = DepositPoint {
                latitude: row.get(1)?,
                longitude: row.get(2)?,
                recorded_at: row.get::<_, i64>(3)? as u64,
            };
            history.entry(owner_id).or_default().push(point);
        }
        Ok(history)
    }
}

fn aggregate_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserAggregate> {
    let compost = row.get::<_, i64>(3)? as u64;
    let recycle = row.get::<_, i64>(4)? as u64;
    let trash = row.get::<_, i64>(5)? as u64;
    let total_items = row.get::<_, i64>(6)? as u64;
    Ok(UserAggregate {
        owner_id: row.get(0)?,
        display_name: row.get(1)?,
        avatar: row.get(2)?,
        compost,
        recycle,
        trash,
        total_items,
        level: level_for_total(total_items),
        location_history: Vec::new(),
    })
}

const AGGREGATE_COLUMNS: &str =
    "owner_id, display_name, avatar, compost, recycle, trash, total_items";

impl SubmissionStore for SqliteSubmissionStore {
    fn record_submission(
        &mut self,
        owner: &OwnerIdentity,
        submission: &NewSubmission,
    ) -> Result<SubmissionRecord> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Creation order of aggregates is the table rowid; the insert is a
        // no-op for an owner we have already seen.
        tx.execute(
            "INSERT INTO user_aggregates(owner_id, display_name, avatar) VALUES (?1, ?2, ?3)
             ON CONFLICT(owner_id) DO NOTHING",
            params![owner.owner_id, owner.display_name, owner.avatar],
        )?;

        // total_items is recomputed from the pre-update totals plus the
        // deltas in the same statement; it can never drift from the sum.
        tx.execute(
            "UPDATE user_aggregates
             SET display_name = ?2,
                 avatar = ?3,
                 compost = compost + ?4,
                 recycle = recycle + ?5,
                 trash = trash + ?6,
                 total_items = compost + ?4 + recycle + ?5 + trash + ?6
             WHERE owner_id = ?1",
            params![
                owner.owner_id,
                owner.display_name,
                owner.avatar,
                submission.compost,
                submission.recycle,
                submission.trash,
            ],
        )?;

        let (latitude, longitude) = match &submission.location {
            Some(point) => (Some(point.latitude()), Some(point.longitude())),
            None => (None, None),
        };
        tx.execute(
            "INSERT INTO submissions(owner_id, compost, recycle, trash, created_at, latitude, longitude, media_ref)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                owner.owner_id,
                submission.compost,
                submission.recycle,
                submission.trash,
                submission.created_at as i64,
                latitude,
                longitude,
                submission.media_ref,
            ],
        )?;
        let id = tx.last_insert_rowid();

        if let Some(point) = &submission.location {
            tx.execute(
                "INSERT INTO location_history(owner_id, latitude, longitude, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    owner.owner_id,
                    point.latitude(),
                    point.longitude(),
                    submission.created_at as i64,
                ],
            )?;
        }

        tx.commit()?;

        Ok(SubmissionRecord {
            id,
            owner_id: owner.owner_id.clone(),
            compost: submission.compost,
            recycle: submission.recycle,
            trash: submission.trash,
            created_at: submission.created_at,
            location: submission.location.clone(),
            media_ref: submission.media_ref.clone(),
        })
    }

    fn user_aggregates(&mut self) -> Result<Vec<UserAggregate>> {
        let mut history = self.history_by_owner()?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM user_aggregates ORDER BY rowid ASC",
            AGGREGATE_COLUMNS
        ))?;
        let rows = stmt.query_map([], aggregate_from_row)?;
        let mut aggregates = Vec::new();
        for row in rows {
            let mut aggregate = row?;
            if let Some(points) = history.remove(&aggregate.owner_id) {
                aggregate.location_history = points;
            }
            aggregates.push(aggregate);
        }
        Ok(aggregates)
    }

    fn aggregate_for(&mut self, owner_id: &str) -> Result<Option<UserAggregate>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM user_aggregates WHERE owner_id = ?1",
            AGGREGATE_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![owner_id], aggregate_from_row)?;
        let Some(row) = rows.next() else {
            return Ok(None);
        };
        let mut aggregate = row?;
        drop(rows);
        drop(stmt);
        if let Some(points) = self.history_by_owner()?.remove(owner_id) {
            aggregate.location_history = points;
        }
        Ok(Some(aggregate))
    }
}

// -------------------- In-Memory --------------------

#[derive(Default)]
pub struct InMemorySubmissionStore {
    aggregates: Vec<UserAggregate>,
    submissions: Vec<SubmissionRecord>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submissions(&self) -> &[SubmissionRecord] {
        &self.submissions
    }
}

impl SubmissionStore for InMemorySubmissionStore {
    fn record_submission(
        &mut self,
        owner: &OwnerIdentity,
        submission: &NewSubmission,
    ) -> Result<SubmissionRecord> {
        let position = self
            .aggregates
            .iter()
            .position(|agg| agg.owner_id == owner.owner_id);
        let aggregate = match position {
            Some(idx) => &mut self.aggregates[idx],
            None => {
                self.aggregates.push(UserAggregate {
                    owner_id: owner.owner_id.clone(),
                    display_name: owner.display_name.clone(),
                    avatar: owner.avatar.clone(),
                    compost: 0,
                    recycle: 0,
                    trash: 0,
                    total_items: 0,
                    level: level_for_total(0),
                    location_history: Vec::new(),
                });
                self.aggregates.last_mut().expect("just pushed")
            }
        };

        aggregate.display_name = owner.display_name.clone();
        aggregate.avatar = owner.avatar.clone();
        aggregate.compost += submission.compost as u64;
        aggregate.recycle += submission.recycle as u64;
        aggregate.trash += submission.trash as u64;
        aggregate.total_items = aggregate.compost + aggregate.recycle + aggregate.trash;
        aggregate.level = level_for_total(aggregate.total_items);
        if let Some(point) = &submission.location {
            aggregate.location_history.push(DepositPoint {
                latitude: point.latitude(),
                longitude: point.longitude(),
                recorded_at: submission.created_at,
            });
        }

        let record = SubmissionRecord {
            id: self.submissions.len() as i64 + 1,
            owner_id: owner.owner_id.clone(),
            compost: submission.compost,
            recycle: submission.recycle,
            trash: submission.trash,
            created_at: submission.created_at,
            location: submission.location.clone(),
            media_ref: submission.media_ref.clone(),
        };
        self.submissions.push(record.clone());
        Ok(record)
    }

    fn user_aggregates(&mut self) -> Result<Vec<UserAggregate>> {
        Ok(self.aggregates.clone())
    }

    fn aggregate_for(&mut self, owner_id: &str) -> Result<Option<UserAggregate>> {
        Ok(self
            .aggregates
            .iter()
            .find(|agg| agg.owner_id == owner_id)
            .cloned())
    }
}

// -------------------- Media --------------------

/// Filesystem store for accepted media blobs.
///
/// Files are named `{epoch_ms}_{owner}.bin` the way the original backend
/// timestamped its uploads; the returned reference is the bare filename.
pub struct MediaStore {
    dir: PathBuf,
}

impl MediaStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| anyhow!("failed to create media dir {}: {}", dir.display(), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, owner_id: &str, media: &[u8]) -> Result<String> {
        let safe_owner: String = owner_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let name = format!("{}_{}.bin", now_ms()?, safe_owner);
        let path = self.dir.join(&name);
        std::fs::write(&path, media)
            .map_err(|e| anyhow!("failed to write media {}: {}", path.display(), e))?;
        Ok(name)
    }
}
