use crate::errors::{AppError, AppResult};
use crate::models::{
    Bid, BidAlternate, BidBreakdown, BidBreakdownPayload, BidLineItem, BidStatus, Budget,
    CreateSnapshotPayload, LevelingSettings, LevelingSnapshot, Project, ProjectBidMatrix,
    ProjectSub, SnapshotItem, Trade, UpsertBidPayload, UpsertBudgetPayload,
};
use crate::store::EntityStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };
        db.ensure_default_settings()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    // ─── Projects ───────────────────────────────────────────────────────

    pub fn create_project(&self, name: &str, due_date: Option<DateTime<Utc>>) -> AppResult<Project> {
        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            due_date,
            created_at: Utc::now(),
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO projects (id, name, due_date, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                project.id,
                project.name,
                project.due_date.map(|at| at.to_rfc3339()),
                project.created_at.to_rfc3339()
            ],
        )?;
        Ok(project)
    }

    pub fn get_project(&self, project_id: &str) -> AppResult<Option<Project>> {
        let conn = self.lock()?;
        let project = conn
            .query_row(
                "SELECT id, name, due_date, created_at FROM projects WHERE id = ?1",
                [project_id],
                project_from_row,
            )
            .optional()?;
        Ok(project)
    }

    // ─── Trades ─────────────────────────────────────────────────────────

    /// Appends the trade at the end of the project's dense 1-based order.
    pub fn create_trade(&self, project_id: &str, name: &str) -> AppResult<Trade> {
        let conn = self.lock()?;
        let next_order: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM trades WHERE project_id = ?1",
            [project_id],
            |row| row.get(0),
        )?;
        let trade = Trade {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            sort_order: next_order,
        };
        conn.execute(
            "INSERT INTO trades (id, project_id, name, sort_order) VALUES (?1, ?2, ?3, ?4)",
            params![trade.id, trade.project_id, trade.name, trade.sort_order],
        )?;
        Ok(trade)
    }

    pub fn rename_trade(&self, trade_id: &str, name: &str) -> AppResult<Trade> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE trades SET name = ?1 WHERE id = ?2",
            params![name, trade_id],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("trade {trade_id} does not exist")));
        }
        conn.query_row(
            "SELECT id, project_id, name, sort_order FROM trades WHERE id = ?1",
            [trade_id],
            trade_from_row,
        )
        .map_err(AppError::from)
    }

    /// Rewrites the project's trade order as a dense 1-based rank in the
    /// given sequence.
    pub fn reorder_trades(&self, project_id: &str, ordered_ids: &[String]) -> AppResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for (index, trade_id) in ordered_ids.iter().enumerate() {
            tx.execute(
                "UPDATE trades SET sort_order = ?1 WHERE id = ?2 AND project_id = ?3",
                params![(index + 1) as i64, trade_id, project_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_trades(&self, project_id: &str) -> AppResult<Vec<Trade>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT id, project_id, name, sort_order FROM trades
             WHERE project_id = ?1 ORDER BY sort_order, name",
        )?;
        let trades = statement
            .query_map([project_id], trade_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(trades)
    }

    // ─── Invitations ────────────────────────────────────────────────────

    /// Invites a subcontractor onto the project for the given trades. The
    /// ProjectSub row is reused if the subcontractor is already invited
    /// (at most one active invitation per subcontractor), and each listed
    /// trade gets an implicit invited bid with no amount.
    pub fn invite_sub(
        &self,
        project_id: &str,
        subcontractor_id: &str,
        company_name: &str,
        trade_ids: &[String],
    ) -> AppResult<ProjectSub> {
        let conn = self.lock()?;
        let existing = conn
            .query_row(
                "SELECT id, project_id, subcontractor_id, company_name, sort_order, invited_at
                 FROM project_subs WHERE project_id = ?1 AND subcontractor_id = ?2",
                params![project_id, subcontractor_id],
                project_sub_from_row,
            )
            .optional()?;

        let sub = match existing {
            Some(sub) => sub,
            None => {
                let next_order: i64 = conn.query_row(
                    "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM project_subs WHERE project_id = ?1",
                    [project_id],
                    |row| row.get(0),
                )?;
                let sub = ProjectSub {
                    id: Uuid::new_v4().to_string(),
                    project_id: project_id.to_string(),
                    subcontractor_id: subcontractor_id.to_string(),
                    company_name: company_name.to_string(),
                    sort_order: next_order,
                    invited_at: Utc::now(),
                };
                conn.execute(
                    "INSERT INTO project_subs (id, project_id, subcontractor_id, company_name, sort_order, invited_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        sub.id,
                        sub.project_id,
                        sub.subcontractor_id,
                        sub.company_name,
                        sub.sort_order,
                        sub.invited_at.to_rfc3339()
                    ],
                )?;
                sub
            }
        };

        for trade_id in trade_ids {
            conn.execute(
                "INSERT INTO bids (id, project_id, trade_id, sub_id, status, base_bid_amount, received_at, notes, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, '', ?6)
                 ON CONFLICT(trade_id, sub_id) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    project_id,
                    trade_id,
                    sub.id,
                    BidStatus::Invited.as_str(),
                    Utc::now().to_rfc3339()
                ],
            )?;
        }

        Ok(sub)
    }

    pub fn list_project_subs(&self, project_id: &str) -> AppResult<Vec<ProjectSub>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT id, project_id, subcontractor_id, company_name, sort_order, invited_at
             FROM project_subs WHERE project_id = ?1 ORDER BY sort_order, invited_at",
        )?;
        let subs = statement
            .query_map([project_id], project_sub_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subs)
    }

    // ─── Snapshots ──────────────────────────────────────────────────────

    pub fn list_snapshots(&self, project_id: &str) -> AppResult<Vec<LevelingSnapshot>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT id, project_id, title, note, created_by, created_at
             FROM leveling_snapshots WHERE project_id = ?1 ORDER BY created_at DESC",
        )?;
        let snapshots = statement
            .query_map([project_id], snapshot_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(snapshots)
    }

    // ─── Settings ───────────────────────────────────────────────────────

    pub fn get_settings(&self) -> AppResult<LevelingSettings> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = 'app'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<LevelingSettings>(&raw).unwrap_or_default()),
            None => Ok(LevelingSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<LevelingSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: LevelingSettings = serde_json::from_value(merged)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('app', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(1) FROM settings WHERE key = 'app'", [], |row| {
                row.get(0)
            })?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES ('app', ?1, ?2)",
                params![
                    serde_json::to_string(&LevelingSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }

    fn bid_row_id(
        conn: &Connection,
        project_id: &str,
        trade_id: &str,
        sub_id: &str,
    ) -> AppResult<Option<String>> {
        let id = conn
            .query_row(
                "SELECT id FROM bids WHERE project_id = ?1 AND trade_id = ?2 AND sub_id = ?3",
                params![project_id, trade_id, sub_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(id)
    }
}

#[async_trait]
impl EntityStore for Database {
    async fn get_project_bid_matrix(&self, project_id: &str) -> AppResult<ProjectBidMatrix> {
        let project = self
            .get_project(project_id)?
            .ok_or_else(|| AppError::NotFound(format!("project {project_id} does not exist")))?;
        let trades = self.list_trades(project_id)?;
        let project_subs = self.list_project_subs(project_id)?;
        let snapshots = self.list_snapshots(project_id)?;

        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT id, project_id, trade_id, sub_id, status, base_bid_amount, received_at, notes
             FROM bids WHERE project_id = ?1",
        )?;
        let bids = statement
            .query_map([project_id], bid_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut statement = conn.prepare(
            "SELECT project_id, trade_id, amount, notes FROM budgets WHERE project_id = ?1",
        )?;
        let budgets = statement
            .query_map([project_id], budget_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ProjectBidMatrix {
            project,
            trades,
            project_subs,
            bids,
            budgets,
            snapshots,
        })
    }

    async fn upsert_bid(&self, payload: &UpsertBidPayload) -> AppResult<Bid> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO bids (id, project_id, trade_id, sub_id, status, base_bid_amount, received_at, notes, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(trade_id, sub_id) DO UPDATE SET
               status = excluded.status,
               base_bid_amount = excluded.base_bid_amount,
               received_at = excluded.received_at,
               notes = excluded.notes,
               updated_at = excluded.updated_at",
            params![
                Uuid::new_v4().to_string(),
                payload.project_id,
                payload.trade_id,
                payload.sub_id,
                payload.status.as_str(),
                payload.base_bid_amount,
                payload.received_at.map(|at| at.to_rfc3339()),
                payload.notes,
                Utc::now().to_rfc3339()
            ],
        )?;

        conn.query_row(
            "SELECT id, project_id, trade_id, sub_id, status, base_bid_amount, received_at, notes
             FROM bids WHERE trade_id = ?1 AND sub_id = ?2",
            params![payload.trade_id, payload.sub_id],
            bid_from_row,
        )
        .map_err(AppError::from)
    }

    async fn upsert_bid_breakdown(&self, payload: &BidBreakdownPayload) -> AppResult<()> {
        let mut conn = self.lock()?;
        let bid_id = Self::bid_row_id(&conn, &payload.project_id, &payload.trade_id, &payload.sub_id)?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no bid at {}:{}",
                    payload.trade_id, payload.sub_id
                ))
            })?;

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM bid_line_items WHERE bid_id = ?1", [&bid_id])?;
        tx.execute("DELETE FROM bid_alternates WHERE bid_id = ?1", [&bid_id])?;
        for (position, item) in payload.line_items.iter().enumerate() {
            tx.execute(
                "INSERT INTO bid_line_items (id, bid_id, description, amount, position)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    bid_id,
                    item.description,
                    item.amount,
                    position as i64
                ],
            )?;
        }
        for (position, alternate) in payload.alternates.iter().enumerate() {
            tx.execute(
                "INSERT INTO bid_alternates (id, bid_id, description, amount, accepted, position)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    bid_id,
                    alternate.description,
                    alternate.amount,
                    alternate.accepted,
                    position as i64
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_bid_breakdown(
        &self,
        project_id: &str,
        trade_id: &str,
        sub_id: &str,
    ) -> AppResult<BidBreakdown> {
        let conn = self.lock()?;
        let Some(bid_id) = Self::bid_row_id(&conn, project_id, trade_id, sub_id)? else {
            return Ok(BidBreakdown::default());
        };

        let mut statement = conn.prepare(
            "SELECT id, bid_id, description, amount, position
             FROM bid_line_items WHERE bid_id = ?1 ORDER BY position",
        )?;
        let line_items = statement
            .query_map([&bid_id], |row| {
                Ok(BidLineItem {
                    id: row.get(0)?,
                    bid_id: row.get(1)?,
                    description: row.get(2)?,
                    amount: row.get(3)?,
                    position: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut statement = conn.prepare(
            "SELECT id, bid_id, description, amount, accepted, position
             FROM bid_alternates WHERE bid_id = ?1 ORDER BY position",
        )?;
        let alternates = statement
            .query_map([&bid_id], |row| {
                Ok(BidAlternate {
                    id: row.get(0)?,
                    bid_id: row.get(1)?,
                    description: row.get(2)?,
                    amount: row.get(3)?,
                    accepted: row.get(4)?,
                    position: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(BidBreakdown {
            line_items,
            alternates,
        })
    }

    async fn remove_bid(&self, project_id: &str, trade_id: &str, sub_id: &str) -> AppResult<()> {
        let mut conn = self.lock()?;
        let bid_id = Self::bid_row_id(&conn, project_id, trade_id, sub_id)?.ok_or_else(|| {
            AppError::NotFound(format!("no bid at {trade_id}:{sub_id}"))
        })?;

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM bid_line_items WHERE bid_id = ?1", [&bid_id])?;
        tx.execute("DELETE FROM bid_alternates WHERE bid_id = ?1", [&bid_id])?;
        tx.execute("DELETE FROM bids WHERE id = ?1", [&bid_id])?;
        tx.commit()?;
        Ok(())
    }

    async fn upsert_budget(&self, payload: &UpsertBudgetPayload) -> AppResult<Budget> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO budgets (project_id, trade_id, amount, notes, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(project_id, trade_id) DO UPDATE SET
               amount = excluded.amount,
               notes = excluded.notes,
               updated_at = excluded.updated_at",
            params![
                payload.project_id,
                payload.trade_id,
                payload.amount,
                payload.notes,
                Utc::now().to_rfc3339()
            ],
        )?;

        Ok(Budget {
            project_id: payload.project_id.clone(),
            trade_id: payload.trade_id.clone(),
            amount: payload.amount,
            notes: payload.notes.clone(),
        })
    }

    async fn create_snapshot(&self, payload: &CreateSnapshotPayload) -> AppResult<LevelingSnapshot> {
        let snapshot = LevelingSnapshot {
            id: Uuid::new_v4().to_string(),
            project_id: payload.project_id.clone(),
            title: payload.title.clone(),
            note: payload.note.clone(),
            created_by: payload.created_by.clone(),
            created_at: Utc::now(),
        };

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO leveling_snapshots (id, project_id, title, note, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                snapshot.id,
                snapshot.project_id,
                snapshot.title,
                snapshot.note,
                snapshot.created_by,
                snapshot.created_at.to_rfc3339()
            ],
        )?;
        for item in &payload.items {
            tx.execute(
                "INSERT INTO snapshot_items (id, snapshot_id, trade_id, sub_id, base_bid_amount, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    snapshot.id,
                    item.trade_id,
                    item.sub_id,
                    item.base_bid_amount,
                    item.notes
                ],
            )?;
        }
        tx.commit()?;

        Ok(snapshot)
    }

    async fn get_snapshot_items(&self, snapshot_id: &str) -> AppResult<Vec<SnapshotItem>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT id, snapshot_id, trade_id, sub_id, base_bid_amount, notes
             FROM snapshot_items WHERE snapshot_id = ?1",
        )?;
        let items = statement
            .query_map([snapshot_id], |row| {
                Ok(SnapshotItem {
                    id: row.get(0)?,
                    snapshot_id: row.get(1)?,
                    trade_id: row.get(2)?,
                    sub_id: row.get(3)?,
                    base_bid_amount: row.get(4)?,
                    notes: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        due_date: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn trade_from_row(row: &Row<'_>) -> rusqlite::Result<Trade> {
    Ok(Trade {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        sort_order: row.get(3)?,
    })
}

fn project_sub_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectSub> {
    Ok(ProjectSub {
        id: row.get(0)?,
        project_id: row.get(1)?,
        subcontractor_id: row.get(2)?,
        company_name: row.get(3)?,
        sort_order: row.get(4)?,
        invited_at: row.get(5)?,
    })
}

fn bid_from_row(row: &Row<'_>) -> rusqlite::Result<Bid> {
    let status_raw: String = row.get(4)?;
    let status = BidStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown bid status '{status_raw}'").into(),
        )
    })?;
    Ok(Bid {
        id: row.get(0)?,
        project_id: row.get(1)?,
        trade_id: row.get(2)?,
        sub_id: row.get(3)?,
        status,
        base_bid_amount: row.get(5)?,
        received_at: row.get(6)?,
        notes: row.get(7)?,
    })
}

fn budget_from_row(row: &Row<'_>) -> rusqlite::Result<Budget> {
    Ok(Budget {
        project_id: row.get(0)?,
        trade_id: row.get(1)?,
        amount: row.get(2)?,
        notes: row.get(3)?,
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<LevelingSnapshot> {
    Ok(LevelingSnapshot {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        note: row.get(3)?,
        created_by: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(
                    target_map.entry(key).or_insert(serde_json::Value::Null),
                    value,
                );
            }
        }
        (slot, value) => *slot = value,
    }
}
