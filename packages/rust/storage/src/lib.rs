//! libSQL run-history store (local file, offline mode).
//!
//! The pipeline keeps its [`RunState`](bulletin_shared::RunState) in memory.
//! This crate makes `last_run` survive between CLI invocations by recording
//! every gated run in a `runs` table and seeding the next process from the
//! newest successful row.
//!
//! **Access rules:**
//! - `bulletin run` / `bulletin watch`: read-write via [`Storage::open`]
//! - `bulletin history`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::fmt;
use std::path::Path;

use bulletin_shared::{BulletinError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Terminal status of a recorded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Done,
    Aborted,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "done" => Ok(Self::Done),
            "aborted" => Ok(Self::Aborted),
            "failed" => Ok(Self::Failed),
            other => Err(BulletinError::Storage(format!("unknown run outcome: {other}"))),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run about to be recorded.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub started_at: DateTime<Utc>,
    /// For `Done` runs this is the new `last_run`.
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    /// Pipeline stage that aborted or failed.
    pub stage: Option<String>,
    pub reason: Option<String>,
    pub article_count: usize,
    pub message_id: Option<String>,
    /// `ai` or `fallback`.
    pub rendered_by: Option<String>,
}

/// A run read back from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub stage: Option<String>,
    pub reason: Option<String>,
    pub article_count: usize,
    pub message_id: Option<String>,
    pub rendered_by: Option<String>,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BulletinError::io(parent, e))?;
        }

        let (db, conn) = connect(path).await?;
        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` without writing to it.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BulletinError::Storage(format!(
                "no run history at {}",
                path.display()
            )));
        }

        let (db, conn) = connect(path).await?;
        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        BulletinError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(BulletinError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Insert a run and return its id.
    pub async fn record_run(&self, run: &NewRun) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let started_at = timestamp(&run.started_at);
        let finished_at = timestamp(&run.finished_at);

        self.conn
            .execute(
                "INSERT INTO runs (id, started_at, finished_at, outcome, stage, reason,
                                   article_count, message_id, rendered_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id.as_str(),
                    started_at.as_str(),
                    finished_at.as_str(),
                    run.status.as_str(),
                    run.stage.as_deref(),
                    run.reason.as_deref(),
                    run.article_count as i64,
                    run.message_id.as_deref(),
                    run.rendered_by.as_deref()
                ],
            )
            .await
            .map_err(|e| BulletinError::Storage(e.to_string()))?;

        tracing::debug!(%id, status = %run.status, "run recorded");
        Ok(id)
    }

    /// Completion time of the newest `done` run, if any.
    pub async fn last_successful_run(&self) -> Result<Option<DateTime<Utc>>> {
        let mut rows = self
            .conn
            .query(
                "SELECT finished_at FROM runs WHERE outcome = 'done'
                 ORDER BY finished_at DESC LIMIT 1",
                params![],
            )
            .await
            .map_err(|e| BulletinError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let raw = row
                    .get::<String>(0)
                    .map_err(|e| BulletinError::Storage(e.to_string()))?;
                Ok(Some(parse_timestamp(&raw)?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(BulletinError::Storage(e.to_string())),
        }
    }

    /// Most recent runs first.
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, started_at, finished_at, outcome, stage, reason,
                        article_count, message_id, rendered_by
                 FROM runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| BulletinError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn connect(path: &Path) -> Result<(Database, Connection)> {
    let db = libsql::Builder::new_local(path)
        .build()
        .await
        .map_err(|e| BulletinError::Storage(e.to_string()))?;

    let conn = db
        .connect()
        .map_err(|e| BulletinError::Storage(e.to_string()))?;

    Ok((db, conn))
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BulletinError::Storage(format!("invalid date {raw:?}: {e}")))
}

fn row_to_run(row: &libsql::Row) -> Result<RunRecord> {
    let text = |idx: i32| {
        row.get::<String>(idx)
            .map_err(|e| BulletinError::Storage(e.to_string()))
    };

    Ok(RunRecord {
        id: text(0)?,
        started_at: parse_timestamp(&text(1)?)?,
        finished_at: parse_timestamp(&text(2)?)?,
        status: RunStatus::parse(&text(3)?)?,
        stage: row.get::<String>(4).ok(),
        reason: row.get::<String>(5).ok(),
        article_count: row.get::<i64>(6).map(|v| v.max(0) as usize).unwrap_or(0),
        message_id: row.get::<String>(7).ok(),
        rendered_by: row.get::<String>(8).ok(),
    })
}
