//! Filmlist persistence: the SQLite-backed show list.
//!
//! The show list lives in one table; `build()` reads all of it into memory and filters run
//! against that snapshot. A `meta` table records when (and how often) the list was imported
//! so a loaded snapshot can tell whether storage moved on.

#![forbid(unsafe_code)]

use std::sync::Mutex;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use filmlist_core::{DataStore, RefreshOutcome, Rule, ShowRow};
use metrics::{counter, gauge, histogram};
use tracing::{debug, info};

mod matcher;

pub use matcher::RuleMatcher;

/// In-memory snapshot of the stored show list.
#[derive(Debug, Clone)]
pub struct ShowList {
    rows: Vec<ShowRow>,
    loaded_at: i64,
    generation: i64,
}

impl ShowList {
    pub fn rows(&self) -> &[ShowRow] { &self.rows }
    pub fn len(&self) -> usize { self.rows.len() }
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
    /// Seconds since epoch when the snapshot was read.
    pub fn loaded_at(&self) -> i64 { self.loaded_at }
    /// Import generation the snapshot was read from.
    pub fn generation(&self) -> i64 { self.generation }
}

/// SQLite-backed store. Every call is synchronous; the coordinator runs them on its worker.
pub struct SqliteShowStore {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteShowStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("FILMLIST_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS shows (
                id          INTEGER PRIMARY KEY,
                channel     TEXT NOT NULL,
                topic       TEXT NOT NULL,
                title       TEXT NOT NULL,
                description TEXT NOT NULL,
                start       INTEGER NOT NULL,
                duration    INTEGER NOT NULL,
                url         TEXT NOT NULL
            )",
            [],
        )
        .context("creating shows table")?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            )",
            [],
        )
        .context("creating meta table")?;
        let me = Self { db: Mutex::new(db) };
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(me)
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.db.lock().map_err(|_| anyhow!("sqlite connection mutex poisoned"))
    }

    /// Replace the stored show list with `rows` in one transaction.
    pub fn import(&self, rows: &[ShowRow]) -> Result<usize> {
        let started = Instant::now();
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute("DELETE FROM shows", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO shows(id, channel, topic, title, description, start, duration, url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for r in rows {
                stmt.execute((r.id, &r.channel, &r.topic, &r.title, &r.description, r.start, r.duration, &r.url))
                    .with_context(|| format!("inserting show {}", r.id))?;
            }
        }
        tx.execute(
            "INSERT INTO meta(key, value) VALUES ('generation', 1)
             ON CONFLICT(key) DO UPDATE SET value = value + 1",
            [],
        )?;
        tx.execute(
            "INSERT INTO meta(key, value) VALUES ('imported_at', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [now_ts()],
        )?;
        tx.commit()?;
        histogram!("persist_import_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(rows = rows.len(), took_ms = %started.elapsed().as_millis(), "persist: import ok");
        Ok(rows.len())
    }

    /// Current import generation; 0 when nothing was ever imported.
    pub fn generation(&self) -> Result<i64> {
        let db = self.conn()?;
        meta_value(&db, "generation")
    }

    fn read_all(&self) -> Result<ShowList> {
        let started = Instant::now();
        let db = self.conn()?;
        let generation = meta_value(&db, "generation")?;
        let mut stmt = db.prepare(
            "SELECT id, channel, topic, title, description, start, duration, url FROM shows ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ShowRow {
                    id: row.get(0)?,
                    channel: row.get(1)?,
                    topic: row.get(2)?,
                    title: row.get(3)?,
                    description: row.get(4)?,
                    start: row.get(5)?,
                    duration: row.get(6)?,
                    url: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("reading shows")?;
        histogram!("store_build_ms", started.elapsed().as_secs_f64() * 1000.0);
        gauge!("dataset_rows", rows.len() as f64);
        Ok(ShowList { rows, loaded_at: now_ts(), generation })
    }
}

impl DataStore for SqliteShowStore {
    type Handle = ShowList;

    fn build(&self) -> Result<ShowList> {
        let list = self.read_all()?;
        info!(rows = list.len(), generation = list.generation, "persist: show list loaded");
        Ok(list)
    }

    fn filter(&self, handle: &ShowList, rules: &[Rule], limit: usize) -> Result<Vec<ShowRow>> {
        let started = Instant::now();
        let matcher = RuleMatcher::compile(rules)?;
        let out: Vec<ShowRow> = handle.rows.iter().filter(|r| matcher.matches(r)).take(limit).cloned().collect();
        histogram!("store_filter_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("store_filter_total", 1u64);
        debug!(rules = rules.len(), limit, matched = out.len(), "persist: filter");
        Ok(out)
    }

    fn refresh_if_stale(&self, handle: &ShowList, max_age_hours: u32) -> Result<RefreshOutcome<ShowList>> {
        let age = now_ts().saturating_sub(handle.loaded_at);
        let stored = self.generation()?;
        let stale = age >= i64::from(max_age_hours) * 3600;
        if !stale && stored == handle.generation {
            debug!(age, generation = stored, "persist: show list fresh");
            return Ok(RefreshOutcome::Unchanged);
        }
        info!(age, loaded_generation = handle.generation, stored_generation = stored, "persist: reloading show list");
        Ok(RefreshOutcome::Replaced(self.read_all()?))
    }
}

fn meta_value(db: &rusqlite::Connection, key: &str) -> Result<i64> {
    use rusqlite::OptionalExtension;
    let v = db
        .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| row.get::<_, i64>(0))
        .optional()
        .with_context(|| format!("reading meta {}", key))?;
    Ok(v.unwrap_or(0))
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".filmlist");
        let _ = std::fs::create_dir_all(&p);
        p.push("filmlist.db");
        return p.to_string_lossy().to_string();
    }
    // Fallback to current directory
    "filmlist.db".to_string()
}

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
