//! SQLite persistence for jokes, run metadata and appointments.

use crate::error::BotError;
use chrono::{Local, NaiveDateTime};
use rand::Rng;
use rand::seq::SliceRandom;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{error, info};

const LAST_RUN_KEY: &str = "lastrun";

/// A stored joke and how many times it has been told.
#[derive(Debug, Clone, PartialEq)]
pub struct Joke {
    pub id: i64,
    pub text: String,
    pub used_count: i64,
}

/// A visitor someone told the bot they are expecting.
#[derive(Debug, Clone, PartialEq)]
pub struct Appointment {
    pub real_name: String,
    pub user_name: String,
    pub email: String,
    pub user_id: String,
    pub channel: String,
    pub expected_at: NaiveDateTime,
    pub expecting_who: String,
}

/// Persistent SQLite database for the bot.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open an existing database. A missing or unusable file is a
    /// configuration error.
    pub fn open(path: &Path) -> Result<Self, BotError> {
        let unusable = || BotError::Configuration { path: path.to_path_buf() };
        if !path.is_file() {
            return Err(unusable());
        }
        let conn = Connection::open(path).map_err(|e| {
            error!("Cannot open {:?}: {e}", path);
            unusable()
        })?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema().map_err(|e| {
            error!("Cannot use {:?} as the bot database: {e}", path);
            unusable()
        })?;

        info!("Loaded database from {:?} ({} jokes)", path, db.joke_count()?);
        Ok(db)
    }

    /// Open or create a database at the given path.
    pub fn create(path: &Path) -> Result<Self, BotError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    /// Create a new in-memory database.
    pub fn in_memory() -> Result<Self, BotError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> Result<(), BotError> {
        self.conn().execute_batch(r#"
            CREATE TABLE IF NOT EXISTS jokes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                joke TEXT NOT NULL,
                used INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS info (
                name TEXT PRIMARY KEY,
                val TEXT
            );

            CREATE TABLE IF NOT EXISTS appointments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                real_name TEXT NOT NULL,
                user_name TEXT NOT NULL,
                email TEXT NOT NULL,
                user_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                expected_at TEXT NOT NULL,
                expecting TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jokes_used ON jokes(used);
            CREATE INDEX IF NOT EXISTS idx_appointments_user_id ON appointments(user_id);
        "#)?;
        Ok(())
    }

    // ==================== JOKE METHODS ====================

    /// Pick one of the least-told jokes, uniformly at random among ties.
    pub fn next_joke<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Option<Joke>, BotError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, joke, used FROM jokes WHERE used = (SELECT MIN(used) FROM jokes)",
        )?;
        let candidates = stmt
            .query_map([], |row| {
                Ok(Joke {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    used_count: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(candidates.choose(rng).cloned())
    }

    pub fn increment_joke_usage(&self, id: i64) -> Result<(), BotError> {
        self.conn()
            .execute("UPDATE jokes SET used = used + 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn add_joke(&self, text: &str) -> Result<i64, BotError> {
        let conn = self.conn();
        conn.execute("INSERT INTO jokes (joke, used) VALUES (?1, 0)", params![text])?;
        Ok(conn.last_insert_rowid())
    }

    pub fn has_joke(&self, text: &str) -> Result<bool, BotError> {
        let found = self
            .conn()
            .query_row("SELECT 1 FROM jokes WHERE joke = ?1 LIMIT 1", params![text], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn joke(&self, id: i64) -> Result<Option<Joke>, BotError> {
        let joke = self
            .conn()
            .query_row(
                "SELECT id, joke, used FROM jokes WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Joke {
                        id: row.get(0)?,
                        text: row.get(1)?,
                        used_count: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(joke)
    }

    pub fn joke_count(&self) -> Result<usize, BotError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM jokes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ==================== RUN METADATA ====================

    /// Timestamp recorded by the previous start, if any.
    pub fn run_meta(&self) -> Result<Option<String>, BotError> {
        let val = self
            .conn()
            .query_row(
                "SELECT val FROM info WHERE name = ?1 LIMIT 1",
                params![LAST_RUN_KEY],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(val.flatten())
    }

    /// Insert or refresh the single `lastrun` row.
    pub fn set_run_meta(&self, timestamp: &str) -> Result<(), BotError> {
        self.conn().execute(
            "INSERT INTO info (name, val) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET val = excluded.val",
            params![LAST_RUN_KEY, timestamp],
        )?;
        Ok(())
    }

    // ==================== APPOINTMENTS ====================

    pub fn create_appointment(&self, appointment: &Appointment) -> Result<i64, BotError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO appointments (real_name, user_name, email, user_id, channel, expected_at, expecting, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                appointment.real_name,
                appointment.user_name,
                appointment.email,
                appointment.user_id,
                appointment.channel,
                appointment.expected_at,
                appointment.expecting_who,
                Local::now().naive_local(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Appointments recorded by one user, oldest first.
    pub fn appointments_for(&self, user_id: &str) -> Result<Vec<Appointment>, BotError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT real_name, user_name, email, user_id, channel, expected_at, expecting
             FROM appointments WHERE user_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(Appointment {
                    real_name: row.get(0)?,
                    user_name: row.get(1)?,
                    email: row.get(2)?,
                    user_id: row.get(3)?,
                    channel: row.get(4)?,
                    expected_at: row.get(5)?,
                    expecting_who: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn appointment_count(&self) -> Result<usize, BotError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM appointments", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
