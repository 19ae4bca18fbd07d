//! SQLite store for alerts, users and login sessions.
//!
//! The pipeline appends alerts through the sink; the API reads them back.
//! Nothing in this crate updates or deletes an alert row once written.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// One persisted alert, without the image blob.
#[derive(Clone, Debug, Serialize)]
pub struct AlertRow {
    pub id: i64,
    pub created_at: i64,
    pub object_class: String,
    pub confidence: f64,
    pub distance_m: f64,
    pub image_path: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct UserRow {
    pub id: i64,
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub email_verified: bool,
    pub created_at: i64,
    pub last_login: Option<i64>,
    pub role: String,
    pub is_active: bool,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct AdminStats {
    pub total_users: i64,
    pub active_users: i64,
    pub total_alerts: i64,
    pub recent_alerts: i64,
}

/// Outcome of a register call: the row id, and whether it was newly created.
#[derive(Clone, Copy, Debug)]
pub struct RegisterOutcome {
    pub user_id: i64,
    pub created: bool,
}

pub struct SqliteAlertStore {
    conn: Connection,
}

impl SqliteAlertStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS users (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              uid TEXT UNIQUE NOT NULL,
              email TEXT UNIQUE NOT NULL,
              display_name TEXT,
              email_verified INTEGER NOT NULL DEFAULT 0,
              created_at INTEGER NOT NULL,
              last_login INTEGER,
              role TEXT NOT NULL DEFAULT 'user',
              is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS alerts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              user_id INTEGER,
              created_at INTEGER NOT NULL,
              object_class TEXT NOT NULL,
              confidence REAL NOT NULL,
              distance_m REAL NOT NULL,
              image_path TEXT NOT NULL,
              image_data BLOB NOT NULL,
              FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS user_sessions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              user_id INTEGER NOT NULL,
              login_time INTEGER NOT NULL,
              ip_address TEXT,
              user_agent TEXT,
              FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at);
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON user_sessions(user_id);
            "#,
        )?;
        Ok(())
    }

    // -------------------- alerts --------------------

    /// Append one alert row. Returns the new row id.
    pub fn insert_alert(
        &mut self,
        created_at: i64,
        object_class: &str,
        confidence: f64,
        distance_m: f64,
        image_path: &str,
        image_data: &[u8],
    ) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO alerts(created_at, object_class, confidence, distance_m, image_path, image_data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                created_at,
                object_class,
                confidence,
                distance_m,
                image_path,
                image_data
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Recent alerts, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, created_at, object_class, confidence, distance_m, image_path
            FROM alerts ORDER BY id DESC LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(AlertRow {
                id: row.get(0)?,
                created_at: row.get(1)?,
                object_class: row.get(2)?,
                confidence: row.get(3)?,
                distance_m: row.get(4)?,
                image_path: row.get(5)?,
            })
        })?;
        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row?);
        }
        Ok(alerts)
    }

    /// Stored JPEG for one alert, when present.
    pub fn alert_image(&self, alert_id: i64) -> Result<Option<Vec<u8>>> {
        let image = self
            .conn
            .query_row(
                "SELECT image_data FROM alerts WHERE id = ?1",
                params![alert_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(image)
    }

    /// Alerts attributed to one user, newest first.
    pub fn alerts_for_user(&self, user_id: i64) -> Result<Vec<AlertRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, created_at, object_class, confidence, distance_m, image_path
            FROM alerts WHERE user_id = ?1 ORDER BY created_at DESC
            "#,
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(AlertRow {
                id: row.get(0)?,
                created_at: row.get(1)?,
                object_class: row.get(2)?,
                confidence: row.get(3)?,
                distance_m: row.get(4)?,
                image_path: row.get(5)?,
            })
        })?;
        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row?);
        }
        Ok(alerts)
    }

    // -------------------- users --------------------

    /// Register a user, or report the existing row when uid/email is taken.
    pub fn register_user(
        &mut self,
        uid: &str,
        email: &str,
        display_name: Option<&str>,
        email_verified: bool,
        now_s: i64,
    ) -> Result<RegisterOutcome> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM users WHERE uid = ?1 OR email = ?2",
                params![uid, email],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(user_id) = existing {
            return Ok(RegisterOutcome {
                user_id,
                created: false,
            });
        }

        self.conn.execute(
            r#"
            INSERT INTO users (uid, email, display_name, email_verified, created_at, role)
            VALUES (?1, ?2, ?3, ?4, ?5, 'user')
            "#,
            params![uid, email, display_name, email_verified, now_s],
        )?;
        Ok(RegisterOutcome {
            user_id: self.conn.last_insert_rowid(),
            created: true,
        })
    }

    /// Seed (or keep) the admin account. Used by the db_setup tool.
    pub fn seed_admin(&mut self, uid: &str, email: &str, now_s: i64) -> Result<i64> {
        let outcome = self.register_user(uid, email, Some("Admin"), true, now_s)?;
        if outcome.created {
            self.conn.execute(
                "UPDATE users SET role = 'admin' WHERE id = ?1",
                params![outcome.user_id],
            )?;
        }
        Ok(outcome.user_id)
    }

    /// Stamp last_login and record a session row. Returns false when the uid
    /// is unknown (nothing is written).
    pub fn log_login(
        &mut self,
        uid: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        now_s: i64,
    ) -> Result<bool> {
        let user_id: Option<i64> = self
            .conn
            .query_row("SELECT id FROM users WHERE uid = ?1", params![uid], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(user_id) = user_id else {
            return Ok(false);
        };

        self.conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![now_s, user_id],
        )?;
        self.conn.execute(
            "INSERT INTO user_sessions (user_id, login_time, ip_address, user_agent) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, now_s, ip_address, user_agent],
        )?;
        Ok(true)
    }

    pub fn user_by_uid(&self, uid: &str) -> Result<Option<UserRow>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT id, uid, email, display_name, email_verified, created_at, last_login, role, is_active
                FROM users WHERE uid = ?1
                "#,
                params![uid],
                map_user_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, uid, email, display_name, email_verified, created_at, last_login, role, is_active
            FROM users ORDER BY created_at DESC
            "#,
        )?;
        let rows = stmt.query_map([], map_user_row)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    // -------------------- stats --------------------

    /// Aggregate counters for the admin dashboard. "Active" and "recent"
    /// mean within the last 24 hours of `now_s`.
    pub fn admin_stats(&self, now_s: i64) -> Result<AdminStats> {
        let day_ago = now_s - 24 * 60 * 60;
        let count = |sql: &str, params: &[&dyn rusqlite::ToSql]| -> Result<i64> {
            self.conn
                .query_row(sql, params, |row| row.get(0))
                .map_err(|e| anyhow!("stats query failed: {e}"))
        };
        Ok(AdminStats {
            total_users: count("SELECT COUNT(*) FROM users", &[])?,
            active_users: count(
                "SELECT COUNT(*) FROM users WHERE last_login >= ?1",
                &[&day_ago],
            )?,
            total_alerts: count("SELECT COUNT(*) FROM alerts", &[])?,
            recent_alerts: count(
                "SELECT COUNT(*) FROM alerts WHERE created_at >= ?1",
                &[&day_ago],
            )?,
        })
    }
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        uid: row.get(1)?,
        email: row.get(2)?,
        display_name: row.get(3)?,
        email_verified: row.get(4)?,
        created_at: row.get(5)?,
        last_login: row.get(6)?,
        role: row.get(7)?,
        is_active: row.get(8)?,
    })
}
