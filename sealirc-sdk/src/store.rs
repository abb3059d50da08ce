//! SQLite persistence layer.
//!
//! Stores settings, server records, room/PM key records, aliases and the
//! last channel listing per server. Uses WAL mode for concurrent reads
//! during writes.
//!
//! Room keys hold only the PBKDF2 output and its salt, never a passphrase.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};

use crate::channel_list::ChannelListing;
use crate::config::ServerConfig;

/// Settings inserted on first open if absent.
pub const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    ("timestamp_format", "%H:%M:%S"),
    ("show_timestamps", "1"),
    ("auto_reconnect", "0"),
    ("reconnect_delay", "5"),
    ("channel_list_expiration", "3600"),
];

/// Database handle wrapping a SQLite connection.
pub struct Db {
    conn: Connection,
}

/// A persisted room or PM key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomKeyRow {
    pub server: String,
    pub conversation: String,
    pub salt: Vec<u8>,
    pub derived_key: Vec<u8>,
    pub iterations: u32,
}

/// A persisted alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRow {
    pub name: String,
    pub expansion: String,
}

impl Db {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> SqlResult<()> {
        self.conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS settings (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS servers (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                name               TEXT NOT NULL UNIQUE,
                hostname           TEXT NOT NULL,
                port               INTEGER NOT NULL DEFAULT 6667,
                tls                INTEGER NOT NULL DEFAULT 0,
                nickname           TEXT NOT NULL,
                alt_nickname       TEXT,
                username           TEXT NOT NULL,
                realname           TEXT NOT NULL,
                auto_join_channels TEXT NOT NULL DEFAULT '',
                default_encoding   TEXT NOT NULL DEFAULT 'UTF-8',
                auto_connect       INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS room_keys (
                server       TEXT NOT NULL,
                conversation TEXT NOT NULL,
                salt         BLOB NOT NULL,
                derived_key  BLOB NOT NULL,
                iterations   INTEGER NOT NULL,
                PRIMARY KEY (server, conversation)
            );

            CREATE TABLE IF NOT EXISTS aliases (
                name      TEXT PRIMARY KEY,
                expansion TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS channel_lists (
                server        TEXT PRIMARY KEY,
                channels_json TEXT NOT NULL,
                fetched_at    INTEGER NOT NULL
            );
            ",
        )?;
        for (key, value) in DEFAULT_SETTINGS {
            self.conn.execute(
                "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
        Ok(())
    }

    // ── Settings ───────────────────────────────────────────────────────

    /// Look up a setting, falling back to `default` when unset.
    pub fn get_setting(&self, key: &str, default: &str) -> SqlResult<String> {
        let value = self
            .conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value.unwrap_or_else(|| default.to_string()))
    }

    pub fn set_setting(&self, key: &str, value: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    // ── Servers ────────────────────────────────────────────────────────

    const SERVER_COLUMNS: &'static str = "id, name, hostname, port, tls, nickname, alt_nickname,
         username, realname, auto_join_channels, default_encoding, auto_connect";

    fn server_from_row(row: &rusqlite::Row<'_>) -> SqlResult<ServerConfig> {
        Ok(ServerConfig {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            hostname: row.get(2)?,
            port: row.get(3)?,
            tls: row.get::<_, i32>(4)? != 0,
            nickname: row.get(5)?,
            alt_nickname: row.get(6)?,
            username: row.get(7)?,
            realname: row.get(8)?,
            auto_join_channels: row.get(9)?,
            default_encoding: row.get(10)?,
            auto_connect: row.get::<_, i32>(11)? != 0,
        })
    }

    /// All configured servers, ordered by name.
    pub fn servers(&self) -> SqlResult<Vec<ServerConfig>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM servers ORDER BY name", Self::SERVER_COLUMNS))?;
        let rows = stmt.query_map([], Self::server_from_row)?;
        rows.collect()
    }

    pub fn server(&self, id: i64) -> SqlResult<Option<ServerConfig>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM servers WHERE id = ?1", Self::SERVER_COLUMNS),
                params![id],
                Self::server_from_row,
            )
            .optional()
    }

    pub fn server_by_name(&self, name: &str) -> SqlResult<Option<ServerConfig>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM servers WHERE name = ?1", Self::SERVER_COLUMNS),
                params![name],
                Self::server_from_row,
            )
            .optional()
    }

    /// Insert a server record and return its id.
    pub fn add_server(&self, server: &ServerConfig) -> SqlResult<i64> {
        self.conn.execute(
            "INSERT INTO servers (name, hostname, port, tls, nickname, alt_nickname,
                username, realname, auto_join_channels, default_encoding, auto_connect)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                server.name,
                server.hostname,
                server.port,
                server.tls as i32,
                server.nickname,
                server.alt_nickname,
                server.username,
                server.realname,
                server.auto_join_channels,
                server.default_encoding,
                server.auto_connect as i32,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_server(&self, id: i64, server: &ServerConfig) -> SqlResult<()> {
        self.conn.execute(
            "UPDATE servers SET name=?1, hostname=?2, port=?3, tls=?4, nickname=?5,
                alt_nickname=?6, username=?7, realname=?8, auto_join_channels=?9,
                default_encoding=?10, auto_connect=?11
             WHERE id = ?12",
            params![
                server.name,
                server.hostname,
                server.port,
                server.tls as i32,
                server.nickname,
                server.alt_nickname,
                server.username,
                server.realname,
                server.auto_join_channels,
                server.default_encoding,
                server.auto_connect as i32,
                id,
            ],
        )?;
        Ok(())
    }

    pub fn delete_server(&self, id: i64) -> SqlResult<()> {
        self.conn.execute("DELETE FROM servers WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ── Room keys ──────────────────────────────────────────────────────

    pub fn room_key(&self, server: &str, conversation: &str) -> SqlResult<Option<RoomKeyRow>> {
        self.conn
            .query_row(
                "SELECT server, conversation, salt, derived_key, iterations
                 FROM room_keys WHERE server = ?1 AND conversation = ?2",
                params![server, conversation],
                |row| {
                    Ok(RoomKeyRow {
                        server: row.get(0)?,
                        conversation: row.get(1)?,
                        salt: row.get(2)?,
                        derived_key: row.get(3)?,
                        iterations: row.get(4)?,
                    })
                },
            )
            .optional()
    }

    /// All stored keys (used to warm the key ring cache).
    pub fn room_keys(&self) -> SqlResult<Vec<RoomKeyRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT server, conversation, salt, derived_key, iterations FROM room_keys",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RoomKeyRow {
                server: row.get(0)?,
                conversation: row.get(1)?,
                salt: row.get(2)?,
                derived_key: row.get(3)?,
                iterations: row.get(4)?,
            })
        })?;
        rows.collect()
    }

    /// Create or overwrite the key for a conversation.
    pub fn set_room_key(&self, row: &RoomKeyRow) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO room_keys (server, conversation, salt, derived_key, iterations)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(server, conversation) DO UPDATE SET
                salt=excluded.salt,
                derived_key=excluded.derived_key,
                iterations=excluded.iterations",
            params![row.server, row.conversation, row.salt, row.derived_key, row.iterations],
        )?;
        Ok(())
    }

    /// Returns true if a key was removed.
    pub fn remove_room_key(&self, server: &str, conversation: &str) -> SqlResult<bool> {
        let n = self.conn.execute(
            "DELETE FROM room_keys WHERE server = ?1 AND conversation = ?2",
            params![server, conversation],
        )?;
        Ok(n > 0)
    }

    // ── Aliases ────────────────────────────────────────────────────────

    pub fn aliases(&self) -> SqlResult<Vec<AliasRow>> {
        let mut stmt = self.conn.prepare("SELECT name, expansion FROM aliases ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(AliasRow {
                name: row.get(0)?,
                expansion: row.get(1)?,
            })
        })?;
        rows.collect()
    }

    /// Add or replace an alias. Names are stored lower-case.
    pub fn add_alias(&self, name: &str, expansion: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO aliases (name, expansion) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET expansion=excluded.expansion",
            params![name.to_lowercase(), expansion],
        )?;
        Ok(())
    }

    pub fn delete_alias(&self, name: &str) -> SqlResult<bool> {
        let n = self
            .conn
            .execute("DELETE FROM aliases WHERE name = ?1", params![name.to_lowercase()])?;
        Ok(n > 0)
    }

    // ── Channel list cache ─────────────────────────────────────────────

    /// Persist the latest `LIST` result for a server.
    pub fn save_channel_list(
        &self,
        server: &str,
        channels: &[ChannelListing],
        fetched_at: u64,
    ) -> SqlResult<()> {
        let json = serde_json::to_string(channels)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        self.conn.execute(
            "INSERT INTO channel_lists (server, channels_json, fetched_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(server) DO UPDATE SET
                channels_json=excluded.channels_json,
                fetched_at=excluded.fetched_at",
            params![server, json, fetched_at as i64],
        )?;
        Ok(())
    }

    /// Latest persisted listing and its fetch time (unix seconds).
    pub fn channel_list(&self, server: &str) -> SqlResult<Option<(Vec<ChannelListing>, u64)>> {
        let row: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT channels_json, fetched_at FROM channel_lists WHERE server = ?1",
                params![server],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((json, fetched_at)) => {
                let channels = serde_json::from_str(&json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
                })?;
                Ok(Some((channels, fetched_at as u64)))
            }
            None => Ok(None),
        }
    }
}
