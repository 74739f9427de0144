// SQLite-backed score store.

use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::model::PlayerId;
use crate::rank::{PlayerScore, Rank};
use crate::store::{truncate, ScoreStore, StoreError};

/// SQLite persistence for channel seeds, rounds played, cumulative scores and
/// per-channel configuration.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // busy_timeout bounds how long a write can stall a round when several
        // games persist at once.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS channels (
                channel_id    TEXT PRIMARY KEY,
                name          TEXT NOT NULL DEFAULT '',
                seed          INTEGER NOT NULL,
                rounds_played INTEGER NOT NULL DEFAULT 0,
                updated_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS players (
                player_id TEXT PRIMARY KEY,
                name      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS channel_scores (
                channel_id TEXT NOT NULL,
                player_id  TEXT NOT NULL REFERENCES players(player_id),
                score      INTEGER NOT NULL DEFAULT 0,
                first_seq  INTEGER NOT NULL,
                PRIMARY KEY (channel_id, player_id)
            );

            CREATE TABLE IF NOT EXISTS channel_config (
                channel_id TEXT NOT NULL,
                key        TEXT NOT NULL,
                value      TEXT NOT NULL,
                PRIMARY KEY (channel_id, key)
            );

            CREATE INDEX IF NOT EXISTS idx_channel_scores_player ON channel_scores(player_id);
            ",
        )?;

        info!("Score store ready at {path}");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// All known channels as `(channel_id, name)`, ordered by id.
    pub fn channels(&self) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT channel_id, name FROM channels ORDER BY channel_id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Drop a channel's cumulative ranking. Seeds and rounds played survive so
    /// the question order keeps advancing.
    pub fn reset_channel_ranking(&self, channel_id: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM channel_scores WHERE channel_id = ?1",
            params![channel_id],
        )?;
        Ok(())
    }

    fn ensure_channel(conn: &Connection, channel_id: &str) -> Result<(i64, u64), StoreError> {
        let existing: Option<(i64, i64)> = conn
            .query_row(
                "SELECT seed, rounds_played FROM channels WHERE channel_id = ?1",
                params![channel_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((seed, played)) = existing {
            return Ok((seed, played.max(0) as u64));
        }

        let seed: i64 = rand::random();
        conn.execute(
            "INSERT INTO channels (channel_id, seed) VALUES (?1, ?2)",
            params![channel_id, seed],
        )?;
        info!("New channel {channel_id} registered");
        Ok((seed, 0))
    }

    fn query_rank(
        conn: &Connection,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Rank, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let scores = stmt
            .query_map(args, |row| {
                let player_id: String = row.get(0)?;
                let name: String = row.get(1)?;
                let score: i64 = row.get(2)?;
                Ok(PlayerScore::new(
                    player_id,
                    name,
                    u32::try_from(score.max(0)).unwrap_or(u32::MAX),
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Rank::from_scores(scores))
    }
}

impl ScoreStore for SqliteStore {
    fn next_game(&self, channel_id: &str) -> Result<(i64, u64), StoreError> {
        let conn = self.conn()?;
        Self::ensure_channel(&conn, channel_id)
    }

    fn inc_round_played(&self, channel_id: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        Self::ensure_channel(&conn, channel_id)?;
        conn.execute(
            "UPDATE channels
                SET rounds_played = rounds_played + 1,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
              WHERE channel_id = ?1",
            params![channel_id],
        )?;
        Ok(())
    }

    fn save_score(&self, channel_id: &str, channel_name: &str, rank: &Rank) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        Self::ensure_channel(&conn, channel_id)?;

        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE channels SET name = ?2 WHERE channel_id = ?1",
            params![channel_id, channel_name],
        )?;
        for ps in rank {
            tx.execute(
                "INSERT INTO players (player_id, name) VALUES (?1, ?2)
                 ON CONFLICT(player_id) DO UPDATE SET name = excluded.name",
                params![ps.player_id.as_str(), ps.name],
            )?;
            tx.execute(
                "INSERT INTO channel_scores (channel_id, player_id, score, first_seq)
                 VALUES (?1, ?2, ?3,
                         (SELECT COALESCE(MAX(first_seq), 0) + 1 FROM channel_scores))
                 ON CONFLICT(channel_id, player_id) DO UPDATE SET
                    score = score + excluded.score",
                params![channel_id, ps.player_id.as_str(), ps.score],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn channel_ranking(&self, channel_id: &str, limit: usize) -> Result<Rank, StoreError> {
        let conn = self.conn()?;
        let rank = Self::query_rank(
            &conn,
            "SELECT s.player_id, p.name, s.score
               FROM channel_scores s JOIN players p ON p.player_id = s.player_id
              WHERE s.channel_id = ?1
              ORDER BY s.score DESC, s.first_seq ASC",
            &[&channel_id as &dyn rusqlite::ToSql],
        )?;
        Ok(truncate(rank, limit))
    }

    fn player_ranking(&self, limit: usize) -> Result<Rank, StoreError> {
        let conn = self.conn()?;
        let rank = Self::query_rank(
            &conn,
            "SELECT s.player_id, p.name, SUM(s.score) AS total
               FROM channel_scores s JOIN players p ON p.player_id = s.player_id
              GROUP BY s.player_id, p.name
              ORDER BY total DESC, MIN(s.first_seq) ASC",
            &[],
        )?;
        Ok(truncate(rank, limit))
    }

    fn player_score(&self, player_id: &PlayerId) -> Result<Option<PlayerScore>, StoreError> {
        Ok(self.player_ranking(0)?.get(player_id).cloned())
    }

    fn channel_config(&self, channel_id: &str, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM channel_config WHERE channel_id = ?1 AND key = ?2",
                params![channel_id, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_channel_config(&self, channel_id: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO channel_config (channel_id, key, value) VALUES (?1, ?2, ?3)",
            params![channel_id, key, value],
        )?;
        Ok(())
    }
}
