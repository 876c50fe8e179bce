// Copyright (C) 2025 Sodep Developers
// SPDX-License-Identifier: Apache-2.0

//! Database types for persisting players and the credit ledger.
use anyhow::Result;
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use std::{path::Path, sync::Arc};

use sodep_core::{crypto::PeerId, game::Credits};

/// A database player row.
#[derive(Debug)]
pub struct Player {
    /// The player id.
    pub player_id: PeerId,
    /// The player credit balance.
    pub credits: Credits,
}

/// A single settlement to apply to a player for one round.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    /// The player id.
    pub player_id: PeerId,
    /// The credits won or lost.
    pub delta: Credits,
    /// The outcome label stored with the transaction.
    pub reason: String,
}

/// Database for persisting players state and the credit ledger.
#[derive(Debug, Clone)]
pub struct Db {
    db: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open a database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS players (
               id TEXT PRIMARY KEY,
               credits INTEGER NOT NULL,
               created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
               last_update DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            (),
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS ledger (
               id INTEGER PRIMARY KEY AUTOINCREMENT,
               player_id TEXT NOT NULL REFERENCES players(id),
               round TEXT NOT NULL,
               delta INTEGER NOT NULL,
               balance INTEGER NOT NULL,
               reason TEXT NOT NULL,
               created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            (),
        )?;

        Ok(Db {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Get a player or insert one with the given number of credits.
    pub async fn get_or_insert_player(&self, player_id: PeerId, credits: Credits) -> Result<Player> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let db = db.lock();

            let mut stmt = db.prepare(
                "SELECT id, credits
                 FROM players
                 WHERE id = ?1",
            )?;

            let res = stmt.query_row(params![player_id.digits()], |row| {
                Ok(Player {
                    player_id: player_id.clone(),
                    credits: Credits::new(row.get::<usize, i64>(1)?),
                })
            });

            match res {
                Ok(player) => Ok(player),
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    let player = Player { player_id, credits };

                    db.execute(
                        "INSERT INTO players (id, credits, last_update)
                         VALUES (?1, ?2, CURRENT_TIMESTAMP)",
                        params![player.player_id.digits(), player.credits.amount()],
                    )?;

                    Ok(player)
                }
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }

    /// Reads a player balance.
    pub async fn balance(&self, player_id: &PeerId) -> Result<Credits> {
        let db = self.db.clone();
        let player_id = player_id.clone();
        tokio::task::spawn_blocking(move || {
            let db = db.lock();

            let credits = db.query_row(
                "SELECT credits FROM players WHERE id = ?1",
                params![player_id.digits()],
                |row| row.get::<usize, i64>(0),
            )?;

            Ok(Credits::new(credits))
        })
        .await?
    }

    /// Applies a round settlement as a single transaction.
    ///
    /// Every entry updates the player balance and appends one ledger row
    /// recording the delta, the resulting balance, and the outcome label.
    /// Either all entries commit or none does, a round is never settled
    /// halfway.
    ///
    /// Returns the updated balances.
    pub async fn settle_round(
        &self,
        round: String,
        entries: Vec<LedgerEntry>,
    ) -> Result<Vec<(PeerId, Credits)>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut db = db.lock();

            let tx = db.transaction()?;
            let mut balances = Vec::with_capacity(entries.len());

            for entry in entries {
                tx.execute(
                    "UPDATE players SET
                       credits = credits + ?1,
                       last_update = CURRENT_TIMESTAMP
                     WHERE id = ?2",
                    params![entry.delta.amount(), entry.player_id.digits()],
                )?;

                // Fails the whole settlement if the player row is missing.
                let balance = tx.query_row(
                    "SELECT credits FROM players WHERE id = ?1",
                    params![entry.player_id.digits()],
                    |row| row.get::<usize, i64>(0),
                )?;

                tx.execute(
                    "INSERT INTO ledger (player_id, round, delta, balance, reason)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        entry.player_id.digits(),
                        round,
                        entry.delta.amount(),
                        balance,
                        entry.reason
                    ],
                )?;

                balances.push((entry.player_id, Credits::new(balance)));
            }

            tx.commit()?;

            Ok(balances)
        })
        .await?
    }
}
