// Copyright (C) 2025 Sodep Developers
// SPDX-License-Identifier: Apache-2.0

//! Tables pool.
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};

use sodep_core::{
    crypto::{HandCipher, PeerId, SigningKey},
    game::Credits,
};

use crate::{
    db::Db,
    table::{Table, TableMessage},
};

/// A pool of tables players can join.
#[derive(Debug, Clone)]
pub struct TablesPool(Arc<Mutex<Shared>>);

#[derive(Debug)]
struct Shared {
    tables: Vec<Arc<Table>>,
}

impl TablesPool {
    /// Creates a new table pool.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tables: usize,
        seats: usize,
        min_bet: Credits,
        max_bet: Credits,
        sk: Arc<SigningKey>,
        cipher: HandCipher,
        db: Db,
        shutdown_broadcast_tx: &broadcast::Sender<()>,
        shutdown_complete_tx: &mpsc::Sender<()>,
    ) -> Self {
        let tables = (0..tables)
            .map(|_| {
                Arc::new(Table::new(
                    seats,
                    min_bet,
                    max_bet,
                    sk.clone(),
                    cipher.clone(),
                    db.clone(),
                    shutdown_broadcast_tx.subscribe(),
                    shutdown_complete_tx.clone(),
                ))
            })
            .collect();

        let state = Shared { tables };

        Self(Arc::new(Mutex::new(state)))
    }

    /// Try to join a table in the pool.
    ///
    /// Returns the first table that accepts the player, a join may fail
    /// on a full table, a running round, or a double join. None when no
    /// table is available.
    pub async fn join(
        &self,
        player_id: &PeerId,
        nickname: &str,
        table_tx: mpsc::Sender<TableMessage>,
    ) -> Option<Arc<Table>> {
        let pool = self.0.lock().await;

        for table in &pool.tables {
            let res = table.try_join(player_id, nickname, table_tx.clone()).await;
            if res.is_ok() {
                return Some(table.clone());
            }
        }

        // All tables are busy.
        None
    }
}
