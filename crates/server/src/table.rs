// Copyright (C) 2025 Sodep Developers
// SPDX-License-Identifier: Apache-2.0

//! Table actor types.
//!
//! A [Table] runs as a single task that owns the whole table state. Every
//! state-mutating action (join, leave, bet, round start, hit, stand, and
//! the timeout check) arrives as a command on one channel and commits in
//! arrival order, so two concurrent hits can never apply against the same
//! snapshot. Distinct tables run in parallel.
use anyhow::Result;
use log::info;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time,
};

use sodep_core::{
    crypto::{HandCipher, PeerId, SigningKey},
    game::{Credits, TableId},
    message::SignedMessage,
};

use crate::db::Db;

pub mod player;
pub mod round;
pub mod state;

use self::state::State;

/// A game rule violation reported back to the acting player.
///
/// Every variant renders as a specific, actionable message. Internal
/// failures are logged at the table and surface only as a retry hint.
#[derive(Debug, Error)]
pub enum TableError {
    /// The action came from a player who does not hold the turn.
    #[error("Not your turn")]
    NotYourTurn,
    /// A round action arrived while no round is running.
    #[error("No round in progress")]
    NoRound,
    /// A betting action arrived while a round is running.
    #[error("Round in progress")]
    RoundInProgress,
    /// Someone other than the table owner asked to start a round.
    #[error("Only the table owner can start a round")]
    NotOwner,
    /// A round cannot start before any bet is placed.
    #[error("No bets placed")]
    NoBets,
    /// The bet is outside the table stakes.
    #[error("Bet must be between {min} and {max} credits")]
    BetOutOfRange {
        /// The table minimum bet.
        min: Credits,
        /// The table maximum bet.
        max: Credits,
    },
    /// The bet exceeds the player balance.
    #[error("Insufficient credits")]
    InsufficientCredits,
    /// The dealer is the counterparty and places no bet.
    #[error("The dealer plays against the table and cannot bet")]
    DealerCannotBet,
    /// A plain hand below 16 may not stand.
    #[error("Cannot stand below 16")]
    CannotStand,
    /// The deck ran out of cards, unreachable with capped seats.
    #[error("The deck is exhausted")]
    DeckExhausted,
    /// An internal failure, recovered or retried at the table.
    #[error("Please try again")]
    Internal(#[from] anyhow::Error),
}

/// A message sent to player connections.
#[derive(Debug)]
pub enum TableMessage {
    /// Sends a message to a client.
    Send(SignedMessage),
    /// Close a client connection.
    Close,
}

/// Command for the table task.
#[derive(Debug)]
enum TableCommand {
    /// Join this table.
    Join {
        player_id: PeerId,
        nickname: String,
        table_tx: mpsc::Sender<TableMessage>,
        resp_tx: oneshot::Sender<Result<()>>,
    },
    /// Leave this table.
    Leave(PeerId),
    /// Handle a player message.
    Message(SignedMessage),
}

/// Table state shared by all players who joined the table.
#[derive(Debug)]
pub struct Table {
    /// This table identifier.
    table_id: TableId,
    /// Channel for sending commands.
    commands_tx: mpsc::Sender<TableCommand>,
}

impl Table {
    /// Creates a new table that manages players and game state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        seats: usize,
        min_bet: Credits,
        max_bet: Credits,
        sk: Arc<SigningKey>,
        cipher: HandCipher,
        db: Db,
        shutdown_broadcast_rx: broadcast::Receiver<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
    ) -> Self {
        // There must be at least 2 seats, a dealer plays nobody otherwise.
        assert!(seats > 1);

        let table_id = TableId::new_id();
        let (commands_tx, commands_rx) = mpsc::channel(128);

        let mut task = TableTask {
            table_id,
            seats,
            min_bet,
            max_bet,
            sk,
            cipher,
            db,
            commands_rx,
            shutdown_broadcast_rx,
            _shutdown_complete_tx: shutdown_complete_tx,
        };

        tokio::spawn(async move {
            task.run().await;
            info!("Table task for table {} stopped", task.table_id);
        });

        Self {
            table_id,
            commands_tx,
        }
    }

    /// This table identifier.
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// A player joins this table.
    ///
    /// Returns an error if the table is full, a round is running, or the
    /// player has already joined.
    pub async fn try_join(
        &self,
        player_id: &PeerId,
        nickname: &str,
        table_tx: mpsc::Sender<TableMessage>,
    ) -> Result<()> {
        let (resp_tx, resp_rx) = oneshot::channel();

        self.commands_tx
            .send(TableCommand::Join {
                player_id: player_id.clone(),
                nickname: nickname.to_string(),
                table_tx,
                resp_tx,
            })
            .await?;

        resp_rx.await?
    }

    /// A player leaves the table.
    pub async fn leave(&self, player_id: &PeerId) {
        let _ = self
            .commands_tx
            .send(TableCommand::Leave(player_id.clone()))
            .await;
    }

    /// Handle a message from a player.
    pub async fn message(&self, msg: SignedMessage) {
        let _ = self.commands_tx.send(TableCommand::Message(msg)).await;
    }
}

struct TableTask {
    /// This table identifier.
    table_id: TableId,
    /// Table seats.
    seats: usize,
    /// The table minimum bet.
    min_bet: Credits,
    /// The table maximum bet.
    max_bet: Credits,
    /// Table key.
    sk: Arc<SigningKey>,
    /// The cipher sealing hands on this table.
    cipher: HandCipher,
    /// Game db.
    db: Db,
    /// Channel for receiving table commands.
    commands_rx: mpsc::Receiver<TableCommand>,
    /// Channel for listening shutdown notification.
    shutdown_broadcast_rx: broadcast::Receiver<()>,
    /// Sender that drops when this table is done.
    _shutdown_complete_tx: mpsc::Sender<()>,
}

impl TableTask {
    async fn run(&mut self) {
        let mut state = State::new(
            self.table_id,
            self.seats,
            self.min_bet,
            self.max_bet,
            self.sk.clone(),
            self.cipher.clone(),
            self.db.clone(),
        );

        // The tick drives the lazy turn clock and retries a failed
        // settlement, clients may also poll with a CheckTimeout message.
        let mut ticks = time::interval(Duration::from_millis(500));

        loop {
            tokio::select! {
                // Server is shutting down exit this handler.
                _ = self.shutdown_broadcast_rx.recv() => break,
                _ = ticks.tick() => {
                    state.tick().await;
                }
                // We have received a command for this table.
                res = self.commands_rx.recv() => match res {
                    Some(TableCommand::Join { player_id, nickname, table_tx, resp_tx }) => {
                        let res = state.join(&player_id, &nickname, table_tx).await;
                        let _ = resp_tx.send(res);
                    }
                    Some(TableCommand::Leave(player_id)) => {
                        state.leave(&player_id).await;
                    }
                    Some(TableCommand::Message(msg)) => {
                        state.message(msg).await;
                    }
                    None => break,
                },
            }
        }
    }
}
