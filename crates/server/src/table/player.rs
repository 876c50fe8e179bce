// Copyright (C) 2025 Sodep Developers
// SPDX-License-Identifier: Apache-2.0

//! Table player types.
use tokio::sync::mpsc;

use sodep_core::{crypto::PeerId, game::Credits, message::SignedMessage};

use super::TableMessage;

/// A seated player.
#[derive(Debug)]
pub struct Player {
    /// The player peer id.
    pub player_id: PeerId,
    /// The channel to send messages to this player connection.
    pub table_tx: mpsc::Sender<TableMessage>,
    /// This player nickname.
    pub nickname: String,
    /// The player credit balance as of the last settlement.
    pub credits: Credits,
    /// The player bet for the next round, zero until placed.
    pub bet: Credits,
}

impl Player {
    /// Creates a new player.
    pub fn new(
        player_id: PeerId,
        nickname: String,
        credits: Credits,
        table_tx: mpsc::Sender<TableMessage>,
    ) -> Self {
        Self {
            player_id,
            table_tx,
            nickname,
            credits,
            bet: Credits::ZERO,
        }
    }

    /// Send a message to this player connection.
    pub async fn send(&self, msg: SignedMessage) {
        let _ = self.table_tx.send(TableMessage::Send(msg)).await;
    }
}

/// The seated players in join order.
///
/// The join order is load bearing: it seeds the round turn sequence, and
/// the first seated player owns the table and deals every round.
#[derive(Debug, Default)]
pub struct PlayersState {
    players: Vec<Player>,
}

impl PlayersState {
    /// Adds a player to the table.
    pub fn join(&mut self, player: Player) {
        self.players.push(player);
    }

    /// Removes a player from the table.
    pub fn leave(&mut self, player_id: &PeerId) -> Option<Player> {
        self.players
            .iter()
            .position(|p| &p.player_id == player_id)
            .map(|pos| self.players.remove(pos))
    }

    /// Returns total number of players.
    pub fn count(&self) -> usize {
        self.players.len()
    }

    /// The table owner, the first player who joined.
    pub fn owner(&self) -> Option<&Player> {
        self.players.first()
    }

    /// Looks up a player.
    pub fn get(&self, player_id: &PeerId) -> Option<&Player> {
        self.players.iter().find(|p| &p.player_id == player_id)
    }

    /// Looks up a player for update.
    pub fn get_mut(&mut self, player_id: &PeerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| &p.player_id == player_id)
    }

    /// The number of players with a placed bet.
    pub fn count_with_bet(&self) -> usize {
        self.players
            .iter()
            .filter(|p| p.bet > Credits::ZERO)
            .count()
    }

    /// Clears all bets after a settlement.
    pub fn clear_bets(&mut self) {
        for player in &mut self.players {
            player.bet = Credits::ZERO;
        }
    }

    /// Returns an iterator to all players.
    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.iter()
    }
}
