// Copyright (C) 2025 Sodep Developers
// SPDX-License-Identifier: Apache-2.0

//! Type definitions for messages between the client and server.
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    crypto::{PeerId, Signature, SigningKey, VerifyingKey},
    game::{Credits, HandView, TableId, TurnState},
};
use sodep_cards::Card;

/// Message exchanged by a client and a server.
#[derive(Debug, Serialize, Deserialize)]
pub enum Message {
    /// Join a table with a nickname.
    JoinTable(String),
    /// Place a bet for the next round.
    PlaceBet(Credits),
    /// Start a round, table owner only.
    StartRound,
    /// Draw a card, current turn holder only.
    Hit,
    /// Stand and pass the turn, current turn holder only.
    Stand,
    /// Ask the server to check the turn clock.
    CheckTimeout,
    /// Table joined confirmation.
    TableJoined {
        /// The table the player joined.
        table_id: TableId,
        /// The joining player's credit balance.
        credits: Credits,
        /// The table seats.
        seats: u8,
        /// The table minimum bet.
        min_bet: Credits,
        /// The table maximum bet.
        max_bet: Credits,
    },
    /// A player joined the table.
    PlayerJoined {
        /// The player id.
        player_id: PeerId,
        /// The player nickname.
        nickname: String,
        /// The player credit balance.
        credits: Credits,
    },
    /// A player left the table.
    PlayerLeft(PeerId),
    /// A player placed a bet.
    BetPlaced {
        /// The player id.
        player_id: PeerId,
        /// The bet amount.
        bet: Credits,
    },
    /// A round has started.
    RoundStarted {
        /// The round number on this table.
        round: u64,
        /// The dealer for this round.
        dealer: PeerId,
    },
    /// Deal cards to a player, carries the receiver's own full hand.
    DealCards(Vec<Card>),
    /// A game state update.
    GameUpdate {
        /// The players update, in seating order.
        players: Vec<PlayerUpdate>,
        /// Whose turn it is.
        turn: TurnState,
        /// Seconds left on the turn clock.
        turn_secs: Option<u16>,
    },
    /// A player's turn expired, the hand was frozen as it stood.
    TurnTimeout(PeerId),
    /// The round has finished and was settled.
    RoundOver {
        /// The settlement for each player.
        payoffs: Vec<RoundPayoff>,
        /// The key that opens the sealed hands of this table.
        reveal_key: String,
    },
    /// An error message.
    Error(String),
}

/// A player update details.
#[derive(Debug, Serialize, Deserialize)]
pub struct PlayerUpdate {
    /// The player id.
    pub player_id: PeerId,
    /// The player credit balance.
    pub credits: Credits,
    /// The player current bet.
    pub bet: Credits,
    /// The player published hand.
    pub hand: HandView,
    /// The player deals this round.
    pub is_dealer: bool,
}

/// A player's settlement for one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundPayoff {
    /// The player id.
    pub player_id: PeerId,
    /// The revealed hand in draw order.
    pub cards: Vec<Card>,
    /// The hand score.
    pub score: u32,
    /// The outcome label.
    pub label: String,
    /// The credits won or lost.
    pub delta: Credits,
    /// The balance after settlement.
    pub balance: Credits,
}

/// A signed message.
#[derive(Debug, Clone)]
pub struct SignedMessage {
    /// Clonable payload for broadcasting to multiple connection tasks.
    payload: Arc<Payload>,
}

/// Private signed message payload.
#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    msg: Message,
    sig: Signature,
    vk: VerifyingKey,
}

impl SignedMessage {
    /// Creates a new signed message.
    pub fn new(sk: &SigningKey, msg: Message) -> Self {
        let sig = sk.sign(&msg);
        Self {
            payload: Arc::new(Payload {
                msg,
                sig,
                vk: sk.verifying_key(),
            }),
        }
    }

    /// Deserializes this message and verifies its signature.
    pub fn deserialize_and_verify(buf: &[u8]) -> Result<Self> {
        let sm = Self {
            payload: Arc::new(bincode::deserialize::<Payload>(buf)?),
        };

        if !sm.payload.vk.verify(&sm.payload.msg, &sm.payload.sig) {
            bail!("Invalid signature");
        }

        Ok(sm)
    }

    /// Serializes this message.
    pub fn serialize(&self) -> Vec<u8> {
        bincode::serialize(self.payload.as_ref()).expect("Should serialize signed message")
    }

    /// Returns the identifier of the player who sent this message.
    pub fn sender(&self) -> PeerId {
        self.payload.vk.peer_id()
    }

    /// Extracts the signed message.
    pub fn message(&self) -> &Message {
        &self.payload.msg
    }
}
