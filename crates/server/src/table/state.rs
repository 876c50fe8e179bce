// Copyright (C) 2025 Sodep Developers
// SPDX-License-Identifier: Apache-2.0

//! Table state types.
//!
//! [State] orchestrates one table: the betting phase between rounds, the
//! active [Round], and the settlement that closes it. It runs inside the
//! table task, every method call is one serialized action that either fully
//! applies or leaves the state untouched.
use anyhow::{Result, anyhow, bail};
use log::{error, info, warn};
use rand::{SeedableRng, rngs::StdRng};
use std::{sync::Arc, time::Instant};
use tokio::sync::mpsc;

use sodep_cards::Deck;
use sodep_core::{
    crypto::{HandCipher, PeerId, SigningKey},
    game::{Credits, HandView, TableId, TurnState},
    message::{Message, PlayerUpdate, RoundPayoff, SignedMessage},
};
use sodep_eval::settle;

use crate::db::{Db, LedgerEntry};

use super::{
    TableError, TableMessage,
    player::{Player, PlayersState},
    round::{HitOutcome, Round, TURN_TIMEOUT},
};

/// Credits granted to a player seen for the first time.
pub const STARTING_CREDITS: Credits = Credits::new(1_000);

/// Internal table state.
#[derive(Debug)]
pub struct State {
    table_id: TableId,
    seats: usize,
    min_bet: Credits,
    max_bet: Credits,
    sk: Arc<SigningKey>,
    cipher: HandCipher,
    db: Db,
    players: PlayersState,
    round: Option<Round>,
    rounds_dealt: u64,
    rng: StdRng,
}

impl State {
    /// Create a new state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        table_id: TableId,
        seats: usize,
        min_bet: Credits,
        max_bet: Credits,
        sk: Arc<SigningKey>,
        cipher: HandCipher,
        db: Db,
    ) -> Self {
        Self::with_rng(
            table_id,
            seats,
            min_bet,
            max_bet,
            sk,
            cipher,
            db,
            StdRng::from_os_rng(),
        )
    }

    /// Create a new state with user initialized randomness.
    #[allow(clippy::too_many_arguments)]
    fn with_rng(
        table_id: TableId,
        seats: usize,
        min_bet: Credits,
        max_bet: Credits,
        sk: Arc<SigningKey>,
        cipher: HandCipher,
        db: Db,
        rng: StdRng,
    ) -> Self {
        Self {
            table_id,
            seats,
            min_bet,
            max_bet,
            sk,
            cipher,
            db,
            players: PlayersState::default(),
            round: None,
            rounds_dealt: 0,
            rng,
        }
    }

    /// A player tries to join the table.
    ///
    /// The first player to join owns the table, deals every round, and is
    /// the only one who can start one.
    pub async fn join(
        &mut self,
        player_id: &PeerId,
        nickname: &str,
        table_tx: mpsc::Sender<TableMessage>,
    ) -> Result<()> {
        if self.round.is_some() {
            bail!("Round in progress");
        }

        if self.players.count() == self.seats {
            bail!("Table full");
        }

        if self.players.get(player_id).is_some() {
            bail!("Player has already joined");
        }

        // First seen players get a starting balance.
        let credits = self
            .db
            .get_or_insert_player(player_id.clone(), STARTING_CREDITS)
            .await?
            .credits;

        let join_player = Player::new(
            player_id.clone(),
            nickname.to_string(),
            credits,
            table_tx,
        );

        // Send a table joined confirmation to the player who joined.
        let msg = Message::TableJoined {
            table_id: self.table_id,
            credits,
            seats: self.seats as u8,
            min_bet: self.min_bet,
            max_bet: self.max_bet,
        };
        join_player.send(SignedMessage::new(&self.sk, msg)).await;

        // Send joined message for each player at the table to the new player.
        for player in self.players.iter() {
            let msg = Message::PlayerJoined {
                player_id: player.player_id.clone(),
                nickname: player.nickname.clone(),
                credits: player.credits,
            };
            join_player.send(SignedMessage::new(&self.sk, msg)).await;
        }

        // Tell all players at the table that a player joined. Note that
        // because the player has not been added to the table yet it won't
        // get the broadcast.
        let msg = Message::PlayerJoined {
            player_id: player_id.clone(),
            nickname: nickname.to_string(),
            credits,
        };
        self.broadcast(msg).await;

        self.players.join(join_player);

        info!("Player {player_id} joined table {}", self.table_id);

        Ok(())
    }

    /// A player leaves the table.
    ///
    /// A dealer leaving aborts the round unsettled, no bet was collected
    /// yet so no credits move. Any other leaver forfeits their remaining
    /// turn, their hand stays frozen in the round and settles normally.
    pub async fn leave(&mut self, player_id: &PeerId) {
        if self.players.leave(player_id).is_none() {
            return;
        }

        info!("Player {player_id} left table {}", self.table_id);
        self.broadcast(Message::PlayerLeft(player_id.clone())).await;

        let mut dealer_left = false;
        let mut finished = false;
        if let Some(round) = self.round.as_mut() {
            if round.dealer() == player_id {
                dealer_left = true;
            } else {
                round.remove_player(player_id);
                finished = round.is_finished();
            }
        }

        if dealer_left {
            warn!(
                "Dealer {player_id} left table {}, round {} aborted",
                self.table_id, self.rounds_dealt
            );
            self.round = None;
            self.players.clear_bets();
            self.broadcast(Message::Error("Dealer left, round aborted".to_string()))
                .await;
            self.broadcast_game_update().await;
        } else if self.round.is_some() {
            if finished {
                self.settle().await;
            } else {
                self.broadcast_game_update().await;
            }
        }
    }

    /// Handle a message from a player.
    pub async fn message(&mut self, msg: SignedMessage) {
        let sender = msg.sender();
        if self.players.get(&sender).is_none() {
            return;
        }

        let res = match msg.message() {
            Message::PlaceBet(bet) => self.place_bet(&sender, *bet).await,
            Message::StartRound => self.start_round(&sender).await,
            Message::Hit => self.hit(&sender).await,
            Message::Stand => self.stand(&sender).await,
            Message::CheckTimeout => {
                self.poll_turn_clock().await;
                Ok(())
            }
            Message::Error(e) => {
                error!("Error from {sender}: {e}");
                Ok(())
            }
            _ => Ok(()),
        };

        if let Err(err) = res {
            if let TableError::Internal(e) = &err {
                error!("Table {} internal error: {e:#}", self.table_id);
            }
            self.send_error(&sender, &err).await;
        }
    }

    /// Drives the lazy turn clock.
    ///
    /// Called from the periodic table tick, any client may also trigger it
    /// with a CheckTimeout poll. The clock always compares the stored turn
    /// start against the server wall clock, never client supplied timing.
    pub async fn tick(&mut self) {
        if self.round.is_some() {
            self.poll_turn_clock().await;
        }
    }

    /// A player places a bet for the next round.
    async fn place_bet(&mut self, player_id: &PeerId, bet: Credits) -> Result<(), TableError> {
        if self.round.is_some() {
            return Err(TableError::RoundInProgress);
        }

        if self
            .players
            .owner()
            .is_some_and(|owner| &owner.player_id == player_id)
        {
            return Err(TableError::DealerCannotBet);
        }

        if bet < self.min_bet || bet > self.max_bet {
            return Err(TableError::BetOutOfRange {
                min: self.min_bet,
                max: self.max_bet,
            });
        }

        // Validate against the ledger balance, not the cached one.
        let balance = self.db.balance(player_id).await?;
        if balance < bet {
            return Err(TableError::InsufficientCredits);
        }

        let player = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| anyhow!("player {player_id} not seated"))?;
        player.bet = bet;
        player.credits = balance;

        info!(
            "Player {player_id} bet {bet} on table {}",
            self.table_id
        );

        self.broadcast(Message::BetPlaced {
            player_id: player_id.clone(),
            bet,
        })
        .await;

        Ok(())
    }

    /// The table owner starts a round.
    ///
    /// Requires at least one placed bet. Bets freeze into the round, every
    /// seated player is dealt in, instant winners skip the turn sequence
    /// and the first player in join order acts first.
    async fn start_round(&mut self, player_id: &PeerId) -> Result<(), TableError> {
        if self.round.is_some() {
            return Err(TableError::RoundInProgress);
        }

        let owner = self
            .players
            .owner()
            .ok_or_else(|| anyhow!("start on an empty table"))?;
        if &owner.player_id != player_id {
            return Err(TableError::NotOwner);
        }

        if self.players.count_with_bet() == 0 {
            return Err(TableError::NoBets);
        }

        let dealer = owner.player_id.clone();
        let seats = self
            .players
            .iter()
            .map(|p| (p.player_id.clone(), p.bet))
            .collect::<Vec<_>>();

        self.rounds_dealt += 1;
        let deck = Deck::new_and_shuffled(&mut self.rng);
        let round = Round::deal(self.rounds_dealt, dealer.clone(), &seats, deck)?;

        info!(
            "Table {} round {} started, dealer {dealer}",
            self.table_id, self.rounds_dealt
        );
        for (player_id, _) in &seats {
            if round.is_instant_winner(player_id) {
                info!(
                    "Player {player_id} won on the deal at table {}",
                    self.table_id
                );
            }
        }

        self.round = Some(round);

        self.broadcast(Message::RoundStarted {
            round: self.rounds_dealt,
            dealer,
        })
        .await;

        // Deal each player their own cards privately, the table only sees
        // the sealed payloads in the game update.
        let hands = self
            .players
            .iter()
            .filter_map(|p| {
                let round = self.round.as_ref()?;
                let hand = round.hand(&p.player_id)?;
                Some((p.player_id.clone(), hand.cards().to_vec()))
            })
            .collect::<Vec<_>>();
        for (player_id, cards) in hands {
            let msg = SignedMessage::new(&self.sk, Message::DealCards(cards));
            if let Some(player) = self.players.get(&player_id) {
                player.send(msg).await;
            }
        }

        if self.round.as_ref().is_some_and(|r| r.is_finished()) {
            // Degenerate round with nobody to play, settle right away.
            self.settle().await;
        } else {
            self.broadcast_game_update().await;
        }

        Ok(())
    }

    /// The turn holder draws a card.
    async fn hit(&mut self, player_id: &PeerId) -> Result<(), TableError> {
        let Some(round) = self.round.as_mut() else {
            return Err(TableError::NoRound);
        };

        let outcome = match round.hit(player_id) {
            // The turn already advanced past this terminal hand, tolerate
            // the client race as a no-op.
            Err(TableError::NotYourTurn)
                if round.hand(player_id).is_some_and(|h| h.is_terminal()) =>
            {
                return Ok(());
            }
            res => res?,
        };

        if let HitOutcome::Drew(card) = outcome {
            let (cards, score, terminal) = round
                .hand(player_id)
                .map(|h| (h.cards().to_vec(), h.score(), h.is_terminal()))
                .unwrap_or_default();

            info!(
                "Player {player_id} drew {card} for {score} on table {}",
                self.table_id
            );

            // A busted or five card hand passes the turn by itself.
            if terminal {
                round.advance_turn();
            }

            let msg = SignedMessage::new(&self.sk, Message::DealCards(cards));
            if let Some(player) = self.players.get(player_id) {
                player.send(msg).await;
            }
        }

        if self.round.as_ref().is_some_and(|r| r.is_finished()) {
            self.settle().await;
        } else {
            self.broadcast_game_update().await;
        }

        Ok(())
    }

    /// The turn holder stands and passes the turn.
    async fn stand(&mut self, player_id: &PeerId) -> Result<(), TableError> {
        let Some(round) = self.round.as_mut() else {
            return Err(TableError::NoRound);
        };

        match round.stand(player_id) {
            // Same race as a late hit, the turn already moved on.
            Err(TableError::NotYourTurn)
                if round.hand(player_id).is_some_and(|h| h.is_terminal()) =>
            {
                return Ok(());
            }
            res => res?,
        }

        info!("Player {player_id} stands on table {}", self.table_id);

        if self.round.as_ref().is_some_and(|r| r.is_finished()) {
            self.settle().await;
        } else {
            self.broadcast_game_update().await;
        }

        Ok(())
    }

    /// Checks the turn clock and retries a pending settlement.
    async fn poll_turn_clock(&mut self) {
        // A finished round still present means a settlement failed, retry.
        if self.round.as_ref().is_some_and(|r| r.is_finished()) {
            self.settle().await;
            return;
        }

        let expired = self
            .round
            .as_mut()
            .and_then(|r| r.check_timeout(Instant::now(), TURN_TIMEOUT));

        if let Some(expired) = &expired {
            info!(
                "Player {expired} timed out on table {}, hand frozen",
                self.table_id
            );
            self.broadcast(Message::TurnTimeout(expired.clone())).await;
        }

        if self.round.as_ref().is_some_and(|r| r.is_finished()) {
            self.settle().await;
        } else if self.round.is_some() {
            // Refresh the turn clock for the clients.
            self.broadcast_game_update().await;
        }
    }

    /// Settles the finished round, logging and leaving it pending on
    /// failure so the tick retries it.
    async fn settle(&mut self) {
        if let Err(e) = self.try_settle().await {
            error!(
                "Table {} settlement failed, will retry: {e:#}",
                self.table_id
            );
        }
    }

    /// Computes every player's winnings against the dealer and commits
    /// them to the ledger as one transaction.
    ///
    /// The round is not observably finished until the ledger commit
    /// succeeds, only then the reveal and the payoffs go out.
    async fn try_settle(&mut self) -> Result<()> {
        let Some(round) = self.round.as_ref() else {
            return Ok(());
        };

        let dealer_id = round.dealer().clone();
        let dealer_hand = round
            .hand(&dealer_id)
            .ok_or_else(|| anyhow!("missing dealer hand"))?
            .clone();

        let mut entries = Vec::new();
        let mut payoffs = Vec::new();
        let mut dealer_exposure = Credits::ZERO;

        for player_id in round.seats() {
            if player_id == &dealer_id {
                continue;
            }

            let Some(hand) = round.hand(player_id) else {
                continue;
            };

            let bet = round.bet(player_id);
            let delta = Credits::new(settle::winnings(hand, &dealer_hand, bet.amount()));
            let label = settle::result_label(hand.class(), delta.amount()).to_string();
            dealer_exposure += delta;

            entries.push(LedgerEntry {
                player_id: player_id.clone(),
                delta,
                reason: label.clone(),
            });
            payoffs.push(RoundPayoff {
                player_id: player_id.clone(),
                cards: hand.cards().to_vec(),
                score: hand.score(),
                label,
                delta,
                balance: Credits::ZERO,
            });
        }

        // The dealer is the counterparty for the whole table.
        let dealer_delta = -dealer_exposure;
        let dealer_label = settle::result_label(dealer_hand.class(), dealer_delta.amount()).to_string();
        entries.push(LedgerEntry {
            player_id: dealer_id.clone(),
            delta: dealer_delta,
            reason: dealer_label.clone(),
        });
        payoffs.push(RoundPayoff {
            player_id: dealer_id,
            cards: dealer_hand.cards().to_vec(),
            score: dealer_hand.score(),
            label: dealer_label,
            delta: dealer_delta,
            balance: Credits::ZERO,
        });

        let round_no = round.round();
        let round_key = format!("{}/{round_no}", self.table_id);

        let balances = self.db.settle_round(round_key, entries).await?;

        for (player_id, balance) in balances {
            if let Some(player) = self.players.get_mut(&player_id) {
                player.credits = balance;
            }
            if let Some(payoff) = payoffs.iter_mut().find(|p| p.player_id == player_id) {
                payoff.balance = balance;
            }
        }

        info!("Table {} round {round_no} settled", self.table_id);

        // Reveal the hands, then publish the settlement and the key that
        // opens the payloads sealed during the round.
        self.broadcast_game_update().await;
        self.broadcast(Message::RoundOver {
            payoffs,
            reveal_key: self.cipher.reveal_key(),
        })
        .await;

        self.round = None;
        self.players.clear_bets();

        Ok(())
    }

    /// Broadcast a game state update to all connected players.
    ///
    /// Hands are sealed while the round runs, every publication draws a
    /// fresh nonce. Once the round has finished hands go out in the clear.
    async fn broadcast_game_update(&self) {
        let now = Instant::now();
        let (turn, turn_secs) = match &self.round {
            Some(round) => (round.turn().clone(), round.turn_secs(now)),
            None => (TurnState::Finished, None),
        };

        let players = self
            .players
            .iter()
            .map(|p| {
                let hand = match &self.round {
                    Some(round) => match round.hand(&p.player_id) {
                        Some(hand) if round.is_finished() => HandView::Revealed {
                            cards: hand.cards().to_vec(),
                            score: hand.score(),
                        },
                        Some(hand) => HandView::Sealed {
                            count: hand.len() as u8,
                            payload: self.cipher.seal(hand.cards()),
                        },
                        None => HandView::None,
                    },
                    None => HandView::None,
                };

                let is_dealer = match &self.round {
                    Some(round) => round.dealer() == &p.player_id,
                    None => self
                        .players
                        .owner()
                        .is_some_and(|owner| owner.player_id == p.player_id),
                };

                PlayerUpdate {
                    player_id: p.player_id.clone(),
                    credits: p.credits,
                    bet: p.bet,
                    hand,
                    is_dealer,
                }
            })
            .collect();

        let msg = Message::GameUpdate {
            players,
            turn,
            turn_secs,
        };
        self.broadcast(msg).await;
    }

    /// Broadcast a message to all players at the table.
    async fn broadcast(&self, msg: Message) {
        let smsg = SignedMessage::new(&self.sk, msg);
        for player in self.players.iter() {
            player.send(smsg.clone()).await;
        }
    }

    /// Report a rule violation to the acting player.
    async fn send_error(&self, player_id: &PeerId, err: &TableError) {
        if let Some(player) = self.players.get(player_id) {
            let smsg = SignedMessage::new(&self.sk, Message::Error(err.to_string()));
            player.send(smsg).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sodep_eval::HandClass;

    // Creates a `State` with seeded randomness and memory database.
    fn new_state(seats: usize) -> State {
        let rng = StdRng::seed_from_u64(13);
        let db = Db::open_in_memory().unwrap();
        let sk = Arc::new(SigningKey::default());
        let cipher = HandCipher::from_secret("test table secret");
        State::with_rng(
            TableId::new_id(),
            seats,
            Credits::new(10),
            Credits::new(10_000),
            sk,
            cipher,
            db,
            rng,
        )
    }

    struct TestPlayer {
        sk: SigningKey,
        player_id: PeerId,
        tx: mpsc::Sender<TableMessage>,
        rx: mpsc::Receiver<TableMessage>,
    }

    impl TestPlayer {
        fn new() -> Self {
            let sk = SigningKey::default();
            let player_id = sk.verifying_key().peer_id();
            let (tx, rx) = mpsc::channel(256);
            Self {
                sk,
                player_id,
                tx,
                rx,
            }
        }

        fn signed(&self, msg: Message) -> SignedMessage {
            SignedMessage::new(&self.sk, msg)
        }

        /// Drains all messages received so far.
        fn drain(&mut self) -> Vec<SignedMessage> {
            let mut msgs = Vec::new();
            while let Ok(TableMessage::Send(msg)) = self.rx.try_recv() {
                msgs.push(msg);
            }
            msgs
        }
    }

    macro_rules! matches_message {
        ($msg:expr, $pattern:pat $(if $guard:expr)?) => {
            match $msg.message() {
                $pattern $(if $guard)? => true,
                _ => false,
            }
        };
    }

    async fn join(state: &mut State, player: &TestPlayer, nickname: &str) {
        state
            .join(&player.player_id, nickname, player.tx.clone())
            .await
            .unwrap();
    }

    /// Plays the round out deterministically: the turn holder stands when
    /// allowed, hits otherwise, until the round settles.
    async fn play_out(state: &mut State, players: &[&TestPlayer]) {
        for _ in 0..100 {
            let Some(round) = state.round.as_ref() else {
                return;
            };

            let actor_id = match round.turn() {
                TurnState::Player(id) => id.clone(),
                TurnState::Dealer => round.dealer().clone(),
                TurnState::Finished => break,
            };

            let can_stand = round
                .hand(&actor_id)
                .map(|h| h.can_stand())
                .unwrap_or(true);

            let actor = players
                .iter()
                .find(|p| p.player_id == actor_id)
                .expect("turn holder is seated");

            let msg = if can_stand { Message::Stand } else { Message::Hit };
            state.message(actor.signed(msg)).await;
        }

        assert!(state.round.is_none(), "round should settle");
    }

    #[tokio::test]
    async fn join_bet_and_start() {
        let mut state = new_state(3);

        let mut p1 = TestPlayer::new();
        let mut p2 = TestPlayer::new();

        join(&mut state, &p1, "dealer").await;

        let msgs = p1.drain();
        assert!(matches_message!(
            msgs[0],
            Message::TableJoined { credits, .. } if *credits == STARTING_CREDITS
        ));

        join(&mut state, &p2, "player").await;

        // New player gets a TableJoined and a PlayerJoined for each player
        // at the table.
        let msgs = p2.drain();
        assert!(matches_message!(msgs[0], Message::TableJoined { .. }));
        assert!(matches_message!(msgs[1], Message::PlayerJoined { .. }));

        // Player one gets a player joined too.
        let msgs = p1.drain();
        assert!(matches_message!(msgs[0], Message::PlayerJoined { .. }));

        // Double join is rejected.
        assert!(
            state
                .join(&p2.player_id, "player", p2.tx.clone())
                .await
                .is_err()
        );

        // Only the owner starts a round.
        state.message(p2.signed(Message::StartRound)).await;
        let msgs = p2.drain();
        assert!(matches_message!(
            msgs[0],
            Message::Error(e) if e.contains("owner")
        ));

        // No bets placed yet.
        state.message(p1.signed(Message::StartRound)).await;
        let msgs = p1.drain();
        assert!(matches_message!(
            msgs[0],
            Message::Error(e) if e.contains("No bets")
        ));

        // The dealer cannot bet.
        state
            .message(p1.signed(Message::PlaceBet(Credits::new(100))))
            .await;
        let msgs = p1.drain();
        assert!(matches_message!(
            msgs[0],
            Message::Error(e) if e.contains("dealer")
        ));

        // Bets outside the table stakes bounce before any state change.
        for bad in [5, 20_000] {
            state
                .message(p2.signed(Message::PlaceBet(Credits::new(bad))))
                .await;
            let msgs = p2.drain();
            assert!(matches_message!(
                msgs[0],
                Message::Error(e) if e.contains("between")
            ));
        }

        // A bet over the balance bounces too.
        state
            .message(p2.signed(Message::PlaceBet(Credits::new(5_000))))
            .await;
        let msgs = p2.drain();
        assert!(matches_message!(
            msgs[0],
            Message::Error(e) if e.contains("Insufficient")
        ));

        // A valid bet is broadcast to the table.
        state
            .message(p2.signed(Message::PlaceBet(Credits::new(100))))
            .await;
        let msgs = p2.drain();
        assert!(matches_message!(
            msgs[0],
            Message::BetPlaced { bet, .. } if *bet == Credits::new(100)
        ));
        assert!(!p1.drain().is_empty());

        // The round starts, both players get their cards privately and a
        // game update with sealed hands only.
        state.message(p1.signed(Message::StartRound)).await;
        assert!(state.round.is_some());

        let msgs = p2.drain();
        assert!(matches_message!(msgs[0], Message::RoundStarted { .. }));

        let dealt = msgs
            .iter()
            .find_map(|m| match m.message() {
                Message::DealCards(cards) => Some(cards.clone()),
                _ => None,
            })
            .expect("player cards dealt");
        assert_eq!(dealt.len(), 2);

        let sealed = msgs
            .iter()
            .find_map(|m| match m.message() {
                Message::GameUpdate { players, .. } => players
                    .iter()
                    .find(|p| p.player_id == p2.player_id)
                    .map(|p| p.hand.clone()),
                _ => None,
            })
            .expect("game update with p2 hand");

        // The sealed payload opens back to the dealt cards with the table
        // cipher.
        match sealed {
            HandView::Sealed { count, payload } => {
                assert_eq!(count, 2);
                assert_eq!(state.cipher.open(&payload), dealt);
            }
            view => panic!("expected sealed hand, got {view:?}"),
        }

        // Joining mid round is rejected.
        let p4 = TestPlayer::new();
        assert!(
            state
                .join(&p4.player_id, "late", p4.tx.clone())
                .await
                .is_err()
        );

        // Betting mid round is rejected.
        state
            .message(p2.signed(Message::PlaceBet(Credits::new(100))))
            .await;
        let msgs = p2.drain();
        assert!(matches_message!(
            msgs[0],
            Message::Error(e) if e.contains("Round in progress")
        ));
    }

    #[tokio::test]
    async fn wrong_turn_is_rejected_without_state_change() {
        let mut state = new_state(3);

        let mut p1 = TestPlayer::new();
        let mut p2 = TestPlayer::new();
        let mut p3 = TestPlayer::new();

        join(&mut state, &p1, "dealer").await;
        join(&mut state, &p2, "p2").await;
        join(&mut state, &p3, "p3").await;

        for p in [&p2, &p3] {
            state
                .message(p.signed(Message::PlaceBet(Credits::new(100))))
                .await;
        }
        state.message(p1.signed(Message::StartRound)).await;

        // A hit from anybody but the turn holder must bounce and draw no
        // card.
        let turn = state.round.as_ref().unwrap().turn().clone();
        let wrong = match &turn {
            TurnState::Player(id) if *id == p2.player_id => &mut p3,
            _ => &mut p2,
        };
        let wrong_id = wrong.player_id.clone();

        wrong.drain();
        state.message(wrong.signed(Message::Hit)).await;

        let msgs = wrong.drain();
        assert!(matches_message!(
            msgs[0],
            Message::Error(e) if e.contains("Not your turn")
        ));

        let round = state.round.as_ref().unwrap();
        assert_eq!(round.hand(&wrong_id).unwrap().len(), 2);
        assert_eq!(round.turn(), &turn);

        // A hit from the turn holder draws exactly one card.
        let actor_id = match &turn {
            TurnState::Player(id) => id.clone(),
            _ => p1.player_id.clone(),
        };
        let actor = [&mut p1, &mut p2, &mut p3]
            .into_iter()
            .find(|p| p.player_id == actor_id)
            .unwrap();
        state.message(actor.signed(Message::Hit)).await;

        match state.round.as_ref() {
            Some(round) => assert_eq!(round.hand(&actor_id).unwrap().len(), 3),
            // The dealer drew into a terminal hand and the round settled.
            None => {}
        }
    }

    #[tokio::test]
    async fn full_round_settles_and_persists() {
        let mut state = new_state(3);

        let mut p1 = TestPlayer::new();
        let mut p2 = TestPlayer::new();
        let mut p3 = TestPlayer::new();

        join(&mut state, &p1, "dealer").await;
        join(&mut state, &p2, "p2").await;
        join(&mut state, &p3, "p3").await;

        state
            .message(p2.signed(Message::PlaceBet(Credits::new(100))))
            .await;
        state
            .message(p3.signed(Message::PlaceBet(Credits::new(101))))
            .await;
        state.message(p1.signed(Message::StartRound)).await;

        play_out(&mut state, &[&p1, &p2, &p3]).await;

        // Every player received the settlement.
        let msgs = p2.drain();
        let (payoffs, reveal_key) = msgs
            .iter()
            .find_map(|m| match m.message() {
                Message::RoundOver {
                    payoffs,
                    reveal_key,
                } => Some((payoffs.clone(), reveal_key.clone())),
                _ => None,
            })
            .expect("round over received");

        assert_eq!(payoffs.len(), 3);
        assert_eq!(reveal_key, state.cipher.reveal_key());

        // The dealer absorbs the negated sum of the player deltas.
        let total: Credits = payoffs.iter().map(|p| p.delta).sum();
        assert_eq!(total, Credits::ZERO);

        let dealer_payoff = payoffs
            .iter()
            .find(|p| p.player_id == p1.player_id)
            .unwrap();
        let players_total: Credits = payoffs
            .iter()
            .filter(|p| p.player_id != p1.player_id)
            .map(|p| p.delta)
            .sum();
        assert_eq!(dealer_payoff.delta, -players_total);

        // Settled balances are persisted before the round is observably
        // over.
        for payoff in &payoffs {
            assert_eq!(
                state.db.balance(&payoff.player_id).await.unwrap(),
                payoff.balance
            );
            assert_eq!(payoff.balance, STARTING_CREDITS + payoff.delta);
            assert!(payoff.cards.len() >= 2);
            assert!(!payoff.label.is_empty());
        }

        // The final update revealed every hand.
        let revealed = msgs
            .iter()
            .filter_map(|m| match m.message() {
                Message::GameUpdate { players, turn, .. } if *turn == TurnState::Finished => {
                    Some(players)
                }
                _ => None,
            })
            .next_back()
            .expect("final game update");
        assert!(
            revealed
                .iter()
                .all(|p| matches!(p.hand, HandView::Revealed { .. }))
        );

        // Bets cleared, the table waits for the next round.
        assert!(state.round.is_none());
        assert!(state.players.iter().all(|p| p.bet == Credits::ZERO));

        // Payoff labels match the revealed classifications.
        for payoff in &payoffs {
            let class = HandClass::eval(&payoff.cards);
            assert_eq!(
                payoff.label,
                settle::result_label(class, payoff.delta.amount())
            );
        }

        // A second round can start on the same table.
        p1.drain();
        p3.drain();
        state
            .message(p2.signed(Message::PlaceBet(Credits::new(10))))
            .await;
        state.message(p1.signed(Message::StartRound)).await;
        assert!(state.round.is_some());
        play_out(&mut state, &[&p1, &p2, &p3]).await;
    }

    #[tokio::test]
    async fn instant_winner_settles_from_frozen_hand() {
        // Seeds are cheap, find one that deals a non-dealer player an
        // instant winner so the exclusion path is covered end to end.
        for seed in 0..200u64 {
            let db = Db::open_in_memory().unwrap();
            let sk = Arc::new(SigningKey::default());
            let cipher = HandCipher::from_secret("test table secret");
            let mut state = State::with_rng(
                TableId::new_id(),
                3,
                Credits::new(10),
                Credits::new(10_000),
                sk,
                cipher,
                db,
                StdRng::seed_from_u64(seed),
            );

            let p1 = TestPlayer::new();
            let mut p2 = TestPlayer::new();
            let p3 = TestPlayer::new();

            join(&mut state, &p1, "dealer").await;
            join(&mut state, &p2, "p2").await;
            join(&mut state, &p3, "p3").await;

            for p in [&p2, &p3] {
                state
                    .message(p.signed(Message::PlaceBet(Credits::new(100))))
                    .await;
            }
            state.message(p1.signed(Message::StartRound)).await;

            let round = state.round.as_ref().unwrap();
            if !round.is_instant_winner(&p2.player_id) {
                continue;
            }

            // The winner is out of the turn sequence from the start.
            assert_ne!(round.turn(), &TurnState::Player(p2.player_id.clone()));
            let class = round.hand(&p2.player_id).unwrap().class();
            let frozen = round.hand(&p2.player_id).unwrap().cards().to_vec();

            play_out(&mut state, &[&p1, &p2, &p3]).await;

            let msgs = p2.drain();
            let payoffs = msgs
                .iter()
                .find_map(|m| match m.message() {
                    Message::RoundOver { payoffs, .. } => Some(payoffs.clone()),
                    _ => None,
                })
                .expect("round over received");

            // Settled with the untouched two card hand and its class label.
            let payoff = payoffs
                .iter()
                .find(|p| p.player_id == p2.player_id)
                .unwrap();
            assert_eq!(payoff.cards, frozen);
            assert_eq!(payoff.label, class.label());
            return;
        }

        panic!("no seed dealt an instant winner");
    }
}
