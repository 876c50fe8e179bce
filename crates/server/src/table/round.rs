// Copyright (C) 2025 Sodep Developers
// SPDX-License-Identifier: Apache-2.0

//! The round turn engine.
//!
//! A [Round] owns the deck and the hands for one game and enforces the turn
//! order: every non-dealer player who was not dealt an instant winner, in
//! join order, then the dealer, then the round is finished. The engine is
//! synchronous, the table task drives it and publishes state after every
//! committed action.
use ahash::{AHashMap, AHashSet};
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use sodep_cards::{Card, Deck};
use sodep_core::{
    crypto::PeerId,
    game::{Credits, TurnState},
};
use sodep_eval::{Hand, HandClass};

use super::TableError;

/// The fixed turn clock, applies to every player and to the dealer.
pub const TURN_TIMEOUT: Duration = Duration::from_secs(30);

/// The outcome of a hit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitOutcome {
    /// A card was drawn into the hand.
    Drew(Card),
    /// The hand was already terminal, nothing changed.
    ///
    /// Tolerates a client racing the turn engine, retrying a hit against a
    /// terminal hand never draws another card.
    Ignored,
}

/// The state of one round on a table.
#[derive(Debug)]
pub struct Round {
    /// The round number on the owning table.
    round: u64,
    /// The dealer, always plays last.
    dealer: PeerId,
    /// The deck for this round, discarded with it.
    deck: Deck,
    /// The participants in join order, dealer included.
    seats: Vec<PeerId>,
    /// The bets frozen at deal time, the dealer carries no bet.
    bets: AHashMap<PeerId, Credits>,
    /// Every participant's hand, dealer included.
    hands: AHashMap<PeerId, Hand>,
    /// Players dealt a double ace or a Sò dép, they take no turn.
    instant_winners: AHashSet<PeerId>,
    /// Players still waiting for their turn, in join order.
    queue: VecDeque<PeerId>,
    /// Whose turn it is.
    turn: TurnState,
    /// When the current turn started.
    turn_started: Instant,
}

impl Round {
    /// Deals the initial two cards to every participant and builds the
    /// turn sequence.
    ///
    /// `players` is the table roster in join order with the bets frozen
    /// for this round, dealer included. With no participant besides the
    /// dealer the round finishes immediately, there is nobody to settle
    /// against. If every non-dealer player is an instant winner the dealer
    /// still plays out their own hand.
    pub fn deal(
        round: u64,
        dealer: PeerId,
        players: &[(PeerId, Credits)],
        mut deck: Deck,
    ) -> Result<Round, TableError> {
        let mut hands = AHashMap::with_capacity(players.len());
        for (player_id, _) in players {
            let mut hand = Hand::new();
            for _ in 0..2 {
                hand.push(deck.deal().ok_or(TableError::DeckExhausted)?);
            }
            hands.insert(player_id.clone(), hand);
        }

        let seats = players.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>();
        let bets = players.iter().cloned().collect::<AHashMap<_, _>>();

        let instant_winners = seats
            .iter()
            .filter(|id| **id != dealer)
            .filter(|id| {
                matches!(
                    hands[*id].class(),
                    HandClass::DoubleAce | HandClass::Blackjack
                )
            })
            .cloned()
            .collect::<AHashSet<_>>();

        let mut queue = seats
            .iter()
            .filter(|id| **id != dealer && !instant_winners.contains(*id))
            .cloned()
            .collect::<VecDeque<_>>();

        let turn = if seats.len() < 2 {
            TurnState::Finished
        } else {
            match queue.pop_front() {
                Some(first) => TurnState::Player(first),
                None => TurnState::Dealer,
            }
        };

        Ok(Round {
            round,
            dealer,
            deck,
            seats,
            bets,
            hands,
            instant_winners,
            queue,
            turn,
            turn_started: Instant::now(),
        })
    }

    /// The round number on the owning table.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// The dealer id.
    pub fn dealer(&self) -> &PeerId {
        &self.dealer
    }

    /// The participants in join order, dealer included.
    pub fn seats(&self) -> &[PeerId] {
        &self.seats
    }

    /// The bet a participant froze into this round.
    pub fn bet(&self, player_id: &PeerId) -> Credits {
        self.bets.get(player_id).copied().unwrap_or(Credits::ZERO)
    }

    /// Whose turn it is.
    pub fn turn(&self) -> &TurnState {
        &self.turn
    }

    /// Checks if the round is over.
    pub fn is_finished(&self) -> bool {
        self.turn == TurnState::Finished
    }

    /// Checks if a player holds the current turn.
    pub fn is_turn(&self, player_id: &PeerId) -> bool {
        match &self.turn {
            TurnState::Player(id) => id == player_id,
            TurnState::Dealer => player_id == &self.dealer,
            TurnState::Finished => false,
        }
    }

    /// A participant's hand.
    pub fn hand(&self, player_id: &PeerId) -> Option<&Hand> {
        self.hands.get(player_id)
    }

    /// Checks if a player won on the initial deal.
    pub fn is_instant_winner(&self, player_id: &PeerId) -> bool {
        self.instant_winners.contains(player_id)
    }

    /// Seconds left on the turn clock.
    pub fn turn_secs(&self, now: Instant) -> Option<u16> {
        (!self.is_finished()).then(|| {
            TURN_TIMEOUT
                .saturating_sub(now.duration_since(self.turn_started))
                .as_secs() as u16
        })
    }

    /// Draws a card into the current turn holder's hand.
    ///
    /// A hit against a busted or five card hand is ignored, the turn
    /// engine never corrupts a terminal hand. Hitting does not advance the
    /// turn, the table task advances once the hand goes terminal or the
    /// player stands.
    pub fn hit(&mut self, player_id: &PeerId) -> Result<HitOutcome, TableError> {
        if !self.is_turn(player_id) {
            return Err(TableError::NotYourTurn);
        }

        let hand = self
            .hands
            .get_mut(player_id)
            .ok_or(TableError::NotYourTurn)?;

        if hand.is_terminal() {
            return Ok(HitOutcome::Ignored);
        }

        let card = self.deck.deal().ok_or(TableError::DeckExhausted)?;
        hand.push(card);

        Ok(HitOutcome::Drew(card))
    }

    /// The current turn holder stands.
    ///
    /// A plain hand below 16 may not stand, only the turn clock can freeze
    /// it.
    pub fn stand(&mut self, player_id: &PeerId) -> Result<(), TableError> {
        if !self.is_turn(player_id) {
            return Err(TableError::NotYourTurn);
        }

        if !self.hands[player_id].can_stand() {
            return Err(TableError::CannotStand);
        }

        self.advance_turn();
        Ok(())
    }

    /// Moves the turn to the next player in the sequence, then the dealer,
    /// then finished. Resets the turn clock. A no-op once finished.
    pub fn advance_turn(&mut self) {
        self.turn = match &self.turn {
            TurnState::Finished => return,
            TurnState::Dealer => TurnState::Finished,
            TurnState::Player(_) => match self.queue.pop_front() {
                Some(next) => TurnState::Player(next),
                None => TurnState::Dealer,
            },
        };

        self.turn_started = Instant::now();
    }

    /// Checks the turn clock against the stored turn start.
    ///
    /// On expiry the turn holder is forced to stand with their hand frozen
    /// as it lies, below the 16 point threshold included, and the turn
    /// advances. Returns the expired player for notification, this is the
    /// only path that freezes a hand below 16 and it must be visible to
    /// the table. Advancing resets the clock, a second check right after
    /// expiry is a no-op.
    pub fn check_timeout(&mut self, now: Instant, timeout: Duration) -> Option<PeerId> {
        let expired = match &self.turn {
            TurnState::Player(id) => id.clone(),
            TurnState::Dealer => self.dealer.clone(),
            TurnState::Finished => return None,
        };

        if now.duration_since(self.turn_started) < timeout {
            return None;
        }

        self.advance_turn();
        // The next turn's clock starts at the evaluation time, a second
        // check with the same clock reading is a no-op.
        self.turn_started = now;
        Some(expired)
    }

    /// Removes a leaving player from the turn sequence.
    ///
    /// The hand stays in the round so the player still settles against the
    /// dealer, frozen as it lies.
    pub fn remove_player(&mut self, player_id: &PeerId) {
        self.queue.retain(|id| id != player_id);
        if self.is_turn(player_id) {
            self.advance_turn();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sodep_cards::{Rank, Suit};
    use sodep_core::crypto::SigningKey;

    fn peer_id() -> PeerId {
        SigningKey::default().verifying_key().peer_id()
    }

    fn seat(player_id: &PeerId) -> (PeerId, Credits) {
        (player_id.clone(), Credits::new(100))
    }

    fn card(rank: Rank, suit: Suit) -> Card {
        Card::new(rank, suit)
    }

    /// A deck that deals the given cards first to last.
    fn stacked(cards: &[Card]) -> Deck {
        Deck::from_cards(cards.iter().rev().cloned().collect())
    }

    use Rank::*;
    use Suit::*;

    #[test]
    fn instant_winners_skip_the_turn_sequence() {
        let dealer = peer_id();
        let p2 = peer_id();
        let p3 = peer_id();

        // Deal order: dealer, p2, p3 two cards each.
        let deck = stacked(&[
            card(Ten, Clubs),
            card(Nine, Clubs),
            card(Ace, Spades),
            card(King, Hearts),
            card(Five, Clubs),
            card(Five, Diamonds),
        ]);

        let players = [seat(&dealer), seat(&p2), seat(&p3)];
        let round = Round::deal(1, dealer.clone(), &players, deck).unwrap();

        // P2 was dealt a Sò dép and takes no turn.
        assert!(round.is_instant_winner(&p2));
        assert!(!round.is_instant_winner(&p3));
        assert!(!round.is_instant_winner(&dealer));

        // P3 plays first, the dealer last.
        assert_eq!(round.turn(), &TurnState::Player(p3.clone()));
        assert_eq!(round.hand(&p2).unwrap().class(), HandClass::Blackjack);
        assert_eq!(round.hand(&p3).unwrap().score(), 10);
    }

    #[test]
    fn dealer_is_not_an_instant_winner() {
        let dealer = peer_id();
        let p2 = peer_id();

        let deck = stacked(&[
            card(Ace, Spades),
            card(King, Hearts),
            card(Five, Clubs),
            card(Five, Diamonds),
        ]);

        let players = [seat(&dealer), seat(&p2)];
        let round = Round::deal(1, dealer.clone(), &players, deck).unwrap();

        // The dealer holds a two card 21 but plays their turn anyway.
        assert_eq!(round.hand(&dealer).unwrap().class(), HandClass::Blackjack);
        assert!(!round.is_instant_winner(&dealer));
        assert_eq!(round.turn(), &TurnState::Player(p2));
    }

    #[test]
    fn all_instant_winners_leaves_the_dealer_to_play() {
        let dealer = peer_id();
        let p2 = peer_id();

        let deck = stacked(&[
            card(Ten, Clubs),
            card(Nine, Clubs),
            card(Ace, Spades),
            card(Ace, Hearts),
        ]);

        let players = [seat(&dealer), seat(&p2)];
        let mut round = Round::deal(1, dealer.clone(), &players, deck).unwrap();

        assert!(round.is_instant_winner(&p2));
        assert_eq!(round.turn(), &TurnState::Dealer);

        round.advance_turn();
        assert!(round.is_finished());
    }

    #[test]
    fn dealer_alone_finishes_immediately() {
        let dealer = peer_id();

        let deck = stacked(&[card(Ten, Clubs), card(Nine, Clubs)]);
        let round = Round::deal(1, dealer.clone(), &[seat(&dealer)], deck).unwrap();

        assert!(round.is_finished());
    }

    #[test]
    fn hit_only_on_your_turn() {
        let dealer = peer_id();
        let p2 = peer_id();
        let p3 = peer_id();

        let deck = stacked(&[
            card(Ten, Clubs),
            card(Nine, Clubs),
            card(Five, Clubs),
            card(Five, Diamonds),
            card(Six, Clubs),
            card(Seven, Diamonds),
            card(Nine, Hearts),
        ]);

        let players = [seat(&dealer), seat(&p2), seat(&p3)];
        let mut round = Round::deal(1, dealer.clone(), &players, deck).unwrap();

        assert_eq!(round.turn(), &TurnState::Player(p2.clone()));
        assert!(matches!(round.hit(&p3), Err(TableError::NotYourTurn)));
        assert!(matches!(round.hit(&dealer), Err(TableError::NotYourTurn)));

        let outcome = round.hit(&p2).unwrap();
        assert_eq!(outcome, HitOutcome::Drew(card(Nine, Hearts)));
        assert_eq!(round.hand(&p2).unwrap().score(), 19);

        // Hitting does not advance the turn.
        assert_eq!(round.turn(), &TurnState::Player(p2.clone()));
    }

    #[test]
    fn hit_is_a_noop_on_a_terminal_hand() {
        let dealer = peer_id();
        let p2 = peer_id();

        let deck = stacked(&[
            card(Ten, Clubs),
            card(Nine, Clubs),
            card(King, Clubs),
            card(Queen, Diamonds),
            card(Five, Hearts),
            card(Deuce, Hearts),
        ]);

        let players = [seat(&dealer), seat(&p2)];
        let mut round = Round::deal(1, dealer.clone(), &players, deck).unwrap();

        // P2 busts on the first hit.
        assert!(matches!(round.hit(&p2), Ok(HitOutcome::Drew(_))));
        assert!(round.hand(&p2).unwrap().is_busted());

        // Retrying the hit draws nothing.
        assert_eq!(round.hit(&p2).unwrap(), HitOutcome::Ignored);
        assert_eq!(round.hand(&p2).unwrap().len(), 3);
    }

    #[test]
    fn stand_enforces_the_16_threshold() {
        let dealer = peer_id();
        let p2 = peer_id();

        let deck = stacked(&[
            card(Ten, Clubs),
            card(Nine, Clubs),
            card(Five, Clubs),
            card(Five, Diamonds),
            card(Nine, Hearts),
        ]);

        let players = [seat(&dealer), seat(&p2)];
        let mut round = Round::deal(1, dealer.clone(), &players, deck).unwrap();

        // 10 points may not stand.
        assert!(matches!(round.stand(&p2), Err(TableError::CannotStand)));

        round.hit(&p2).unwrap();
        round.stand(&p2).unwrap();
        assert_eq!(round.turn(), &TurnState::Dealer);

        round.stand(&dealer).unwrap();
        assert!(round.is_finished());

        // Advancing a finished round is a no-op.
        round.advance_turn();
        assert!(round.is_finished());
    }

    #[test]
    fn timeout_forces_a_stand_exactly_once() {
        let dealer = peer_id();
        let p2 = peer_id();

        let deck = stacked(&[
            card(Ten, Clubs),
            card(Nine, Clubs),
            card(Five, Clubs),
            card(Five, Diamonds),
        ]);

        let players = [seat(&dealer), seat(&p2)];
        let mut round = Round::deal(1, dealer.clone(), &players, deck).unwrap();

        let now = Instant::now();

        // Before expiry nothing happens.
        assert_eq!(round.check_timeout(now, TURN_TIMEOUT), None);
        assert_eq!(round.turn(), &TurnState::Player(p2.clone()));

        // At expiry P2 is frozen below 16 and the turn advances.
        let later = now + TURN_TIMEOUT;
        assert_eq!(round.check_timeout(later, TURN_TIMEOUT), Some(p2.clone()));
        assert_eq!(round.turn(), &TurnState::Dealer);
        assert_eq!(round.hand(&p2).unwrap().score(), 10);

        // A second check right after advances nothing, the clock was reset.
        assert_eq!(round.check_timeout(later, TURN_TIMEOUT), None);
        assert_eq!(round.turn(), &TurnState::Dealer);
    }

    #[test]
    fn blackjack_and_dealer_bust_scenario() {
        use sodep_eval::settle;

        let dealer = peer_id();
        let p2 = peer_id();
        let p3 = peer_id();

        // Dealer 16, p2 a Sò dép, p3 a pair of fives, then a nine for p3
        // and a king that busts the dealer.
        let deck = stacked(&[
            card(Ten, Clubs),
            card(Six, Clubs),
            card(Ace, Spades),
            card(King, Hearts),
            card(Five, Clubs),
            card(Five, Diamonds),
            card(Nine, Hearts),
            card(King, Diamonds),
        ]);

        let players = [seat(&dealer), seat(&p2), seat(&p3)];
        let mut round = Round::deal(1, dealer.clone(), &players, deck).unwrap();

        // P2 won on the deal, the order is p3 then the dealer.
        assert!(round.is_instant_winner(&p2));
        assert_eq!(round.turn(), &TurnState::Player(p3.clone()));

        // P3 hits to 19 and stands.
        round.hit(&p3).unwrap();
        assert_eq!(round.hand(&p3).unwrap().score(), 19);
        round.stand(&p3).unwrap();
        assert_eq!(round.turn(), &TurnState::Dealer);

        // The dealer draws into a bust, the hand is terminal and passes
        // the turn.
        round.hit(&dealer).unwrap();
        let dealer_hand = round.hand(&dealer).unwrap().clone();
        assert!(dealer_hand.is_busted());
        round.advance_turn();
        assert!(round.is_finished());

        // P2 collects one and a half, p3 collects flat.
        let p2_hand = round.hand(&p2).unwrap();
        assert_eq!(settle::winnings(p2_hand, &dealer_hand, 100), 150);
        assert_eq!(
            settle::result_label(p2_hand.class(), 150),
            "So Dep"
        );

        let p3_hand = round.hand(&p3).unwrap();
        assert_eq!(settle::winnings(p3_hand, &dealer_hand, 100), 100);
        assert_eq!(settle::result_label(p3_hand.class(), 100), "Win");
    }

    #[test]
    fn leaving_player_is_skipped() {
        let dealer = peer_id();
        let p2 = peer_id();
        let p3 = peer_id();

        let deck = stacked(&[
            card(Ten, Clubs),
            card(Nine, Clubs),
            card(King, Clubs),
            card(Seven, Diamonds),
            card(King, Hearts),
            card(Six, Diamonds),
        ]);

        let players = [seat(&dealer), seat(&p2), seat(&p3)];
        let mut round = Round::deal(1, dealer.clone(), &players, deck).unwrap();

        // P3 leaves while waiting for their turn, P2 leaves on their turn.
        round.remove_player(&p3);
        assert_eq!(round.turn(), &TurnState::Player(p2.clone()));

        round.remove_player(&p2);
        assert_eq!(round.turn(), &TurnState::Dealer);

        // Both hands stay frozen for settlement.
        assert_eq!(round.hand(&p2).unwrap().score(), 17);
        assert_eq!(round.hand(&p3).unwrap().score(), 16);
    }
}
