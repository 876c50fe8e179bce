// Copyright (C) 2025 Sodep Developers
// SPDX-License-Identifier: Apache-2.0

//! Types used in a Sodep game.
use serde::{Deserialize, Serialize};
use std::{fmt, ops, sync::atomic};

use crate::crypto::PeerId;
use sodep_cards::Card;

/// A unique table identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId(u32);

impl TableId {
    /// A table id for an unassigned table.
    pub const NO_TABLE: TableId = TableId(0);

    /// Create a new unique table id.
    pub fn new_id() -> TableId {
        static LAST_ID: atomic::AtomicU32 = atomic::AtomicU32::new(1);
        TableId(LAST_ID.fetch_add(1, atomic::Ordering::Relaxed))
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A credits amount.
///
/// Signed so that ledger deltas and the dealer exposure use the same type
/// as balances and bets.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Credits(i64);

impl Credits {
    /// The zero credits.
    pub const ZERO: Credits = Credits(0);

    /// Creates credits with the given value.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// The integer amount.
    pub fn amount(&self) -> i64 {
        self.0
    }
}

impl From<i64> for Credits {
    fn from(val: i64) -> Self {
        Credits(val)
    }
}

impl From<Credits> for i64 {
    fn from(val: Credits) -> Self {
        val.0
    }
}

impl ops::Add for Credits {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Credits(self.0 + rhs.0)
    }
}

impl ops::AddAssign for Credits {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl ops::Sub for Credits {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Credits(self.0 - rhs.0)
    }
}

impl ops::SubAssign for Credits {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl ops::Neg for Credits {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Credits(-self.0)
    }
}

impl std::iter::Sum for Credits {
    fn sum<I: Iterator<Item = Credits>>(iter: I) -> Self {
        iter.fold(Credits::ZERO, |acc, c| acc + c)
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 0 {
            write!(f, "-")?;
        }

        let amount = self.0.unsigned_abs();
        if amount >= 1_000_000 {
            write!(
                f,
                "{},{:03},{:03}",
                amount / 1_000_000,
                amount % 1_000_000 / 1_000,
                amount % 1000
            )
        } else if amount >= 1_000 {
            write!(f, "{},{:03}", amount / 1000, amount % 1000)
        } else {
            write!(f, "{amount}")
        }
    }
}

/// Whose turn it is in a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnState {
    /// A player's turn.
    Player(PeerId),
    /// The dealer plays last.
    Dealer,
    /// The round is over.
    Finished,
}

/// A player's hand as published to the table.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub enum HandView {
    /// The player has no cards.
    #[default]
    None,
    /// The hand is sealed, only the card count is public.
    Sealed {
        /// The number of cards in the hand.
        count: u8,
        /// The sealed cards payload.
        payload: String,
    },
    /// The hand is revealed once the round has finished.
    Revealed {
        /// The cards in draw order.
        cards: Vec<Card>,
        /// The ace adjusted score.
        score: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credits_formatting() {
        assert_eq!(Credits::new(123).to_string(), "123");
        assert_eq!(Credits::new(1_000).to_string(), "1,000");
        assert_eq!(Credits::new(12_345).to_string(), "12,345");
        assert_eq!(Credits::new(1_234_567).to_string(), "1,234,567");
        assert_eq!(Credits::new(-150).to_string(), "-150");
        assert_eq!(Credits::new(-12_345).to_string(), "-12,345");
    }

    #[test]
    fn credits_arithmetic() {
        let mut c = Credits::new(100);
        c += Credits::new(50);
        assert_eq!(c, Credits::new(150));

        c -= Credits::new(200);
        assert_eq!(c, Credits::new(-50));
        assert_eq!(-c, Credits::new(50));

        let total: Credits = [Credits::new(100), Credits::new(-30)].into_iter().sum();
        assert_eq!(total, Credits::new(70));
    }
}
