// Copyright (C) 2025 Sodep Developers
// SPDX-License-Identifier: Apache-2.0

//! Round settlement against the dealer.
use std::cmp::Ordering;

use crate::{Hand, HandClass};

/// The payout for a winning hand.
///
/// A double ace and a five card hand pay double, a Sò dép pays one and a
/// half rounded down (odd bets truncate, the fractional credit is kept by
/// the house on purpose), anything else pays the bet.
fn payout(class: HandClass, bet: i64) -> i64 {
    match class {
        HandClass::DoubleAce | HandClass::FiveCardCharlie => bet * 2,
        HandClass::Blackjack => bet * 3 / 2,
        _ => bet,
    }
}

/// Computes a player's credit delta against the dealer hand.
///
/// The returned delta is positive when the player collects from the dealer
/// and negative when the dealer collects the bet.
pub fn winnings(hand: &Hand, dealer: &Hand, bet: i64) -> i64 {
    // A busted player always pays, even against a busted dealer.
    if hand.is_busted() {
        return -bet;
    }

    if dealer.is_busted() {
        return payout(hand.class(), bet);
    }

    match hand.rank().cmp(&dealer.rank()) {
        Ordering::Greater => payout(hand.class(), bet),
        Ordering::Less => -bet,
        Ordering::Equal if hand.class() == HandClass::FiveCardCharlie => {
            // Among five card hands the lower score wins.
            match hand.score().cmp(&dealer.score()) {
                Ordering::Less => bet * 2,
                Ordering::Greater => -bet,
                Ordering::Equal => 0,
            }
        }
        Ordering::Equal => match hand.score().cmp(&dealer.score()) {
            Ordering::Greater => bet,
            Ordering::Less => -bet,
            Ordering::Equal => 0,
        },
    }
}

/// The outcome label for a settled hand.
///
/// The hand class name takes precedence, a plain hand reads win, lose, or
/// push from the sign of its delta.
pub fn result_label(class: HandClass, delta: i64) -> &'static str {
    match class {
        HandClass::Normal => match delta.cmp(&0) {
            Ordering::Greater => "Win",
            Ordering::Less => "Lose",
            Ordering::Equal => "Push",
        },
        class => class.label(),
    }
}
