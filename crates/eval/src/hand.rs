// Copyright (C) 2025 Sodep Developers
// SPDX-License-Identifier: Apache-2.0

//! Hand scoring and classification.
use sodep_cards::{Card, Rank};
use std::fmt;

/// Scores a hand of cards.
///
/// Every ace counts 11, then while the total exceeds 21 aces are demoted to
/// 1 one at a time. The result does not depend on the cards order.
pub fn score(cards: &[Card]) -> u32 {
    let mut total = 0;
    let mut aces = 0;

    for card in cards {
        if card.rank() == Rank::Ace {
            aces += 1;
        }
        total += card.value();
    }

    while total > 21 && aces > 0 {
        total -= 10;
        aces -= 1;
    }

    total
}

/// A hand classification.
///
/// Variants are declared in rank order so that comparing two classes follows
/// the house precedence, from a busted hand up to a pair of aces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HandClass {
    /// Quắc, the hand exceeds 21.
    Busted,
    /// Non, a hand below 16 that may not stand.
    Low,
    /// A plain 16 to 21 hand.
    Normal,
    /// Ngũ Linh, five cards totaling 21 or less. Among ties the lower
    /// score wins.
    FiveCardCharlie,
    /// Sò dép, a two card 21.
    Blackjack,
    /// Xì Bàng, a pair of aces, the highest hand.
    DoubleAce,
}

impl HandClass {
    /// The class rank used for comparisons, 0 for busted up to 5 for a
    /// double ace.
    pub fn rank(&self) -> u8 {
        match self {
            HandClass::Busted => 0,
            HandClass::Low => 1,
            HandClass::Normal => 2,
            HandClass::FiveCardCharlie => 3,
            HandClass::Blackjack => 4,
            HandClass::DoubleAce => 5,
        }
    }

    /// Classifies a hand of cards.
    ///
    /// The checks run in precedence order, each hand lands in exactly one
    /// class. A double ace scores 12 after demotion so it can never also be
    /// a two card 21.
    pub fn eval(cards: &[Card]) -> HandClass {
        let score = score(cards);

        if cards.len() == 2 && cards.iter().all(|c| c.rank() == Rank::Ace) {
            HandClass::DoubleAce
        } else if cards.len() == 2 && score == 21 {
            HandClass::Blackjack
        } else if cards.len() == 5 && score <= 21 {
            HandClass::FiveCardCharlie
        } else if score > 21 {
            HandClass::Busted
        } else if score < 16 {
            HandClass::Low
        } else {
            HandClass::Normal
        }
    }

    /// The house name for this class, empty for a plain hand.
    pub fn label(&self) -> &'static str {
        match self {
            HandClass::DoubleAce => "Xi Bang",
            HandClass::Blackjack => "So Dep",
            HandClass::FiveCardCharlie => "Ngu Linh",
            HandClass::Busted => "Quac",
            HandClass::Low => "Non",
            HandClass::Normal => "",
        }
    }
}

/// A participant hand for one round.
///
/// Cards are kept in draw order, the score and class are recomputed on
/// every mutation. A hand never holds more than [Hand::MAX_CARDS] cards.
#[derive(Debug, Clone)]
pub struct Hand {
    cards: Vec<Card>,
    score: u32,
    class: HandClass,
}

impl Hand {
    /// The maximum number of cards in a hand.
    pub const MAX_CARDS: usize = 5;

    /// Creates an empty hand.
    pub fn new() -> Self {
        Self {
            cards: Vec::with_capacity(Self::MAX_CARDS),
            score: 0,
            class: HandClass::Low,
        }
    }

    /// Adds a card to the hand and reevaluates it.
    ///
    /// Returns false without mutating the hand if it already holds
    /// [Hand::MAX_CARDS] cards.
    pub fn push(&mut self, card: Card) -> bool {
        if self.cards.len() == Self::MAX_CARDS {
            return false;
        }

        self.cards.push(card);
        self.score = score(&self.cards);
        self.class = HandClass::eval(&self.cards);
        true
    }

    /// The cards in draw order.
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// The number of cards in the hand.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Checks if the hand has no cards.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// The ace adjusted score.
    pub fn score(&self) -> u32 {
        self.score
    }

    /// The hand classification.
    pub fn class(&self) -> HandClass {
        self.class
    }

    /// The class rank used to compare hands.
    pub fn rank(&self) -> u8 {
        self.class.rank()
    }

    /// Checks if the hand busted.
    pub fn is_busted(&self) -> bool {
        self.class == HandClass::Busted
    }

    /// A hand that busted or reached five cards takes no more hits.
    pub fn is_terminal(&self) -> bool {
        self.is_busted() || self.cards.len() == Self::MAX_CARDS
    }

    /// Checks if the hand may stand.
    ///
    /// Only a plain hand below 16 may not stand, every special class and a
    /// busted hand may.
    pub fn can_stand(&self) -> bool {
        self.class != HandClass::Low
    }
}

impl Default for Hand {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Hand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, card) in self.cards.iter().enumerate() {
            if idx > 0 {
                write!(f, " ")?;
            }
            write!(f, "{card}")?;
        }

        write!(f, " ({})", self.score)
    }
}
