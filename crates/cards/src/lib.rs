// Copyright (C) 2025 Sodep Developers
// SPDX-License-Identifier: Apache-2.0

//! Sodep playing cards types.
//!
//! This crate defines the [Card], [Rank], and [Suit] types and a [Deck] for
//! shuffling and dealing:
//!
//! ```
//! # use sodep_cards::{Card, Deck, Rank, Suit};
//! let ah = Card::new(Rank::Ace, Suit::Hearts);
//! assert_eq!(ah.value(), 11);
//!
//! let mut deck = Deck::new_and_shuffled(&mut rand::rng());
//! let card = deck.deal().unwrap();
//! ```
#![warn(clippy::all, rust_2018_idioms, missing_docs)]

mod cards;
pub use cards::{Card, Deck, Rank, Suit};
