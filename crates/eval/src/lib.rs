// Copyright (C) 2025 Sodep Developers
// SPDX-License-Identifier: Apache-2.0

//! Sodep hand evaluator and settlement rules.
//!
//! This crate implements the Sò dép house rules: a hand is scored like
//! Blackjack with soft aces, then classified into one of six ranked
//! categories:
//!
//! ```
//! # use sodep_cards::{Card, Rank, Suit};
//! # use sodep_eval::{Hand, HandClass};
//! let mut hand = Hand::new();
//! hand.push(Card::new(Rank::Ace, Suit::Spades));
//! hand.push(Card::new(Rank::King, Suit::Hearts));
//! assert_eq!(hand.class(), HandClass::Blackjack);
//! assert_eq!(hand.score(), 21);
//! ```
//!
//! and [settle::winnings] computes a player's credit delta against the
//! dealer's final hand.
#![warn(clippy::all, rust_2018_idioms, missing_docs)]

mod hand;
pub mod settle;
pub use hand::{Hand, HandClass, score};
