//! Memory-match board.
//!
//! Holds the face-up/matched state of a shuffled card layout and counts
//! moves. A move is a pair of flips; two cards with the same pair key stay
//! matched, anything else turns back over on the next flip.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::parser::MemoryCard;

/// What a flip did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlipOutcome {
    /// First card of a move turned face up.
    Revealed {
        /// The flipped card.
        card: usize,
    },
    /// Second card completed a pair.
    Matched {
        /// Key of the completed pair.
        pair_key: String,
    },
    /// Second card did not match; both turn back on the next flip.
    Mismatch {
        /// First card of the move.
        first: usize,
        /// Second card of the move.
        second: usize,
    },
    /// Card is unknown, already matched or already face up.
    Ignored,
}

/// Play state of one memory board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryBoard {
    cards: Vec<MemoryCard>,
    face_up: Vec<usize>,
    matched: BTreeSet<String>,
    moves: u32,
}

impl MemoryBoard {
    /// Creates a board over a card layout, all cards face down.
    #[must_use]
    pub fn new(cards: Vec<MemoryCard>) -> Self {
        Self {
            cards,
            face_up: Vec::new(),
            matched: BTreeSet::new(),
            moves: 0,
        }
    }

    /// Cards in display order.
    #[must_use]
    pub fn cards(&self) -> &[MemoryCard] {
        &self.cards
    }

    /// Completed moves.
    #[must_use]
    pub const fn moves(&self) -> u32 {
        self.moves
    }

    /// Keys of the pairs found so far.
    #[must_use]
    pub const fn matched(&self) -> &BTreeSet<String> {
        &self.matched
    }

    /// Returns `true` if the card should be drawn face up.
    #[must_use]
    pub fn is_face_up(&self, card: usize) -> bool {
        self.face_up.contains(&card)
            || self
                .card(card)
                .is_some_and(|c| self.matched.contains(&c.pair_key))
    }

    /// Returns `true` once every pair is matched.
    #[must_use]
    pub fn is_solved(&self) -> bool {
        self.matched.len() * 2 == self.cards.len()
    }

    /// Flips a card by id.
    pub fn flip(&mut self, card: usize) -> FlipOutcome {
        if self.face_up.len() == 2 {
            self.face_up.clear();
        }
        let Some(key) = self.card(card).map(|c| c.pair_key.clone()) else {
            return FlipOutcome::Ignored;
        };
        if self.matched.contains(&key) || self.face_up.contains(&card) {
            return FlipOutcome::Ignored;
        }

        self.face_up.push(card);
        let [first, second] = self.face_up[..] else {
            return FlipOutcome::Revealed { card };
        };

        self.moves += 1;
        let same_pair = self
            .card(first)
            .is_some_and(|c| c.pair_key == key);
        if same_pair {
            self.face_up.clear();
            self.matched.insert(key.clone());
            FlipOutcome::Matched { pair_key: key }
        } else {
            FlipOutcome::Mismatch { first, second }
        }
    }

    /// Turns every card face down and zeroes the move counter.
    pub fn reset(&mut self) {
        self.face_up.clear();
        self.matched.clear();
        self.moves = 0;
    }

    fn card(&self, id: usize) -> Option<&MemoryCard> {
        self.cards.iter().find(|c| c.id == id)
    }
}
