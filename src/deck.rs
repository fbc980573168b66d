//! Card media: 80-column images and the sources that feed them.

use crate::hollerith::{bcd_to_punches, char_to_bcd, EncodeError, PunchMask};

/// Columns per card.
pub const CARD_COLUMNS: usize = 80;

/// One card's worth of punch data. A unit buffers exactly one of these,
/// replaced wholesale on every feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardImage {
    pub columns: [PunchMask; CARD_COLUMNS],
}

impl CardImage {
    pub fn blank() -> Self {
        Self {
            columns: [PunchMask(0); CARD_COLUMNS],
        }
    }

    /// Punches up to 80 characters of `text`; the remaining columns stay
    /// blank and anything past column 80 is dropped.
    pub fn from_line(text: &str) -> Result<Self, EncodeError> {
        let mut card = Self::blank();
        for (i, ch) in text.chars().take(CARD_COLUMNS).enumerate() {
            card.columns[i] = bcd_to_punches(char_to_bcd(ch)?);
        }
        Ok(card)
    }
}

impl Default for CardImage {
    fn default() -> Self {
        Self::blank()
    }
}

/// Result of pulling the next card from a medium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardPull {
    Card(CardImage),
    EndOfMedium,
    Failed,
}

/// A medium that feeds cards into a reader unit, one pull at a time.
pub trait CardSource: std::fmt::Debug {
    fn next_card(&mut self) -> CardPull;
}

/// In-memory deck built from text or raw card images.
#[derive(Debug, Clone)]
pub struct TextDeck {
    cards: Vec<CardImage>,
    cursor: usize,
    fail_at: Option<usize>,
}

impl TextDeck {
    /// Splits `text` into cards: one card per 80-column chunk of each line,
    /// blank-padded on the right; an empty line becomes a blank card.
    pub fn from_text(text: &str) -> Result<Self, EncodeError> {
        let mut cards = Vec::new();
        for line in text.lines() {
            if line.is_empty() {
                cards.push(CardImage::blank());
                continue;
            }
            let chars: Vec<char> = line.chars().collect();
            for chunk in chars.chunks(CARD_COLUMNS) {
                let chunk: String = chunk.iter().collect();
                cards.push(CardImage::from_line(&chunk)?);
            }
        }
        Ok(Self::from_cards(cards))
    }

    pub fn from_cards(cards: Vec<CardImage>) -> Self {
        Self {
            cards,
            cursor: 0,
            fail_at: None,
        }
    }

    /// Marks the pull at `index` as a transport fault. The card is consumed
    /// by the fault, like a card mangled in the feed path.
    pub fn fail_card(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Consumes the deck, handing back its cards in hopper order.
    pub fn into_cards(self) -> Vec<CardImage> {
        self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

impl CardSource for TextDeck {
    fn next_card(&mut self) -> CardPull {
        if self.cursor >= self.cards.len() {
            return CardPull::EndOfMedium;
        }
        let index = self.cursor;
        self.cursor += 1;
        if self.fail_at == Some(index) {
            return CardPull::Failed;
        }
        CardPull::Card(self.cards[index].clone())
    }
}
