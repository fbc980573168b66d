//! Emulation core for the IBM 7000-series punched-card reader.
//!
//! The crate models the reader as a cooperative, virtual-time state
//! machine: a [`DeviceManager`] owns reader units, their channels, and an
//! event queue; commands are dispatched the way a channel would issue
//! them, and the per-column transfer handshake plays out tick by tick.

mod channel;
mod clock;
mod deck;
mod hollerith;
mod manager;
mod unit;

pub use channel::{
    Attention, CaptureChannel, Channel, ChannelId, CommandError, IoCommand, WriteOutcome,
};
pub use clock::{EventQueue, Tick};
pub use deck::{CardImage, CardPull, CardSource, TextDeck, CARD_COLUMNS};
pub use hollerith::{
    bcd_to_char, bcd_to_punches, char_to_bcd, decode_record, punches_to_bcd, row_mask, zone11,
    zone12, EncodeError, PunchMask, SUBSTITUTE_CODE,
};
pub use manager::DeviceManager;
pub use unit::{
    AttentionRouting, ConfigError, InvalidPunchPolicy, ReaderUnit, UnitConfig, UnitId, UnitState,
    COLUMN_DELAY, DEFAULT_RECORD_DELAY, POLL_DELAY, SETUP_DELAY,
};

use anyhow::{Context, Result};

/// Punches `text` into a deck and reads it back through a single-unit
/// machine, returning the delivered records as text.
pub fn read_deck(text: &str) -> Result<Vec<String>> {
    let deck = TextDeck::from_text(text).context("failed to punch input into cards")?;
    let mut machine = DeviceManager::new();
    let chan = machine.add_channel(CaptureChannel::new());
    let unit = machine
        .add_unit(UnitConfig {
            channel: chan,
            ..UnitConfig::default()
        })
        .context("failed to configure reader unit")?;
    machine.attach(unit, Box::new(deck));
    while !machine.unit(unit).end_of_medium() {
        machine
            .dispatch(unit, IoCommand::Read, 0)
            .context("read command rejected")?;
        machine.run_until_idle();
    }
    Ok(machine.channel(chan).record_texts())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn read_deck_round_trips_text() {
        let records = read_deck("HELLO\nWORLD").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].trim_end(), "HELLO");
        assert_eq!(records[1].trim_end(), "WORLD");
    }

    #[test]
    fn read_deck_rejects_unpunchable_text() {
        assert!(read_deck("{braces}").is_err());
    }
}
