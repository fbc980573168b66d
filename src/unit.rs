//! The reader unit: per-unit policy configuration, the command dispatcher,
//! and the transfer service loop.
//!
//! A unit is a pure state machine. It never blocks and never owns a timer:
//! `dispatch` and `service` return the delay after which the unit wants to
//! run again, and the device manager posts that to the event queue. One
//! service invocation walks the priority cascade once — disconnect
//! handshake, feed-cycle completion, card acquisition, column transfer —
//! and suspends wherever its flags say to resume.

use std::fmt;

use thiserror::Error;
use tracing::{debug, trace};

use crate::channel::{Attention, Channel, ChannelId, CommandError, IoCommand, WriteOutcome};
use crate::clock::Tick;
use crate::deck::{CardImage, CardPull, CardSource, CARD_COLUMNS};
use crate::hollerith::{punches_to_bcd, zone12, SUBSTITUTE_CODE};

/// Ticks between command acceptance and the first service invocation.
pub const SETUP_DELAY: Tick = 50;
/// Ticks between disconnect polls.
pub const POLL_DELAY: Tick = 50;
/// Ticks between column deliveries.
pub const COLUMN_DELAY: Tick = 10;
/// Default record-to-record wait, matching the real feed mechanism.
pub const DEFAULT_RECORD_DELAY: Tick = 300;

/// Identifies a unit within a device manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(pub usize);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which attention line carries the ready pulse after a feed cycle.
/// End-of-file, error, and invalid-command attentions are always generic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttentionRouting {
    /// No ready attention is wired.
    #[default]
    None,
    LineA,
    LineB,
}

/// What the unit does with a column whose hole pattern has no code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidPunchPolicy {
    /// Deliver the 8-7 substitute code, flag a read error, keep going.
    #[default]
    Substitute,
    /// End the record on the spot with an attention.
    AbortRecord,
}

/// Per-unit hardware variant selection, fixed at construction.
#[derive(Debug, Clone)]
pub struct UnitConfig {
    /// Channel this unit transfers through.
    pub channel: ChannelId,
    pub attention: AttentionRouting,
    pub invalid_punch: InvalidPunchPolicy,
    /// 1-based column whose 12 punch marks a load card; 0 disables the check.
    pub load_column: usize,
    /// Record the stacker pocket from the device modifier.
    pub stacker_select: bool,
    /// Pocket that re-delivers the buffered card without a feed.
    pub reread_pocket: Option<u8>,
    /// Record-to-record wait time.
    pub record_delay: Tick,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            channel: ChannelId(0),
            attention: AttentionRouting::None,
            invalid_punch: InvalidPunchPolicy::Substitute,
            load_column: 0,
            stacker_select: false,
            reread_pocket: None,
            record_delay: DEFAULT_RECORD_DELAY,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("load column {0} is out of range (1..=80, or 0 to disable)")]
    LoadColumnOutOfRange(usize),
    #[error("stacker pocket {0} is out of range (0..=15)")]
    PocketOutOfRange(u8),
    #[error("unit names channel {0}, which does not exist")]
    UnknownChannel(ChannelId),
}

impl UnitConfig {
    /// Rejects values the hardware has no wiring for.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.load_column > CARD_COLUMNS {
            return Err(ConfigError::LoadColumnOutOfRange(self.load_column));
        }
        if let Some(pocket) = self.reread_pocket {
            if pocket > 0o17 {
                return Err(ConfigError::PocketOutOfRange(pocket));
            }
        }
        Ok(())
    }
}

/// Where the unit is in a transfer. Orthogonal conditions (`busy`, the
/// latched request, error and medium flags) live beside it as fields, so
/// only reachable combinations are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitState {
    #[default]
    Idle,
    /// A command was accepted; the next card has not been pulled yet.
    AwaitingCard,
    /// Columns are moving to the channel.
    Transferring,
    /// The record is done; polling the channel for disconnect.
    AwaitingDisconnect,
    /// A medium fault stopped the last transfer.
    Faulted,
}

/// One physical reader.
#[derive(Debug)]
pub struct ReaderUnit {
    id: UnitId,
    config: UnitConfig,
    state: UnitState,
    /// Feed cycle completing; a ready attention is owed.
    busy: bool,
    /// A command was accepted and is waiting for the machinery to settle.
    requested: bool,
    control_only: bool,
    end_of_medium: bool,
    read_error: bool,
    card_loaded: bool,
    load_detected: bool,
    selected_stacker: u8,
    column: usize,
    card: CardImage,
    medium: Option<Box<dyn CardSource>>,
}

impl ReaderUnit {
    pub fn new(id: UnitId, config: UnitConfig) -> Self {
        Self {
            id,
            config,
            state: UnitState::Idle,
            busy: false,
            requested: false,
            control_only: false,
            end_of_medium: false,
            read_error: false,
            card_loaded: false,
            load_detected: false,
            selected_stacker: 0,
            column: 0,
            card: CardImage::blank(),
            medium: None,
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn config(&self) -> &UnitConfig {
        &self.config
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn is_attached(&self) -> bool {
        self.medium.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn end_of_medium(&self) -> bool {
        self.end_of_medium
    }

    pub fn read_error(&self) -> bool {
        self.read_error
    }

    pub fn card_loaded(&self) -> bool {
        self.card_loaded
    }

    pub fn load_detected(&self) -> bool {
        self.load_detected
    }

    pub fn selected_stacker(&self) -> u8 {
        self.selected_stacker
    }

    /// A command has been accepted and its transfer has not finished.
    /// Distinct from `AwaitingDisconnect`, during which new commands latch.
    pub fn is_read_active(&self) -> bool {
        self.requested
            || matches!(self.state, UnitState::AwaitingCard | UnitState::Transferring)
    }

    /// Hands the unit a medium. Medium-derived conditions reset and a
    /// transfer in flight dies, but the feed mechanics (`busy`, an
    /// outstanding disconnect handshake) belong to the unit and survive.
    pub fn attach(&mut self, medium: Box<dyn CardSource>) {
        debug!(unit = %self.id, "attach");
        self.medium = Some(medium);
        self.end_of_medium = false;
        self.read_error = false;
        self.card_loaded = false;
        self.load_detected = false;
        self.requested = false;
        self.control_only = false;
        self.column = 0;
        if self.state != UnitState::AwaitingDisconnect {
            self.state = UnitState::Idle;
        }
    }

    /// Removes the medium and resets the unit to clean idle. A timer event
    /// already queued for this unit will fire, observe the idle state, and
    /// stop rescheduling.
    pub fn detach(&mut self) {
        debug!(unit = %self.id, "detach");
        self.medium = None;
        self.state = UnitState::Idle;
        self.busy = false;
        self.requested = false;
        self.control_only = false;
        self.end_of_medium = false;
        self.read_error = false;
        self.card_loaded = false;
        self.load_detected = false;
        self.selected_stacker = 0;
        self.column = 0;
    }

    /// Accepts or rejects a channel command. On acceptance the request is
    /// latched for the service loop; the returned delay, if any, is when
    /// the service loop should next run.
    pub fn dispatch<C: Channel>(
        &mut self,
        command: IoCommand,
        modifier: u8,
        chan: &mut C,
    ) -> Result<Option<Tick>, CommandError> {
        if self.is_read_active() {
            return Err(CommandError::Busy);
        }

        if command == IoCommand::TestReady && self.is_attached() {
            debug!(unit = %self.id, "test ready");
            return Ok(None);
        }

        let mut pocket = modifier & 0o17;
        if pocket == 10 {
            pocket = 0;
        }
        if self.config.stacker_select {
            self.selected_stacker = pocket;
        }

        match command {
            IoCommand::Read => {
                debug!(unit = %self.id, modifier = format_args!("{:02o}", modifier), "cmd read");
                // The re-read pocket keeps the buffered card so the next
                // feed cycle delivers it again.
                if self.config.reread_pocket != Some(pocket) {
                    self.card_loaded = false;
                    self.read_error = false;
                }
            }
            IoCommand::Control => {
                debug!(unit = %self.id, modifier = format_args!("{:02o}", modifier), "cmd control");
                self.control_only = true;
            }
            _ => {
                debug!(unit = %self.id, ?command, "invalid command");
                chan.attention(Attention::Generic);
                return Err(CommandError::InvalidCommand);
            }
        }

        // Out of cards: report end of file instead of starting a transfer.
        if self.end_of_medium {
            chan.end_of_file();
            chan.attention(Attention::Generic);
            return Ok(None);
        }

        self.requested = true;
        self.column = 0;
        if !self.control_only {
            chan.assert_select();
        }
        // A busy unit already has a service invocation coming.
        if self.busy {
            Ok(None)
        } else {
            Ok(Some(SETUP_DELAY))
        }
    }

    /// One step of the transfer, in priority order. Returns the delay until
    /// the unit wants servicing again, or `None` when it has nothing left
    /// to do.
    pub fn service<C: Channel>(&mut self, chan: &mut C) -> Option<Tick> {
        // Waiting for the channel to let go of the finished record.
        if self.state == UnitState::AwaitingDisconnect {
            if !chan.disconnected() {
                return Some(POLL_DELAY);
            }
            chan.release_select();
            chan.clear_end_of_record();
            self.state = UnitState::Idle;
            trace!(unit = %self.id, "disconnect complete");
            // The feed cycle finishes one record delay later.
            if self.busy {
                return Some(self.config.record_delay);
            }
            return None;
        }

        // Feed cycle done: announce ready on the configured line.
        if self.busy {
            self.busy = false;
            match self.config.attention {
                AttentionRouting::None => {}
                AttentionRouting::LineA => chan.attention(Attention::LineA),
                AttentionRouting::LineB => chan.attention(Attention::LineB),
            }
        }

        // The machinery has settled; a latched command starts its transfer.
        if self.requested
            && matches!(self.state, UnitState::Idle | UnitState::Faulted)
        {
            self.requested = false;
            self.state = UnitState::AwaitingCard;
        }

        // Pull the next card when none is buffered.
        if self.state == UnitState::AwaitingCard && !self.card_loaded {
            let pull = match self.medium.as_mut() {
                Some(medium) => medium.next_card(),
                None => CardPull::EndOfMedium,
            };
            match pull {
                CardPull::EndOfMedium => {
                    debug!(unit = %self.id, "end of medium");
                    self.end_of_medium = true;
                    chan.end_of_file();
                    chan.attention(Attention::Generic);
                    chan.release_select();
                    self.busy = false;
                    self.control_only = false;
                    self.state = UnitState::Idle;
                    return None;
                }
                CardPull::Failed => {
                    debug!(unit = %self.id, "card read failure");
                    self.read_error = true;
                    chan.attention(Attention::Generic);
                    chan.release_select();
                    self.busy = false;
                    self.control_only = false;
                    self.state = UnitState::Faulted;
                    return None;
                }
                CardPull::Card(card) => {
                    self.card = card;
                    self.card_loaded = true;
                    self.load_detected = match self.config.load_column {
                        0 => false,
                        col => self.card.columns[col - 1].0 & zone12().0 != 0,
                    };
                    debug!(unit = %self.id, load = self.load_detected, "card loaded");
                }
            }
        }

        // A control pulse feeds the card but moves no data.
        if self.control_only {
            self.control_only = false;
            self.state = UnitState::Idle;
            return None;
        }

        // Move one column to the channel.
        if matches!(self.state, UnitState::AwaitingCard | UnitState::Transferring)
            && self.card_loaded
        {
            if self.column >= CARD_COLUMNS {
                // Channel took all 80 columns without closing the record;
                // treat the exhausted card as end-of-record.
                self.state = UnitState::AwaitingDisconnect;
                self.busy = true;
                return Some(COLUMN_DELAY);
            }
            self.state = UnitState::Transferring;
            let code = match punches_to_bcd(self.card.columns[self.column]) {
                Some(code) => code,
                None => match self.config.invalid_punch {
                    InvalidPunchPolicy::AbortRecord => {
                        debug!(unit = %self.id, column = self.column, "invalid punch, abort");
                        chan.attention(Attention::Generic);
                        chan.release_select();
                        self.busy = false;
                        self.state = UnitState::Idle;
                        return None;
                    }
                    InvalidPunchPolicy::Substitute => {
                        debug!(unit = %self.id, column = self.column, "invalid punch, substitute");
                        self.read_error = true;
                        SUBSTITUTE_CODE
                    }
                },
            };
            let end_of_record = self.column == CARD_COLUMNS - 1;
            trace!(
                unit = %self.id,
                column = self.column,
                code = format_args!("{code:02o}"),
                "char >"
            );
            match chan.write_char(code, end_of_record) {
                WriteOutcome::Accepted => self.column += 1,
                WriteOutcome::EndOfRecord | WriteOutcome::TimeError => {
                    self.state = UnitState::AwaitingDisconnect;
                    self.busy = true;
                }
            }
            return Some(COLUMN_DELAY);
        }

        None
    }
}
