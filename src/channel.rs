//! Channel-side vocabulary: commands, per-character write outcomes, signal
//! lines, and the `Channel` seam a reader unit drives.

use std::fmt;
use thiserror::Error;

use crate::hollerith::decode_record;

/// Identifies a channel within a device manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub usize);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Command set shared by unit-record devices on a channel. A reader honors
/// `Read`, `Control`, and `TestReady`; the rest exist so rejection of a
/// foreign command is a typed path, not a catch-all integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoCommand {
    Read,
    Write,
    WriteEndOfFile,
    BackspaceRecord,
    Rewind,
    TestReady,
    Control,
}

/// The channel's verdict on one delivered character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted,
    EndOfRecord,
    TimeError,
}

/// Attention lines a unit can pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attention {
    Generic,
    LineA,
    LineB,
}

/// Status a unit reports for a dispatched command or boot request.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error("unit is busy with an active transfer")]
    Busy,
    #[error("unit has no attached medium")]
    NotAttached,
    #[error("command is not valid for this unit")]
    InvalidCommand,
    #[error("channel cannot bootstrap from this unit")]
    BootRejected,
}

/// The seam between a unit and its channel: character delivery plus the
/// signal and selection handshake the transfer loop drives. Arbitration of
/// who holds selection belongs to the channel side.
pub trait Channel {
    /// Delivers one character; `end_of_record` marks the final column of
    /// the card. The returned outcome, not the column count, decides
    /// whether the transfer continues.
    fn write_char(&mut self, code: u8, end_of_record: bool) -> WriteOutcome;
    fn attention(&mut self, line: Attention);
    fn end_of_file(&mut self);
    fn assert_select(&mut self);
    fn release_select(&mut self);
    fn clear_end_of_record(&mut self);
    /// True once the channel has finished with the current record and the
    /// unit may drop out of the handshake.
    fn disconnected(&mut self) -> bool;
    /// Hands control to the host's bootstrap sequence after a boot read.
    fn bootstrap(&mut self) -> Result<(), CommandError>;
}

/// Channel endpoint that buffers records in memory and logs every signal.
///
/// Each record ends at the device's end-of-record mark, or earlier when a
/// record limit models a channel program that has had enough.
#[derive(Debug, Default)]
pub struct CaptureChannel {
    selected: bool,
    record_closed: bool,
    current: Vec<u8>,
    records: Vec<Vec<u8>>,
    attentions: Vec<Attention>,
    eof_signals: usize,
    bootstraps: usize,
    record_limit: Option<usize>,
}

impl CaptureChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts at most `limit` characters per record, truncating the way a
    /// satisfied channel program would.
    pub fn with_record_limit(limit: usize) -> Self {
        Self {
            record_limit: Some(limit),
            ..Self::default()
        }
    }

    /// Completed records, oldest first.
    pub fn records(&self) -> &[Vec<u8>] {
        &self.records
    }

    pub fn record_texts(&self) -> Vec<String> {
        self.records.iter().map(|r| decode_record(r)).collect()
    }

    /// Characters delivered since the last record closed. Non-empty after
    /// an aborted transfer.
    pub fn partial(&self) -> &[u8] {
        &self.current
    }

    pub fn attentions(&self) -> &[Attention] {
        &self.attentions
    }

    pub fn eof_signals(&self) -> usize {
        self.eof_signals
    }

    pub fn bootstraps(&self) -> usize {
        self.bootstraps
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }
}

impl Channel for CaptureChannel {
    fn write_char(&mut self, code: u8, end_of_record: bool) -> WriteOutcome {
        self.current.push(code);
        let satisfied = self
            .record_limit
            .is_some_and(|limit| self.current.len() >= limit);
        if end_of_record || satisfied {
            self.records.push(std::mem::take(&mut self.current));
            self.record_closed = true;
            return WriteOutcome::EndOfRecord;
        }
        WriteOutcome::Accepted
    }

    fn attention(&mut self, line: Attention) {
        self.attentions.push(line);
    }

    fn end_of_file(&mut self) {
        self.eof_signals += 1;
    }

    fn assert_select(&mut self) {
        self.selected = true;
        // A fresh selection discards any stale partial from an abort.
        self.current.clear();
    }

    fn release_select(&mut self) {
        self.selected = false;
    }

    fn clear_end_of_record(&mut self) {
        self.record_closed = false;
    }

    fn disconnected(&mut self) -> bool {
        self.record_closed
    }

    fn bootstrap(&mut self) -> Result<(), CommandError> {
        self.bootstraps += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn record_closes_on_end_of_record_mark() {
        let mut chan = CaptureChannel::new();
        chan.assert_select();
        assert_eq!(chan.write_char(0o21, false), WriteOutcome::Accepted);
        assert_eq!(chan.write_char(0o22, true), WriteOutcome::EndOfRecord);
        assert_eq!(chan.records(), &[vec![0o21, 0o22]]);
        assert!(chan.partial().is_empty());
    }

    #[test]
    fn record_limit_truncates_early() {
        let mut chan = CaptureChannel::with_record_limit(2);
        chan.assert_select();
        assert_eq!(chan.write_char(0o01, false), WriteOutcome::Accepted);
        assert_eq!(chan.write_char(0o02, false), WriteOutcome::EndOfRecord);
        assert_eq!(chan.records().len(), 1);
        assert_eq!(chan.records()[0].len(), 2);
    }

    #[test]
    fn disconnect_follows_record_close() {
        let mut chan = CaptureChannel::new();
        chan.assert_select();
        assert!(!chan.disconnected());
        chan.write_char(0o21, true);
        assert!(chan.disconnected());
        chan.release_select();
        chan.clear_end_of_record();
        assert!(!chan.disconnected());
        assert!(!chan.is_selected());
    }

    #[test]
    fn reselect_discards_stale_partial() {
        let mut chan = CaptureChannel::new();
        chan.assert_select();
        chan.write_char(0o21, false);
        chan.write_char(0o22, false);
        chan.release_select();
        assert_eq!(chan.partial().len(), 2);
        chan.assert_select();
        assert!(chan.partial().is_empty());
        assert!(chan.records().is_empty());
    }
}
