//! The device manager: owns the units, their channels, and the virtual
//! clock, and moves time forward one event at a time.
//!
//! All scheduling goes through here. Units return delays; the manager
//! posts them to the event queue and replays them back into `service`
//! calls as the clock advances. `UnitId` and `ChannelId` handles are
//! minted by `add_unit`/`add_channel` and index the owned collections
//! directly.

use tracing::trace;

use crate::channel::{Channel, ChannelId, CommandError, IoCommand};
use crate::clock::{EventQueue, Tick};
use crate::deck::CardSource;
use crate::unit::{ConfigError, ReaderUnit, UnitConfig, UnitId};

/// A set of reader units sharing one virtual clock.
#[derive(Debug)]
pub struct DeviceManager<C: Channel> {
    channels: Vec<C>,
    units: Vec<ReaderUnit>,
    clock: EventQueue<UnitId>,
}

impl<C: Channel> DeviceManager<C> {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            units: Vec::new(),
            clock: EventQueue::new(),
        }
    }

    pub fn add_channel(&mut self, channel: C) -> ChannelId {
        self.channels.push(channel);
        ChannelId(self.channels.len() - 1)
    }

    /// Configures a new unit. The configuration is validated here so a
    /// bad variant selection fails at setup, not mid-transfer.
    pub fn add_unit(&mut self, config: UnitConfig) -> Result<UnitId, ConfigError> {
        config.validate()?;
        if config.channel.0 >= self.channels.len() {
            return Err(ConfigError::UnknownChannel(config.channel));
        }
        let id = UnitId(self.units.len());
        self.units.push(ReaderUnit::new(id, config));
        Ok(id)
    }

    pub fn unit(&self, id: UnitId) -> &ReaderUnit {
        &self.units[id.0]
    }

    pub fn channel(&self, id: ChannelId) -> &C {
        &self.channels[id.0]
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> &mut C {
        &mut self.channels[id.0]
    }

    /// Current virtual time.
    pub fn now(&self) -> Tick {
        self.clock.now()
    }

    pub fn attach(&mut self, id: UnitId, medium: Box<dyn CardSource>) {
        self.units[id.0].attach(medium);
    }

    /// Pending timer events for the unit are left in the queue; they fire,
    /// observe the idle unit, and stop.
    pub fn detach(&mut self, id: UnitId) {
        self.units[id.0].detach();
    }

    /// Routes a channel command to a unit and schedules its service loop.
    pub fn dispatch(
        &mut self,
        id: UnitId,
        command: IoCommand,
        modifier: u8,
    ) -> Result<(), CommandError> {
        let unit = &mut self.units[id.0];
        let chan = &mut self.channels[unit.config().channel.0];
        if let Some(delay) = unit.dispatch(command, modifier, chan)? {
            self.clock.activate(id, delay);
        }
        Ok(())
    }

    /// Reads one record synchronously, then hands control to the channel's
    /// bootstrap sequence.
    pub fn boot(&mut self, id: UnitId) -> Result<(), CommandError> {
        if !self.units[id.0].is_attached() {
            return Err(CommandError::NotAttached);
        }
        self.dispatch(id, IoCommand::Read, 0)?;
        let chan_id = self.units[id.0].config().channel;
        self.channels[chan_id.0].bootstrap()
    }

    /// Pops and services one timer event. Returns false once the queue is
    /// empty and every unit is quiescent.
    pub fn step(&mut self) -> bool {
        let Some(id) = self.clock.pop() else {
            return false;
        };
        trace!(unit = %id, now = self.clock.now(), "service");
        let unit = &mut self.units[id.0];
        let chan = &mut self.channels[unit.config().channel.0];
        if let Some(delay) = unit.service(chan) {
            self.clock.activate(id, delay);
        }
        true
    }

    /// Drains the event queue. Deterministic: same commands, same decks,
    /// same event order, every run.
    pub fn run_until_idle(&mut self) {
        while self.step() {}
    }
}

impl<C: Channel> Default for DeviceManager<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::CaptureChannel;
    use crate::deck::TextDeck;
    use crate::unit::UnitState;
    use pretty_assertions::assert_eq;

    fn one_unit_machine() -> (DeviceManager<CaptureChannel>, ChannelId, UnitId) {
        let mut machine = DeviceManager::new();
        let chan = machine.add_channel(CaptureChannel::new());
        let unit = machine
            .add_unit(UnitConfig {
                channel: chan,
                ..UnitConfig::default()
            })
            .unwrap();
        (machine, chan, unit)
    }

    #[test]
    fn add_unit_rejects_unknown_channel() {
        let mut machine: DeviceManager<CaptureChannel> = DeviceManager::new();
        let err = machine.add_unit(UnitConfig::default()).unwrap_err();
        assert_eq!(err, ConfigError::UnknownChannel(ChannelId(0)));
    }

    #[test]
    fn dispatch_runs_a_transfer_through_the_clock() {
        let (mut machine, chan, unit) = one_unit_machine();
        machine.attach(unit, Box::new(TextDeck::from_text("HI").unwrap()));
        machine.dispatch(unit, IoCommand::Read, 0).unwrap();
        machine.run_until_idle();
        assert_eq!(machine.channel(chan).records().len(), 1);
        assert_eq!(machine.unit(unit).state(), UnitState::Idle);
        assert!(machine.now() > 0);
    }

    #[test]
    fn boot_requires_a_medium() {
        let (mut machine, chan, unit) = one_unit_machine();
        assert_eq!(machine.boot(unit), Err(CommandError::NotAttached));
        machine.attach(unit, Box::new(TextDeck::from_text("BOOT").unwrap()));
        machine.boot(unit).unwrap();
        assert_eq!(machine.channel(chan).bootstraps(), 1);
        machine.run_until_idle();
        assert_eq!(machine.channel(chan).records().len(), 1);
    }

    #[test]
    fn two_units_interleave_deterministically() {
        let mut machine = DeviceManager::new();
        let chan_a = machine.add_channel(CaptureChannel::new());
        let chan_b = machine.add_channel(CaptureChannel::new());
        let unit_a = machine
            .add_unit(UnitConfig {
                channel: chan_a,
                ..UnitConfig::default()
            })
            .unwrap();
        let unit_b = machine
            .add_unit(UnitConfig {
                channel: chan_b,
                ..UnitConfig::default()
            })
            .unwrap();
        machine.attach(unit_a, Box::new(TextDeck::from_text("AAA").unwrap()));
        machine.attach(unit_b, Box::new(TextDeck::from_text("BBB").unwrap()));
        machine.dispatch(unit_a, IoCommand::Read, 0).unwrap();
        machine.dispatch(unit_b, IoCommand::Read, 0).unwrap();
        machine.run_until_idle();
        assert_eq!(machine.channel(chan_a).record_texts()[0].trim_end(), "AAA");
        assert_eq!(machine.channel(chan_b).record_texts()[0].trim_end(), "BBB");
    }

    #[test]
    fn detach_leaves_pending_event_harmless() {
        let (mut machine, chan, unit) = one_unit_machine();
        machine.attach(unit, Box::new(TextDeck::from_text("GONE").unwrap()));
        machine.dispatch(unit, IoCommand::Read, 0).unwrap();
        machine.step();
        machine.detach(unit);
        machine.run_until_idle();
        assert!(machine.channel(chan).records().is_empty());
        assert_eq!(machine.unit(unit).state(), UnitState::Idle);
    }
}
