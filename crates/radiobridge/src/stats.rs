//! Relay counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Live relay counters, shared by both relay directions
#[derive(Debug, Default)]
pub struct RelayStats {
    bus_to_modem: AtomicU64,
    modem_to_bus: AtomicU64,
    duplicates_suppressed: AtomicU64,
    wrong_destination: AtomicU64,
    malformed_frames: AtomicU64,
    wrapper_errors: AtomicU64,
    send_failures: AtomicU64,
    publish_failures: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    /// Bus messages transmitted to the modem
    pub bus_to_modem: u64,
    /// Radio messages published on the bus
    pub modem_to_bus: u64,
    /// Messages dropped by duplicate suppression, either direction
    pub duplicates_suppressed: u64,
    /// Frames addressed to another station
    pub wrong_destination: u64,
    /// Frames that failed to decode, or were not UI frames
    pub malformed_frames: u64,
    /// Messages that could not be wrapped for radio or unwrapped from it
    pub wrapper_errors: u64,
    /// Modem writes that failed
    pub send_failures: u64,
    /// Bus publishes that failed
    pub publish_failures: u64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub(crate) fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl RelayStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        record_bus_to_modem => bus_to_modem,
        record_modem_to_bus => modem_to_bus,
        record_duplicate => duplicates_suppressed,
        record_wrong_destination => wrong_destination,
        record_malformed => malformed_frames,
        record_wrapper_error => wrapper_errors,
        record_send_failure => send_failures,
        record_publish_failure => publish_failures,
    }

    /// Copy the current values
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            bus_to_modem: self.bus_to_modem.load(Ordering::Relaxed),
            modem_to_bus: self.modem_to_bus.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            wrong_destination: self.wrong_destination.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            wrapper_errors: self.wrapper_errors.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

impl RelayStatsSnapshot {
    /// Messages relayed in either direction
    pub fn relayed(&self) -> u64 {
        self.bus_to_modem + self.modem_to_bus
    }

    /// Messages dropped for any reason
    pub fn dropped(&self) -> u64 {
        self.duplicates_suppressed
            + self.wrong_destination
            + self.malformed_frames
            + self.wrapper_errors
            + self.send_failures
            + self.publish_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_snapshot() {
        let stats = RelayStats::new();
        stats.record_bus_to_modem();
        stats.record_bus_to_modem();
        stats.record_modem_to_bus();
        stats.record_duplicate();
        stats.record_send_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.bus_to_modem, 2);
        assert_eq!(snap.modem_to_bus, 1);
        assert_eq!(snap.relayed(), 3);
        assert_eq!(snap.dropped(), 2);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let stats = RelayStats::new();
        let before = stats.snapshot();
        stats.record_wrapper_error();
        assert_eq!(before, RelayStatsSnapshot::default());
        assert_eq!(stats.snapshot().wrapper_errors, 1);
    }
}
