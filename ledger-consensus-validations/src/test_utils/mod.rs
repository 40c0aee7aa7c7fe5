use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ledger_consensus_core::NetClock;

pub(crate) mod ledgers;
pub(crate) mod validation;

/// A clock that only moves when told to.
#[derive(Debug)]
pub(crate) struct ManualClock {
    now: SystemTime,
}

impl ManualClock {
    pub fn new() -> Self {
        // Far enough past the epoch that every freshness window fits before it
        ManualClock {
            now: UNIX_EPOCH + Duration::from_secs(86_400),
        }
    }

    pub fn advance(&mut self, dur: Duration) {
        self.now += dur
    }
}

impl NetClock for ManualClock {
    fn now(&self) -> SystemTime {
        self.now
    }
}
