use std::time::{SystemTime, UNIX_EPOCH};

use ledger_consensus_core::LedgerIndex;

use crate::validation_params::ValidationParams;

/// Enforce validation increasing sequence requirement.
///
/// Helper struct for enforcing that a validation must be larger than all
/// unexpired validation sequence numbers previously issued by the validator
/// tracked by the instance of this struct.
#[derive(Debug, Clone)]
pub(crate) struct SeqEnforcer {
    seq: LedgerIndex,
    when: SystemTime,
}

impl Default for SeqEnforcer {
    fn default() -> Self {
        SeqEnforcer {
            seq: 0,
            when: UNIX_EPOCH,
        }
    }
}

impl SeqEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try advancing the largest observed validation ledger sequence.
    ///
    /// Try setting the largest validation sequence observed, but return false
    /// if it violates the invariant that a validation must be larger than all
    /// unexpired validation sequence numbers.
    ///
    /// # Params
    /// - now: The current time
    /// - seq: The sequence number we want to validate
    /// - params: Validation parameters
    ///
    /// # Returns
    /// A bool indicating whether the validation satisfies the invariant.
    pub fn advance_ledger(&mut self, now: SystemTime, seq: LedgerIndex, params: &ValidationParams) -> bool {
        if now > self.when + params.validation_set_expires() {
            self.seq = 0;
        }
        if seq <= self.seq {
            return false;
        }

        self.seq = seq;
        self.when = now;
        true
    }

    pub fn largest(&self) -> LedgerIndex {
        self.seq
    }

    #[cfg(test)]
    pub fn when(&self) -> SystemTime {
        self.when
    }
}
