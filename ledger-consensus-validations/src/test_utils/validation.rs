use std::time::SystemTime;

use derivative::Derivative;

use ledger_consensus_core::{LedgerIndex, Validation};

use crate::test_utils::ledgers::LedgerId;

#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub(crate) struct PeerId(pub u32);

/// A signing key: the peer it belongs to and which rotation of that peer's
/// key it is.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub(crate) struct PeerKey(pub PeerId, pub usize);

/// A validation for simulations.
///
/// Equality and ordering ignore the trust flag, which is local state rather
/// than part of what the peer signed, and the cookie.
#[derive(Derivative)]
#[derivative(Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Debug)]
pub(crate) struct TestValidation {
    ledger_id: LedgerId,
    seq: LedgerIndex,
    sign_time: SystemTime,
    seen_time: SystemTime,
    key: PeerKey,
    node_id: PeerId,
    load_fee: Option<u32>,
    full: bool,
    #[derivative(PartialEq = "ignore")]
    #[derivative(Ord = "ignore")]
    #[derivative(PartialOrd = "ignore")]
    trusted: bool,
    #[derivative(PartialEq = "ignore")]
    #[derivative(Ord = "ignore")]
    #[derivative(PartialOrd = "ignore")]
    cookie: u64,
}

impl TestValidation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger_id: LedgerId,
        seq: LedgerIndex,
        sign_time: SystemTime,
        seen_time: SystemTime,
        key: PeerKey,
        node_id: PeerId,
        trusted: bool,
        full: bool,
        load_fee: Option<u32>,
        cookie: u64,
    ) -> Self {
        TestValidation {
            ledger_id,
            seq,
            sign_time,
            seen_time,
            key,
            node_id,
            load_fee,
            full,
            trusted,
            cookie,
        }
    }

    pub fn node_id(&self) -> PeerId {
        self.node_id
    }
}

impl Validation for TestValidation {
    type LedgerIdType = LedgerId;
    type NodeKeyType = PeerKey;

    fn seq(&self) -> LedgerIndex {
        self.seq
    }

    fn ledger_id(&self) -> Self::LedgerIdType {
        self.ledger_id
    }

    fn sign_time(&self) -> SystemTime {
        self.sign_time
    }

    fn seen_time(&self) -> SystemTime {
        self.seen_time
    }

    fn key(&self) -> Self::NodeKeyType {
        self.key
    }

    fn cookie(&self) -> u64 {
        self.cookie
    }

    fn trusted(&self) -> bool {
        self.trusted
    }

    fn set_trusted(&mut self) {
        self.trusted = true;
    }

    fn set_untrusted(&mut self) {
        self.trusted = false;
    }

    fn full(&self) -> bool {
        self.full
    }

    fn load_fee(&self) -> Option<u32> {
        self.load_fee
    }
}
