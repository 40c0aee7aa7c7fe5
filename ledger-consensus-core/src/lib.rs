use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::time::SystemTime;

pub mod aged_unordered_map;

pub type LedgerIndex = u32;

/// An immutable snapshot of ledger history at a given sequence number.
///
/// Ledgers are content addressed: two ledgers with the same ID share the same
/// ancestry all the way back to genesis.
pub trait Ledger: Clone {
    type IdType: LedgerId;

    fn id(&self) -> Self::IdType;

    fn seq(&self) -> LedgerIndex;

    /// The ID of this ledger's ancestor at `seq`. `seq` must be less than or
    /// equal to `self.seq()`.
    fn get_ancestor(&self, seq: LedgerIndex) -> Self::IdType;

    fn make_genesis() -> Self;

    /// The sequence number of the first ledger at which the ancestries of
    /// `self` and `other` differ.
    fn mismatch(&self, other: &Self) -> LedgerIndex;
}

pub trait LedgerId: Eq + PartialEq + Ord + PartialOrd + Copy + Clone + Hash + Debug + Display {}

impl<T> LedgerId for T where T: Eq + Ord + Copy + Hash + Debug + Display {}

/// A clock shared between the components that age entries by wall time.
pub trait NetClock {
    fn now(&self) -> SystemTime;
}

/// A signed vote from a validator that it has built a given ledger.
pub trait Validation: Clone {
    type LedgerIdType: LedgerId;
    type NodeKeyType: Eq + Hash + Clone + Debug;

    /// Sequence number of the validated ledger.
    fn seq(&self) -> LedgerIndex;

    fn ledger_id(&self) -> Self::LedgerIdType;

    /// When the validator signed this validation.
    fn sign_time(&self) -> SystemTime;

    /// When this node first saw the validation, or `UNIX_EPOCH` if never.
    fn seen_time(&self) -> SystemTime;

    /// The signing key used for this validation.
    fn key(&self) -> Self::NodeKeyType;

    /// Identifies the running instance of the validator, so two instances
    /// sharing a key can be told apart.
    fn cookie(&self) -> u64;

    fn trusted(&self) -> bool;

    fn set_trusted(&mut self);

    fn set_untrusted(&mut self);

    /// Whether this is a full validation, as opposed to a partial one.
    fn full(&self) -> bool;

    fn load_fee(&self) -> Option<u32>;
}
