use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::SystemTime;

use ledger_consensus_core::{Ledger, LedgerId, Validation};

/// Hooks [`crate::validations::Validations`] uses to reach the rest of the node.
///
/// Methods are called while the validations lock is held, except for
/// [`Adaptor::flush`], and must not call back into the same `Validations`.
pub trait Adaptor {
    type ValidationType: Validation<LedgerIdType = Self::LedgerIdType, NodeKeyType = Self::NodeKeyType>;
    type LedgerType: Ledger<IdType = Self::LedgerIdType>;
    type LedgerIdType: LedgerId;
    type NodeIdType: Eq + Hash + Copy + Debug;
    type NodeKeyType: Eq + Hash + Clone + Debug;

    /// The current network time, used for freshness checks.
    fn now(&self) -> SystemTime;

    /// Look up a ledger by ID.
    ///
    /// Must return immediately. If the ledger is not available locally the
    /// implementation may start fetching it and return `None`; it will be asked
    /// again later.
    fn acquire(&self, ledger_id: &Self::LedgerIdType) -> Option<Self::LedgerType>;

    /// Called when a current validation is replaced by a newer one or goes stale.
    fn on_stale(&self, _validation: Self::ValidationType) {}

    /// Called by [`crate::validations::Validations::flush`] with every validation
    /// that was still current.
    fn flush(&self, _remaining: HashMap<Self::NodeIdType, Self::ValidationType>) {}
}
