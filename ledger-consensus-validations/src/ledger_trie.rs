use ledger_consensus_core::{Ledger, LedgerIndex};

use crate::span::SpanTip;

/// Ancestry trie of validated ledgers.
///
/// Each validation from a trusted peer is counted as support for its ledger
/// and, transitively, for every ancestor of that ledger. The trie keeps both
/// counts compactly so that the preferred branch of history can be computed
/// without walking every ledger.
///
/// `count` arguments default to 1 when `None`.
pub trait LedgerTrie<T: Ledger>: Default {
    /// Insert and/or increment the support for the given ledger.
    fn insert(&mut self, ledger: &T, count: Option<u32>);

    /// Decrease support for a ledger, removing and compressing if possible.
    ///
    /// # Returns
    /// Whether a matching node with non-zero tip support was found and decremented.
    fn remove(&mut self, ledger: &T, count: Option<u32>) -> bool;

    /// Return the count of current validations for exactly this ledger.
    fn tip_support(&self, ledger: &T) -> u32;

    /// Return the count of current validations for this ledger and any of its
    /// descendants.
    fn branch_support(&self, ledger: &T) -> u32;

    /// Return the preferred ledger, or `None` if there is no support at all.
    ///
    /// # Params
    /// - largest_issued: The sequence number of the largest validation issued
    ///   by this node.
    fn get_preferred(&self, largest_issued: LedgerIndex) -> Option<SpanTip<T>>;

    /// Whether the trie is tracking any ledgers.
    fn empty(&self) -> bool;

    /// Check the compressed trie and support invariants. Intended for tests.
    fn check_invariants(&self) -> bool;

    /// A JSON rendering of the trie and its per-sequence support.
    fn get_json(&self) -> serde_json::Value;
}
