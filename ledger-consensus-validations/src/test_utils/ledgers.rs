use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use bimap::BiMap;
use derivative::Derivative;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use ledger_consensus_core::{Ledger, LedgerIndex};

pub(crate) type TxId = u32;

#[derive(Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Hash, Debug)]
pub(crate) struct LedgerId(u32);

impl LedgerId {
    pub fn new(id: u32) -> Self {
        LedgerId(id)
    }
}

impl Display for LedgerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Derivative)]
#[derivative(Eq, PartialEq, Hash, Debug)]
pub(crate) struct LedgerInstance {
    seq: LedgerIndex,
    /// Every transaction applied in this ledger's history, in order.
    txs: Vec<TxId>,
    /// IDs of this ledger's ancestors, indexed by sequence number. Ancestry is
    /// already fixed by the transaction history, so it takes no part in
    /// equality or hashing.
    #[derivative(Hash = "ignore")]
    #[derivative(PartialEq = "ignore")]
    ancestors: Vec<LedgerId>,
}

static GENESIS: Lazy<Arc<LedgerInstance>> = Lazy::new(|| {
    Arc::new(LedgerInstance {
        seq: 0,
        txs: vec![],
        ancestors: vec![],
    })
});

/// A ledger for simulations: the ordered set of transactions applied since
/// genesis.
///
/// Ledgers are immutable value types. The [`LedgerOracle`] assigns IDs, so
/// two ledgers built from the same parent with the same transaction share an
/// ID, and ledgers with distinct histories always have distinct IDs.
#[derive(Eq, PartialEq, Clone, Debug)]
pub(crate) struct SimulatedLedger {
    instance: Arc<LedgerInstance>,
    id: LedgerId,
}

impl SimulatedLedger {
    pub fn genesis() -> Self {
        SimulatedLedger {
            instance: GENESIS.clone(),
            id: LedgerId(0),
        }
    }

    fn new(id: LedgerId, instance: Arc<LedgerInstance>) -> Self {
        SimulatedLedger { instance, id }
    }

    pub fn is_ancestor(&self, ancestor: &SimulatedLedger) -> bool {
        ancestor.seq() < self.seq() && self.get_ancestor(ancestor.seq()) == ancestor.id()
    }
}

impl Ledger for SimulatedLedger {
    type IdType = LedgerId;

    fn id(&self) -> Self::IdType {
        self.id
    }

    fn seq(&self) -> LedgerIndex {
        self.instance.seq
    }

    fn get_ancestor(&self, seq: LedgerIndex) -> Self::IdType {
        assert!(seq <= self.seq(), "no ancestor at {} for ledger at {}", seq, self.seq());
        if seq == self.seq() {
            return self.id();
        }
        self.instance.ancestors[seq as usize]
    }

    fn make_genesis() -> Self {
        SimulatedLedger::genesis()
    }

    fn mismatch(&self, other: &Self) -> LedgerIndex {
        // Binary search for the first sequence at which the histories differ.
        // Histories agree on a prefix, so the predicate is monotonic.
        let mut start = 0;
        let mut count = std::cmp::min(self.seq(), other.seq()) + 1;
        while count > 0 {
            let step = count / 2;
            let curr = start + step;
            if self.get_ancestor(curr) == other.get_ancestor(curr) {
                start = curr + 1;
                count -= step + 1;
            } else {
                count = step;
            }
        }
        start
    }
}

/// Oracle maintaining unique ledgers for a simulation.
///
/// IDs are handed out in creation order, starting from genesis at 0.
#[derive(Debug)]
pub(crate) struct LedgerOracle {
    instances: BiMap<Arc<LedgerInstance>, LedgerId>,
}

impl LedgerOracle {
    pub fn new() -> Self {
        let mut instances = BiMap::new();
        instances.insert(GENESIS.clone(), LedgerId(0));
        LedgerOracle { instances }
    }

    pub fn lookup(&self, id: &LedgerId) -> Option<SimulatedLedger> {
        self.instances.get_by_right(id)
            .map(|instance| SimulatedLedger::new(*id, instance.clone()))
    }

    /// Build the child of `parent` that applies `tx`.
    pub fn accept(&mut self, parent: &SimulatedLedger, tx: TxId) -> SimulatedLedger {
        let mut txs = parent.instance.txs.clone();
        txs.push(tx);
        let mut ancestors = parent.instance.ancestors.clone();
        ancestors.push(parent.id());
        let next = Arc::new(LedgerInstance {
            seq: parent.seq() + 1,
            txs,
            ancestors,
        });

        if let Some(id) = self.instances.get_by_left(&next) {
            return SimulatedLedger::new(*id, next);
        }
        let id = LedgerId(self.instances.len() as u32);
        self.instances.insert(next.clone(), id);
        SimulatedLedger::new(id, next)
    }
}

/// Helper for writing unit tests with controlled ledger histories.
///
/// Each character of a name is one ledger, so `"abc"` is a chain of three
/// ledgers after genesis whose ancestors are `"ab"` and `"a"`. The last
/// character of every name must be unique, so `"ab"` and `"cb"` cannot both
/// be created.
///
/// The oracle is shared so that adaptors can look up ledgers created after
/// they were built.
#[derive(Debug)]
pub(crate) struct LedgerHistoryHelper {
    oracle: Arc<RwLock<LedgerOracle>>,
    next_tx: TxId,
    ledgers: HashMap<String, SimulatedLedger>,
    seen: HashSet<char>,
}

impl LedgerHistoryHelper {
    pub fn new() -> Self {
        let mut ledgers = HashMap::new();
        ledgers.insert(String::new(), SimulatedLedger::genesis());
        LedgerHistoryHelper {
            oracle: Arc::new(RwLock::new(LedgerOracle::new())),
            next_tx: 0,
            ledgers,
            seen: HashSet::new(),
        }
    }

    pub fn oracle(&self) -> Arc<RwLock<LedgerOracle>> {
        self.oracle.clone()
    }

    /// Get or create the ledger with the given name, creating its ancestors
    /// first if needed.
    pub fn get_or_create(&mut self, name: &str) -> SimulatedLedger {
        if let Some(ledger) = self.ledgers.get(name) {
            return ledger.clone();
        }

        let (prefix, last) = name.split_at(name.len() - name.chars().last().map_or(0, char::len_utf8));
        assert!(self.seen.insert(last.chars().next().unwrap()), "ledger name {:?} reuses its last character", name);
        let parent = self.get_or_create(prefix);
        self.next_tx += 1;
        let ledger = self.oracle.write().accept(&parent, self.next_tx);
        self.ledgers.insert(name.to_string(), ledger.clone());
        ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_ledgers() {
        let mut helper = LedgerHistoryHelper::new();
        let abc = helper.get_or_create("abc");
        assert_eq!(helper.ledgers.len(), 4);
        assert_eq!(abc.seq(), 3);
        assert_eq!(abc.id(), LedgerId(3));
        assert_eq!(abc.get_ancestor(1), helper.get_or_create("a").id());
        assert_eq!(abc.get_ancestor(0), SimulatedLedger::genesis().id());

        assert_eq!(helper.get_or_create("abc"), abc);
        assert_eq!(helper.ledgers.len(), 4);

        let abcdef = helper.get_or_create("abcdef");
        assert_eq!(helper.ledgers.len(), 7);
        assert!(abcdef.is_ancestor(&abc));
        assert!(!abc.is_ancestor(&abcdef));
        assert_eq!(helper.oracle().read().lookup(&abcdef.id()), Some(abcdef));
        assert!(helper.oracle().read().lookup(&LedgerId(100)).is_none());
    }

    #[test]
    fn mismatch_finds_first_difference() {
        let mut helper = LedgerHistoryHelper::new();
        let genesis = helper.get_or_create("");
        let a = helper.get_or_create("a");
        let abcd = helper.get_or_create("abcd");
        let abef = helper.get_or_create("abef");
        let x = helper.get_or_create("x");

        assert_eq!(abcd.mismatch(&abef), 3);
        assert_eq!(abef.mismatch(&abcd), 3);
        assert_eq!(abcd.mismatch(&abcd), 5);
        assert_eq!(abcd.mismatch(&a), 2);
        assert_eq!(abcd.mismatch(&x), 1);
        assert_eq!(genesis.mismatch(&genesis), 1);
    }

    #[test]
    fn oracle_reuses_ids_for_identical_ledgers() {
        let mut oracle = LedgerOracle::new();
        let genesis = SimulatedLedger::genesis();
        let first = oracle.accept(&genesis, 7);
        let again = oracle.accept(&genesis, 7);
        let other = oracle.accept(&genesis, 8);

        assert_eq!(first.id(), again.id());
        assert_ne!(first.id(), other.id());
        assert_eq!(oracle.lookup(&first.id()), Some(first));
    }
}
