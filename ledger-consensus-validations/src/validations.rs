use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use ledger_consensus_core::aged_unordered_map::AgedUnorderedMap;
use ledger_consensus_core::{Ledger, LedgerIndex, NetClock, Validation};

use crate::adaptor::Adaptor;
use crate::ledger_trie::LedgerTrie;
use crate::seq_enforcer::SeqEnforcer;
use crate::validation_params::ValidationParams;

/// Status of a newly received validation.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum ValidationStatus {
    /// This was a new validation and was added
    Current,
    /// Not current or was older than current from this node
    Stale,
    /// A validation violates the increasing seq requirement
    BadSeq,
    /// Multiple validations by a validator for the same ledger
    Multiple,
    /// Multiple validations by a validator for different ledgers
    Conflicting,
}

impl Display for ValidationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValidationStatus::Current => "current",
            ValidationStatus::Stale => "stale",
            ValidationStatus::BadSeq => "badSeq",
            ValidationStatus::Multiple => "multiple",
            ValidationStatus::Conflicting => "conflicting",
        };
        f.write_str(s)
    }
}

/// Whether a validation is still current.
///
/// Determines whether a validation can still be considered the current
/// validation from a node based on when it was signed by that node and first
/// seen by this node.
///
/// # Params
/// - params: ValidationParams with timing parameters
/// - now: Current time
/// - sign_time: When the validation was signed
/// - seen_time: When the validation was first seen locally, or `UNIX_EPOCH`
///   if it never was
pub fn is_current(
    params: &ValidationParams,
    now: SystemTime,
    sign_time: SystemTime,
    seen_time: SystemTime,
) -> bool {
    // Because this can be called on untrusted, possibly malicious validations,
    // we do our math in a way that avoids any chance of overflowing or
    // underflowing the signing time.
    let after_earliest = now.checked_sub(params.validation_current_early())
        .map_or(true, |earliest| sign_time > earliest);
    after_earliest &&
        sign_time < now + params.validation_current_wall() &&
        (seen_time == UNIX_EPOCH || seen_time < now + params.validation_current_local())
}

#[derive(Debug, Clone, Copy)]
struct KeepRange {
    low: LedgerIndex,
    high: LedgerIndex,
}

impl KeepRange {
    fn contains(&self, seq: LedgerIndex) -> bool {
        self.low <= seq && seq < self.high
    }
}

type ValidationMap<A> = HashMap<<A as Adaptor>::NodeIdType, <A as Adaptor>::ValidationType>;

/// Everything in [`Validations`] that is guarded by its lock.
struct ValidationsState<A: Adaptor, T, C: NetClock> {
    /// Validations from currently listed and trusted nodes (partial and full)
    current: ValidationMap<A>,
    /// Used to enforce the largest validation invariant for the local node
    local_seq_enforcer: SeqEnforcer,
    /// Sequence of the largest validation received from each node
    seq_enforcers: HashMap<A::NodeIdType, SeqEnforcer>,
    /// Validations from listed nodes, indexed by ledger id (partial and full)
    by_ledger: AgedUnorderedMap<A::LedgerIdType, ValidationMap<A>, C>,
    /// Partial and full validations indexed by sequence
    by_sequence: AgedUnorderedMap<LedgerIndex, ValidationMap<A>, C>,
    /// A range [low, high) of validations to keep from expire
    to_keep: Option<KeepRange>,
    /// When the keep range next needs to be refreshed by expire
    keep_refresh_time: Option<SystemTime>,
    /// Represents the ancestry of validated ledgers
    trie: T,
    /// Last (validated) ledger successfully acquired. If in this map, it is
    /// accounted for in the trie.
    last_ledger: HashMap<A::NodeIdType, A::LedgerType>,
    /// Set of ledgers being acquired from the network
    acquiring: HashMap<(LedgerIndex, A::LedgerIdType), HashSet<A::NodeIdType>>,
}

/// Maintains current and recent ledger validations.
///
/// Manages storage and queries related to validations received on the network.
/// Stores the most current validation from nodes and sets of recent
/// validations grouped by ledger identifier.
///
/// Stored validations are not necessarily from trusted nodes, so clients
/// and implementations should take care to use `trusted` member functions or
/// check the validation's trusted status.
///
/// All public methods take `&self` and hold one lock for their duration, so a
/// `Validations` can be shared between threads behind an `Arc`. The adaptor is
/// called with that lock held, except by [`Validations::flush`].
pub struct Validations<A: Adaptor, T: LedgerTrie<A::LedgerType>, C: NetClock> {
    /// Manages concurrent access to members
    state: Mutex<ValidationsState<A, T, C>>,
    /// Parameters to determine validation staleness
    params: ValidationParams,
    /// Adaptor instance. Is NOT managed by the lock above
    adaptor: A,
}

impl<A: Adaptor, T: LedgerTrie<A::LedgerType>, C: NetClock> Validations<A, T, C> {
    /// Constructor.
    ///
    /// # Params
    /// - params: ValidationParams to control staleness/expiration of validations
    /// - adaptor: Hooks into the rest of the node
    /// - clock: Clock used to age the per-ledger and per-sequence indexes
    pub fn new(params: ValidationParams, adaptor: A, clock: Arc<RwLock<C>>) -> Self {
        Validations {
            state: Mutex::new(ValidationsState {
                current: Default::default(),
                local_seq_enforcer: SeqEnforcer::new(),
                seq_enforcers: Default::default(),
                by_ledger: AgedUnorderedMap::new(clock.clone()),
                by_sequence: AgedUnorderedMap::new(clock),
                to_keep: None,
                keep_refresh_time: None,
                trie: T::default(),
                last_ledger: Default::default(),
                acquiring: Default::default(),
            }),
            params,
            adaptor,
        }
    }

    pub fn adaptor(&self) -> &A {
        &self.adaptor
    }

    pub fn params(&self) -> &ValidationParams {
        &self.params
    }

    /// Return whether the local node can issue a validation for the given
    /// sequence number.
    ///
    /// # Params
    /// - seq: The [`LedgerIndex`] of the ledger the node wants to validate
    ///
    /// # Return
    /// A bool indicating whether the validation satisfies the invariant, updating the
    /// largest sequence number seen accordingly.
    pub fn can_validate_seq(&self, seq: LedgerIndex) -> bool {
        let mut state = self.state.lock();
        let now = state.by_ledger.now();
        state.local_seq_enforcer.advance_ledger(now, seq, &self.params)
    }

    /// Add a new validation.
    ///
    /// Attempt to add a new validation.
    ///
    /// # Params
    /// - node_id: The identity of the node issuing this validation
    /// - validation: The validation to store
    ///
    /// # Returns
    /// The outcome
    pub fn add(&self, node_id: &A::NodeIdType, validation: &A::ValidationType) -> ValidationStatus {
        if !is_current(
            &self.params,
            self.adaptor.now(),
            validation.sign_time(),
            validation.seen_time(),
        ) {
            trace!(node = ?node_id, seq = validation.seq(), ledger = %validation.ledger_id(), "stale validation on arrival");
            return ValidationStatus::Stale;
        }

        let status = {
            let mut guard = self.state.lock();
            self._add(&mut guard, node_id, validation)
        };

        match status {
            ValidationStatus::Conflicting | ValidationStatus::Multiple => {
                warn!(node = ?node_id, seq = validation.seq(), ledger = %validation.ledger_id(), %status, "byzantine validation behavior");
            }
            _ => {
                trace!(node = ?node_id, seq = validation.seq(), ledger = %validation.ledger_id(), %status, "added validation");
            }
        }
        status
    }

    /// Set the range [low, high) of validations to keep from expire.
    pub fn set_seq_to_keep(&self, low: LedgerIndex, high: LedgerIndex) {
        debug_assert!(low < high);
        self.state.lock().to_keep = Some(KeepRange { low, high });
    }

    /// Expire old validation sets.
    ///
    /// Remove validation sets that were accessed more than
    /// `validation_set_expires` ago and were not asked to be kept.
    pub fn expire(&self) {
        let start = Instant::now();
        let (by_ledger, by_sequence) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if let Some(to_keep) = state.to_keep {
                // We only need to refresh the keep range when it's just about
                // to expire. Track the next time we need to refresh.
                let now = state.by_ledger.now();
                if state.keep_refresh_time.map_or(true, |refresh| refresh <= now) {
                    state.keep_refresh_time = Some(
                        now + self.params.validation_set_expires() - self.params.validation_freshness()
                    );

                    let keep_ledgers: Vec<A::LedgerIdType> = state.by_ledger.iter()
                        .filter(|(_, vals)| vals.values().next().map_or(false, |val| to_keep.contains(val.seq())))
                        .map(|(id, _)| *id)
                        .collect();
                    for id in keep_ledgers {
                        state.by_ledger.touch(&id);
                    }

                    let keep_seqs: Vec<LedgerIndex> = state.by_sequence.keys()
                        .copied()
                        .filter(|seq| to_keep.contains(*seq))
                        .collect();
                    for seq in keep_seqs {
                        state.by_sequence.touch(&seq);
                    }
                }
            }

            (
                state.by_ledger.expire(self.params.validation_set_expires()),
                state.by_sequence.expire(self.params.validation_set_expires()),
            )
        };
        debug!(by_ledger, by_sequence, lock_duration = ?start.elapsed(), "swept validation sets");
    }

    /// Update trust status of validations.
    ///
    /// Updates the trusted status of known validations to account for nodes
    /// that have been added or removed from the UNL. This also updates the
    /// trie to ensure only currently trusted nodes' validations are used.
    ///
    /// # Params
    /// - added: Identifiers of nodes that are now trusted
    /// - removed: Identifiers of nodes that are no longer trusted
    pub fn trust_changed(&self, added: &HashSet<A::NodeIdType>, removed: &HashSet<A::NodeIdType>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let node_ids: Vec<A::NodeIdType> = state.current.keys().copied().collect();
        for node_id in node_ids {
            if added.contains(&node_id) {
                if let Some(val) = state.current.get_mut(&node_id) {
                    val.set_trusted();
                    let val = val.clone();
                    self._update_trie(state, &node_id, &val, None);
                }
            } else if removed.contains(&node_id) {
                if let Some(val) = state.current.get_mut(&node_id) {
                    val.set_untrusted();
                    let val = val.clone();
                    Self::_remove_trie(state, &node_id, &val);
                }
            }
        }

        for (_, vals) in state.by_ledger.iter_mut() {
            for (node_id, val) in vals.iter_mut() {
                if added.contains(node_id) {
                    val.set_trusted();
                } else if removed.contains(node_id) {
                    val.set_untrusted();
                }
            }
        }
        debug!(added = added.len(), removed = removed.len(), "validator trust changed");
    }

    /// A JSON rendering of the ledger trie.
    pub fn get_json_trie(&self) -> serde_json::Value {
        self.state.lock().trie.get_json()
    }

    /// Return the sequence number and ID of the preferred working ledger.
    ///
    /// A ledger is preferred if it has more support amongst trusted validators and is **not**
    /// an ancestor of the current working ledger; otherwise it remains the current working ledger.
    ///
    /// # Params
    /// - curr: The local node's current working ledger.
    ///
    /// # Returns
    /// The sequence and id of the preferred working ledger, or `None` if no trusted validations
    /// are available to determine the preferred ledger.
    pub fn get_preferred(&self, curr: &A::LedgerType) -> Option<(LedgerIndex, A::LedgerIdType)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let largest_issued = state.local_seq_enforcer.largest();
        let preferred = self._with_trie(state, |trie| trie.get_preferred(largest_issued));

        let preferred = match preferred {
            Some(preferred) => preferred,
            // No trusted validations to determine branch
            None => {
                // fall back to majority over acquiring ledgers, breaking ties
                // with ledger ID
                let fallback = state.acquiring.iter()
                    .max_by(|(a_key, a_nodes), (b_key, b_nodes)| {
                        (a_nodes.len(), a_key.1).cmp(&(b_nodes.len(), b_key.1))
                    })
                    .map(|(key, _)| *key);
                if let Some((seq, id)) = fallback {
                    debug!(seq, ledger = %id, "preferring ledger still being acquired");
                }
                return fallback;
            }
        };

        // If we are the parent of the preferred ledger, stick with our
        // current ledger since we might be about to generate it
        if preferred.seq() == curr.seq() + 1 && preferred.ancestor(curr.seq()) == curr.id() {
            return Some((curr.seq(), curr.id()));
        }

        // A ledger ahead of us is preferred regardless of whether it is
        // a descendant of our working ledger or it is on a different chain
        if preferred.seq() > curr.seq() {
            return Some((preferred.seq(), preferred.id()));
        }

        // Only switch to earlier or same sequence number
        // if it is a different chain.
        if curr.get_ancestor(preferred.seq()) != preferred.id() {
            return Some((preferred.seq(), preferred.id()));
        }

        // Stick with current ledger
        Some((curr.seq(), curr.id()))
    }

    /// Return the ID of the preferred working ledger that exceeds a minimum valid ledger sequence
    /// number.
    ///
    /// # Params
    /// - curr: The local node's current working ledger.
    /// - min_valid_seq: Minimum allowed sequence number.
    ///
    /// # Returns
    /// The ID of the preferred working ledger, or `curr` if the preferred ledger is not valid.
    pub fn get_preferred_id(&self, curr: &A::LedgerType, min_valid_seq: LedgerIndex) -> A::LedgerIdType {
        self.get_preferred(curr)
            .filter(|(seq, _)| *seq >= min_valid_seq)
            .map_or_else(|| curr.id(), |(_, id)| id)
    }

    /// Determine the preferred last closed ledger for the next consensus round.
    ///
    /// Called before starting the next round of ledger consensus to determine the
    /// preferred working ledger. Uses the dominant peer count ledger if no
    /// trusted validations are available.
    ///
    /// # Params
    /// - lcl: Last closed ledger by this node.
    /// - min_seq: Minimum allowed sequence number of the trusted preferred ledger.
    /// - peer_counts: Map from ledger ids to count of peers with that as the last closed ledger.
    ///
    /// # Returns
    /// The preferred last closed ledger ID.
    pub fn get_preferred_lcl(
        &self,
        lcl: &A::LedgerType,
        min_seq: LedgerIndex,
        peer_counts: &HashMap<A::LedgerIdType, u32>,
    ) -> A::LedgerIdType {
        // Trusted validations exist, but stick with local preferred ledger if
        // preferred is in the past
        if let Some((seq, id)) = self.get_preferred(lcl) {
            return if seq >= min_seq { id } else { lcl.id() };
        }

        // Otherwise, rely on peer ledgers, preferring larger counts then
        // larger ids on ties
        let fallback = peer_counts.iter()
            .max_by(|(a_id, a_count), (b_id, b_count)| (a_count, a_id).cmp(&(b_count, b_id)))
            .map(|(id, _)| *id);
        if let Some(id) = fallback {
            debug!(ledger = %id, "no trusted validations, preferring peers' last closed ledger");
        }
        fallback.unwrap_or_else(|| lcl.id())
    }

    /// Count the number of current trusted validators working on a ledger
    /// after the specified one.
    ///
    /// # Params
    /// - ledger: The working ledger
    /// - ledger_id: The preferred ledger
    ///
    /// # Returns
    /// The number of current trusted validators working on a descendant of the
    /// preferred ledger.
    ///
    /// If `ledger.id() != ledger_id`, only counts immediate child ledgers of `ledger_id`.
    pub fn get_nodes_after(&self, ledger: &A::LedgerType, ledger_id: A::LedgerIdType) -> usize {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        // Use trie if ledger is the right one
        if ledger.id() == ledger_id {
            return self._with_trie(state, |trie| {
                trie.branch_support(ledger) - trie.tip_support(ledger)
            }) as usize;
        }

        // Count parent ledgers as fallback
        state.last_ledger.values()
            .filter(|curr| curr.seq() > 0 && curr.get_ancestor(curr.seq() - 1) == ledger_id)
            .count()
    }

    /// Get the currently trusted full validations.
    pub fn current_trusted(&self) -> Vec<A::ValidationType> {
        let mut guard = self.state.lock();
        let mut ret = Vec::with_capacity(guard.current.len());
        self._current(&mut guard, |_, val| {
            if val.trusted() && val.full() {
                ret.push(val.clone());
            }
        });
        ret
    }

    /// Get the set of node ids associated with current validations.
    pub fn get_current_node_ids(&self) -> HashSet<A::NodeIdType> {
        let mut guard = self.state.lock();
        let mut ret = HashSet::with_capacity(guard.current.len());
        self._current(&mut guard, |node_id, _| {
            ret.insert(*node_id);
        });
        ret
    }

    /// Count the number of trusted full validations for the given ledger.
    pub fn num_trusted_for_ledger(&self, ledger_id: &A::LedgerIdType) -> usize {
        let mut guard = self.state.lock();
        Self::_by_ledger(
            &mut guard,
            ledger_id,
            |_| 0,
            |_, val, count| {
                if val.trusted() && val.full() {
                    *count += 1;
                }
            },
        )
    }

    /// Get trusted full validations for a specific ledger.
    ///
    /// # Params
    /// - ledger_id: The identifier of the ledger
    /// - seq: The sequence number of the ledger
    pub fn get_trusted_for_ledger(&self, ledger_id: &A::LedgerIdType, seq: LedgerIndex) -> Vec<A::ValidationType> {
        let mut guard = self.state.lock();
        Self::_by_ledger(
            &mut guard,
            ledger_id,
            Vec::with_capacity,
            |_, val, ret| {
                if val.trusted() && val.full() && val.seq() == seq {
                    ret.push(val.clone());
                }
            },
        )
    }

    /// Returns fees reported by trusted full validators in the given ledger.
    ///
    /// # Params
    /// - ledger_id: The identifier of the ledger
    /// - base_fee: The fee to report if not present in the validation
    pub fn fees(&self, ledger_id: &A::LedgerIdType, base_fee: u32) -> Vec<u32> {
        let mut guard = self.state.lock();
        Self::_by_ledger(
            &mut guard,
            ledger_id,
            Vec::with_capacity,
            |_, val, ret| {
                if val.trusted() && val.full() {
                    ret.push(val.load_fee().unwrap_or(base_fee));
                }
            },
        )
    }

    /// Flush all current validations to the adaptor.
    pub fn flush(&self) {
        let flushed = std::mem::take(&mut self.state.lock().current);
        debug!(count = flushed.len(), "flushing current validations");
        self.adaptor.flush(flushed);
    }

    /// Return quantity of lagging proposers, and remove online proposers
    /// for purposes of evaluating whether to pause.
    ///
    /// Laggards are the trusted proposers whose sequence number is lower
    /// than the sequence number from which our current pending proposal
    /// is based. Proposers from whom we have not received a validation for
    /// awhile are considered offline.
    ///
    /// Note: the trusted flag is not used in this evaluation because it's made
    /// redundant by checking the list of proposers.
    ///
    /// # Params
    /// - seq: Our current sequence number.
    /// - trusted_keys: Public keys of trusted proposers. Keys with a fresh
    ///   current validation are removed.
    ///
    /// # Returns
    /// Quantity of laggards.
    pub fn laggards(&self, seq: LedgerIndex, trusted_keys: &mut HashSet<A::NodeKeyType>) -> usize {
        let mut guard = self.state.lock();
        let now = self.adaptor.now();
        let freshness = self.params.validation_freshness();
        let mut laggards = 0;
        self._current(&mut guard, |_, val| {
            if now < val.seen_time() + freshness && trusted_keys.remove(&val.key()) && seq > val.seq() {
                laggards += 1;
            }
        });
        laggards
    }

    pub fn size_of_current_cache(&self) -> usize {
        self.state.lock().current.len()
    }

    pub fn size_of_seq_enforcers_cache(&self) -> usize {
        self.state.lock().seq_enforcers.len()
    }

    pub fn size_of_by_ledger_cache(&self) -> usize {
        self.state.lock().by_ledger.len()
    }

    pub fn size_of_by_sequence_cache(&self) -> usize {
        self.state.lock().by_sequence.len()
    }

    ///// Private functions
    fn _add(
        &self,
        state: &mut ValidationsState<A, T, C>,
        node_id: &A::NodeIdType,
        validation: &A::ValidationType,
    ) -> ValidationStatus {
        // Check that validation sequence is greater than any non-expired
        // validations sequence from that validator; if it's not, perform
        // additional work to detect Byzantine validations
        let now = state.by_ledger.now();

        let tracked = match state.by_sequence.get_or_insert_mut(validation.seq()).entry(*node_id) {
            Entry::Occupied(mut e) => {
                // Check if the entry we're already tracking was signed
                // long enough ago that we can disregard it.
                let diff = Self::_abs_diff(e.get().sign_time(), validation.sign_time());
                if diff > self.params.validation_current_wall() &&
                    validation.sign_time() > e.get().sign_time() {
                    e.insert(validation.clone());
                }
                e.get().clone()
            }
            Entry::Vacant(e) => e.insert(validation.clone()).clone(),
        };

        // Enforce monotonically increasing sequences for validations
        // by a given node, and run the active Byzantine detector:
        let enforcer = state.seq_enforcers.entry(*node_id).or_default();
        if !enforcer.advance_ledger(now, validation.seq(), &self.params) {
            // The tracked validation is for the same sequence, so check it
            // closely.

            // Two validations for the same sequence but for different
            // ledgers. This could be the result of misconfiguration
            // but it can also mean a Byzantine validator.
            if tracked.ledger_id() != validation.ledger_id() {
                return ValidationStatus::Conflicting;
            }

            // Two validations for the same sequence and for the same
            // ledger with different sign times. This could be the
            // result of a misconfiguration but it can also mean a
            // Byzantine validator.
            if tracked.sign_time() != validation.sign_time() {
                return ValidationStatus::Conflicting;
            }

            // Two validations for the same sequence but with different
            // cookies. This is probably accidental misconfiguration.
            if tracked.cookie() != validation.cookie() {
                return ValidationStatus::Multiple;
            }

            return ValidationStatus::BadSeq;
        }

        state.by_ledger.get_or_insert_mut(validation.ledger_id())
            .insert(*node_id, validation.clone());

        let prior = match state.current.get(node_id) {
            None => None,
            // Replace existing only if this one is newer
            Some(old) if validation.sign_time() > old.sign_time() => Some(old.clone()),
            Some(_) => return ValidationStatus::Stale,
        };

        let prior_key = prior.as_ref().map(|old| (old.seq(), old.ledger_id()));
        if let Some(old) = prior {
            self.adaptor.on_stale(old);
        }
        state.current.insert(*node_id, validation.clone());
        if validation.trusted() {
            self._update_trie(state, node_id, validation, prior_key);
        }
        ValidationStatus::Current
    }

    fn _abs_diff(a: SystemTime, b: SystemTime) -> Duration {
        a.duration_since(b)
            .or_else(|_| b.duration_since(a))
            .unwrap_or_default()
    }

    fn _remove_trie(
        state: &mut ValidationsState<A, T, C>,
        node_id: &A::NodeIdType,
        validation: &A::ValidationType,
    ) {
        Self::_remove_acquiring(state, &(validation.seq(), validation.ledger_id()), node_id);

        if let Entry::Occupied(e) = state.last_ledger.entry(*node_id) {
            if e.get().id() == validation.ledger_id() {
                state.trie.remove(e.get(), None);
                e.remove();
            }
        }
    }

    fn _remove_acquiring(
        state: &mut ValidationsState<A, T, C>,
        key: &(LedgerIndex, A::LedgerIdType),
        node_id: &A::NodeIdType,
    ) {
        if let Entry::Occupied(mut e) = state.acquiring.entry(*key) {
            e.get_mut().remove(node_id);
            if e.get().is_empty() {
                e.remove();
            }
        }
    }

    /// Check if any pending acquire ledger requests are complete
    fn _check_acquired(&self, state: &mut ValidationsState<A, T, C>) {
        let pending: Vec<(LedgerIndex, A::LedgerIdType)> = state.acquiring.keys().copied().collect();
        for key in pending {
            if let Some(ledger) = self.adaptor.acquire(&key.1) {
                if let Some(node_ids) = state.acquiring.remove(&key) {
                    debug!(seq = key.0, ledger = %key.1, nodes = node_ids.len(), "acquired validated ledger");
                    for node_id in node_ids {
                        Self::_update_trie_ledger(state, &node_id, ledger.clone());
                    }
                }
            }
        }
    }

    /// Update the trie to reflect a new validated ledger
    fn _update_trie_ledger(
        state: &mut ValidationsState<A, T, C>,
        node_id: &A::NodeIdType,
        ledger: A::LedgerType,
    ) {
        match state.last_ledger.entry(*node_id) {
            Entry::Occupied(mut e) => {
                state.trie.remove(e.get(), None);
                state.trie.insert(&ledger, None);
                e.insert(ledger);
            }
            Entry::Vacant(e) => {
                state.trie.insert(&ledger, None);
                e.insert(ledger);
            }
        }
    }

    /// Process a new validation
    ///
    /// Process a new trusted validation from a validator. This will be
    /// reflected only after the validated ledger is successfully acquired by
    /// the local node. In the interim, the prior validated ledger from this
    /// node remains.
    ///
    /// # Params
    /// - node_id: The node identifier of the validating node
    /// - validation: The trusted validation issued by the node
    /// - prior: If not none, the last current validated ledger Seq,ID of key
    fn _update_trie(
        &self,
        state: &mut ValidationsState<A, T, C>,
        node_id: &A::NodeIdType,
        validation: &A::ValidationType,
        prior: Option<(LedgerIndex, A::LedgerIdType)>,
    ) {
        debug_assert!(validation.trusted());

        // Clear any prior acquiring ledger for this node
        if let Some(prior) = prior {
            Self::_remove_acquiring(state, &prior, node_id);
        }

        self._check_acquired(state);

        let key = (validation.seq(), validation.ledger_id());
        if let Some(node_ids) = state.acquiring.get_mut(&key) {
            node_ids.insert(*node_id);
        } else if let Some(ledger) = self.adaptor.acquire(&validation.ledger_id()) {
            Self::_update_trie_ledger(state, node_id, ledger);
        } else {
            state.acquiring.entry(key).or_default().insert(*node_id);
        }
    }

    /// Use the trie for a calculation.
    ///
    /// Accessing the trie through this helper ensures acquiring validations are checked
    /// and any stale validations are flushed from the trie.
    fn _with_trie<F, R>(&self, state: &mut ValidationsState<A, T, C>, f: F) -> R
        where F: FnOnce(&T) -> R {
        // Call current to flush any stale validations
        self._current(state, |_, _| {});
        self._check_acquired(state);
        f(&state.trie)
    }

    /// Iterate through current validations, flushing any which are stale.
    ///
    /// # Params
    /// - f: Called on each current validation.
    fn _current<F>(&self, state: &mut ValidationsState<A, T, C>, mut f: F)
        where F: FnMut(&A::NodeIdType, &A::ValidationType) {
        let now = self.adaptor.now();

        let stale: Vec<A::NodeIdType> = state.current.iter()
            .filter(|(_, val)| !is_current(&self.params, now, val.sign_time(), val.seen_time()))
            .map(|(node_id, _)| *node_id)
            .collect();
        if !stale.is_empty() {
            debug!(count = stale.len(), "removing stale current validations");
        }
        for node_id in stale {
            if let Some(val) = state.current.remove(&node_id) {
                Self::_remove_trie(state, &node_id, &val);
                self.adaptor.on_stale(val);
            }
        }

        state.current.iter().for_each(|(node_id, val)| f(node_id, val));
    }

    /// Iterate the set of validations associated with a given ledger id.
    ///
    /// # Params
    /// - ledger_id: The identifier of the ledger
    /// - pre: Called with the number of validations for the ledger, returning
    ///   the accumulator
    /// - f: Called for each validation with the accumulator
    fn _by_ledger<Pre, R, F>(
        state: &mut ValidationsState<A, T, C>,
        ledger_id: &A::LedgerIdType,
        pre: Pre,
        mut f: F,
    ) -> R
        where
            Pre: FnOnce(usize) -> R,
            F: FnMut(&A::NodeIdType, &A::ValidationType, &mut R) {
        if !state.by_ledger.touch(ledger_id) {
            return pre(0);
        }
        match state.by_ledger.get(ledger_id) {
            Some(vals) => {
                let mut ret = pre(vals.len());
                vals.iter().for_each(|(node_id, val)| f(node_id, val, &mut ret));
                ret
            }
            None => pre(0),
        }
    }
}
