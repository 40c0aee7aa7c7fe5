use std::fmt::{Display, Formatter};

use ledger_consensus_core::{Ledger, LedgerIndex};

/// The tip of a span of ledger ancestry.
#[derive(Clone, Debug)]
pub struct SpanTip<T: Ledger> {
    /// The sequence number of the tip ledger.
    seq: LedgerIndex,
    /// The ID of the tip ledger.
    id: T::IdType,
    ledger: T,
}

impl<T: Ledger> SpanTip<T> {
    pub(crate) fn new(seq: LedgerIndex, id: T::IdType, ledger: T) -> Self {
        SpanTip {
            seq,
            id,
            ledger,
        }
    }

    pub fn id(&self) -> T::IdType {
        self.id
    }

    pub fn seq(&self) -> LedgerIndex {
        self.seq
    }

    /// Lookup the ID of an ancestor of the tip ledger by `LedgerIndex`. `seq` must be
    /// less than or equal to the sequence number of the tip ledger.
    ///
    /// # Params
    /// seq - The sequence number of the ancestor.
    pub fn ancestor(&self, seq: LedgerIndex) -> T::IdType {
        self.ledger.get_ancestor(seq)
    }
}

/// Represents a span of ancestry of a ledger.
///
/// The span covers the half-open sequence range `[start, end)` of the ancestry
/// of its backing ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Span<T: Ledger> {
    start: LedgerIndex,
    end: LedgerIndex,
    ledger: T,
}

impl<T: Ledger> Display for Span<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{},{})", self.tip().id(), self.start, self.end)
    }
}

impl<T: Ledger> From<T> for Span<T> {
    /// The span of the entire ancestry of `value`, from genesis to `value` itself.
    fn from(value: T) -> Span<T> {
        Span {
            start: 0,
            end: value.seq() + 1,
            ledger: value,
        }
    }
}

impl<T: Ledger> Default for Span<T> {
    fn default() -> Self {
        Span {
            start: 0,
            end: 1,
            ledger: T::make_genesis(),
        }
    }
}

impl<T: Ledger> Span<T> {
    fn _new(start: LedgerIndex, end: LedgerIndex, ledger: T) -> Self {
        debug_assert!(start < end);
        Span {
            start,
            end,
            ledger,
        }
    }

    pub fn start(&self) -> LedgerIndex {
        self.start
    }

    pub fn end(&self) -> LedgerIndex {
        self.end
    }

    /// Return the Span from [spot,end) or `None` if no such valid span exists.
    pub fn after(&self, spot: LedgerIndex) -> Option<Span<T>> {
        self._sub(spot, self.end)
    }

    /// Return the Span from [start,spot) or `None` if no such valid span exists.
    pub fn before(&self, spot: LedgerIndex) -> Option<Span<T>> {
        self._sub(self.start, spot)
    }

    /// Return the ID of the ledger that starts this span.
    pub fn start_id(&self) -> T::IdType {
        self.ledger.get_ancestor(self.start)
    }

    /// Return the ledger sequence number of the first possible difference
    /// between this span and a given ledger.
    pub fn diff(&self, other: &T) -> LedgerIndex {
        self._clamp(self.ledger.mismatch(other))
    }

    /// Return the tip `SpanTip` of this span.
    pub fn tip(&self) -> SpanTip<T> {
        let tip_seq = self.end - 1;
        SpanTip::new(tip_seq, self.ledger.get_ancestor(tip_seq), self.ledger.clone())
    }

    /// Combine two adjacent spans, keeping the ledger of the span that reaches
    /// the higher sequence.
    pub fn merge(a: &Span<T>, b: &Span<T>) -> Span<T> {
        if a.end < b.end {
            return Span::_new(
                std::cmp::min(a.start, b.start),
                b.end,
                b.ledger.clone(),
            );
        }

        Span::_new(
            std::cmp::min(a.start, b.start),
            a.end,
            a.ledger.clone(),
        )
    }

    fn _clamp(&self, seq: LedgerIndex) -> LedgerIndex {
        std::cmp::min(std::cmp::max(self.start, seq), self.end)
    }

    fn _sub(&self, from: LedgerIndex, to: LedgerIndex) -> Option<Span<T>> {
        let new_from = self._clamp(from);
        let new_to = self._clamp(to);
        if new_from < new_to {
            return Some(Span::_new(new_from, new_to, self.ledger.clone()));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use ledger_consensus_core::Ledger;

    use crate::test_utils::ledgers::LedgerHistoryHelper;

    use super::*;

    #[test]
    fn span_of_ledger_covers_whole_ancestry() {
        let mut h = LedgerHistoryHelper::new();
        let abc = h.get_or_create("abc");
        let span = Span::from(abc.clone());

        assert_eq!(span.start(), 0);
        assert_eq!(span.end(), 4);
        assert_eq!(span.tip().seq(), 3);
        assert_eq!(span.tip().id(), abc.id());
        assert_eq!(span.tip().ancestor(1), h.get_or_create("a").id());
        assert_eq!(span.start_id(), h.get_or_create("").id());
    }

    #[test]
    fn ledger_converts_into_span_and_splits_after() {
        let mut h = LedgerHistoryHelper::new();
        let abc = h.get_or_create("abc");
        let converted: Span<_> = abc.clone().into();
        assert_eq!(converted, Span::from(abc.clone()));

        let suffix = Span::from(abc.clone()).after(2).unwrap();
        assert_eq!((suffix.start(), suffix.end()), (2, 4));
        assert_eq!(suffix.tip().id(), abc.id());
    }

    #[test]
    fn before_and_after_clamp_to_span() {
        let mut h = LedgerHistoryHelper::new();
        let abcd = h.get_or_create("abcd");
        let span = Span::from(abcd).after(1).unwrap();

        let prefix = span.before(3).unwrap();
        assert_eq!((prefix.start(), prefix.end()), (1, 3));
        assert_eq!(prefix.tip().id(), h.get_or_create("ab").id());

        let suffix = span.after(3).unwrap();
        assert_eq!((suffix.start(), suffix.end()), (3, 5));
        assert_eq!(suffix.start_id(), h.get_or_create("abc").id());

        // Cut points outside the span yield nothing on the empty side
        assert!(span.before(1).is_none());
        assert!(span.before(0).is_none());
        assert!(span.after(5).is_none());
        assert!(span.after(42).is_none());
        assert_eq!(span.after(0), Some(span.clone()));
        assert_eq!(span.before(42), Some(span.clone()));
    }

    #[test]
    fn diff_is_clamped_first_mismatch() {
        let mut h = LedgerHistoryHelper::new();
        let abcd = h.get_or_create("abcd");
        let abef = h.get_or_create("abef");
        let a = h.get_or_create("a");
        let span = Span::from(abcd.clone()).after(1).unwrap();

        assert_eq!(span.diff(&abef), 3);
        assert_eq!(span.diff(&abcd), 5);
        // `a` agrees as far as it goes
        assert_eq!(span.diff(&a), 2);

        let suffix = span.after(4).unwrap();
        assert_eq!(suffix.diff(&abef), 4);
    }

    #[test]
    fn merge_keeps_longer_ledger() {
        let mut h = LedgerHistoryHelper::new();
        let abc = h.get_or_create("abc");
        let abcde = h.get_or_create("abcde");
        let parent = Span::from(abc).after(1).unwrap();
        let child = Span::from(abcde.clone()).after(4).unwrap();

        let merged = Span::merge(&parent, &child);
        assert_eq!((merged.start(), merged.end()), (1, 6));
        assert_eq!(merged.tip().id(), abcde.id());
        assert_eq!(Span::merge(&child, &parent), merged);
    }

    #[test]
    fn display_shows_tip_and_range() {
        let mut h = LedgerHistoryHelper::new();
        let ab = h.get_or_create("ab");
        let span = Span::from(ab.clone()).after(1).unwrap();
        assert_eq!(span.to_string(), format!("{}[1,3)", ab.id()));
    }
}
