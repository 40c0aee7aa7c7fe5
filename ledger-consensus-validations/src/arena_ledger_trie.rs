use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use generational_arena::{Arena, Index};
use serde_json::{json, Map, Value};
use tracing::trace;

use ledger_consensus_core::{Ledger, LedgerIndex};

use crate::ledger_trie::LedgerTrie;
use crate::span::{Span, SpanTip};

struct Node<T: Ledger> {
    span: Span<T>,
    tip_support: u32,
    branch_support: u32,
    children: Vec<Index>,
    parent: Option<Index>,
}

impl<T: Ledger> Default for Node<T> {
    fn default() -> Self {
        Node {
            span: Span::default(),
            tip_support: 0,
            branch_support: 0,
            children: vec![],
            parent: None,
        }
    }
}

impl<T: Ledger> Node<T> {
    fn from_span(span: Span<T>, parent: Index) -> Self {
        Node {
            span,
            tip_support: 0,
            branch_support: 0,
            children: vec![],
            parent: Some(parent),
        }
    }
}

/// A [`LedgerTrie`] whose nodes live in a generational arena.
///
/// Nodes refer to their parent and children by arena [`Index`], so support
/// changes can be propagated upwards without shared ownership of nodes.
///
/// The trie is compressed: a non-root node either has tip support of its own
/// or is a branch point with at least two children. The root always spans
/// the genesis ledger.
///
/// Example, with tip/branch support in parentheses:
///
/// ```text
///                 genesis(0/5)
///                      |
///                    a(0/5)
///                  /       \
///             b(1/3)        c(2/2)
///            /     \
///      bd(1/1)   be(1/1)
/// ```
pub struct ArenaLedgerTrie<T: Ledger> {
    root: Index,
    arena: Arena<Node<T>>,
    /// Count of tip support for each sequence number
    seq_support: BTreeMap<LedgerIndex, u32>,
}

impl<T: Ledger> Default for ArenaLedgerTrie<T> {
    fn default() -> Self {
        let mut arena = Arena::new();
        let root = arena.insert(Node::default());
        ArenaLedgerTrie {
            root,
            arena,
            seq_support: BTreeMap::new(),
        }
    }
}

impl<T: Ledger> LedgerTrie<T> for ArenaLedgerTrie<T> {
    fn insert(&mut self, ledger: &T, count: Option<u32>) {
        let count = count.unwrap_or(1);
        if count == 0 {
            return;
        }

        // Find the node with the longest common ancestry with `ledger`
        // and the sequence of the first ledger difference
        let (loc_idx, diff_seq) = self.find(ledger);

        // Node from which to start incrementing branch support
        let mut inc_node_idx = loc_idx;

        // loc.span has the longest common prefix with Span::from(ledger) of all
        // existing nodes in the trie. The Option<Span>'s below represent
        // the possible common suffixes between loc.span and Span::from(ledger).
        //
        // loc.span
        //  a b c  | d e f
        //  prefix | old_suffix
        //
        // Span::from(ledger)
        //  a b c  | g h i
        //  prefix | new_suffix
        let loc = &self.arena[loc_idx];
        let prefix = loc.span.before(diff_seq);
        let old_suffix = loc.span.after(diff_seq);
        let new_suffix = Span::from(ledger.clone()).after(diff_seq);

        if let (Some(prefix), Some(old_suffix)) = (prefix, old_suffix) {
            // Have
            //   abcdef -> ....
            // Inserting
            //   abc
            // Becomes
            //   abc -> def -> ...
            trace!(split = %loc.span, at = diff_seq, "splitting ledger trie node");

            // The old suffix node takes over loc's support and children.
            let loc = &mut self.arena[loc_idx];
            let children = std::mem::take(&mut loc.children);
            let old_suffix_node = Node {
                span: old_suffix,
                tip_support: loc.tip_support,
                branch_support: loc.branch_support,
                children: children.clone(),
                parent: Some(loc_idx),
            };
            let old_suffix_idx = self.arena.insert(old_suffix_node);
            for child_idx in children {
                self.arena[child_idx].parent = Some(old_suffix_idx);
            }

            // loc truncates to prefix and the old suffix is its only child
            let loc = &mut self.arena[loc_idx];
            loc.span = prefix;
            loc.children.push(old_suffix_idx);
            loc.tip_support = 0;
        }

        if let Some(new_suffix) = new_suffix {
            // Have
            //  abc -> ...
            // Inserting
            //  abcdef-> ...
            // Becomes
            //  abc -> ...
            //     \-> def
            let new_idx = self.arena.insert(Node::from_span(new_suffix, loc_idx));
            self.arena[loc_idx].children.push(new_idx);
            inc_node_idx = new_idx;
        }

        self.arena[inc_node_idx].tip_support += count;
        let mut curr = Some(inc_node_idx);
        while let Some(idx) = curr {
            let node = &mut self.arena[idx];
            node.branch_support += count;
            curr = node.parent;
        }

        *self.seq_support.entry(ledger.seq()).or_insert(0) += count;
    }

    fn remove(&mut self, ledger: &T, count: Option<u32>) -> bool {
        // Must be exact match with tip support
        let mut loc_idx = match self.find_by_ledger_id(ledger) {
            Some(idx) if self.arena[idx].tip_support > 0 => idx,
            _ => return false,
        };

        let count = std::cmp::min(count.unwrap_or(1), self.arena[loc_idx].tip_support);
        self.arena[loc_idx].tip_support -= count;

        if let Entry::Occupied(mut e) = self.seq_support.entry(ledger.seq()) {
            *e.get_mut() = e.get().saturating_sub(count);
            if *e.get() == 0 {
                e.remove();
            }
        }

        let mut curr = Some(loc_idx);
        while let Some(idx) = curr {
            let node = &mut self.arena[idx];
            node.branch_support -= count;
            curr = node.parent;
        }

        while loc_idx != self.root && self.arena[loc_idx].tip_support == 0 {
            let parent_idx = match self.arena[loc_idx].parent {
                Some(parent_idx) => parent_idx,
                None => break,
            };

            match self.arena[loc_idx].children.len() {
                0 => {
                    // this node can be erased
                    trace!(span = %self.arena[loc_idx].span, "erasing ledger trie node");
                    self.erase_child(parent_idx, loc_idx);
                    self.arena.remove(loc_idx);
                }
                1 => {
                    // This node can be combined with its child
                    let child_idx = self.arena[loc_idx].children[0];
                    let merged = Span::merge(&self.arena[loc_idx].span, &self.arena[child_idx].span);
                    trace!(span = %merged, "merging ledger trie node into its child");
                    let child = &mut self.arena[child_idx];
                    child.span = merged;
                    child.parent = Some(parent_idx);
                    self.arena[parent_idx].children.push(child_idx);
                    self.erase_child(parent_idx, loc_idx);
                    self.arena.remove(loc_idx);
                }
                _ => break,
            }
            loc_idx = parent_idx;
        }
        true
    }

    fn tip_support(&self, ledger: &T) -> u32 {
        self.find_by_ledger_id(ledger)
            .map_or(0, |idx| self.arena[idx].tip_support)
    }

    fn branch_support(&self, ledger: &T) -> u32 {
        if let Some(idx) = self.find_by_ledger_id(ledger) {
            return self.arena[idx].branch_support;
        }

        // Check that ledger is an exact match or proper prefix of loc
        let (loc_idx, diff_seq) = self.find(ledger);
        let loc = &self.arena[loc_idx];
        if diff_seq > ledger.seq() && ledger.seq() < loc.span.end() {
            return loc.branch_support;
        }
        0
    }

    /// The preferred ledger is the tip of the branch with the most support
    /// that cannot be overturned by validations not yet attributable to a
    /// branch.
    ///
    /// Support from validations at sequence numbers not yet reached while
    /// walking down the trie is *uncommitted*: the validators may yet move to
    /// any branch below. Support is committed as the walk passes its sequence,
    /// and support for sequences before `largest_issued` is always treated as
    /// uncommitted, since this node has already validated at that height and
    /// cannot switch below it.
    ///
    /// Within a span, the walk continues as long as the node's branch support
    /// exceeds the uncommitted support. At the end of a span it descends into
    /// the child with the most branch support (ties go to the larger starting
    /// ledger ID), provided that child's margin over the runner-up exceeds the
    /// uncommitted support.
    fn get_preferred(&self, largest_issued: LedgerIndex) -> Option<SpanTip<T>> {
        if self.empty() {
            return None;
        }

        let mut curr = &self.arena[self.root];
        let mut uncommitted: u32 = 0;
        let mut uncommitted_it = self.seq_support.iter().peekable();

        loop {
            // Within a single span, the preferred by branch strategy is simply
            // to continue along the span as long as the branch support of
            // the next ledger exceeds the uncommitted support for that ledger.

            // Add any initial uncommitted support prior for ledgers
            // earlier than next_seq or earlier than largest_issued
            let mut next_seq = curr.span.start() + 1;
            while let Some((&seq, &support)) = uncommitted_it.peek() {
                if seq >= std::cmp::max(next_seq, largest_issued) {
                    break;
                }
                uncommitted += support;
                uncommitted_it.next();
            }

            // Advance next_seq along the span
            while next_seq < curr.span.end() && curr.branch_support > uncommitted {
                // Jump to the next seq_support change
                match uncommitted_it.peek() {
                    Some((&seq, &support)) if seq < curr.span.end() => {
                        next_seq = seq + 1;
                        uncommitted += support;
                        uncommitted_it.next();
                    }
                    // otherwise we jump to the end of the span
                    _ => next_seq = curr.span.end(),
                }
            }

            // We did not consume the entire span, so we have found the
            // preferred ledger
            if next_seq < curr.span.end() {
                return curr.span.before(next_seq).map(|span| span.tip());
            }

            // We have reached the end of the current span, so we need to
            // find the best child
            let (best, margin) = self.best_child(curr);

            // If the best child has margin exceeding the uncommitted support,
            // continue from that child, otherwise we are done
            match best {
                Some(best) if margin > uncommitted || uncommitted == 0 => curr = best,
                _ => break,
            }
        }

        Some(curr.span.tip())
    }

    fn empty(&self) -> bool {
        self.arena[self.root].branch_support == 0
    }

    fn check_invariants(&self) -> bool {
        let mut expected_seq_support: BTreeMap<LedgerIndex, u32> = BTreeMap::new();
        let mut nodes = vec![self.root];

        while let Some(idx) = nodes.pop() {
            let curr = match self.arena.get(idx) {
                Some(curr) => curr,
                None => return false,
            };

            // Node with 0 tip support must have multiple children
            // unless it is the root node
            if idx != self.root && curr.tip_support == 0 && curr.children.len() < 2 {
                return false;
            }

            // branch_support = tip_support + sum(child.branch_support)
            let mut support = curr.tip_support as u64;
            if curr.tip_support != 0 {
                *expected_seq_support.entry(curr.span.end() - 1).or_insert(0) += curr.tip_support;
            }

            for child_idx in &curr.children {
                let child = match self.arena.get(*child_idx) {
                    Some(child) => child,
                    None => return false,
                };
                if child.parent != Some(idx) {
                    return false;
                }
                support += child.branch_support as u64;
                nodes.push(*child_idx);
            }

            if support != curr.branch_support as u64 {
                return false;
            }
        }

        expected_seq_support == self.seq_support
    }

    fn get_json(&self) -> Value {
        let seq_support: Map<String, Value> = self.seq_support.iter()
            .map(|(seq, support)| (seq.to_string(), json!(support)))
            .collect();
        json!({
            "trie": self.node_json(self.root),
            "seq_support": seq_support,
        })
    }
}

impl<T: Ledger> ArenaLedgerTrie<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the node in the trie that represents the longest common ancestry
    /// with the given ledger.
    ///
    /// # Return
    /// A tuple of the found node's `Index` and the `LedgerIndex` of the first
    /// ledger difference.
    fn find(&self, ledger: &T) -> (Index, LedgerIndex) {
        // Root is always defined and is in common with all ledgers
        let mut curr_idx = self.root;
        let mut curr = &self.arena[curr_idx];
        let mut pos = curr.span.diff(ledger);

        let mut done = false;

        // Continue searching for a better span as long as the current position
        // matches the entire span
        while !done && pos == curr.span.end() {
            done = true;

            // Find the child with the longest ancestry match
            for child_idx in &curr.children {
                let child = &self.arena[*child_idx];
                let child_pos = child.span.diff(ledger);

                if child_pos > pos {
                    done = false;
                    pos = child_pos;
                    curr_idx = *child_idx;
                    curr = child;
                    break;
                }
            }
        }

        (curr_idx, pos)
    }

    /// Find the node whose span ends exactly at `ledger`.
    fn find_by_ledger_id(&self, ledger: &T) -> Option<Index> {
        let id = ledger.id();
        let mut nodes = vec![self.root];
        while let Some(idx) = nodes.pop() {
            let node = &self.arena[idx];
            if node.span.tip().id() == id {
                return Some(idx);
            }
            nodes.extend(node.children.iter().copied());
        }
        None
    }

    /// Select the child of `node` with the most branch support, breaking ties
    /// with the span's starting ID.
    ///
    /// # Returns
    /// The best child, if any, and its margin of support over the runner-up. The
    /// margin includes one extra vote when the best child holds the tie-breaker,
    /// since the runner-up would need that vote to overcome the tie.
    fn best_child(&self, node: &Node<T>) -> (Option<&Node<T>>, u32) {
        match node.children.len() {
            0 => (None, 0),
            1 => {
                let best = &self.arena[node.children[0]];
                (Some(best), best.branch_support)
            }
            _ => {
                let mut ranked: Vec<(u32, T::IdType, Index)> = node.children.iter()
                    .map(|idx| {
                        let child = &self.arena[*idx];
                        (child.branch_support, child.span.start_id(), *idx)
                    })
                    .collect();
                ranked.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));

                let (best_support, best_id, best_idx) = ranked[0];
                let (second_support, second_id, _) = ranked[1];
                let mut margin = best_support - second_support;
                if best_id > second_id {
                    margin += 1;
                }
                (Some(&self.arena[best_idx]), margin)
            }
        }
    }

    fn erase_child(&mut self, parent_idx: Index, child_idx: Index) {
        let children = &mut self.arena[parent_idx].children;
        if let Some(pos) = children.iter().position(|idx| *idx == child_idx) {
            children.swap_remove(pos);
        }
    }

    fn node_json(&self, idx: Index) -> Value {
        let node = &self.arena[idx];
        let tip = node.span.tip();
        let children: Vec<Value> = node.children.iter()
            .map(|child_idx| self.node_json(*child_idx))
            .collect();
        json!({
            "id": tip.id().to_string(),
            "seq": tip.seq(),
            "span": node.span.to_string(),
            "tip_support": node.tip_support,
            "branch_support": node.branch_support,
            "children": children,
        })
    }

    fn fmt_node(&self, f: &mut Formatter<'_>, idx: Index, depth: usize) -> std::fmt::Result {
        let node = &self.arena[idx];
        if depth > 0 {
            write!(f, "{}|-", "  ".repeat(depth - 1))?;
        }
        writeln!(f, "{}(T:{},B:{})", node.span, node.tip_support, node.branch_support)?;
        for child_idx in &node.children {
            self.fmt_node(f, *child_idx, depth + 1)?;
        }
        Ok(())
    }
}

impl<T: Ledger> Display for ArenaLedgerTrie<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.fmt_node(f, self.root, 0)
    }
}
