//! B-Tree Node Types

use std::borrow::Borrow;
use std::fmt::Debug;

use super::bramley::BramleyError;

/// Occupancy bounds derived from the order of a tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Occupancy {
    pub(crate) max: usize,
    pub(crate) min: usize,
}

impl Occupancy {
    /// Both construction and file loading come through here, so `min` is always `max / 2`
    /// (which is `(order - 1) / 2`).
    pub(crate) fn from_max(max: usize) -> Self {
        Self { max, min: max / 2 }
    }

    pub(crate) fn order(&self) -> usize {
        self.max + 1
    }
}

/// Result of pushing an entry down into a subtree.
pub(crate) enum PushDown<E> {
    /// The subtree took the entry without growing.
    Absorbed,
    /// The subtree root split. The median must be placed in the parent, followed by the new
    /// right sibling.
    Split(E, Box<Node<E>>),
}

#[derive(Debug)]
pub(crate) struct Node<E> {
    entries: Vec<E>,
    children: Vec<Box<Node<E>>>,
}

impl<E> Node<E> {
    /// Create an empty node with room for one entry (and child) more than `max`, so that
    /// inserting ahead of a split never reallocates.
    pub(crate) fn try_new(max: usize, leaf: bool) -> Result<Self, BramleyError> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(max + 1)
            .map_err(|_| BramleyError::OutOfMemory)?;
        let mut children = Vec::new();
        if !leaf {
            children
                .try_reserve_exact(max + 2)
                .map_err(|_| BramleyError::OutOfMemory)?;
        }
        Ok(Self { entries, children })
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn entries(&self) -> &[E] {
        &self.entries
    }

    pub(crate) fn children(&self) -> &[Box<Node<E>>] {
        &self.children
    }

    pub(crate) fn push_entry(&mut self, entry: E) {
        self.entries.push(entry);
    }

    pub(crate) fn push_child(&mut self, child: Box<Node<E>>) {
        self.children.push(child);
    }

    pub(crate) fn into_parts(self) -> (Vec<E>, Vec<Box<Node<E>>>) {
        (self.entries, self.children)
    }

    /// Take the only child of an emptied root.
    pub(crate) fn take_only_child(&mut self) -> Option<Box<Node<E>>> {
        debug_assert!(self.entries.is_empty());
        self.children.pop()
    }

    pub(crate) fn first(&self) -> Option<&E> {
        let mut node = self;
        while let Some(child) = node.children.first() {
            node = child;
        }
        node.entries.first()
    }

    pub(crate) fn last(&self) -> Option<&E> {
        let mut node = self;
        while let Some(child) = node.children.last() {
            node = child;
        }
        node.entries.last()
    }

    /// Number of levels from this node down to its leaves.
    pub(crate) fn height(&self) -> usize {
        let mut height = 1;
        let mut node = self;
        while let Some(child) = node.children.first() {
            height += 1;
            node = child;
        }
        height
    }

    pub(crate) fn node_count(&self) -> usize {
        1 + self.children.iter().map(|c| c.node_count()).sum::<usize>()
    }

    pub(crate) fn entry_count(&self) -> usize {
        self.entries.len() + self.children.iter().map(|c| c.entry_count()).sum::<usize>()
    }
}

impl<E: Ord + Debug> Node<E> {
    /// `Ok(idx)` if the target is `entries[idx]`, otherwise `Err(idx)` where `children[idx]` is
    /// the only subtree which could hold it.
    pub(crate) fn locate<Q>(&self, target: &Q) -> Result<usize, usize>
    where
        E: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries
            .binary_search_by(|entry| entry.borrow().cmp(target))
    }

    pub(crate) fn find<Q>(&self, target: &Q) -> Option<&E>
    where
        E: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut node = self;
        loop {
            match node.locate(target) {
                Ok(idx) => return Some(&node.entries[idx]),
                Err(idx) => node = node.children.get(idx)?,
            }
        }
    }

    /// Pre-allocate every node an insert of `entry` could need, so the insert itself cannot fail
    /// part way through. The returned nodes are popped in the order splits happen: the sibling
    /// for the deepest split is last, the new root (if needed) is first.
    pub(crate) fn reserve_splits(
        &self,
        entry: &E,
        occupancy: Occupancy,
    ) -> Result<Vec<Box<Node<E>>>, BramleyError> {
        // Leaf flags of the trailing run of full nodes on the path, top down.
        let mut full_run: Vec<bool> = vec![];
        let mut levels = 0;
        let mut node = self;
        loop {
            levels += 1;
            let idx = match node.locate(entry) {
                Ok(_) => return Err(BramleyError::DuplicateKey),
                Err(idx) => idx,
            };
            if node.len() < occupancy.max {
                full_run.clear();
            } else {
                full_run.push(node.is_leaf());
            }
            match node.children.get(idx) {
                Some(child) => node = child,
                None => break,
            }
        }

        let grows = full_run.len() == levels;
        let mut spares = Vec::new();
        spares
            .try_reserve_exact(full_run.len() + usize::from(grows))
            .map_err(|_| BramleyError::OutOfMemory)?;
        if grows {
            spares.push(Box::new(Node::try_new(occupancy.max, false)?));
        }
        for leaf in full_run {
            spares.push(Box::new(Node::try_new(occupancy.max, leaf)?));
        }
        Ok(spares)
    }

    /// Insert `entry` into this subtree, splitting full nodes on the way back up.
    pub(crate) fn push_down(
        &mut self,
        entry: E,
        occupancy: Occupancy,
        spares: &mut Vec<Box<Node<E>>>,
    ) -> Result<PushDown<E>, BramleyError> {
        let idx = match self.locate(&entry) {
            Ok(_) => return Err(BramleyError::DuplicateKey),
            Err(idx) => idx,
        };

        let (median, right) = match self.children.get_mut(idx) {
            Some(child) => match child.push_down(entry, occupancy, spares)? {
                PushDown::Absorbed => return Ok(PushDown::Absorbed),
                PushDown::Split(median, right) => (median, Some(right)),
            },
            None => (entry, None),
        };

        if self.len() < occupancy.max {
            self.insert_at(idx, median, right);
            return Ok(PushDown::Absorbed);
        }

        let sibling = spares
            .pop()
            .ok_or_else(|| BramleyError::Invariant("no sibling reserved for split".to_string()))?;
        self.insert_at(idx, median, right);
        let (median, sibling) = self.split(occupancy, sibling);
        Ok(PushDown::Split(median, sibling))
    }

    fn insert_at(&mut self, idx: usize, entry: E, right: Option<Box<Node<E>>>) {
        self.entries.insert(idx, entry);
        if let Some(right) = right {
            self.children.insert(idx + 1, right);
        }
    }

    /// Split an overfull node (`max + 1` entries). This node keeps the first `min` entries, the
    /// next entry is returned for promotion and the remainder move into `sibling`.
    fn split(&mut self, occupancy: Occupancy, mut sibling: Box<Node<E>>) -> (E, Box<Node<E>>) {
        debug_assert_eq!(self.entries.len(), occupancy.max + 1);
        let at = occupancy.min;

        tracing::debug!(len = self.entries.len(), at, "splitting node");
        sibling.entries.extend(self.entries.drain(at + 1..));
        if !self.is_leaf() {
            sibling.children.extend(self.children.drain(at + 1..));
        }
        let median = self.entries.remove(at);
        tracing::debug!(left = ?self.entries, ?median, right = ?sibling.entries, "after split");
        (median, sibling)
    }

    /// Remove `target` from this subtree, restoring occupancy on the way back up. On failure
    /// nothing has been modified.
    pub(crate) fn remove<Q>(&mut self, target: &Q, occupancy: Occupancy) -> Result<E, BramleyError>
    where
        E: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        match self.locate(target) {
            Ok(idx) if self.is_leaf() => Ok(self.entries.remove(idx)),
            Ok(idx) => {
                // Replace with the in-order successor, which leaves the right subtree.
                let successor = self.children[idx + 1].remove_first(occupancy);
                let removed = std::mem::replace(&mut self.entries[idx], successor);
                self.rebalance(idx + 1, occupancy);
                Ok(removed)
            }
            Err(idx) => {
                let child = self
                    .children
                    .get_mut(idx)
                    .ok_or(BramleyError::KeyNotPresent)?;
                let removed = child.remove(target, occupancy)?;
                self.rebalance(idx, occupancy);
                Ok(removed)
            }
        }
    }

    // Non-root nodes always hold at least `min` (>= 1) entries, so there is always a first.
    fn remove_first(&mut self, occupancy: Occupancy) -> E {
        match self.children.first_mut() {
            Some(child) => {
                let first = child.remove_first(occupancy);
                self.rebalance(0, occupancy);
                first
            }
            None => self.entries.remove(0),
        }
    }

    fn rebalance(&mut self, pos: usize, occupancy: Occupancy) {
        if self.children[pos].len() < occupancy.min {
            self.restore(pos, occupancy);
        }
    }

    /// Fix an underflow in `children[pos]`, preferring to borrow from a sibling over merging.
    fn restore(&mut self, pos: usize, occupancy: Occupancy) {
        let spare = |node: &Node<E>| node.len() > occupancy.min;
        if pos == 0 {
            if spare(&self.children[1]) {
                self.borrow_from_right(0);
            } else {
                self.merge(1);
            }
        } else if pos == self.len() {
            if spare(&self.children[pos - 1]) {
                self.borrow_from_left(pos);
            } else {
                self.merge(pos);
            }
        } else if spare(&self.children[pos - 1]) {
            self.borrow_from_left(pos);
        } else if spare(&self.children[pos + 1]) {
            self.borrow_from_right(pos);
        } else {
            self.merge(pos);
        }
    }

    /// Rotate the last entry of `children[pos - 1]` through the separator into `children[pos]`.
    fn borrow_from_left(&mut self, pos: usize) {
        tracing::debug!(pos, "borrowing from left sibling");
        let (head, tail) = self.children.split_at_mut(pos);
        let left = &mut head[pos - 1];
        let right = &mut tail[0];
        if let Some(entry) = left.entries.pop() {
            let separator = std::mem::replace(&mut self.entries[pos - 1], entry);
            right.entries.insert(0, separator);
            if let Some(child) = left.children.pop() {
                right.children.insert(0, child);
            }
        }
    }

    /// Rotate the first entry of `children[pos + 1]` through the separator into `children[pos]`.
    fn borrow_from_right(&mut self, pos: usize) {
        tracing::debug!(pos, "borrowing from right sibling");
        let (head, tail) = self.children.split_at_mut(pos + 1);
        let left = &mut head[pos];
        let right = &mut tail[0];
        let entry = right.entries.remove(0);
        let separator = std::mem::replace(&mut self.entries[pos], entry);
        left.entries.push(separator);
        if !right.children.is_empty() {
            left.children.push(right.children.remove(0));
        }
    }

    /// Merge `children[pos]` and the separator before it into `children[pos - 1]`.
    fn merge(&mut self, pos: usize) {
        tracing::debug!(pos, "merging siblings");
        let (entries, children) = self.children.remove(pos).into_parts();
        let separator = self.entries.remove(pos - 1);
        let left = &mut self.children[pos - 1];
        left.entries.push(separator);
        left.entries.extend(entries);
        left.children.extend(children);
    }

    /// Check invariants for this subtree. `lower` and `upper` are the separators which bound it
    /// in the parent. Returns the depth of the leaves beneath this node.
    pub(crate) fn verify(
        &self,
        occupancy: Occupancy,
        is_root: bool,
        lower: Option<&E>,
        upper: Option<&E>,
    ) -> Result<usize, BramleyError> {
        let count = self.entries.len();
        if count > occupancy.max || (!is_root && count < occupancy.min) || count == 0 {
            return Err(BramleyError::Invariant(format!(
                "node holds {count} entries, expected {}..={}",
                if is_root { 1 } else { occupancy.min },
                occupancy.max
            )));
        }
        if self.entries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(BramleyError::Invariant(format!(
                "entries out of order: {:?}",
                self.entries
            )));
        }
        let below = lower.is_some_and(|l| self.entries[0] <= *l);
        let above = upper.is_some_and(|u| self.entries[count - 1] >= *u);
        if below || above {
            return Err(BramleyError::Invariant(format!(
                "entries {:?} escape separators {lower:?}..{upper:?}",
                self.entries
            )));
        }
        if self.is_leaf() {
            return Ok(1);
        }
        if self.children.len() != count + 1 {
            return Err(BramleyError::Invariant(format!(
                "node with {count} entries has {} children",
                self.children.len()
            )));
        }

        let mut depth = None;
        for (idx, child) in self.children.iter().enumerate() {
            let lower = if idx == 0 {
                lower
            } else {
                Some(&self.entries[idx - 1])
            };
            let upper = self.entries.get(idx).or(upper);
            let child_depth = child.verify(occupancy, false, lower, upper)?;
            match depth {
                Some(d) if d != child_depth => {
                    return Err(BramleyError::Invariant(format!(
                        "leaves at depths {d} and {child_depth}"
                    )))
                }
                _ => depth = Some(child_depth),
            }
        }
        Ok(depth.unwrap_or(0) + 1)
    }
}
